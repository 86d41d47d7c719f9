use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::services::{card_lifecycle::LifecycleError, card_verifier::VerificationError};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    /// Client-caused state conflict; `active_cards` lists the cards in the way.
    #[error("Conflict: {message}")]
    Conflict {
        message: String,
        active_cards: Vec<String>,
    },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Upstream failure: {0}")]
    UpstreamFailure(String),

    #[error("Card ID generation exhausted after {0} attempts")]
    CodeGenerationExhausted(usize),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    fn conflict(message: impl Into<String>) -> Self {
        AppError::Conflict {
            message: message.into(),
            active_cards: Vec::new(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict { .. } | AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::UpstreamFailure(_)
            | AppError::CodeGenerationExhausted(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<LifecycleError> for AppError {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::MemberNotFound => AppError::NotFound("Member not found".to_string()),
            LifecycleError::CardNotFound => AppError::NotFound("Card not found".to_string()),
            LifecycleError::DuplicateActiveCard(active_cards) => AppError::Conflict {
                message: "Member already has an active card".to_string(),
                active_cards,
            },
            LifecycleError::AlreadyInactive => AppError::conflict("Card is already inactive"),
            LifecycleError::AlreadyActive => AppError::conflict("Card is already active"),
            LifecycleError::CodeGenerationExhausted(attempts) => {
                AppError::CodeGenerationExhausted(attempts)
            }
            other @ (LifecycleError::CardIdGeneration(_)
            | LifecycleError::CredentialAsset(_)
            | LifecycleError::Store(_)) => AppError::UpstreamFailure(other.to_string()),
        }
    }
}

impl From<VerificationError> for AppError {
    fn from(err: VerificationError) -> Self {
        match err {
            VerificationError::CardNotFound => AppError::NotFound("Card not found".to_string()),
            VerificationError::MemberNotFound => {
                AppError::NotFound("Member not found".to_string())
            }
            VerificationError::Store(e) => AppError::UpstreamFailure(e.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let body = match self {
            AppError::NotFound(message) | AppError::Validation(message) => json!({
                "success": false,
                "message": message,
            }),
            AppError::Conflict {
                message,
                active_cards,
            } if !active_cards.is_empty() => json!({
                "success": false,
                "message": message,
                "activeCards": active_cards,
            }),
            AppError::Conflict { message, .. } => json!({
                "success": false,
                "message": message,
            }),
            AppError::Unauthorized => json!({
                "success": false,
                "message": "Authentication required",
            }),
            // Server-side failures are logged in full and reported generically.
            other => {
                tracing::error!(error = ?other, "Request failed");
                json!({
                    "success": false,
                    "message": "Server error",
                })
            }
        };

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
