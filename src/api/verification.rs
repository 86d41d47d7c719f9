use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::Serialize;

use crate::api::middleware::session::AppState;
use crate::error::Result;
use crate::services::card_verifier::{self, VerificationOutcome};

#[derive(Debug, Serialize)]
pub struct VerifyCardResponse {
    pub success: bool,
    #[serde(flatten)]
    pub outcome: VerificationOutcome,
}

/// Public verification by card code; no authentication.
async fn verify_card(
    State(state): State<AppState>,
    Path(card_id): Path<String>,
) -> Result<Json<VerifyCardResponse>> {
    let outcome = card_verifier::verify_card(&state.pool, &card_id, Utc::now()).await?;

    Ok(Json(VerifyCardResponse {
        success: true,
        outcome,
    }))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/api/verify-card/:card_id", get(verify_card))
}
