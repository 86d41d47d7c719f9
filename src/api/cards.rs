use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, patch, post},
    Extension, Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::middleware::{auth::require_staff, auth::AuthenticatedStaff, session::AppState};
use crate::error::{AppError, Result};
use crate::models::Card;
use crate::services::{
    card_lifecycle::{self, CardRef, IssueCardRequest},
    card_verifier::{self, CardHistoryEntry},
};

#[derive(Debug, Deserialize)]
pub struct ReasonBody {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedCardBody {
    #[serde(flatten)]
    pub card: Card,
    pub verification_url: String,
}

#[derive(Debug, Serialize)]
pub struct CardResponse<T> {
    pub success: bool,
    pub message: &'static str,
    pub card: T,
}

#[derive(Debug, Serialize)]
pub struct CardHistoryResponse {
    pub success: bool,
    pub count: usize,
    pub cards: Vec<CardHistoryEntry>,
}

/// Reads the optional `{ "reason": ... }` body. An empty body means no reason;
/// anything else must be valid JSON.
fn parse_reason(body: &[u8]) -> Result<Option<String>> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }

    let Json(body) = Json::<ReasonBody>::from_bytes(body)
        .map_err(|rejection| AppError::Validation(rejection.body_text()))?;
    Ok(body.reason)
}

fn parse_member_id(raw: &str) -> Result<Uuid> {
    // A malformed id cannot name an existing member.
    Uuid::parse_str(raw).map_err(|_| AppError::NotFound("Member not found".to_string()))
}

/// Issues a card to a member
async fn generate_card(
    State(state): State<AppState>,
    Extension(staff): Extension<AuthenticatedStaff>,
    Path(member_id): Path<String>,
) -> Result<impl IntoResponse> {
    let member_id = parse_member_id(&member_id)?;

    let issued = card_lifecycle::issue_card(
        &state.pool,
        &state.assets,
        &state.card_ids,
        &state.config.verification_base_url,
        IssueCardRequest {
            member_id,
            issued_at: Utc::now(),
        },
    )
    .await?;

    tracing::info!(
        staff_id = %staff.staff_id,
        card_id = %issued.card.card_id,
        "Card generated"
    );

    Ok((
        StatusCode::CREATED,
        Json(CardResponse {
            success: true,
            message: "Card generated successfully",
            card: IssuedCardBody {
                card: issued.card,
                verification_url: issued.credential.verification_url.to_string(),
            },
        }),
    ))
}

async fn revoke_card(
    State(state): State<AppState>,
    Extension(staff): Extension<AuthenticatedStaff>,
    Path(card): Path<String>,
    body: Bytes,
) -> Result<Json<CardResponse<Card>>> {
    let reason = parse_reason(&body)?;

    let card = card_lifecycle::revoke_card(&state.pool, &CardRef::parse(&card), reason, Utc::now())
        .await?;

    tracing::info!(staff_id = %staff.staff_id, card_id = %card.card_id, "Card revoked by staff");

    Ok(Json(CardResponse {
        success: true,
        message: "Card revoked successfully",
        card,
    }))
}

async fn reactivate_card(
    State(state): State<AppState>,
    Extension(staff): Extension<AuthenticatedStaff>,
    Path(card): Path<String>,
    body: Bytes,
) -> Result<Json<CardResponse<Card>>> {
    let reason = parse_reason(&body)?;

    let card = card_lifecycle::reactivate_card(
        &state.pool,
        &CardRef::parse(&card),
        reason,
        Utc::now(),
    )
    .await?;

    tracing::info!(staff_id = %staff.staff_id, card_id = %card.card_id, "Card reactivated by staff");

    Ok(Json(CardResponse {
        success: true,
        message: "Card reactivated successfully",
        card,
    }))
}

/// Lists a member's cards, newest first
async fn member_cards(
    State(state): State<AppState>,
    Path(member_id): Path<String>,
) -> Result<Json<CardHistoryResponse>> {
    let member_id = parse_member_id(&member_id)?;

    let cards = card_verifier::card_history(&state.pool, member_id, Utc::now()).await?;

    Ok(Json(CardHistoryResponse {
        success: true,
        count: cards.len(),
        cards,
    }))
}

pub fn router() -> Router<AppState> {
    // Every path shares the `:id` parameter name; it is a member id or a card
    // reference depending on the action.
    Router::new()
        .route("/api/members/:id/generate-card", post(generate_card))
        .route("/api/members/:id/revoke-card", patch(revoke_card))
        .route("/api/members/:id/reactivate-card", patch(reactivate_card))
        .route("/api/members/:id/cards", get(member_cards))
        .route_layer(middleware::from_fn(require_staff))
}
