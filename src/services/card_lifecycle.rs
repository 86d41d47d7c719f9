use std::time::Instant;

use chrono::{DateTime, Utc};
use url::Url;
use uuid::Uuid;

use crate::models::{
    card::{DEFAULT_REACTIVATION_REASON, DEFAULT_REVOCATION_REASON},
    Card, CardPatch, NewCard,
};
use crate::services::{
    asset_store::AssetStore,
    card_id::{self, CardIdError, CodeSource},
    card_store::{CardStore, MemberRegistry, StoreError},
    qr_generator::{self, CredentialAsset, CredentialAssetError},
};

#[derive(thiserror::Error, Debug)]
pub enum LifecycleError {
    #[error("Member not found")]
    MemberNotFound,

    #[error("Card not found")]
    CardNotFound,

    #[error("Member already has an active card: {}", .0.join(", "))]
    DuplicateActiveCard(Vec<String>),

    #[error("Card is already inactive")]
    AlreadyInactive,

    #[error("Card is already active")]
    AlreadyActive,

    #[error("Could not generate a unique card ID after {0} attempts")]
    CodeGenerationExhausted(usize),

    #[error("Card ID generation failed: {0}")]
    CardIdGeneration(CardIdError),

    #[error("Credential asset generation failed: {0}")]
    CredentialAsset(#[from] CredentialAssetError),

    #[error("Store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for LifecycleError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ActiveCardExists(ids) => LifecycleError::DuplicateActiveCard(ids),
            StoreError::CardNotFound => LifecycleError::CardNotFound,
            // The code was checked free before upload; a concurrent issuance claimed it first.
            StoreError::CardIdTaken(_) => LifecycleError::CodeGenerationExhausted(1),
            other => LifecycleError::Store(other),
        }
    }
}

impl From<CardIdError> for LifecycleError {
    fn from(err: CardIdError) -> Self {
        match err {
            CardIdError::Exhausted(attempts) => LifecycleError::CodeGenerationExhausted(attempts),
            CardIdError::Store(e) => e.into(),
            other => LifecycleError::CardIdGeneration(other),
        }
    }
}

/// How a revoke/reactivate request addresses its card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CardRef {
    /// Store-assigned record id
    Id(Uuid),
    /// Printed card code, e.g. `OMA-20240110-AB12`
    Code(String),
}

impl CardRef {
    /// UUIDs address the record id; anything else is treated as a card code.
    pub fn parse(raw: &str) -> Self {
        match Uuid::parse_str(raw) {
            Ok(id) => CardRef::Id(id),
            Err(_) => CardRef::Code(raw.to_string()),
        }
    }
}

impl std::fmt::Display for CardRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CardRef::Id(id) => write!(f, "{}", id),
            CardRef::Code(code) => f.write_str(code),
        }
    }
}

/// Request to issue a new membership card
pub struct IssueCardRequest {
    pub member_id: Uuid,
    pub issued_at: DateTime<Utc>,
}

/// Result of card issuance
#[derive(Debug)]
pub struct IssuedCard {
    pub card: Card,
    pub credential: CredentialAsset,
}

/// Issues a new membership card
///
/// 1. Checks the member exists
/// 2. Refuses if the member already holds an active card
/// 3. Generates an unused card ID
/// 4. Renders and uploads the QR credential
/// 5. Persists the card, re-checking step 2 atomically with the insert
///
/// An existing active card is never revoked implicitly. If step 5 loses a
/// race to a concurrent issuance, the uploaded asset is left unreferenced.
#[tracing::instrument(
    skip(store, assets, codes, verification_base, request),
    fields(member_id = %request.member_id)
)]
pub async fn issue_card<S, A, C>(
    store: &S,
    assets: &A,
    codes: &C,
    verification_base: &Url,
    request: IssueCardRequest,
) -> Result<IssuedCard, LifecycleError>
where
    S: CardStore + MemberRegistry,
    A: AssetStore,
    C: CodeSource,
{
    let start_time = Instant::now();

    if !store.member_exists(request.member_id).await? {
        tracing::warn!("Member not found");
        return Err(LifecycleError::MemberNotFound);
    }

    let active = store.find_active_by_member(request.member_id).await?;
    if !active.is_empty() {
        let ids: Vec<String> = active.into_iter().map(|c| c.card_id).collect();
        tracing::warn!(active_cards = ?ids, "Member already has an active card");
        return Err(LifecycleError::DuplicateActiveCard(ids));
    }

    let card_id = card_id::generate_unique(store, codes, request.issued_at).await?;
    tracing::debug!(card_id = %card_id, "Generated card ID");

    let upload_start = Instant::now();
    let credential =
        qr_generator::generate_credential_asset(assets, verification_base, &card_id).await?;
    let upload_duration = upload_start.elapsed();

    tracing::info!(
        card_id = %card_id,
        asset_id = %credential.asset.id,
        asset_upload_ms = upload_duration.as_millis(),
        "Credential asset uploaded"
    );

    let card = store
        .create(NewCard::issued(
            card_id,
            request.member_id,
            credential.asset.id.clone(),
            credential.asset.url.clone(),
            request.issued_at,
        ))
        .await
        .map_err(|e| {
            match &e {
                StoreError::ActiveCardExists(ids) => tracing::warn!(
                    asset_id = %credential.asset.id,
                    active_cards = ?ids,
                    "Lost issuance race; credential asset left unreferenced"
                ),
                StoreError::CardIdTaken(card_id) => tracing::warn!(
                    asset_id = %credential.asset.id,
                    card_id = %card_id,
                    "Card ID claimed concurrently; credential asset left unreferenced"
                ),
                _ => {}
            }
            LifecycleError::from(e)
        })?;

    tracing::info!(
        card_id = %card.card_id,
        expiry_date = %card.expiry_date.to_rfc3339(),
        duration_ms = start_time.elapsed().as_millis(),
        "Card issued"
    );

    Ok(IssuedCard { card, credential })
}

async fn resolve_card<S: CardStore>(store: &S, card: &CardRef) -> Result<Card, LifecycleError> {
    let found = match card {
        CardRef::Id(id) => store.find_by_id(*id).await?,
        CardRef::Code(code) => store.find_by_card_id(code).await?.map(|view| view.card),
    };

    found.ok_or(LifecycleError::CardNotFound)
}

fn reason_or(reason: Option<String>, default: &str) -> String {
    reason
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Revokes an active card
///
/// Revoke racing a reactivate on the same card is not serialized; the last
/// write wins.
#[tracing::instrument(skip(store, card), fields(card = %card))]
pub async fn revoke_card<S: CardStore>(
    store: &S,
    card: &CardRef,
    reason: Option<String>,
    now: DateTime<Utc>,
) -> Result<Card, LifecycleError> {
    let existing = resolve_card(store, card).await?;

    if !existing.is_active {
        tracing::warn!(card_id = %existing.card_id, "Card is already inactive");
        return Err(LifecycleError::AlreadyInactive);
    }

    let reason = reason_or(reason, DEFAULT_REVOCATION_REASON);
    let revoked = store
        .patch(existing.id, CardPatch::revoke(now, reason))
        .await?;

    tracing::info!(
        card_id = %revoked.card_id,
        reason = ?revoked.revocation_reason,
        "Card revoked"
    );

    Ok(revoked)
}

/// Reactivates a revoked card, removing its revocation fields
///
/// Refused while the member holds another active card.
#[tracing::instrument(skip(store, card), fields(card = %card))]
pub async fn reactivate_card<S: CardStore>(
    store: &S,
    card: &CardRef,
    reason: Option<String>,
    now: DateTime<Utc>,
) -> Result<Card, LifecycleError> {
    let existing = resolve_card(store, card).await?;

    if existing.is_active {
        tracing::warn!(card_id = %existing.card_id, "Card is already active");
        return Err(LifecycleError::AlreadyActive);
    }

    let others: Vec<String> = store
        .find_active_by_member(existing.member_ref)
        .await?
        .into_iter()
        .filter(|c| c.id != existing.id)
        .map(|c| c.card_id)
        .collect();
    if !others.is_empty() {
        tracing::warn!(active_cards = ?others, "Member already has another active card");
        return Err(LifecycleError::DuplicateActiveCard(others));
    }

    let reason = reason_or(reason, DEFAULT_REACTIVATION_REASON);
    let reactivated = store
        .patch(existing.id, CardPatch::reactivate(now, reason))
        .await?;

    tracing::info!(
        card_id = %reactivated.card_id,
        reason = ?reactivated.reactivation_reason,
        "Card reactivated"
    );

    Ok(reactivated)
}
