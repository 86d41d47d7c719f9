use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::models::{Card, CardStatus, CardView};
use crate::services::card_store::{CardStore, MemberRegistry, StoreError};

#[derive(thiserror::Error, Debug)]
pub enum VerificationError {
    #[error("Card not found")]
    CardNotFound,

    #[error("Member not found")]
    MemberNotFound,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Answer given to whoever scanned a card
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationOutcome {
    pub is_valid: bool,
    pub status: CardStatus,
    pub card: CardView,
}

impl VerificationOutcome {
    /// Evaluates validity at `now`; expiry is derived, never stored.
    pub fn evaluate(card: CardView, now: DateTime<Utc>) -> Self {
        Self {
            is_valid: card.card.is_valid_at(now),
            status: card.card.status_at(now),
            card,
        }
    }
}

/// One entry of a member's card history
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CardHistoryEntry {
    #[serde(flatten)]
    pub card: Card,
    pub status: CardStatus,
}

/// Verifies a card by its printed code
///
/// Read-only and unauthenticated: reports validity plus the member's display
/// fields. Always reads the store; results are never cached.
#[tracing::instrument(skip(store))]
pub async fn verify_card<S: CardStore>(
    store: &S,
    card_id: &str,
    now: DateTime<Utc>,
) -> Result<VerificationOutcome, VerificationError> {
    let card = match store.find_by_card_id(card_id).await? {
        Some(card) => card,
        None => {
            tracing::warn!("Card not found");
            return Err(VerificationError::CardNotFound);
        }
    };

    let outcome = VerificationOutcome::evaluate(card, now);

    tracing::info!(
        is_valid = outcome.is_valid,
        status = outcome.status.as_str(),
        "Card verified"
    );

    Ok(outcome)
}

/// Lists every card issued to a member with its current status
#[tracing::instrument(skip(store))]
pub async fn card_history<S: CardStore + MemberRegistry>(
    store: &S,
    member_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Vec<CardHistoryEntry>, VerificationError> {
    if !store.member_exists(member_id).await? {
        return Err(VerificationError::MemberNotFound);
    }

    let entries = store
        .list_by_member(member_id)
        .await?
        .into_iter()
        .map(|card| CardHistoryEntry {
            status: card.status_at(now),
            card,
        })
        .collect();

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryStore;
    use crate::models::CardPatch;
    use crate::services::card_store::CardStore;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_active_card_is_valid_with_member_fields() {
        let store = MemoryStore::new();
        let member = store.add_member("Amina", "Bello");
        store.insert_card(member, "OMA-20240110-AB12", at(2024, 1, 10), true);

        let outcome = verify_card(&store, "OMA-20240110-AB12", at(2024, 6, 1))
            .await
            .unwrap();

        assert!(outcome.is_valid);
        assert_eq!(outcome.status, CardStatus::Active);
        let shown = outcome.card.member.as_ref().unwrap();
        assert_eq!(shown.first_name, "Amina");
        assert_eq!(shown.last_name, "Bello");

        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["isValid"], true);
        assert_eq!(json["status"], "active");
        assert_eq!(json["card"]["cardId"], "OMA-20240110-AB12");
        assert_eq!(json["card"]["member"]["firstName"], "Amina");
    }

    #[tokio::test]
    async fn test_expired_active_card_reports_expired() {
        let store = MemoryStore::new();
        let member = store.add_member("Amina", "Bello");
        let card = store.insert_card(member, "OMA-20240110-AB12", at(2024, 1, 10), true);
        assert_eq!(card.expiry_date, at(2025, 1, 10));

        let outcome = verify_card(&store, "OMA-20240110-AB12", at(2025, 1, 11))
            .await
            .unwrap();

        assert!(!outcome.is_valid);
        assert_eq!(outcome.status, CardStatus::Expired);

        // Expiry is never written back.
        let stored = store.find_by_id(card.id).await.unwrap().unwrap();
        assert!(stored.is_active);
    }

    #[tokio::test]
    async fn test_revoked_and_expired_reports_revoked() {
        let store = MemoryStore::new();
        let member = store.add_member("Amina", "Bello");
        let card = store.insert_card(member, "OMA-20240110-AB12", at(2024, 1, 10), true);
        store
            .patch(card.id, CardPatch::revoke(at(2024, 5, 1), "Lost".to_string()))
            .await
            .unwrap();

        let outcome = verify_card(&store, "OMA-20240110-AB12", at(2025, 6, 1))
            .await
            .unwrap();

        assert!(!outcome.is_valid);
        assert_eq!(outcome.status, CardStatus::Revoked);
        assert_eq!(outcome.card.card.revocation_reason.as_deref(), Some("Lost"));
    }

    #[tokio::test]
    async fn test_unknown_card_is_not_found() {
        let store = MemoryStore::new();

        let err = verify_card(&store, "OMA-20240110-NOPE", at(2024, 6, 1))
            .await
            .unwrap_err();

        assert!(matches!(err, VerificationError::CardNotFound));
    }

    #[tokio::test]
    async fn test_card_without_member_still_verifies() {
        let store = MemoryStore::new();
        store.insert_card(Uuid::new_v4(), "OMA-20240110-AB12", at(2024, 1, 10), true);

        let outcome = verify_card(&store, "OMA-20240110-AB12", at(2024, 2, 1))
            .await
            .unwrap();

        assert!(outcome.is_valid);
        assert!(outcome.card.member.is_none());
    }

    #[tokio::test]
    async fn test_history_is_newest_first_with_status() {
        let store = MemoryStore::new();
        let member = store.add_member("Amina", "Bello");
        let old = store.insert_card(member, "OMA-20220110-AAAA", at(2022, 1, 10), false);
        store
            .patch(old.id, CardPatch::revoke(at(2022, 6, 1), "Other".to_string()))
            .await
            .unwrap();
        store.insert_card(member, "OMA-20240110-BBBB", at(2024, 1, 10), true);

        let history = card_history(&store, member, at(2024, 6, 1)).await.unwrap();

        assert_eq!(history.len(), 2);
        assert_eq!(history[0].card.card_id, "OMA-20240110-BBBB");
        assert_eq!(history[0].status, CardStatus::Active);
        assert_eq!(history[1].status, CardStatus::Revoked);
    }

    #[tokio::test]
    async fn test_history_for_unknown_member_fails() {
        let store = MemoryStore::new();
        let err = card_history(&store, Uuid::new_v4(), at(2024, 6, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, VerificationError::MemberNotFound));
    }
}
