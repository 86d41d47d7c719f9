//! Typed access to persisted cards and the member lookups issuance needs.
//!
//! Both traits are implemented for [`PgPool`]. Tests use the in-memory
//! implementation in `db::memory`.

use std::future::Future;

use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{
    card::{InsertOutcome, ONE_ACTIVE_PER_MEMBER_INDEX},
    Card, CardPatch, CardView, MemberSummary, NewCard,
};

/// Postgres SQLSTATE for a failed serializable transaction.
const SERIALIZATION_FAILURE: &str = "40001";

/// Unique constraint on the printed card code.
const CARD_ID_KEY: &str = "cards_card_id_key";

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Writing would leave the member with more than one active card.
    #[error("Member already has an active card: {}", .0.join(", "))]
    ActiveCardExists(Vec<String>),

    #[error("Card not found")]
    CardNotFound,

    /// Another card was stored under this code after it was checked free.
    #[error("Card ID already taken: {0}")]
    CardIdTaken(String),
}

/// Persistence operations scoped to the card entity.
///
/// Implementations never cache card state: every call reads current truth.
pub trait CardStore: Send + Sync {
    /// Persists a new active card.
    ///
    /// The "member has no active card" check and the insert are one atomic
    /// step; if another active card exists nothing is written and
    /// [`StoreError::ActiveCardExists`] is returned. A code already in use
    /// yields [`StoreError::CardIdTaken`].
    fn create(&self, card: NewCard) -> impl Future<Output = Result<Card, StoreError>> + Send;

    /// Applies a partial update. Fails with [`StoreError::CardNotFound`] if
    /// no card has `id`.
    fn patch(
        &self,
        id: Uuid,
        patch: CardPatch,
    ) -> impl Future<Output = Result<Card, StoreError>> + Send;

    fn find_by_id(&self, id: Uuid) -> impl Future<Output = Result<Option<Card>, StoreError>> + Send;

    /// Looks a card up by its printed code, with member display fields joined.
    fn find_by_card_id<'a>(
        &'a self,
        card_id: &'a str,
    ) -> impl Future<Output = Result<Option<CardView>, StoreError>> + Send + 'a;

    fn find_active_by_member(
        &self,
        member_ref: Uuid,
    ) -> impl Future<Output = Result<Vec<Card>, StoreError>> + Send;

    /// All cards referencing the member, newest issue first.
    fn list_by_member(
        &self,
        member_ref: Uuid,
    ) -> impl Future<Output = Result<Vec<Card>, StoreError>> + Send;

    fn card_id_exists<'a>(
        &'a self,
        card_id: &'a str,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send + 'a;
}

/// Read-only view of the member registry.
pub trait MemberRegistry: Send + Sync {
    fn member_exists(&self, member_id: Uuid) -> impl Future<Output = Result<bool, StoreError>> + Send;
}

/// Whether a database error means a concurrent writer won the race for the
/// member's single active slot.
fn is_active_slot_conflict(err: &sqlx::Error) -> bool {
    let Some(db_err) = err.as_database_error() else {
        return false;
    };

    let code = db_err.code();
    if code.as_deref() == Some(SERIALIZATION_FAILURE) {
        return true;
    }

    db_err.is_unique_violation() && db_err.constraint() == Some(ONE_ACTIVE_PER_MEMBER_INDEX)
}

fn is_card_id_conflict(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|e| e.is_unique_violation() && e.constraint() == Some(CARD_ID_KEY))
}

/// Re-reads the member's active cards after a lost race.
async fn conflict_cards(pool: &PgPool, member_ref: Uuid, err: sqlx::Error) -> StoreError {
    match Card::find_active_by_member(pool, member_ref).await {
        Ok(active) if !active.is_empty() => {
            StoreError::ActiveCardExists(active.into_iter().map(|c| c.card_id).collect())
        }
        Ok(_) => StoreError::Database(err),
        Err(reread) => StoreError::Database(reread),
    }
}

impl CardStore for PgPool {
    async fn create(&self, card: NewCard) -> Result<Card, StoreError> {
        let member_ref = card.member_ref;
        match Card::insert_exclusive(self, &card).await {
            Ok(InsertOutcome::Created(card)) => Ok(card),
            Ok(InsertOutcome::ActiveCardExists(ids)) => Err(StoreError::ActiveCardExists(ids)),
            Err(e) if is_card_id_conflict(&e) => Err(StoreError::CardIdTaken(card.card_id)),
            Err(e) if is_active_slot_conflict(&e) => Err(conflict_cards(self, member_ref, e).await),
            Err(e) => Err(e.into()),
        }
    }

    async fn patch(&self, id: Uuid, patch: CardPatch) -> Result<Card, StoreError> {
        match Card::apply_patch(self, id, &patch).await {
            Ok(Some(card)) => Ok(card),
            Ok(None) => Err(StoreError::CardNotFound),
            Err(e) if is_active_slot_conflict(&e) => {
                let member_ref = Card::find_by_id(self, id)
                    .await?
                    .map(|c| c.member_ref)
                    .ok_or(StoreError::CardNotFound)?;
                Err(conflict_cards(self, member_ref, e).await)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Card>, StoreError> {
        Ok(Card::find_by_id(self, id).await?)
    }

    async fn find_by_card_id<'a>(&'a self, card_id: &'a str) -> Result<Option<CardView>, StoreError> {
        Ok(Card::find_view_by_card_id(self, card_id).await?)
    }

    async fn find_active_by_member(&self, member_ref: Uuid) -> Result<Vec<Card>, StoreError> {
        Ok(Card::find_active_by_member(self, member_ref).await?)
    }

    async fn list_by_member(&self, member_ref: Uuid) -> Result<Vec<Card>, StoreError> {
        Ok(Card::list_by_member(self, member_ref).await?)
    }

    async fn card_id_exists<'a>(&'a self, card_id: &'a str) -> Result<bool, StoreError> {
        Ok(Card::card_id_exists(self, card_id).await?)
    }
}

impl MemberRegistry for PgPool {
    async fn member_exists(&self, member_id: Uuid) -> Result<bool, StoreError> {
        Ok(MemberSummary::exists(self, member_id).await?)
    }
}
