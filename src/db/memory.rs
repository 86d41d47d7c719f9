//! In-memory stores used by the service tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{card::expiry_for, Card, CardPatch, CardView, MemberSummary, NewCard};
use crate::services::{
    asset_store::{AssetRef, AssetStore, AssetUploadError},
    card_id::{CardIdError, CodeSource},
    card_store::{CardStore, MemberRegistry, StoreError},
};

#[derive(Default)]
struct Inner {
    members: HashMap<Uuid, MemberSummary>,
    cards: Vec<Card>,
}

/// Card and member store with the same guarded-insert semantics as Postgres
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_member(&self, first_name: &str, last_name: &str) -> Uuid {
        let id = Uuid::new_v4();
        let member = MemberSummary {
            id,
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            image: None,
            date_joined: None,
            created_at: Utc::now(),
            membership_status: Some("active".to_string()),
        };
        self.inner.lock().unwrap().members.insert(id, member);
        id
    }

    /// Inserts a card directly, bypassing the active-card guard.
    pub fn insert_card(
        &self,
        member_ref: Uuid,
        card_id: &str,
        issue_date: DateTime<Utc>,
        is_active: bool,
    ) -> Card {
        let mut card = NewCard {
            card_id: card_id.to_string(),
            member_ref,
            credential_asset_ref: format!("image-{card_id}"),
            qr_code_url: format!("https://cdn.test/{card_id}.png"),
            issue_date,
            expiry_date: expiry_for(issue_date),
        }
        .into_card(Uuid::new_v4());
        card.is_active = is_active;

        self.inner.lock().unwrap().cards.push(card.clone());
        card
    }

    pub fn cards_for(&self, member_ref: Uuid) -> Vec<Card> {
        self.inner
            .lock()
            .unwrap()
            .cards
            .iter()
            .filter(|c| c.member_ref == member_ref)
            .cloned()
            .collect()
    }

    pub fn card_count(&self) -> usize {
        self.inner.lock().unwrap().cards.len()
    }

    /// Makes every subsequent call fail as if the backend were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }

    fn active_codes(inner: &Inner, member_ref: Uuid, except: Option<Uuid>) -> Vec<String> {
        inner
            .cards
            .iter()
            .filter(|c| c.member_ref == member_ref && c.is_active && Some(c.id) != except)
            .map(|c| c.card_id.clone())
            .collect()
    }
}

impl CardStore for MemoryStore {
    async fn create(&self, card: NewCard) -> Result<Card, StoreError> {
        self.check_available()?;
        let mut inner = self.inner.lock().unwrap();

        let active = Self::active_codes(&inner, card.member_ref, None);
        if !active.is_empty() {
            return Err(StoreError::ActiveCardExists(active));
        }
        if inner.cards.iter().any(|c| c.card_id == card.card_id) {
            return Err(StoreError::CardIdTaken(card.card_id));
        }

        let card = card.into_card(Uuid::new_v4());
        inner.cards.push(card.clone());
        Ok(card)
    }

    async fn patch(&self, id: Uuid, patch: CardPatch) -> Result<Card, StoreError> {
        self.check_available()?;
        let mut inner = self.inner.lock().unwrap();

        let index = inner
            .cards
            .iter()
            .position(|c| c.id == id)
            .ok_or(StoreError::CardNotFound)?;

        let mut updated = inner.cards[index].clone();
        patch.apply(&mut updated);

        if updated.is_active {
            let active = Self::active_codes(&inner, updated.member_ref, Some(id));
            if !active.is_empty() {
                return Err(StoreError::ActiveCardExists(active));
            }
        }

        inner.cards[index] = updated.clone();
        Ok(updated)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Card>, StoreError> {
        self.check_available()?;
        let inner = self.inner.lock().unwrap();
        Ok(inner.cards.iter().find(|c| c.id == id).cloned())
    }

    async fn find_by_card_id<'a>(&'a self, card_id: &'a str) -> Result<Option<CardView>, StoreError> {
        self.check_available()?;
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .cards
            .iter()
            .find(|c| c.card_id == card_id)
            .map(|card| CardView {
                card: card.clone(),
                member: inner.members.get(&card.member_ref).cloned(),
            }))
    }

    async fn find_active_by_member(&self, member_ref: Uuid) -> Result<Vec<Card>, StoreError> {
        self.check_available()?;
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .cards
            .iter()
            .filter(|c| c.member_ref == member_ref && c.is_active)
            .cloned()
            .collect())
    }

    async fn list_by_member(&self, member_ref: Uuid) -> Result<Vec<Card>, StoreError> {
        self.check_available()?;
        let inner = self.inner.lock().unwrap();
        let mut cards: Vec<Card> = inner
            .cards
            .iter()
            .filter(|c| c.member_ref == member_ref)
            .cloned()
            .collect();
        cards.sort_by(|a, b| b.issue_date.cmp(&a.issue_date));
        Ok(cards)
    }

    async fn card_id_exists<'a>(&'a self, card_id: &'a str) -> Result<bool, StoreError> {
        self.check_available()?;
        let inner = self.inner.lock().unwrap();
        Ok(inner.cards.iter().any(|c| c.card_id == card_id))
    }
}

impl MemberRegistry for MemoryStore {
    async fn member_exists(&self, member_id: Uuid) -> Result<bool, StoreError> {
        self.check_available()?;
        Ok(self.inner.lock().unwrap().members.contains_key(&member_id))
    }
}

#[derive(Debug, Clone)]
pub struct RecordedUpload {
    pub filename: String,
    pub content_type: String,
    pub size: usize,
    pub asset: AssetRef,
}

/// Asset store that keeps uploads in memory and can be told to reject them
#[derive(Clone, Default)]
pub struct MemoryAssetStore {
    uploads: Arc<Mutex<Vec<RecordedUpload>>>,
    reject: Arc<AtomicBool>,
    counter: Arc<AtomicUsize>,
}

impl MemoryAssetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reject_uploads(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }

    pub fn uploads(&self) -> Vec<RecordedUpload> {
        self.uploads.lock().unwrap().clone()
    }
}

impl AssetStore for MemoryAssetStore {
    async fn upload(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        content_type: &str,
    ) -> Result<AssetRef, AssetUploadError> {
        if self.reject.load(Ordering::SeqCst) {
            return Err(AssetUploadError::Rejected {
                status: 503,
                body: "asset store offline".to_string(),
            });
        }

        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let asset = AssetRef {
            id: format!("image-{n}"),
            url: format!("https://cdn.test/{filename}"),
        };

        self.uploads.lock().unwrap().push(RecordedUpload {
            filename: filename.to_string(),
            content_type: content_type.to_string(),
            size: bytes.len(),
            asset: asset.clone(),
        });

        Ok(asset)
    }
}

/// Hands out a scripted sequence of card codes
pub struct FixedCodes {
    codes: Mutex<VecDeque<String>>,
}

impl FixedCodes {
    pub fn new<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            codes: Mutex::new(codes.into_iter().map(Into::into).collect()),
        }
    }
}

impl CodeSource for FixedCodes {
    fn next_code(&self) -> Result<String, CardIdError> {
        self.codes
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(CardIdError::RandomUnavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn jan_10() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_create_refuses_occupied_slot_without_writing() {
        let store = MemoryStore::new();
        let member = store.add_member("Amina", "Bello");
        store.insert_card(member, "OMA-20240110-AB12", jan_10(), true);

        let err = store
            .create(NewCard::issued(
                "OMA-20240110-CD34".to_string(),
                member,
                "image-2".to_string(),
                "https://cdn.test/qr-2.png".to_string(),
                jan_10(),
            ))
            .await
            .unwrap_err();

        match err {
            StoreError::ActiveCardExists(ids) => assert_eq!(ids, vec!["OMA-20240110-AB12"]),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(store.card_count(), 1);
    }

    #[tokio::test]
    async fn test_reactivate_patch_refuses_occupied_slot() {
        let store = MemoryStore::new();
        let member = store.add_member("Amina", "Bello");
        let revoked = store.insert_card(member, "OMA-20240110-AB12", jan_10(), false);
        store.insert_card(member, "OMA-20240201-CD34", jan_10(), true);

        let err = store
            .patch(
                revoked.id,
                CardPatch::reactivate(jan_10(), "Reinstated".to_string()),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::ActiveCardExists(ids) if ids == ["OMA-20240201-CD34"]));
        let stored = store.find_by_id(revoked.id).await.unwrap().unwrap();
        assert_eq!(stored, revoked);
    }

    #[tokio::test]
    async fn test_create_refuses_taken_card_id() {
        let store = MemoryStore::new();
        let holder = store.add_member("Kofi", "Mensah");
        let member = store.add_member("Amina", "Bello");
        store.insert_card(holder, "OMA-20240110-AB12", jan_10(), true);

        let err = store
            .create(NewCard::issued(
                "OMA-20240110-AB12".to_string(),
                member,
                "image-2".to_string(),
                "https://cdn.test/qr-2.png".to_string(),
                jan_10(),
            ))
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::CardIdTaken(code) if code == "OMA-20240110-AB12"));
        assert!(store.cards_for(member).is_empty());
    }
}
