use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool, Postgres};
use uuid::Uuid;

use crate::models::member::MemberSummary;

/// Reason recorded when a revocation request carries none.
pub const DEFAULT_REVOCATION_REASON: &str = "Other";

/// Reason recorded when a reactivation request carries none.
pub const DEFAULT_REACTIVATION_REASON: &str = "Reinstated";

/// Partial unique index enforcing one active card per member.
pub const ONE_ACTIVE_PER_MEMBER_INDEX: &str = "cards_one_active_per_member";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    pub id: Uuid,
    pub card_id: String,
    pub member_ref: Uuid,
    pub credential_asset_ref: String,
    pub qr_code_url: String,
    pub issue_date: DateTime<Utc>,
    pub expiry_date: DateTime<Utc>,
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revocation_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reactivated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reactivation_reason: Option<String>,
}

/// Status reported to scanners. Never stored; derived from the card at query time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CardStatus {
    Active,
    Revoked,
    Expired,
    Inactive,
}

impl CardStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CardStatus::Active => "active",
            CardStatus::Revoked => "revoked",
            CardStatus::Expired => "expired",
            CardStatus::Inactive => "inactive",
        }
    }
}

impl Card {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expiry_date
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active && !self.is_expired_at(now) && self.revoked_at.is_none()
    }

    /// Resolves the reported status. Revocation wins over expiry.
    pub fn status_at(&self, now: DateTime<Utc>) -> CardStatus {
        if self.is_valid_at(now) {
            CardStatus::Active
        } else if self.revoked_at.is_some() {
            CardStatus::Revoked
        } else if self.is_expired_at(now) {
            CardStatus::Expired
        } else {
            CardStatus::Inactive
        }
    }
}

/// Expiry policy: one calendar year after issuance.
pub fn expiry_for(issue_date: DateTime<Utc>) -> DateTime<Utc> {
    issue_date
        .checked_add_months(Months::new(12))
        .unwrap_or_else(|| issue_date + Duration::days(365))
}

/// Data for a card about to be persisted
#[derive(Debug, Clone)]
pub struct NewCard {
    pub card_id: String,
    pub member_ref: Uuid,
    pub credential_asset_ref: String,
    pub qr_code_url: String,
    pub issue_date: DateTime<Utc>,
    pub expiry_date: DateTime<Utc>,
}

impl NewCard {
    /// An active card issued at `issue_date`, expiring one year later.
    pub fn issued(
        card_id: String,
        member_ref: Uuid,
        credential_asset_ref: String,
        qr_code_url: String,
        issue_date: DateTime<Utc>,
    ) -> Self {
        Self {
            card_id,
            member_ref,
            credential_asset_ref,
            qr_code_url,
            issue_date,
            expiry_date: expiry_for(issue_date),
        }
    }

    /// Materializes the record a store would hold after inserting this card.
    pub fn into_card(self, id: Uuid) -> Card {
        Card {
            id,
            card_id: self.card_id,
            member_ref: self.member_ref,
            credential_asset_ref: self.credential_asset_ref,
            qr_code_url: self.qr_code_url,
            issue_date: self.issue_date,
            expiry_date: self.expiry_date,
            is_active: true,
            revoked_at: None,
            revocation_reason: None,
            reactivated_at: None,
            reactivation_reason: None,
        }
    }
}

/// A card with its member's display fields dereferenced.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CardView {
    #[serde(flatten)]
    pub card: Card,
    pub member: Option<MemberSummary>,
}

/// A field value written by [`PatchOp::Set`].
#[derive(Debug, Clone, PartialEq)]
pub enum CardField {
    IsActive(bool),
    RevokedAt(DateTime<Utc>),
    RevocationReason(String),
    ReactivatedAt(DateTime<Utc>),
    ReactivationReason(String),
}

/// Fields that may be dropped from a card by [`PatchOp::Remove`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionalField {
    RevokedAt,
    RevocationReason,
    ReactivatedAt,
    ReactivationReason,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PatchOp {
    Set(CardField),
    Remove(OptionalField),
}

impl CardField {
    pub fn column(&self) -> &'static str {
        match self {
            CardField::IsActive(_) => "is_active",
            CardField::RevokedAt(_) => "revoked_at",
            CardField::RevocationReason(_) => "revocation_reason",
            CardField::ReactivatedAt(_) => "reactivated_at",
            CardField::ReactivationReason(_) => "reactivation_reason",
        }
    }
}

impl OptionalField {
    pub fn column(&self) -> &'static str {
        match self {
            OptionalField::RevokedAt => "revoked_at",
            OptionalField::RevocationReason => "revocation_reason",
            OptionalField::ReactivatedAt => "reactivated_at",
            OptionalField::ReactivationReason => "reactivation_reason",
        }
    }
}

/// Ordered list of field operations applied to one card.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CardPatch {
    ops: Vec<PatchOp>,
}

impl CardPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: CardField) -> Self {
        self.ops.push(PatchOp::Set(field));
        self
    }

    pub fn remove(mut self, field: OptionalField) -> Self {
        self.ops.push(PatchOp::Remove(field));
        self
    }

    pub fn ops(&self) -> &[PatchOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Patch that revokes a card at `at`.
    pub fn revoke(at: DateTime<Utc>, reason: String) -> Self {
        Self::new()
            .set(CardField::IsActive(false))
            .set(CardField::RevokedAt(at))
            .set(CardField::RevocationReason(reason))
    }

    /// Patch that reactivates a card at `at`, dropping every revocation field.
    pub fn reactivate(at: DateTime<Utc>, reason: String) -> Self {
        Self::new()
            .set(CardField::IsActive(true))
            .set(CardField::ReactivatedAt(at))
            .set(CardField::ReactivationReason(reason))
            .remove(OptionalField::RevokedAt)
            .remove(OptionalField::RevocationReason)
    }

    /// Applies the operations in order to an in-memory card.
    pub fn apply(&self, card: &mut Card) {
        for op in &self.ops {
            match op {
                PatchOp::Set(CardField::IsActive(v)) => card.is_active = *v,
                PatchOp::Set(CardField::RevokedAt(v)) => card.revoked_at = Some(*v),
                PatchOp::Set(CardField::RevocationReason(v)) => {
                    card.revocation_reason = Some(v.clone())
                }
                PatchOp::Set(CardField::ReactivatedAt(v)) => card.reactivated_at = Some(*v),
                PatchOp::Set(CardField::ReactivationReason(v)) => {
                    card.reactivation_reason = Some(v.clone())
                }
                PatchOp::Remove(OptionalField::RevokedAt) => card.revoked_at = None,
                PatchOp::Remove(OptionalField::RevocationReason) => card.revocation_reason = None,
                PatchOp::Remove(OptionalField::ReactivatedAt) => card.reactivated_at = None,
                PatchOp::Remove(OptionalField::ReactivationReason) => {
                    card.reactivation_reason = None
                }
            }
        }
    }
}

/// Outcome of a guarded insert
#[derive(Debug)]
pub enum InsertOutcome {
    Created(Card),
    /// The member already holds these active cards; nothing was written.
    ActiveCardExists(Vec<String>),
}

#[derive(Debug, FromRow)]
struct CardMemberRow {
    #[sqlx(flatten)]
    card: Card,
    member_id: Option<Uuid>,
    member_first_name: Option<String>,
    member_last_name: Option<String>,
    member_image: Option<String>,
    member_date_joined: Option<chrono::NaiveDate>,
    member_created_at: Option<DateTime<Utc>>,
    member_membership_status: Option<String>,
}

impl CardMemberRow {
    fn into_view(self) -> CardView {
        let member = match (self.member_id, self.member_created_at) {
            (Some(id), Some(created_at)) => Some(MemberSummary {
                id,
                first_name: self.member_first_name.unwrap_or_default(),
                last_name: self.member_last_name.unwrap_or_default(),
                image: self.member_image,
                date_joined: self.member_date_joined,
                created_at,
                membership_status: self.member_membership_status,
            }),
            _ => None,
        };

        CardView {
            card: self.card,
            member,
        }
    }
}

impl Card {
    /// Inserts a card unless the member already holds an active one.
    ///
    /// Check and insert share one SERIALIZABLE transaction. Concurrent writers
    /// that slip past the check surface as a serialization failure or a
    /// violation of [`ONE_ACTIVE_PER_MEMBER_INDEX`].
    pub async fn insert_exclusive(pool: &PgPool, data: &NewCard) -> Result<InsertOutcome, sqlx::Error> {
        let mut tx = pool.begin().await?;

        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await?;

        let active: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT card_id FROM cards
            WHERE member_ref = $1 AND is_active = TRUE
            "#,
        )
        .bind(data.member_ref)
        .fetch_all(&mut *tx)
        .await?;

        if !active.is_empty() {
            tx.rollback().await?;
            return Ok(InsertOutcome::ActiveCardExists(active));
        }

        let card = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO cards (
                card_id, member_ref, credential_asset_ref, qr_code_url,
                issue_date, expiry_date, is_active
            )
            VALUES ($1, $2, $3, $4, $5, $6, TRUE)
            RETURNING *
            "#,
        )
        .bind(&data.card_id)
        .bind(data.member_ref)
        .bind(&data.credential_asset_ref)
        .bind(&data.qr_code_url)
        .bind(data.issue_date)
        .bind(data.expiry_date)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(InsertOutcome::Created(card))
    }

    /// Applies a patch and returns the updated card, or `None` if no card has `id`.
    pub async fn apply_patch(
        pool: &PgPool,
        id: Uuid,
        patch: &CardPatch,
    ) -> Result<Option<Self>, sqlx::Error> {
        if patch.is_empty() {
            return Self::find_by_id(pool, id).await;
        }

        // Removing a field writes NULL; set values are bound in order.
        let mut updates = Vec::new();
        let mut bind_count = 1;
        for op in patch.ops() {
            match op {
                PatchOp::Set(field) => {
                    updates.push(format!("{} = ${}", field.column(), bind_count));
                    bind_count += 1;
                }
                PatchOp::Remove(field) => updates.push(format!("{} = NULL", field.column())),
            }
        }

        let query = format!(
            "UPDATE cards SET {} WHERE id = ${} RETURNING *",
            updates.join(", "),
            bind_count
        );

        let mut query_builder = sqlx::query_as::<Postgres, Self>(&query);
        for op in patch.ops() {
            if let PatchOp::Set(field) = op {
                query_builder = match field {
                    CardField::IsActive(v) => query_builder.bind(*v),
                    CardField::RevokedAt(v) => query_builder.bind(*v),
                    CardField::RevocationReason(v) => query_builder.bind(v.clone()),
                    CardField::ReactivatedAt(v) => query_builder.bind(*v),
                    CardField::ReactivationReason(v) => query_builder.bind(v.clone()),
                };
            }
        }

        query_builder.bind(id).fetch_optional(pool).await
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let card = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM cards WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(card)
    }

    /// Finds a card by its printed code, joining the member's display fields
    pub async fn find_view_by_card_id(
        pool: &PgPool,
        card_id: &str,
    ) -> Result<Option<CardView>, sqlx::Error> {
        let row = sqlx::query_as::<_, CardMemberRow>(
            r#"
            SELECT
                c.*,
                m.id AS member_id,
                m.first_name AS member_first_name,
                m.last_name AS member_last_name,
                m.image_url AS member_image,
                m.date_joined AS member_date_joined,
                m.created_at AS member_created_at,
                m.membership_status AS member_membership_status
            FROM cards c
            LEFT JOIN members m ON m.id = c.member_ref
            WHERE c.card_id = $1
            "#,
        )
        .bind(card_id)
        .fetch_optional(pool)
        .await?;

        Ok(row.map(CardMemberRow::into_view))
    }

    pub async fn find_active_by_member(
        pool: &PgPool,
        member_ref: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let cards = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM cards
            WHERE member_ref = $1 AND is_active = TRUE
            ORDER BY issue_date DESC
            "#,
        )
        .bind(member_ref)
        .fetch_all(pool)
        .await?;

        Ok(cards)
    }

    /// Lists every card ever issued to a member, newest first
    pub async fn list_by_member(pool: &PgPool, member_ref: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        let cards = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM cards
            WHERE member_ref = $1
            ORDER BY issue_date DESC
            "#,
        )
        .bind(member_ref)
        .fetch_all(pool)
        .await?;

        Ok(cards)
    }

    pub async fn card_id_exists(pool: &PgPool, card_id: &str) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM cards WHERE card_id = $1)")
            .bind(card_id)
            .fetch_one(pool)
            .await
    }
}
