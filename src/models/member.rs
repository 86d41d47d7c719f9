use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// Display fields of a member, as shown to whoever scans their card.
///
/// Members are owned by the member registry; this service only reads them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct MemberSummary {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    #[sqlx(rename = "image_url")]
    pub image: Option<String>,
    pub date_joined: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub membership_status: Option<String>,
}

impl MemberSummary {
    pub async fn exists(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM members WHERE id = $1)")
            .bind(id)
            .fetch_one(pool)
            .await
    }
}
