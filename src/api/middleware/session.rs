use axum::extract::FromRef;
use sqlx::PgPool;
use tower_sessions::{Expiry, SessionManagerLayer};
use tower_sessions_sqlx_store::PostgresStore;

use crate::services::{asset_store::HttpAssetStore, card_id::CardIdGenerator};

/// Session key under which the identity layer stores the signed-in staff member
pub const SESSION_KEY_STAFF_ID: &str = "staff_id";

/// Creates a session layer backed by the store the identity layer writes to
pub async fn create_session_layer(
    pool: PgPool,
) -> Result<SessionManagerLayer<PostgresStore>, sqlx::Error> {
    let session_store = PostgresStore::new(pool);
    session_store.migrate().await?;

    let session_layer = SessionManagerLayer::new(session_store)
        .with_secure(true)
        .with_same_site(tower_sessions::cookie::SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(time::Duration::hours(8)));

    Ok(session_layer)
}

/// Application state shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: crate::config::Config,
    pub assets: HttpAssetStore,
    pub card_ids: CardIdGenerator,
}

impl FromRef<AppState> for PgPool {
    fn from_ref(state: &AppState) -> PgPool {
        state.pool.clone()
    }
}
