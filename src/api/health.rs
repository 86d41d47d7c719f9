use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Instant;

use crate::api::middleware::session::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyHealth {
    pub status: HealthState,
    pub response_time_ms: u128,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DependencyHealth {
    fn observe<E: std::fmt::Display>(result: Result<(), E>, started: Instant) -> Self {
        let response_time_ms = started.elapsed().as_millis();
        match result {
            Ok(()) => Self {
                status: HealthState::Healthy,
                response_time_ms,
                error: None,
            },
            Err(e) => Self {
                status: HealthState::Unhealthy,
                response_time_ms,
                error: Some(e.to_string()),
            },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: HealthState,
    pub checked_at: DateTime<Utc>,
    pub version: &'static str,
    pub database: DependencyHealth,
    pub asset_store: DependencyHealth,
}

impl HealthReport {
    fn new(database: DependencyHealth, asset_store: DependencyHealth) -> Self {
        let status = if database.status == HealthState::Healthy
            && asset_store.status == HealthState::Healthy
        {
            HealthState::Healthy
        } else {
            HealthState::Unhealthy
        };

        Self {
            status,
            checked_at: Utc::now(),
            version: env!("CARGO_PKG_VERSION"),
            database,
            asset_store,
        }
    }

    fn status_code(&self) -> StatusCode {
        match self.status {
            HealthState::Healthy => StatusCode::OK,
            HealthState::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// Probes the database and the asset store; 503 if either is down
async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthReport>) {
    let started = Instant::now();

    let (database, asset_store) = tokio::join!(
        async {
            let t = Instant::now();
            let result = sqlx::query("SELECT 1")
                .execute(&state.pool)
                .await
                .map(|_| ());
            DependencyHealth::observe(result, t)
        },
        async {
            let t = Instant::now();
            DependencyHealth::observe(state.assets.check_health().await, t)
        },
    );

    let report = HealthReport::new(database, asset_store);

    tracing::info!(
        status = ?report.status,
        duration_ms = started.elapsed().as_millis(),
        "Health check completed"
    );

    (report.status_code(), Json(report))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
