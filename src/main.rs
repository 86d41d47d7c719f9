use axum::Router;
use std::net::SocketAddr;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use omacard::api::middleware::session::{create_session_layer, AppState};
use omacard::config::Config;
use omacard::db;
use omacard::services::{asset_store::HttpAssetStore, card_id::CardIdGenerator};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "omacard=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting card service...");

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!("Configuration loaded successfully");

    // Create database pool
    let pool = db::create_pool(&config.database_url).await?;
    tracing::info!("Database pool created");

    // Run migrations
    db::run_migrations(&pool).await?;
    tracing::info!("Database migrations completed");

    let session_layer = create_session_layer(pool.clone()).await?;
    tracing::info!("Session layer initialized");

    let assets = HttpAssetStore::new(&config.asset_api_url, config.asset_api_token.clone());

    // Build application state
    let state = AppState {
        pool: pool.clone(),
        config: config.clone(),
        assets,
        card_ids: CardIdGenerator::new(),
    };

    // Build router
    let app = Router::new()
        .merge(omacard::api::health::router())
        .merge(omacard::api::cards::router())
        .merge(omacard::api::verification::router())
        .layer(session_layer)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    tracing::info!("Listening on {}", addr);

    // Start server
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown signal received, cleaning up...");
}
