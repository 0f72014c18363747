//! Storefront backend entry point.
//!
//! Connects to the configured data store, starts the polling change
//! watcher and the revenue aggregator, then serves the Axum REST API for
//! the admin UI.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use storefront::api::{self, ApiState};
use storefront::config::{Config, StoreBackend};
use storefront::revenue::RevenueAggregator;
use storefront::store::{DataStore, RestStore, SqliteStore};
use storefront::watcher::{self, WatcherState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging (RUST_LOG controls verbosity).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;
    let shutdown = CancellationToken::new();

    // ─── Data store ───────────────────────────────────────
    let store: Arc<dyn DataStore> = match config.store_backend {
        StoreBackend::Sqlite => Arc::new(SqliteStore::connect(&config.database_url).await?),
        StoreBackend::Rest => {
            let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
            Arc::new(RestStore::new(
                client,
                config.rest_url.as_deref().unwrap_or_default(),
                config.rest_api_key.as_deref().unwrap_or_default(),
            ))
        }
    };
    info!(backend = ?config.store_backend, "Data store ready");

    // ─── Change watcher ───────────────────────────────────
    let watcher_handle = tokio::spawn(watcher::run(Arc::new(WatcherState {
        store: store.clone(),
        interval: Duration::from_secs(config.watch_interval_secs),
        shutdown: shutdown.clone(),
    })));

    // ─── Revenue aggregator ───────────────────────────────
    let revenue = RevenueAggregator::start(store, config.refresh_mode());

    // ─── REST API ─────────────────────────────────────────
    let app = api::router(Arc::new(ApiState::new(revenue.clone())))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", config.api_port);
    info!("API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    shutdown.cancel();
    revenue.shutdown().await;
    watcher_handle.await?;
    Ok(())
}
