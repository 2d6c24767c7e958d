//! perch - persistent browser-automation server
//!
//! A long-lived process that owns a pool of browser instances and exposes
//! sessions, pages, commands, event capture, and vision helpers to
//! short-lived HTTP clients.

mod api;
mod capture;
mod command;
mod config;
mod driver;
mod error;
mod ids;
mod logs;
mod overlay;
mod registry;
mod sessions;
mod vision;

use api::{create_router, AppState};
use config::Config;
use driver::chromium::ChromiumLauncher;
use sessions::SessionManager;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "perch=info,tower_http=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    let config = Arc::new(Config::from_env());
    tracing::info!(
        max_sessions = config.max_sessions,
        max_pages_per_session = config.max_pages_per_session,
        idle_timeout_sec = config.idle_timeout.as_secs(),
        "Configuration loaded"
    );

    if !config.screenshot_dir.exists() {
        std::fs::create_dir_all(&config.screenshot_dir)?;
    }

    let launcher = Arc::new(ChromiumLauncher::new());
    let sessions = SessionManager::start(config.clone(), launcher);
    let state = AppState::new(config.clone(), sessions.clone());

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    tracing::info!("perch server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // In-flight requests are done; close every browser with a bounded
    // grace period so shutdown cannot hang on a wedged backend.
    tracing::info!("Shutting down");
    if tokio::time::timeout(config.close_timeout * 2, sessions.shutdown_all())
        .await
        .is_err()
    {
        tracing::warn!("Session teardown exceeded the grace period");
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
    }
}
