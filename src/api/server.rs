//! Axum server for the summary API.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::error::Result;
use crate::service::SummaryService;

/// Largest accepted request body.
pub const MAX_BODY_BYTES: usize = 64 * 1024;

/// Shared state for all API handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    pub service: Arc<SummaryService>,
    /// Use `X-Forwarded-For` for the client key.
    pub trust_forwarded_for: bool,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(service: Arc<SummaryService>, config: &ServerConfig) -> Self {
        Self {
            service,
            trust_forwarded_for: config.trust_forwarded_for,
            started_at: Instant::now(),
        }
    }
}

/// Build the axum router with all API routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/summary", post(super::routes::summary::post_summary))
        .route("/api/health", get(super::routes::health::get_health))
        .route("/api/stats", get(super::routes::stats::get_stats))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

/// Bind and serve until Ctrl-C.
pub async fn start_server(config: &ServerConfig, state: AppState) -> Result<()> {
    let app = build_router(state);
    let addr = format!("{}:{}", config.bind, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Summary API listening on {addr}");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;
    tracing::info!("Summary API stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
}
