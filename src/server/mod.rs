//! HTTP façade over the pipeline.
//!
//! | Route          | Method | Body                              | Response            |
//! |----------------|--------|-----------------------------------|---------------------|
//! | `/health`      | GET    |                                   | `OK`                |
//! | `/apply`       | POST   | multipart `file` (zip) + `prompt` | `{"recap": "..."}`  |
//!
//! Errors are `{"error": "..."}` with 400, 413 or 500.

pub mod api;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::DefaultBodyLimit;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

pub use api::{AppState, ApplyResponse, SharedState};

use crate::config::ServerSettings;
use crate::orchestrator::Pipeline;

/// Build the application router with the upload limit and permissive CORS.
pub fn build_router(state: SharedState, max_upload_bytes: usize) -> Router {
    api::api_router()
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind, serve until Ctrl+C, then drain in-flight requests.
pub async fn start_server(pipeline: Pipeline, settings: &ServerSettings) -> Result<()> {
    let state = Arc::new(AppState::new(pipeline));
    let app = build_router(state, settings.max_upload_bytes);

    let addr = format!("{}:{}", settings.host, settings.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    info!(%local_addr, "server listening");
    eprintln!("patchforge listening on http://{}", local_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to install Ctrl+C handler; serving until killed");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
