use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{
        Multipart, State,
        multipart::{MultipartError, MultipartRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::orchestrator::Pipeline;

/// Shared state behind every handler.
pub struct AppState {
    pub pipeline: Pipeline,
    /// Runs share one working tree and blackboard contract, so they are serialized.
    pub run_lock: Mutex<()>,
}

impl AppState {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline,
            run_lock: Mutex::new(()),
        }
    }
}

pub type SharedState = Arc<AppState>;

#[derive(Debug, Serialize, Deserialize)]
pub struct ApplyResponse {
    pub recap: String,
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    PayloadTooLarge(String),
    Internal(String),
}

impl ApiError {
    fn from_multipart(err: MultipartError) -> Self {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::PayloadTooLarge(err.body_text())
        } else {
            ApiError::BadRequest(err.body_text())
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::PayloadTooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/health", get(health))
        .route("/apply", post(apply))
}

async fn health() -> &'static str {
    "OK"
}

/// `POST /apply` with multipart fields `file` (zip archive) and `prompt`.
async fn apply(
    State(state): State<SharedState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<ApplyResponse>, ApiError> {
    let mut multipart = multipart.map_err(|rejection| {
        ApiError::BadRequest(format!("expected a multipart/form-data body: {}", rejection.body_text()))
    })?;
    let mut archive: Option<Bytes> = None;
    let mut prompt: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(ApiError::from_multipart)?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                archive = Some(field.bytes().await.map_err(ApiError::from_multipart)?);
            }
            Some("prompt") => {
                prompt = Some(field.text().await.map_err(ApiError::from_multipart)?);
            }
            _ => {}
        }
    }

    let archive = archive
        .filter(|bytes| !bytes.is_empty())
        .ok_or_else(|| ApiError::BadRequest("missing or empty 'file' field".into()))?;
    let prompt = prompt
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("missing or empty 'prompt' field".into()))?;

    let staging = tempfile::tempdir()
        .map_err(|e| ApiError::Internal(format!("Failed to create staging dir: {}", e)))?;
    let zip_path = staging.path().join("upload.zip");
    tokio::fs::write(&zip_path, &archive)
        .await
        .map_err(|e| ApiError::Internal(format!("Failed to stage upload: {}", e)))?;
    info!(bytes = archive.len(), "archive staged");

    let _guard = state.run_lock.lock().await;
    let recap = state
        .pipeline
        .run(&zip_path, &prompt)
        .await
        .map_err(|e| {
            error!(error = %e, "pipeline failed");
            ApiError::Internal(e.to_string())
        })?;
    Ok(Json(ApplyResponse { recap }))
}
