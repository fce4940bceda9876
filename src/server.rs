//! HTTP trigger for scheduled syncs.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::sync::{SyncError, SyncOrchestrator, UserSyncReport};

pub const CRON_SECRET_HEADER: &str = "x-cron-secret";

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<SyncOrchestrator>,
    /// With no secret configured every trigger request is rejected.
    pub cron_secret: Option<Arc<str>>,
    pub shutdown: CancellationToken,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Internal(String),
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::Validation(message) => Self::Validation(message),
            SyncError::Auth(message) => Self::Unauthorized(message),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(message) => {
                error!("sync trigger failed: {message}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "ok": false, "error": self.to_string() }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct SyncRunRequest {
    month: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SyncRunResponse {
    pub ok: bool,
    pub results: Vec<UserSyncReport>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/sync/run", post(run_sync))
        .with_state(state)
}

pub async fn serve(state: AppState, addr: SocketAddr) -> Result<()> {
    let shutdown = state.shutdown.clone();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind sync trigger on {addr}"))?;
    info!(%addr, "sync trigger listening");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await
        .context("serve sync trigger")
}

async fn shutdown_signal(shutdown: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(err) = result {
                warn!("failed to listen for ctrl-c: {err}");
            }
            info!("shutdown requested, cancelling in-flight syncs");
            shutdown.cancel();
        }
        _ = shutdown.cancelled() => {}
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "ok": true }))
}

async fn run_sync(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<SyncRunResponse>, ApiError> {
    let provided = headers
        .get(CRON_SECRET_HEADER)
        .and_then(|value| value.to_str().ok());
    if !secret_matches(state.cron_secret.as_deref(), provided) {
        warn!("rejected sync trigger with missing or invalid secret");
        return Err(ApiError::Unauthorized("missing or invalid cron secret".to_string()));
    }

    let request: SyncRunRequest = serde_json::from_slice(&body)
        .map_err(|err| ApiError::Validation(format!("invalid request body: {err}")))?;
    let month = request
        .month
        .filter(|month| !month.trim().is_empty())
        .ok_or_else(|| ApiError::Validation("month is required (YYYY-MM)".to_string()))?;

    let results = state
        .orchestrator
        .run(month.trim(), None, &state.shutdown)
        .await?;

    Ok(Json(SyncRunResponse { ok: true, results }))
}

fn secret_matches(expected: Option<&str>, provided: Option<&str>) -> bool {
    match (expected, provided) {
        (Some(expected), Some(provided)) => expected.as_bytes().ct_eq(provided.as_bytes()).into(),
        _ => false,
    }
}
