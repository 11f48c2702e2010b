//! HTTP status endpoint
//!
//! Read-only views of the registry and checkpoint for operators, plus an
//! explicit registry reload trigger.

use crate::registry::AddressRegistry;
use crate::store::CheckpointStore;
use crate::watcher::Phase;
use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub const SERVICE_NAME: &str = "vigil-monitoring";

#[derive(Clone)]
pub struct AppState {
    pub instance_id: String,
    pub registry: Arc<AddressRegistry>,
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub phase: watch::Receiver<Phase>,
}

/// A failed backing read. Answers 500 without leaking the cause.
struct ApiError(anyhow::Error);

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!(error = ?self.0, "Status request failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "internal server error" })),
        )
            .into_response()
    }
}

type ApiResult = std::result::Result<Json<Value>, ApiError>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/stats", get(stats))
        .route("/api/v1/addresses/count", get(address_count))
        .route("/api/v1/addresses/reload", post(reload_addresses))
        .route("/api/v1/monitoring/status", get(monitoring_status))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn last_processed_block(state: &AppState) -> Result<u64> {
    state
        .checkpoints
        .get_last_processed_block(&state.instance_id)
        .await
        .context("Failed to get last processed block")
}

async fn stats(State(state): State<AppState>) -> ApiResult {
    let block = last_processed_block(&state).await?;
    Ok(Json(json!({
        "monitored_addresses": state.registry.count(),
        "last_processed_block": block,
    })))
}

async fn address_count(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "address_count": state.registry.count() }))
}

async fn monitoring_status(State(state): State<AppState>) -> ApiResult {
    let block = last_processed_block(&state).await?;
    let phase = *state.phase.borrow();
    Ok(Json(json!({
        "status": "monitoring",
        "phase": phase,
        "instance_id": state.instance_id,
        "last_processed_block": block,
        "monitored_addresses": state.registry.count(),
    })))
}

async fn reload_addresses(State(state): State<AppState>) -> ApiResult {
    let count = state.registry.reload().await?;
    Ok(Json(json!({ "status": "reloaded", "address_count": count })))
}

/// Serve until `cancel` fires, then drain in-flight requests for at most
/// `drain`.
pub async fn serve(
    addr: SocketAddr,
    state: AppState,
    cancel: CancellationToken,
    drain: Duration,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind status server to {}", addr))?;
    info!(%addr, "Status server listening");

    let shutdown = cancel.clone();
    let server = axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .into_future();

    tokio::select! {
        result = server => result.context("Status server failed")?,
        _ = async {
            cancel.cancelled().await;
            tokio::time::sleep(drain).await;
        } => {
            warn!(drain_secs = drain.as_secs(), "Status server drain timed out");
        }
    }

    info!("Status server stopped");
    Ok(())
}
