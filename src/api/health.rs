//! Health check endpoints

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
    pub fetch_tool: bool,
    pub object_store: bool,
}

/// Health check - always returns OK if the server is running
async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Readiness check - the fetch tool must be runnable. An unconfigured object
/// store is reported but does not block readiness; small artifacts never need it.
async fn readyz(State(state): State<AppState>) -> Json<ReadyResponse> {
    let fetch_tool = state.supervisor.fetcher().is_available().await;

    Json(ReadyResponse {
        ready: fetch_tool,
        fetch_tool,
        object_store: state.supervisor.is_store_configured(),
    })
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
}
