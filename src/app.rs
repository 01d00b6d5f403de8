//! Application state and HTTP router construction.
//!
//! Used by the binary and by the router tests to build the Axum app.

use std::sync::Arc;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::api;
use crate::config::Config;
use crate::jobs::JobSupervisor;

/// Shared state for HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub supervisor: JobSupervisor,
}

/// Build the full Axum router with state applied, for use with axum::serve.
pub fn build_app(state: AppState) -> Router<()> {
    Router::new()
        .merge(api::health::router())
        .merge(api::downloads::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
