//! Download admission endpoint
//!
//! Validates the request synchronously and hands it to the job supervisor.
//! The response never waits on retrieval; the outcome is delivered later to
//! the caller's callback endpoint.

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::AppState;
use crate::jobs::JobId;

#[derive(Debug, Deserialize)]
pub struct DownloadRequest {
    #[serde(default, alias = "url")]
    pub source_url: Option<String>,
    #[serde(default)]
    pub callback_endpoint: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct QueuedResponse {
    pub status: &'static str,
    pub job_id: JobId,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub status: &'static str,
    pub message: String,
}

/// Why a request was rejected before any job existed
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("request body must be a JSON object: {0}")]
    Body(String),

    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("invalid {field}: {reason}")]
    InvalidUrl { field: &'static str, reason: String },

    #[error("callback_endpoint must use http or https, got '{0}'")]
    UnsupportedScheme(String),
}

impl IntoResponse for ValidationError {
    fn into_response(self) -> Response {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                status: "error",
                message: self.to_string(),
            }),
        )
            .into_response()
    }
}

fn required(value: Option<String>, field: &'static str) -> Result<String, ValidationError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(ValidationError::MissingField(field))
}

fn parse_url(value: &str, field: &'static str) -> Result<Url, ValidationError> {
    Url::parse(value).map_err(|e| ValidationError::InvalidUrl {
        field,
        reason: e.to_string(),
    })
}

impl DownloadRequest {
    /// Check the request and return `(source_url, callback_endpoint)`.
    pub fn validate(self) -> Result<(Url, Url), ValidationError> {
        let source = required(self.source_url, "source_url")?;
        let callback = required(self.callback_endpoint, "callback_endpoint")?;

        let source_url = parse_url(&source, "source_url")?;
        let callback_endpoint = parse_url(&callback, "callback_endpoint")?;

        if !matches!(callback_endpoint.scheme(), "http" | "https") {
            return Err(ValidationError::UnsupportedScheme(
                callback_endpoint.scheme().to_string(),
            ));
        }

        Ok((source_url, callback_endpoint))
    }
}

/// Admit a download job
async fn create_download(
    State(state): State<AppState>,
    payload: Result<Json<DownloadRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<QueuedResponse>), ValidationError> {
    let Json(request) = payload.map_err(|e| ValidationError::Body(e.body_text()))?;

    let (source_url, callback_endpoint) = request.validate().inspect_err(|e| {
        debug!(error = %e, "Rejected download request");
    })?;

    let handle = state.supervisor.submit(source_url, callback_endpoint);

    Ok((
        StatusCode::ACCEPTED,
        Json(QueuedResponse {
            status: "queued",
            job_id: handle.job_id,
        }),
    ))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/download", post(create_download))
}
