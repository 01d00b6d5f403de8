//! Completion callbacks
//!
//! Delivery is at-most-once: one POST with a bounded timeout, no retries.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::jobs::job::JobOutcome;

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("callback request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("callback endpoint answered {status}")]
    Rejected { status: u16 },
}

/// Delivers a job's outcome to the caller's endpoint.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, endpoint: &Url, outcome: &JobOutcome) -> Result<(), NotificationError>;
}

/// JSON-over-HTTP callback delivery
pub struct HttpNotifier {
    client: Client,
}

impl HttpNotifier {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("mediagrab/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create callback HTTP client")?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn notify(&self, endpoint: &Url, outcome: &JobOutcome) -> Result<(), NotificationError> {
        let resp = self
            .client
            .post(endpoint.clone())
            .json(outcome)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(NotificationError::Rejected {
                status: status.as_u16(),
            });
        }

        debug!(endpoint = %endpoint, status = %status, "Callback delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::job::{FailedJob, JobId};
    use assert_matches::assert_matches;
    use mockito::Matcher;

    fn outcome(id: JobId) -> JobOutcome {
        JobOutcome::Failed(FailedJob {
            job_id: id,
            message: "retrieval failed: network error: timed out".to_string(),
        })
    }

    #[tokio::test]
    async fn test_posts_outcome_as_json() {
        let mut server = mockito::Server::new_async().await;
        let id = JobId::new();
        let mock = server
            .mock("POST", "/hook")
            .match_header("content-type", "application/json")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "status": "error",
                "job_id": id.to_string(),
            })))
            .with_status(204)
            .expect(1)
            .create_async()
            .await;

        let notifier = HttpNotifier::new(Duration::from_secs(5)).unwrap();
        let endpoint = Url::parse(&format!("{}/hook", server.url())).unwrap();
        notifier.notify(&endpoint, &outcome(id)).await.unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_non_success_status_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/hook")
            .with_status(500)
            .create_async()
            .await;

        let notifier = HttpNotifier::new(Duration::from_secs(5)).unwrap();
        let endpoint = Url::parse(&format!("{}/hook", server.url())).unwrap();
        let err = notifier.notify(&endpoint, &outcome(JobId::new())).await.unwrap_err();

        assert_matches!(err, NotificationError::Rejected { status: 500 });
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_an_error() {
        let notifier = HttpNotifier::new(Duration::from_millis(500)).unwrap();
        // Port 9 (discard) is almost never listening locally
        let endpoint = Url::parse("http://127.0.0.1:9/hook").unwrap();
        let err = notifier.notify(&endpoint, &outcome(JobId::new())).await.unwrap_err();

        assert_matches!(err, NotificationError::Request(_));
    }
}
