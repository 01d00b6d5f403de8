//! Job model: identity, status transitions, error taxonomy and the outcome
//! object delivered to the caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;
use uuid::Uuid;

use crate::services::fetcher::{Artifact, RetrievalError};
use crate::services::gcs_storage::StorageError;
use crate::services::placement::{Locator, Placement, PlacementError, PlacementKind};

/// Opaque job identifier, generated at admission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// Job lifecycle. Transitions only move forward:
/// Queued -> Running -> Succeeded | Failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Running)
                | (JobStatus::Running, JobStatus::Succeeded)
                | (JobStatus::Running, JobStatus::Failed)
        )
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid job transition {from:?} -> {to:?}")]
pub struct TransitionError {
    pub from: JobStatus,
    pub to: JobStatus,
}

/// Why a job failed
#[derive(Debug, Error)]
pub enum JobError {
    #[error("retrieval failed: {0}")]
    Retrieval(#[from] RetrievalError),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("job aborted unexpectedly: {0}")]
    Panicked(String),
}

impl JobError {
    /// Short classification for logs
    pub fn kind(&self) -> &'static str {
        match self {
            JobError::Retrieval(_) => "retrieval",
            JobError::Configuration(_) => "configuration",
            JobError::Storage(_) => "storage",
            JobError::Panicked(_) => "panic",
        }
    }
}

impl From<PlacementError> for JobError {
    fn from(err: PlacementError) -> Self {
        match err {
            e @ PlacementError::NotConfigured { .. } => JobError::Configuration(e.to_string()),
            PlacementError::Upload(e) => JobError::Storage(e),
        }
    }
}

/// Payload for a job that reached `Succeeded`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedJob {
    pub job_id: JobId,
    pub title: String,
    pub ext: String,
    pub source_url: String,
    pub file_size: u64,
    pub location: PlacementKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
}

/// Payload for a job that reached `Failed`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedJob {
    pub job_id: JobId,
    pub message: String,
}

/// Terminal result of a job, serialized as the callback body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum JobOutcome {
    #[serde(rename = "ok")]
    Succeeded(CompletedJob),
    #[serde(rename = "error")]
    Failed(FailedJob),
}

impl JobOutcome {
    pub fn succeeded(job: &Job, artifact: &Artifact, placement: &Placement) -> Self {
        let (download_url, file_path) = match &placement.locator {
            Locator::Url(url) => (Some(url.clone()), None),
            Locator::Path(path) => (None, Some(path.to_string_lossy().into_owned())),
        };

        JobOutcome::Succeeded(CompletedJob {
            job_id: job.id,
            title: artifact.title.clone(),
            ext: artifact.ext.clone(),
            source_url: job.source_url.to_string(),
            file_size: artifact.size_bytes,
            location: placement.kind,
            download_url,
            file_path,
        })
    }

    pub fn failed(job_id: JobId, error: &JobError) -> Self {
        JobOutcome::Failed(FailedJob {
            job_id,
            message: error.to_string(),
        })
    }

    pub fn job_id(&self) -> JobId {
        match self {
            JobOutcome::Succeeded(c) => c.job_id,
            JobOutcome::Failed(f) => f.job_id,
        }
    }

    pub fn status(&self) -> JobStatus {
        match self {
            JobOutcome::Succeeded(_) => JobStatus::Succeeded,
            JobOutcome::Failed(_) => JobStatus::Failed,
        }
    }
}

/// One retrieval request, tracked end to end
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub source_url: Url,
    pub callback_endpoint: Url,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    status: JobStatus,
    outcome: Option<JobOutcome>,
}

impl Job {
    pub fn new(source_url: Url, callback_endpoint: Url) -> Self {
        Self {
            id: JobId::new(),
            source_url,
            callback_endpoint,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            status: JobStatus::Queued,
            outcome: None,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn outcome(&self) -> Option<&JobOutcome> {
        self.outcome.as_ref()
    }

    fn transition(&mut self, to: JobStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(to) {
            return Err(TransitionError {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    /// Queued -> Running
    pub fn start(&mut self) -> Result<(), TransitionError> {
        self.transition(JobStatus::Running)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Running -> terminal; the outcome decides which terminal state and is
    /// frozen from here on.
    pub fn finish(&mut self, outcome: JobOutcome) -> Result<(), TransitionError> {
        self.transition(outcome.status())?;
        self.finished_at = Some(Utc::now());
        self.outcome = Some(outcome);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use pretty_assertions::assert_eq;

    fn job() -> Job {
        Job::new(
            Url::parse("https://example.com/v1").unwrap(),
            Url::parse("https://caller.example.com/hook").unwrap(),
        )
    }

    fn artifact() -> Artifact {
        Artifact {
            local_path: PathBuf::from("/tmp/mediagrab/x_abc.mp4"),
            logical_id: "abc".to_string(),
            size_bytes: 10,
            ext: "mp4".to_string(),
            title: "Clip".to_string(),
        }
    }

    #[test]
    fn test_job_ids_are_unique() {
        assert_ne!(JobId::new(), JobId::new());
    }

    #[test]
    fn test_lifecycle_happy_path() {
        let mut job = job();
        assert_eq!(job.status(), JobStatus::Queued);

        job.start().unwrap();
        assert_eq!(job.status(), JobStatus::Running);
        assert!(job.started_at.is_some());

        let outcome = JobOutcome::failed(job.id, &JobError::Configuration("x".into()));
        job.finish(outcome.clone()).unwrap();
        assert_eq!(job.status(), JobStatus::Failed);
        assert_eq!(job.outcome(), Some(&outcome));
    }

    #[test]
    fn test_cannot_skip_running() {
        let mut job = job();
        let outcome = JobOutcome::failed(job.id, &JobError::Panicked("boom".into()));
        assert_eq!(
            job.finish(outcome),
            Err(TransitionError {
                from: JobStatus::Queued,
                to: JobStatus::Failed
            })
        );
        assert!(job.outcome().is_none());
    }

    #[test]
    fn test_terminal_state_is_final() {
        let mut job = job();
        job.start().unwrap();
        let first = JobOutcome::failed(job.id, &JobError::Panicked("first".into()));
        job.finish(first.clone()).unwrap();

        let second = JobOutcome::failed(job.id, &JobError::Panicked("second".into()));
        assert!(job.finish(second).is_err());
        assert!(job.start().is_err());
        assert_eq!(job.outcome(), Some(&first));
    }

    #[test]
    fn test_success_payload_for_local_placement() {
        let job = job();
        let placement = Placement {
            kind: PlacementKind::Local,
            locator: Locator::Path(PathBuf::from("/tmp/mediagrab/x_abc.mp4")),
        };
        let outcome = JobOutcome::succeeded(&job, &artifact(), &placement);
        let value = serde_json::to_value(&outcome).unwrap();

        assert_eq!(
            value,
            serde_json::json!({
                "status": "ok",
                "job_id": job.id.to_string(),
                "title": "Clip",
                "ext": "mp4",
                "source_url": "https://example.com/v1",
                "file_size": 10,
                "location": "local",
                "file_path": "/tmp/mediagrab/x_abc.mp4",
            })
        );
    }

    #[test]
    fn test_success_payload_for_promoted_placement() {
        let job = job();
        let placement = Placement {
            kind: PlacementKind::Promoted,
            locator: Locator::Url("https://storage.googleapis.com/b/x_abc.mp4".to_string()),
        };
        let value =
            serde_json::to_value(JobOutcome::succeeded(&job, &artifact(), &placement)).unwrap();

        assert_eq!(value["location"], "gcs");
        assert_eq!(value["download_url"], "https://storage.googleapis.com/b/x_abc.mp4");
        assert!(value.get("file_path").is_none());
    }

    #[test]
    fn test_failure_payload() {
        let id = JobId::new();
        let err = JobError::from(PlacementError::NotConfigured {
            size_bytes: 2,
            threshold_bytes: 1,
        });
        assert_eq!(err.kind(), "configuration");

        let value = serde_json::to_value(JobOutcome::failed(id, &err)).unwrap();
        assert_eq!(value["status"], "error");
        assert_eq!(value["job_id"], id.to_string());
        assert!(
            value["message"]
                .as_str()
                .unwrap()
                .starts_with("configuration error: object store is not configured")
        );
    }

    #[test]
    fn test_outcome_roundtrip_keeps_job_id() {
        let id = JobId::new();
        let outcome = JobOutcome::failed(id, &JobError::Panicked("boom".into()));
        let back: JobOutcome =
            serde_json::from_str(&serde_json::to_string(&outcome).unwrap()).unwrap();
        assert_eq!(back.job_id(), id);
        assert_eq!(back.status(), JobStatus::Failed);
    }
}
