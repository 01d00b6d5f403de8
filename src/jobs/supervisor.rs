//! Job supervisor: runs each admitted job in its own task.
//!
//! Per job, stages run strictly in order:
//! fetch -> place -> terminal state -> cleanup -> notify.
//!
//! Admission never waits on any of this. A job is spawned immediately and then
//! waits for a worker permit; it is `Queued` until the permit is granted.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, warn};
use url::Url;

use crate::config::Config;
use crate::jobs::job::{Job, JobError, JobId, JobOutcome};
use crate::services::fetcher::{Artifact, CommandFetcher, FetchRequest, MediaFetcher};
use crate::services::gcs_storage::{GcsStorageClient, ObjectStore};
use crate::services::janitor::{ArtifactJanitor, ScopeGuard};
use crate::services::notifier::{HttpNotifier, Notifier};
use crate::services::placement::{Placement, PlacementKind, StoragePlacer};

/// A job that has been handed to the supervisor
pub struct JobHandle {
    pub job_id: JobId,
    pub task: JoinHandle<JobOutcome>,
}

struct Inner {
    fetcher: Arc<dyn MediaFetcher>,
    placer: StoragePlacer,
    janitor: ArtifactJanitor,
    notifier: Arc<dyn Notifier>,
    permits: Arc<Semaphore>,
}

/// Owns job identity and drives every job to a terminal state
#[derive(Clone)]
pub struct JobSupervisor {
    inner: Arc<Inner>,
}

impl JobSupervisor {
    pub fn new(
        fetcher: Arc<dyn MediaFetcher>,
        placer: StoragePlacer,
        janitor: ArtifactJanitor,
        notifier: Arc<dyn Notifier>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                fetcher,
                placer,
                janitor,
                notifier,
                permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            }),
        }
    }

    /// Wire the production collaborators from configuration
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let store = config
            .object_store
            .clone()
            .map(|c| Arc::new(GcsStorageClient::new(c)) as Arc<dyn ObjectStore>);

        Ok(Self::new(
            Arc::new(CommandFetcher::new(config.fetch.clone())),
            StoragePlacer::new(config.promote_threshold_bytes, store),
            ArtifactJanitor::new(&config.temp_dir),
            Arc::new(HttpNotifier::new(config.callback_timeout)?),
            config.max_concurrent_jobs,
        ))
    }

    pub fn fetcher(&self) -> &Arc<dyn MediaFetcher> {
        &self.inner.fetcher
    }

    pub fn janitor(&self) -> &ArtifactJanitor {
        &self.inner.janitor
    }

    pub fn is_store_configured(&self) -> bool {
        self.inner.placer.is_store_configured()
    }

    /// Create a job and spawn it. Returns as soon as the task is spawned.
    pub fn submit(&self, source_url: Url, callback_endpoint: Url) -> JobHandle {
        let job = Job::new(source_url, callback_endpoint);
        let job_id = job.id;
        let span = info_span!("job", job_id = %job_id);

        info!(job_id = %job_id, source_url = %job.source_url, "Job queued");

        let supervisor = self.clone();
        let task = tokio::spawn(async move { supervisor.run(job).await }.instrument(span));

        JobHandle { job_id, task }
    }

    /// Drive `job` from `Queued` to a terminal state, clean up, and notify.
    pub async fn run(&self, mut job: Job) -> JobOutcome {
        let _permit = match self.inner.permits.clone().acquire_owned().await {
            Ok(permit) => Some(permit),
            Err(e) => {
                warn!(error = %e, "Worker pool closed, running job without a permit");
                None
            }
        };

        if let Err(e) = job.start() {
            error!(error = %e, "Job could not enter Running");
        }
        info!(source_url = %job.source_url, "Job running");

        let scope = self.inner.janitor.acquire(&job.id.to_string());

        let result = AssertUnwindSafe(self.execute(&job, &scope))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(JobError::Panicked(panic_message(panic.as_ref()))));

        let (outcome, keep) = match result {
            Ok((artifact, placement)) => {
                info!(
                    location = %placement.kind,
                    size_bytes = artifact.size_bytes,
                    "Job succeeded"
                );
                let keep = (placement.kind == PlacementKind::Local)
                    .then(|| artifact.local_path.clone());
                (JobOutcome::succeeded(&job, &artifact, &placement), keep)
            }
            Err(err) => {
                warn!(kind = err.kind(), error = %err, "Job failed");
                (JobOutcome::failed(job.id, &err), None)
            }
        };

        if let Err(e) = job.finish(outcome.clone()) {
            error!(error = %e, "Job could not enter its terminal state");
        }

        self.cleanup(scope, keep).await;
        self.notify(&job, &outcome).await;

        outcome
    }

    async fn execute(
        &self,
        job: &Job,
        scope: &ScopeGuard,
    ) -> Result<(Artifact, Placement), JobError> {
        let request = FetchRequest {
            source_url: &job.source_url,
            output_template: scope.output_template(),
        };

        let (artifact, raw) = self.inner.fetcher.fetch(&request).await?;
        debug!(
            logical_id = %artifact.logical_id,
            extractor = raw.get("extractor").and_then(|v| v.as_str()).unwrap_or("unknown"),
            "Artifact retrieved"
        );

        let placement = self.inner.placer.place(&artifact).await?;
        Ok((artifact, placement))
    }

    async fn cleanup(&self, scope: ScopeGuard, keep: Option<std::path::PathBuf>) {
        let prefix = scope.prefix().to_string();
        match tokio::task::spawn_blocking(move || scope.release(keep.as_deref())).await {
            Ok(report) => {
                if !report.is_clean() {
                    warn!(
                        scope = %prefix,
                        failures = report.failures.len(),
                        "Cleanup left files behind"
                    );
                }
                debug!(
                    scope = %prefix,
                    removed = report.removed.len(),
                    retained = report.retained.len(),
                    "Cleanup complete"
                );
            }
            Err(e) => warn!(scope = %prefix, error = %e, "Cleanup task failed"),
        }
    }

    async fn notify(&self, job: &Job, outcome: &JobOutcome) {
        match self.inner.notifier.notify(&job.callback_endpoint, outcome).await {
            Ok(()) => info!(endpoint = %job.callback_endpoint, "Completion callback delivered"),
            Err(e) => warn!(
                endpoint = %job.callback_endpoint,
                error = %e,
                "Completion callback failed; not retrying"
            ),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}
