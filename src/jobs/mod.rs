//! Job lifecycle and background scheduling

pub mod job;
pub mod retention;
pub mod supervisor;

use tokio_cron_scheduler::{Job as CronJob, JobScheduler};
use tracing::info;

use crate::config::Config;
use crate::services::janitor::ArtifactJanitor;

pub use job::{Job, JobError, JobId, JobOutcome, JobStatus};
pub use supervisor::{JobHandle, JobSupervisor};

/// Initialize and start the job scheduler
pub async fn start_scheduler(
    config: &Config,
    janitor: ArtifactJanitor,
) -> anyhow::Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    // Locally placed artifacts are only kept for the retention window
    let max_age = config.local_retention;
    let retention_job = CronJob::new_async(config.retention_sweep_cron.as_str(), move |_uuid, _l| {
        let janitor = janitor.clone();
        Box::pin(async move {
            if let Err(e) = retention::sweep_expired_artifacts(janitor, max_age).await {
                tracing::error!("Retention sweep error: {}", e);
            }
        })
    })?;
    scheduler.add(retention_job).await?;

    scheduler.start().await?;

    info!(cron = %config.retention_sweep_cron, "Job scheduler started");
    Ok(scheduler)
}
