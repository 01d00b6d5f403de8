//! Retention sweep for locally placed artifacts

use std::time::Duration;

use anyhow::Result;

use crate::services::janitor::{ArtifactJanitor, CleanupReport};

/// Remove job-scoped files older than `max_age` that no running job still owns
pub async fn sweep_expired_artifacts(
    janitor: ArtifactJanitor,
    max_age: Duration,
) -> Result<CleanupReport> {
    let report = tokio::task::spawn_blocking(move || janitor.sweep_expired(max_age)).await?;

    tracing::info!(
        removed = report.removed.len(),
        failures = report.failures.len(),
        "Retention sweep completed"
    );
    Ok(report)
}
