//! Periodic cleanup of finished jobs.
//!
//! Deletes completed, failed and cancelled jobs (with their artifacts) once
//! they are older than the configured retention period. Runs on a fixed
//! interval using `tokio::time::interval`.

use std::time::Duration;

use atomera_engine::JobOrchestrator;
use tokio_util::sync::CancellationToken;

/// How often the cleanup job runs.
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);

/// Run the retention loop until `cancel` is triggered.
pub async fn run(
    orchestrator: JobOrchestrator,
    retention_hours: i64,
    interval: Duration,
    cancel: CancellationToken,
) {
    tracing::info!(
        retention_hours,
        interval_secs = interval.as_secs(),
        "Job retention task started"
    );

    let mut ticker = tokio::time::interval(interval);
    let retention = chrono::Duration::hours(retention_hours);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Job retention task stopping");
                break;
            }
            _ = ticker.tick() => {
                match orchestrator.purge_finished(retention).await {
                    Ok(purged) if purged > 0 => {
                        tracing::info!(purged, "Job retention: purged finished jobs");
                    }
                    Ok(_) => tracing::debug!("Job retention: nothing to purge"),
                    Err(e) => tracing::error!(error = %e, "Job retention: cleanup failed"),
                }
            }
        }
    }
}
