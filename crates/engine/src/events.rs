//! Job lifecycle events broadcast by the orchestrator.
//!
//! One event is sent for every persisted mutation of a job, in the order
//! the mutations were written.

use atomera_core::types::JobId;
use atomera_db::models::job::Job;
use atomera_db::models::status::JobStatus;
use serde::Serialize;

/// Broadcast channel capacity for job events.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Snapshot of a job right after a state or progress change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobEvent {
    pub job_id: JobId,
    pub status: JobStatus,
    /// Completion percentage (0-100).
    pub progress: u8,
}

impl From<&Job> for JobEvent {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            progress: job.progress,
        }
    }
}
