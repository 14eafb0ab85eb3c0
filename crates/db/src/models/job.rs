//! Job entity, result manifest and list query.
//!
//! All lifecycle mutations go through the methods on [`Job`], which enforce
//! the state machine in [`super::status`] and keep the field invariants:
//! `result` only on completed jobs, `error_message` only on failed jobs,
//! `remote_task_id` only on remote jobs.

use atomera_core::error::CoreError;
use atomera_core::types::{JobId, Timestamp};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::status::{BackendKind, JobStatus};

/// Maximum page size for job listing.
pub const MAX_LIMIT: usize = 100;

/// Default page size for job listing.
pub const DEFAULT_LIMIT: usize = 50;

/// Fallback text used when a failure carries no message.
const UNKNOWN_FAILURE: &str = "job failed without a diagnostic message";

/// A persisted prediction job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    pub progress: u8,
    pub backend_kind: BackendKind,
    pub input: serde_json::Value,
    pub remote_task_id: Option<String>,
    pub result: Option<JobResult>,
    pub error_message: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
}

/// Output of a completed job: the mapped summary plus the stored artifacts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub payload: serde_json::Value,
    pub artifacts: Vec<ArtifactEntry>,
}

/// Manifest entry for one stored artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactEntry {
    pub name: String,
    pub size_bytes: u64,
    pub sha256: String,
}

/// Caller-facing status snapshot (no input or result payload).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobView {
    pub id: JobId,
    pub status: JobStatus,
    pub progress: u8,
    pub backend_kind: BackendKind,
    pub remote_task_id: Option<String>,
    pub error_message: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
}

/// Query parameters for `GET /api/v1/jobs`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobListQuery {
    /// Only return jobs in this status.
    pub status: Option<JobStatus>,
    /// Maximum number of results. Defaults to 50, capped at 100.
    pub limit: Option<usize>,
}

impl JobListQuery {
    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }

    pub fn matches(&self, job: &Job) -> bool {
        self.status.is_none_or(|status| job.status == status)
    }

    /// Filter, order most-recently-updated first, and truncate.
    pub fn apply(&self, jobs: impl IntoIterator<Item = Job>) -> Vec<Job> {
        let mut selected: Vec<Job> = jobs.into_iter().filter(|j| self.matches(j)).collect();
        selected.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
        selected.truncate(self.effective_limit());
        selected
    }
}

impl Job {
    /// A new pending job.
    pub fn new(id: JobId, input: serde_json::Value, backend_kind: BackendKind) -> Self {
        let now = Utc::now();
        Self {
            id,
            status: JobStatus::Pending,
            progress: 0,
            backend_kind,
            input,
            remote_task_id: None,
            result: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn view(&self) -> JobView {
        JobView {
            id: self.id,
            status: self.status,
            progress: self.progress,
            backend_kind: self.backend_kind,
            remote_task_id: self.remote_task_id.clone(),
            error_message: self.error_message.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }

    /// Move to `running`.
    pub fn start(&mut self) -> Result<(), CoreError> {
        self.transition(JobStatus::Running)
    }

    /// Record a progress percentage. Progress never decreases; values above
    /// 100 are clamped. Returns `true` if the stored value changed.
    pub fn record_progress(&mut self, percent: u8) -> Result<bool, CoreError> {
        if self.status != JobStatus::Running {
            return Err(CoreError::InvalidTransition(format!(
                "cannot record progress on a {} job",
                self.status
            )));
        }
        let percent = percent.min(100);
        if percent <= self.progress {
            return Ok(false);
        }
        self.progress = percent;
        self.touch();
        Ok(true)
    }

    /// Remember the provider's task id after a successful remote submission.
    pub fn assign_remote_task(&mut self, task_id: String) -> Result<(), CoreError> {
        if self.backend_kind != BackendKind::Remote {
            return Err(CoreError::Validation(
                "remote task ids only apply to remote jobs".into(),
            ));
        }
        if self.is_terminal() {
            return Err(CoreError::InvalidTransition(format!(
                "job is already {}",
                self.status
            )));
        }
        self.remote_task_id = Some(task_id);
        self.touch();
        Ok(())
    }

    /// Finalize as `completed` with its result.
    pub fn complete(&mut self, result: JobResult) -> Result<(), CoreError> {
        self.transition(JobStatus::Completed)?;
        self.progress = 100;
        self.result = Some(result);
        Ok(())
    }

    /// Finalize as `failed`. An empty message is replaced with a generic one.
    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), CoreError> {
        self.transition(JobStatus::Failed)?;
        let message = message.into();
        let message = if message.trim().is_empty() {
            UNKNOWN_FAILURE.to_string()
        } else {
            message
        };
        self.error_message = Some(message);
        Ok(())
    }

    /// Finalize as `cancelled`.
    pub fn cancel(&mut self) -> Result<(), CoreError> {
        self.transition(JobStatus::Cancelled)
    }

    fn transition(&mut self, next: JobStatus) -> Result<(), CoreError> {
        if !self.status.can_transition_to(next) {
            return Err(CoreError::InvalidTransition(format!(
                "job {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }
        let now = Utc::now();
        self.status = next;
        self.updated_at = now;
        if next == JobStatus::Running {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.completed_at = Some(now);
        }
        Ok(())
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Check that an artifact name is a single, plain file name.
pub fn validate_artifact_name(name: &str) -> Result<(), CoreError> {
    let ok = !name.is_empty()
        && name.len() <= 255
        && name != "."
        && name != ".."
        && !name.starts_with('.')
        && !name.contains(['/', '\\', '\0']);
    if ok {
        Ok(())
    } else {
        Err(CoreError::Validation(format!("Invalid artifact name '{name}'")))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
