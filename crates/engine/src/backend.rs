//! The [`ExecutionBackend`] seam between the orchestrator and the places a
//! prediction can actually run.
//!
//! A backend never touches the job store. It reports progress through the
//! channel in its [`ExecutionContext`] and returns exactly one outcome; the
//! orchestrator turns both into persisted state.

use std::collections::BTreeMap;

use async_trait::async_trait;
use atomera_core::types::JobId;
use atomera_db::models::status::BackendKind;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Intermediate observation emitted while a job runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressUpdate {
    /// Completion percentage (0-100).
    Percent(u8),
    /// The remote provider accepted the job under this task id.
    RemoteTaskAssigned(String),
}

/// Everything a backend needs to run one job.
pub struct ExecutionContext {
    pub job_id: JobId,
    /// Request payload as submitted.
    pub input: serde_json::Value,
    pub cancel: CancellationToken,
    progress: mpsc::UnboundedSender<ProgressUpdate>,
}

impl ExecutionContext {
    pub fn new(
        job_id: JobId,
        input: serde_json::Value,
        cancel: CancellationToken,
        progress: mpsc::UnboundedSender<ProgressUpdate>,
    ) -> Self {
        Self {
            job_id,
            input,
            cancel,
            progress,
        }
    }

    /// Report progress. Dropped silently once the driver stops listening.
    pub fn report(&self, update: ProgressUpdate) {
        let _ = self.progress.send(update);
    }

    pub fn report_percent(&self, percent: u8) {
        self.report(ProgressUpdate::Percent(percent));
    }
}

/// Role of a file produced by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// Predicted complex structure.
    Pose,
    /// Any other result file (affinity / confidence JSON, logs).
    Auxiliary,
}

/// A named file produced by a run.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputFile {
    pub name: String,
    pub kind: FileKind,
    pub data: Vec<u8>,
}

/// Raw outcome of a successful run, identical in shape for every backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackendOutput {
    pub affinity_pred_value: Option<f64>,
    pub affinity_probability_binary: Option<f64>,
    pub confidence_score: Option<f64>,
    /// Additional numeric confidence metrics (ptm, iptm, complex_plddt, ...).
    pub confidence_metrics: BTreeMap<String, f64>,
    pub files: Vec<OutputFile>,
}

/// Why a run did not produce a [`BackendOutput`].
///
/// The `Display` text becomes the job's error message, so the prefixes of
/// the remote variants are stable.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("invalid job input: {0}")]
    InvalidInput(String),

    #[error("submission failed: {0}")]
    Submission(String),

    #[error("poll exhausted: {0}")]
    PollExhausted(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("payload error: {0}")]
    Payload(String),

    #[error("remote job failed: {0}")]
    RemoteFailed(String),

    #[error("local run failed: {0}")]
    LocalFailed(String),

    #[error("execution cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A strategy for performing the computation of one job.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Run the job to completion, honouring `ctx.cancel`.
    async fn execute(&self, ctx: ExecutionContext) -> Result<BackendOutput, ExecutionError>;
}
