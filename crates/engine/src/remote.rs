//! Remote execution backend: delegates a job to the RunPod endpoint and
//! polls it to completion.
//!
//! The poll loop runs on a fixed interval under a wall-clock deadline. Up to
//! `max_poll_failures` consecutive failed status checks are tolerated; one
//! more fails the run. A successful check resets the count. Cancellation is
//! observed between and during polls. On timeout or cancellation the
//! provider is asked, best effort, to cancel its task.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use atomera_core::request::PredictionRequest;
use atomera_db::models::status::BackendKind;
use atomera_runpod::input::{InputConfig, PredictionInput};
use atomera_runpod::output::{decode_output, DecodedOutput};
use atomera_runpod::{RemoteState, RunPodApi, RunPodApiError, StatusResponse};
use tokio::time::Instant;

use crate::backend::{
    BackendOutput, ExecutionBackend, ExecutionContext, ExecutionError, FileKind, OutputFile,
    ProgressUpdate,
};
use crate::config::{BoltzOptions, RemoteConfig};

/// Upper bound on the best-effort provider cancel call.
const CANCEL_GRACE: Duration = Duration::from_secs(5);

/// The provider calls the backend depends on. Implemented by [`RunPodApi`].
#[async_trait]
pub trait RemoteProvider: Send + Sync {
    /// Queue a job and return the provider's task id.
    async fn submit(&self, input: &serde_json::Value) -> Result<String, RunPodApiError>;

    /// Fetch the task's status document.
    async fn status(&self, task_id: &str) -> Result<StatusResponse, RunPodApiError>;

    /// Ask the provider to stop the task.
    async fn cancel(&self, task_id: &str) -> Result<(), RunPodApiError>;
}

#[async_trait]
impl RemoteProvider for RunPodApi {
    async fn submit(&self, input: &serde_json::Value) -> Result<String, RunPodApiError> {
        self.submit_job(input).await
    }

    async fn status(&self, task_id: &str) -> Result<StatusResponse, RunPodApiError> {
        self.get_status(task_id).await
    }

    async fn cancel(&self, task_id: &str) -> Result<(), RunPodApiError> {
        self.cancel_job(task_id).await
    }
}

/// Timing discipline for the poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub timeout: Duration,
    pub max_failures: u32,
}

impl From<&RemoteConfig> for PollPolicy {
    fn from(config: &RemoteConfig) -> Self {
        Self {
            interval: config.poll_interval,
            timeout: config.job_timeout,
            max_failures: config.max_poll_failures,
        }
    }
}

/// Runs predictions on a remote provider.
pub struct RemoteBackend {
    provider: Arc<dyn RemoteProvider>,
    policy: PollPolicy,
    boltz: BoltzOptions,
}

impl RemoteBackend {
    pub fn new(provider: Arc<dyn RemoteProvider>, policy: PollPolicy, boltz: BoltzOptions) -> Self {
        Self {
            provider,
            policy,
            boltz,
        }
    }

    /// Build a backend talking to RunPod with the given settings.
    pub fn from_config(config: &RemoteConfig, boltz: BoltzOptions) -> Result<Self, RunPodApiError> {
        let api = RunPodApi::new(&config.base_url, &config.endpoint_id, &config.api_key)?;
        Ok(Self::new(Arc::new(api), PollPolicy::from(config), boltz))
    }

    /// Submit the job once. No retry.
    pub async fn submit(&self, input: &serde_json::Value) -> Result<String, ExecutionError> {
        self.provider
            .submit(input)
            .await
            .map_err(|e| ExecutionError::Submission(e.to_string()))
    }

    /// One status check. [`StatusResponse::state`] gives the mapped
    /// [`RemoteState`].
    pub async fn poll(&self, task_id: &str) -> Result<StatusResponse, RunPodApiError> {
        self.provider.status(task_id).await
    }

    /// Decode the output carried by a completed status document.
    pub fn fetch_output(status: &StatusResponse) -> Result<BackendOutput, ExecutionError> {
        if status.state() != RemoteState::Succeeded {
            return Err(ExecutionError::Payload(format!(
                "task is not completed (status {})",
                status.status
            )));
        }

        let decoded = decode_output(status.output.as_ref())
            .map_err(|e| ExecutionError::Payload(e.to_string()))?;
        Ok(into_backend_output(decoded))
    }

    fn build_input(&self, ctx: &ExecutionContext) -> Result<serde_json::Value, ExecutionError> {
        let request = PredictionRequest::from_value(&ctx.input)
            .map_err(|e| ExecutionError::InvalidInput(e.to_string()))?;
        let config = InputConfig {
            devices: self.boltz.devices,
            accelerator: self.boltz.accelerator.clone(),
            diffusion_samples: self.boltz.diffusion_samples,
            use_msa_server: self.boltz.use_msa_server && request.use_msa,
        };
        let input = PredictionInput::new(
            ctx.job_id.to_string(),
            &request.to_input_yaml(),
            ctx.input.clone(),
            config,
        );
        Ok(input.to_value())
    }

    /// Poll until the task succeeds, fails, times out or is cancelled.
    /// Returns the completed status document.
    async fn wait_for_completion(
        &self,
        ctx: &ExecutionContext,
        task_id: &str,
        deadline: Instant,
    ) -> Result<StatusResponse, ExecutionError> {
        let mut failures: u32 = 0;
        let mut last_progress = 0u8;

        loop {
            let polled = tokio::select! {
                _ = ctx.cancel.cancelled() => return Err(ExecutionError::Cancelled),
                polled = tokio::time::timeout_at(deadline, self.poll(task_id)) => polled,
            };

            match polled {
                Err(_elapsed) => return Err(self.timed_out(task_id)),
                Ok(Ok(status)) => {
                    failures = 0;
                    match status.state() {
                        RemoteState::Succeeded => return Ok(status),
                        RemoteState::Failed { reason } => {
                            return Err(ExecutionError::RemoteFailed(reason));
                        }
                        state => {
                            if let Some(percent) = state.progress().filter(|p| *p > last_progress) {
                                last_progress = percent;
                                ctx.report_percent(percent);
                            }
                        }
                    }
                }
                Ok(Err(e)) => {
                    failures += 1;
                    tracing::warn!(
                        job_id = %ctx.job_id,
                        task_id,
                        failures,
                        error = %e,
                        "RunPod status check failed",
                    );
                    if failures > self.policy.max_failures {
                        return Err(ExecutionError::PollExhausted(format!(
                            "{failures} consecutive status checks failed, last error: {e}"
                        )));
                    }
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(self.timed_out(task_id));
            }
            let pause = self.policy.interval.min(deadline - now);

            tokio::select! {
                _ = ctx.cancel.cancelled() => return Err(ExecutionError::Cancelled),
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }

    fn timed_out(&self, task_id: &str) -> ExecutionError {
        ExecutionError::Timeout(format!(
            "task {task_id} did not complete within {}s",
            self.policy.timeout.as_secs()
        ))
    }

    async fn cancel_best_effort(&self, ctx: &ExecutionContext, task_id: &str) {
        match tokio::time::timeout(CANCEL_GRACE, self.provider.cancel(task_id)).await {
            Ok(Ok(())) => {
                tracing::info!(job_id = %ctx.job_id, task_id, "Cancelled RunPod task");
            }
            Ok(Err(e)) => {
                tracing::warn!(job_id = %ctx.job_id, task_id, error = %e, "Failed to cancel RunPod task");
            }
            Err(_) => {
                tracing::warn!(job_id = %ctx.job_id, task_id, "RunPod cancel request timed out");
            }
        }
    }
}

#[async_trait]
impl ExecutionBackend for RemoteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    async fn execute(&self, ctx: ExecutionContext) -> Result<BackendOutput, ExecutionError> {
        let input = self.build_input(&ctx)?;
        if ctx.cancel.is_cancelled() {
            return Err(ExecutionError::Cancelled);
        }

        let deadline = Instant::now() + self.policy.timeout;
        let task_id = self.submit(&input).await?;
        tracing::info!(job_id = %ctx.job_id, task_id = %task_id, "Job delegated to RunPod");
        ctx.report(ProgressUpdate::RemoteTaskAssigned(task_id.clone()));

        let completed = match self.wait_for_completion(&ctx, &task_id, deadline).await {
            Ok(status) => status,
            Err(e @ (ExecutionError::Timeout(_) | ExecutionError::Cancelled)) => {
                self.cancel_best_effort(&ctx, &task_id).await;
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let output = Self::fetch_output(&completed)?;
        ctx.report_percent(100);
        Ok(output)
    }
}

fn into_backend_output(decoded: DecodedOutput) -> BackendOutput {
    let poses = decoded.pose_files.into_iter().map(|(name, data)| OutputFile {
        name,
        kind: FileKind::Pose,
        data,
    });
    let others = decoded.output_files.into_iter().map(|(name, data)| OutputFile {
        name,
        kind: FileKind::Auxiliary,
        data,
    });
    BackendOutput {
        affinity_pred_value: decoded.affinity_pred_value,
        affinity_probability_binary: decoded.affinity_probability_binary,
        confidence_score: decoded.confidence_score,
        confidence_metrics: Default::default(),
        files: poses.chain(others).collect(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
