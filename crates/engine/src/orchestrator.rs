//! Job lifecycle driver.
//!
//! [`JobOrchestrator`] owns job creation, backend dispatch and every write
//! to the [`JobStore`]. Each submitted job gets one driver task which waits
//! for a concurrency permit, runs the backend, applies progress messages in
//! the order they arrive and performs exactly one finalizing write.
//!
//! Every read-modify-write of a job happens under that job's async lock, so
//! a terminal state written by `cancel` can never be overwritten by a late
//! progress message or backend outcome.
//!
//! Persisted mutations are broadcast as [`JobEvent`]s. Call
//! [`JobOrchestrator::subscribe`] to receive them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use atomera_core::error::CoreError;
use atomera_core::types::{new_job_id, JobId};
use atomera_db::models::job::{validate_artifact_name, Job, JobListQuery, JobResult, JobView};
use atomera_db::models::status::{BackendKind, JobStatus};
use atomera_db::{JobStore, StoreError};
use chrono::Utc;
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::assembler::ResultAssembler;
use crate::backend::{
    BackendOutput, ExecutionBackend, ExecutionContext, ExecutionError, ProgressUpdate,
};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::events::{JobEvent, EVENT_CHANNEL_CAPACITY};
use crate::local::LocalBackend;
use crate::remote::RemoteBackend;

/// Scratch directory for local runs, relative to the storage root. Not a
/// UUID, so store listings skip it.
pub const WORK_DIR: &str = ".work";

/// How long [`JobOrchestrator::shutdown`] waits for drivers to exit.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

const INTERRUPTED_BY_SHUTDOWN: &str = "interrupted: service shut down while the job was running";
const INTERRUPTED_BY_RESTART: &str = "interrupted: service restarted while the job was running";

/// Result of [`JobOrchestrator::recover_interrupted`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoverySummary {
    /// Pending jobs handed to a new driver.
    pub requeued: usize,
    /// Running or unrunnable jobs marked failed.
    pub failed: usize,
}

/// How a driver's backend run ended.
enum Outcome {
    Output(BackendOutput),
    Cancelled,
    Failed(String),
}

/// Shared handle to the job engine. Cheap to clone into request handlers.
#[derive(Clone)]
pub struct JobOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn JobStore>,
    backend: Arc<dyn ExecutionBackend>,
    permits: Arc<Semaphore>,
    /// Per-job locks serializing read-modify-write cycles.
    locks: Mutex<HashMap<JobId, Arc<tokio::sync::Mutex<()>>>>,
    /// Cancellation tokens of live drivers.
    tokens: Mutex<HashMap<JobId, CancellationToken>>,
    /// Root token; every driver token is a child of it.
    cancel: CancellationToken,
    tracker: TaskTracker,
    event_tx: broadcast::Sender<JobEvent>,
}

impl JobOrchestrator {
    pub fn new(
        store: Arc<dyn JobStore>,
        backend: Arc<dyn ExecutionBackend>,
        max_concurrent_jobs: usize,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                store,
                backend,
                permits: Arc::new(Semaphore::new(max_concurrent_jobs.max(1))),
                locks: Mutex::new(HashMap::new()),
                tokens: Mutex::new(HashMap::new()),
                cancel: CancellationToken::new(),
                tracker: TaskTracker::new(),
                event_tx,
            }),
        }
    }

    /// Build the orchestrator with the backend the configuration selects:
    /// remote when RunPod is fully configured, local otherwise.
    pub fn from_config(config: &EngineConfig, store: Arc<dyn JobStore>) -> Result<Self, EngineError> {
        let backend: Arc<dyn ExecutionBackend> = match &config.remote {
            Some(remote) => {
                let backend = RemoteBackend::from_config(remote, config.boltz.clone()).map_err(|e| {
                    CoreError::Internal(format!("Failed to build RunPod client: {e}"))
                })?;
                Arc::new(backend)
            }
            None => Arc::new(LocalBackend::new(
                config.local.clone(),
                config.boltz.clone(),
                config.storage_dir.join(WORK_DIR),
            )),
        };
        tracing::info!(
            backend = %backend.kind(),
            max_concurrent_jobs = config.max_concurrent_jobs,
            "Job orchestrator configured",
        );
        Ok(Self::new(store, backend, config.max_concurrent_jobs))
    }

    /// Subscribe to job lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Backend assigned to newly submitted jobs.
    pub fn backend_kind(&self) -> BackendKind {
        self.inner.backend.kind()
    }

    pub async fn store_health(&self) -> Result<(), EngineError> {
        Ok(self.inner.store.health_check().await?)
    }

    /// Create a pending job and start its driver. Returns immediately.
    pub async fn submit(&self, input: serde_json::Value) -> Result<JobId, EngineError> {
        if is_empty_input(&input) {
            return Err(CoreError::Validation("Job input must not be empty".into()).into());
        }
        if self.inner.cancel.is_cancelled() {
            return Err(CoreError::Internal("Job orchestrator is shutting down".into()).into());
        }

        let job = Job::new(new_job_id(), input, self.inner.backend.kind());
        self.inner.store.create(&job).await?;
        self.inner.emit(&job);

        tracing::info!(job_id = %job.id, backend = %job.backend_kind, "Job submitted");

        let id = job.id;
        self.spawn_driver(id, job.input);
        Ok(id)
    }

    pub async fn get_status(&self, id: JobId) -> Result<JobView, EngineError> {
        Ok(self.inner.load(id).await?.view())
    }

    /// The stored result of a completed job.
    pub async fn get_result(&self, id: JobId) -> Result<JobResult, EngineError> {
        let job = self.inner.load(id).await?;
        match (job.status, job.result) {
            (JobStatus::Completed, Some(result)) => Ok(result),
            (JobStatus::Failed, _) => Err(EngineError::JobFailed(job.error_message.unwrap_or_default())),
            (status, _) => Err(CoreError::NotReady(format!("Job {id} is {status}")).into()),
        }
    }

    /// Mark a non-terminal job cancelled and stop its driver. A remote
    /// backend forwards the cancellation to the provider on a best-effort
    /// basis.
    pub async fn cancel(&self, id: JobId) -> Result<(), EngineError> {
        self.inner
            .modify(id, |job| {
                job.cancel()?;
                Ok(true)
            })
            .await?;
        self.inner.signal_driver(id);
        tracing::info!(job_id = %id, "Job cancelled");
        Ok(())
    }

    /// Remove a job and its artifacts, stopping its driver if one is active.
    pub async fn delete(&self, id: JobId) -> Result<(), EngineError> {
        let lock = self.inner.lock_for(id);
        let deleted = {
            let _guard = lock.lock().await;
            self.inner.signal_driver(id);
            self.inner.store.delete(id).await?
        };
        self.inner.forget_lock(id);
        if !deleted {
            return Err(not_found(id));
        }
        tracing::info!(job_id = %id, "Job deleted");
        Ok(())
    }

    pub async fn list(&self, query: &JobListQuery) -> Result<Vec<JobView>, EngineError> {
        let jobs = self.inner.store.list(query).await?;
        Ok(jobs.iter().map(Job::view).collect())
    }

    /// Bytes of one artifact listed in a completed job's manifest.
    pub async fn get_artifact(&self, id: JobId, name: &str) -> Result<Vec<u8>, EngineError> {
        validate_artifact_name(name)?;
        let job = self.inner.load(id).await?;
        let Some(result) = job.result.filter(|_| job.status == JobStatus::Completed) else {
            return Err(CoreError::NotReady(format!("Job {id} is {}", job.status)).into());
        };
        if !result.artifacts.iter().any(|a| a.name == name) {
            return Err(CoreError::NotFound {
                entity: "Artifact",
                id: name.to_string(),
            }
            .into());
        }
        Ok(self.inner.store.read_artifact(id, name).await?)
    }

    /// Delete terminal jobs that finished more than `older_than` ago.
    /// Returns the number of jobs removed.
    pub async fn purge_finished(&self, older_than: chrono::Duration) -> Result<usize, EngineError> {
        let cutoff = Utc::now() - older_than;
        let mut purged = 0;

        for job in self.inner.store.list_all().await? {
            let finished_at = job.completed_at.unwrap_or(job.updated_at);
            if !job.is_terminal() || finished_at >= cutoff {
                continue;
            }
            let lock = self.inner.lock_for(job.id);
            let deleted = {
                let _guard = lock.lock().await;
                self.inner.store.delete(job.id).await?
            };
            self.inner.forget_lock(job.id);
            if deleted {
                tracing::debug!(job_id = %job.id, status = %job.status, "Purged finished job");
                purged += 1;
            }
        }

        Ok(purged)
    }

    /// Reconcile jobs left behind by a previous process.
    ///
    /// Jobs that were running are failed: their backend run did not survive
    /// the restart. Pending jobs get a new driver, unless they were assigned
    /// a backend this instance does not have.
    pub async fn recover_interrupted(&self) -> Result<RecoverySummary, EngineError> {
        let mut summary = RecoverySummary::default();
        let current = self.inner.backend.kind();

        for job in self.inner.store.list_all().await? {
            match job.status {
                JobStatus::Running => {
                    self.inner
                        .modify(job.id, |job| {
                            job.fail(INTERRUPTED_BY_RESTART)?;
                            Ok(true)
                        })
                        .await?;
                    summary.failed += 1;
                }
                JobStatus::Pending if job.backend_kind != current => {
                    let message = format!("{} backend is not available", job.backend_kind);
                    self.inner
                        .modify(job.id, |job| {
                            job.fail(message)?;
                            Ok(true)
                        })
                        .await?;
                    summary.failed += 1;
                }
                JobStatus::Pending => {
                    self.spawn_driver(job.id, job.input);
                    summary.requeued += 1;
                }
                _ => {}
            }
        }

        if summary != RecoverySummary::default() {
            tracing::info!(
                requeued = summary.requeued,
                failed = summary.failed,
                "Recovered jobs from a previous run",
            );
        }
        Ok(summary)
    }

    /// Stop accepting jobs, cancel every driver and wait for them to exit.
    ///
    /// Running jobs are recorded as failed; queued jobs stay pending and are
    /// picked up by [`JobOrchestrator::recover_interrupted`] on next start.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down job orchestrator");
        self.inner.cancel.cancel();
        self.inner.tracker.close();

        if tokio::time::timeout(SHUTDOWN_GRACE, self.inner.tracker.wait())
            .await
            .is_err()
        {
            tracing::warn!(
                remaining = self.inner.tracker.len(),
                "Job drivers did not exit within the shutdown grace period",
            );
        }

        tracing::info!("Job orchestrator shut down complete");
    }

    // ---- private helpers ----

    fn spawn_driver(&self, id: JobId, input: serde_json::Value) {
        let token = self.inner.cancel.child_token();
        self.inner
            .tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, token.clone());

        let inner = Arc::clone(&self.inner);
        self.inner.tracker.spawn(async move {
            inner.drive(id, input, &token).await;
            inner.forget_token(id);
        });
    }
}

impl Inner {
    async fn load(&self, id: JobId) -> Result<Job, EngineError> {
        self.store.get(id).await?.ok_or_else(|| not_found(id))
    }

    fn emit(&self, job: &Job) {
        // No subscribers is not an error.
        let _ = self.event_tx.send(JobEvent::from(job));
    }

    fn lock_for(&self, id: JobId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(id).or_default())
    }

    fn forget_lock(&self, id: JobId) {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    fn signal_driver(&self, id: JobId) {
        let tokens = self.tokens.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(token) = tokens.get(&id) {
            token.cancel();
        }
    }

    fn forget_token(&self, id: JobId) {
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    /// Apply `change` to the stored job under its lock. `change` returns
    /// whether it modified the job; modified jobs are written back and
    /// broadcast.
    async fn modify(
        &self,
        id: JobId,
        change: impl FnOnce(&mut Job) -> Result<bool, CoreError>,
    ) -> Result<Job, EngineError> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let mut job = self.load(id).await?;
        if change(&mut job)? {
            self.store.update(&job).await?;
            self.emit(&job);
        }
        Ok(job)
    }

    async fn drive(&self, id: JobId, input: serde_json::Value, token: &CancellationToken) {
        let _permit = tokio::select! {
            biased;
            _ = token.cancelled() => {
                tracing::debug!(job_id = %id, "Job cancelled while queued");
                return;
            }
            permit = Arc::clone(&self.permits).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return,
            },
        };
        if token.is_cancelled() {
            return;
        }

        match self.mark_running(id).await {
            Ok(true) => {}
            Ok(false) => return,
            Err(e) => {
                tracing::error!(job_id = %id, error = %e, "Failed to start job");
                return;
            }
        }

        let started = Instant::now();
        let outcome = self.execute(id, input, token).await;
        let elapsed = started.elapsed();

        if let Err(e) = self.finalize(id, outcome, elapsed).await {
            tracing::error!(job_id = %id, error = %e, "Failed to record job outcome");
        }
    }

    /// Move a still-pending job to running. `false` if it was cancelled or
    /// deleted while queued.
    async fn mark_running(&self, id: JobId) -> Result<bool, EngineError> {
        let result = self
            .modify(id, |job| {
                if job.status != JobStatus::Pending {
                    return Ok(false);
                }
                job.start()?;
                Ok(true)
            })
            .await;

        match result {
            Ok(job) if job.status == JobStatus::Running => {
                tracing::info!(job_id = %id, backend = %job.backend_kind, "Job started");
                Ok(true)
            }
            Ok(_) => Ok(false),
            Err(EngineError::Core(CoreError::NotFound { .. })) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Run the backend in its own task, persisting progress as it arrives.
    async fn execute(
        &self,
        id: JobId,
        input: serde_json::Value,
        token: &CancellationToken,
    ) -> Outcome {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let ctx = ExecutionContext::new(id, input, token.clone(), tx);
        let backend = Arc::clone(&self.backend);
        let mut handle = tokio::spawn(async move { backend.execute(ctx).await });

        let joined = loop {
            tokio::select! {
                biased;
                Some(update) = rx.recv() => self.apply_progress(id, update).await,
                joined = &mut handle => break joined,
            }
        };
        while let Ok(update) = rx.try_recv() {
            self.apply_progress(id, update).await;
        }

        match joined {
            Ok(Ok(output)) => Outcome::Output(output),
            Ok(Err(ExecutionError::Cancelled)) => Outcome::Cancelled,
            Ok(Err(e)) => Outcome::Failed(e.to_string()),
            Err(e) if e.is_panic() => {
                tracing::error!(job_id = %id, "Execution task panicked");
                Outcome::Failed(format!("execution panicked: {}", panic_message(e.into_panic())))
            }
            Err(e) => Outcome::Failed(format!("execution task aborted: {e}")),
        }
    }

    async fn apply_progress(&self, id: JobId, update: ProgressUpdate) {
        let result = self
            .modify(id, |job| {
                if job.status != JobStatus::Running {
                    return Ok(false);
                }
                match update {
                    ProgressUpdate::Percent(percent) => job.record_progress(percent),
                    ProgressUpdate::RemoteTaskAssigned(task_id) => {
                        job.assign_remote_task(task_id)?;
                        Ok(true)
                    }
                }
            })
            .await;

        match result {
            Ok(_) | Err(EngineError::Core(CoreError::NotFound { .. })) => {}
            Err(e) => tracing::warn!(job_id = %id, error = %e, "Failed to record job progress"),
        }
    }

    /// The single finalizing write. Discards the outcome when the job was
    /// cancelled or deleted in the meantime.
    async fn finalize(&self, id: JobId, outcome: Outcome, elapsed: Duration) -> Result<(), EngineError> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let Some(mut job) = self.store.get(id).await? else {
            tracing::debug!(job_id = %id, "Job deleted during execution, discarding outcome");
            return Ok(());
        };
        if job.is_terminal() {
            tracing::debug!(job_id = %id, status = %job.status, "Job already finalized, discarding outcome");
            return Ok(());
        }

        match outcome {
            Outcome::Output(output) => {
                match ResultAssembler::assemble(output, job.backend_kind, Some(elapsed)) {
                    Ok(assembled) => {
                        let mut stored = Ok(());
                        for (entry, data) in &assembled.artifacts {
                            stored = self.store.write_artifact(id, &entry.name, data).await;
                            if stored.is_err() {
                                break;
                            }
                        }
                        match stored {
                            Ok(()) => job.complete(JobResult {
                                artifacts: assembled.manifest(),
                                payload: assembled.payload,
                            })?,
                            Err(StoreError::NotFound(_)) => {
                                tracing::debug!(job_id = %id, "Job deleted while storing artifacts");
                                return Ok(());
                            }
                            Err(e) => job.fail(format!("failed to store artifacts: {e}"))?,
                        }
                    }
                    Err(e) => job.fail(e.to_string())?,
                }
            }
            Outcome::Cancelled => job.fail(INTERRUPTED_BY_SHUTDOWN)?,
            Outcome::Failed(message) => job.fail(message)?,
        }

        self.store.update(&job).await?;
        self.emit(&job);

        match job.status {
            JobStatus::Completed => tracing::info!(
                job_id = %id,
                elapsed_ms = elapsed.as_millis() as u64,
                "Job completed",
            ),
            _ => tracing::warn!(
                job_id = %id,
                error = job.error_message.as_deref().unwrap_or_default(),
                "Job failed",
            ),
        }
        Ok(())
    }
}

fn not_found(id: JobId) -> EngineError {
    CoreError::NotFound {
        entity: "Job",
        id: id.to_string(),
    }
    .into()
}

fn is_empty_input(input: &serde_json::Value) -> bool {
    match input {
        serde_json::Value::Null => true,
        serde_json::Value::Object(map) => map.is_empty(),
        serde_json::Value::Array(items) => items.is_empty(),
        serde_json::Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".into()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use atomera_db::MemoryJobStore;
    use serde_json::json;

    use super::*;
    use crate::backend::{FileKind, OutputFile};
    use crate::remote::tests::{completed_status, fast_policy, request, status, ScriptedProvider};
    use crate::remote::PollPolicy;

    enum Behavior {
        Succeed,
        Fail(&'static str),
        Panic,
    }

    /// Backend double. Reports 30% progress, optionally waits for a permit
    /// on `gate`, then acts per `behavior`. The affinity value echoes the
    /// input's `n` field.
    struct TestBackend {
        behavior: Behavior,
        gate: Option<Arc<Semaphore>>,
        ignore_cancel: bool,
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    impl TestBackend {
        fn new(behavior: Behavior) -> Self {
            Self {
                behavior,
                gate: None,
                ignore_cancel: false,
                running: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }

        fn gated(gate: Arc<Semaphore>) -> Self {
            Self {
                gate: Some(gate),
                ..Self::new(Behavior::Succeed)
            }
        }
    }

    #[async_trait]
    impl ExecutionBackend for TestBackend {
        fn kind(&self) -> BackendKind {
            BackendKind::Local
        }

        async fn execute(&self, ctx: ExecutionContext) -> Result<BackendOutput, ExecutionError> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            ctx.report_percent(30);

            let gated = match &self.gate {
                None => Ok(()),
                Some(gate) if self.ignore_cancel => {
                    gate.acquire().await.expect("gate").forget();
                    Ok(())
                }
                Some(gate) => tokio::select! {
                    _ = ctx.cancel.cancelled() => Err(ExecutionError::Cancelled),
                    permit = gate.acquire() => {
                        permit.expect("gate").forget();
                        Ok(())
                    }
                },
            };
            self.running.fetch_sub(1, Ordering::SeqCst);
            gated?;

            match self.behavior {
                Behavior::Succeed => Ok(BackendOutput {
                    affinity_pred_value: ctx.input["n"].as_f64(),
                    confidence_score: Some(0.9),
                    files: vec![OutputFile {
                        name: "pose_0.cif".into(),
                        kind: FileKind::Pose,
                        data: ctx.job_id.to_string().into_bytes(),
                    }],
                    ..Default::default()
                }),
                Behavior::Fail(message) => Err(ExecutionError::LocalFailed(message.into())),
                Behavior::Panic => panic!("backend exploded"),
            }
        }
    }

    fn orchestrator(backend: Arc<dyn ExecutionBackend>, max_concurrent: usize) -> JobOrchestrator {
        JobOrchestrator::new(Arc::new(MemoryJobStore::new()), backend, max_concurrent)
    }

    async fn wait_for(orch: &JobOrchestrator, id: JobId, pred: impl Fn(&JobView) -> bool) -> JobView {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let view = orch.get_status(id).await.expect("status");
                if pred(&view) {
                    return view;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("job did not reach the expected state in time")
    }

    async fn wait_terminal(orch: &JobOrchestrator, id: JobId) -> JobView {
        wait_for(orch, id, |v| v.status.is_terminal()).await
    }

    #[tokio::test]
    async fn submit_rejects_empty_input() {
        let orch = orchestrator(Arc::new(TestBackend::new(Behavior::Succeed)), 2);
        for input in [json!(null), json!({}), json!([]), json!("  ")] {
            assert_matches!(
                orch.submit(input).await,
                Err(EngineError::Core(CoreError::Validation(_)))
            );
        }
        assert!(orch.list(&JobListQuery::default()).await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn job_completes_with_result_and_artifacts() {
        let orch = orchestrator(Arc::new(TestBackend::new(Behavior::Succeed)), 2);
        let id = orch.submit(json!({"n": 7})).await.expect("submit");

        let view = wait_terminal(&orch, id).await;
        assert_eq!(view.status, JobStatus::Completed);
        assert_eq!(view.progress, 100);
        assert!(view.started_at.is_some());
        assert!(view.completed_at.is_some());

        let result = orch.get_result(id).await.expect("result");
        assert_eq!(result.payload["affinity_pred_value"], json!(7.0));
        assert_eq!(result.payload["pose_files"], json!(["pose_0.cif"]));
        assert_eq!(result.payload["backend"], json!("local"));
        assert_eq!(result.artifacts.len(), 1);

        let pose = orch.get_artifact(id, "pose_0.cif").await.expect("artifact");
        assert_eq!(pose, id.to_string().into_bytes());
        assert_matches!(
            orch.get_artifact(id, "missing.cif").await,
            Err(EngineError::Core(CoreError::NotFound { entity: "Artifact", .. }))
        );
        assert_matches!(
            orch.get_artifact(id, "../metadata.json").await,
            Err(EngineError::Core(CoreError::Validation(_)))
        );
    }

    #[tokio::test]
    async fn events_follow_the_lifecycle_monotonically() {
        let orch = orchestrator(Arc::new(TestBackend::new(Behavior::Succeed)), 2);
        let mut events = orch.subscribe();
        let id = orch.submit(json!({"n": 1})).await.expect("submit");

        let mut seen = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let event = events.recv().await.expect("event");
                if event.job_id != id {
                    continue;
                }
                let terminal = event.status.is_terminal();
                seen.push(event);
                if terminal {
                    break;
                }
            }
        })
        .await
        .expect("events");

        let statuses: Vec<JobStatus> = seen.iter().map(|e| e.status).collect();
        assert_eq!(statuses.first(), Some(&JobStatus::Pending));
        assert_eq!(statuses.last(), Some(&JobStatus::Completed));
        assert!(statuses.contains(&JobStatus::Running));
        assert!(seen.windows(2).all(|w| w[0].progress <= w[1].progress));
        assert!(seen.iter().any(|e| e.status == JobStatus::Running && e.progress == 30));
    }

    #[tokio::test]
    async fn cancel_wins_over_a_late_success() {
        let gate = Arc::new(Semaphore::new(0));
        let backend = Arc::new(TestBackend {
            ignore_cancel: true,
            ..TestBackend::gated(gate.clone())
        });
        let orch = orchestrator(backend, 2);
        let id = orch.submit(json!({"n": 1})).await.expect("submit");
        wait_for(&orch, id, |v| v.progress == 30).await;

        orch.cancel(id).await.expect("cancel");
        gate.add_permits(1);
        orch.shutdown().await;

        let view = orch.get_status(id).await.expect("status");
        assert_eq!(view.status, JobStatus::Cancelled);
        assert!(view.error_message.is_none());
        assert_matches!(
            orch.get_result(id).await,
            Err(EngineError::Core(CoreError::NotReady(_)))
        );
    }

    #[tokio::test]
    async fn cancel_of_a_terminal_job_is_rejected() {
        let orch = orchestrator(Arc::new(TestBackend::new(Behavior::Succeed)), 2);
        let id = orch.submit(json!({"n": 1})).await.expect("submit");
        wait_terminal(&orch, id).await;

        assert_matches!(
            orch.cancel(id).await,
            Err(EngineError::Core(CoreError::InvalidTransition(_)))
        );
        assert_matches!(
            orch.cancel(new_job_id()).await,
            Err(EngineError::Core(CoreError::NotFound { .. }))
        );
    }

    #[tokio::test]
    async fn cancel_of_a_queued_job_never_starts_it() {
        let gate = Arc::new(Semaphore::new(0));
        let backend = Arc::new(TestBackend::gated(gate.clone()));
        let orch = orchestrator(backend.clone(), 1);

        let first = orch.submit(json!({"n": 1})).await.expect("submit");
        wait_for(&orch, first, |v| v.status == JobStatus::Running).await;
        let queued = orch.submit(json!({"n": 2})).await.expect("submit");

        orch.cancel(queued).await.expect("cancel");
        gate.add_permits(1);
        wait_terminal(&orch, first).await;

        let view = orch.get_status(queued).await.expect("status");
        assert_eq!(view.status, JobStatus::Cancelled);
        assert!(view.started_at.is_none());
    }

    #[tokio::test]
    async fn delete_removes_the_job() {
        let orch = orchestrator(Arc::new(TestBackend::new(Behavior::Succeed)), 2);
        assert_matches!(
            orch.delete(new_job_id()).await,
            Err(EngineError::Core(CoreError::NotFound { .. }))
        );

        let id = orch.submit(json!({"n": 1})).await.expect("submit");
        wait_terminal(&orch, id).await;

        orch.delete(id).await.expect("delete");
        assert_matches!(
            orch.get_status(id).await,
            Err(EngineError::Core(CoreError::NotFound { .. }))
        );
        assert_matches!(
            orch.get_artifact(id, "pose_0.cif").await,
            Err(EngineError::Core(CoreError::NotFound { .. }))
        );
        assert_matches!(
            orch.delete(id).await,
            Err(EngineError::Core(CoreError::NotFound { .. }))
        );
    }

    #[tokio::test]
    async fn delete_of_a_running_job_discards_its_outcome() {
        let gate = Arc::new(Semaphore::new(0));
        let backend = Arc::new(TestBackend {
            ignore_cancel: true,
            ..TestBackend::gated(gate.clone())
        });
        let orch = orchestrator(backend, 2);
        let id = orch.submit(json!({"n": 1})).await.expect("submit");
        wait_for(&orch, id, |v| v.progress == 30).await;

        orch.delete(id).await.expect("delete");
        gate.add_permits(1);
        orch.shutdown().await;

        assert_matches!(
            orch.get_status(id).await,
            Err(EngineError::Core(CoreError::NotFound { .. }))
        );
    }

    #[tokio::test]
    async fn concurrent_jobs_keep_independent_results() {
        let orch = orchestrator(Arc::new(TestBackend::new(Behavior::Succeed)), 4);
        let mut ids = Vec::new();
        for n in 0..12 {
            ids.push((n, orch.submit(json!({"n": n})).await.expect("submit")));
        }

        for (n, id) in ids {
            assert_eq!(wait_terminal(&orch, id).await.status, JobStatus::Completed);
            let result = orch.get_result(id).await.expect("result");
            assert_eq!(result.payload["affinity_pred_value"], json!(n as f64));
            let pose = orch.get_artifact(id, "pose_0.cif").await.expect("artifact");
            assert_eq!(pose, id.to_string().into_bytes());
        }
    }

    #[tokio::test]
    async fn concurrency_is_bounded_by_the_permit_count() {
        let gate = Arc::new(Semaphore::new(0));
        let backend = Arc::new(TestBackend::gated(gate.clone()));
        let orch = orchestrator(backend.clone(), 2);

        let mut ids = Vec::new();
        for n in 0..5 {
            ids.push(orch.submit(json!({"n": n})).await.expect("submit"));
        }

        tokio::time::timeout(Duration::from_secs(5), async {
            while backend.running.load(Ordering::SeqCst) < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("two jobs running");
        tokio::time::sleep(Duration::from_millis(50)).await;

        let pending = orch
            .list(&JobListQuery {
                status: Some(JobStatus::Pending),
                limit: None,
            })
            .await
            .expect("list");
        assert_eq!(pending.len(), 3);

        gate.add_permits(5);
        for id in ids {
            assert_eq!(wait_terminal(&orch, id).await.status, JobStatus::Completed);
        }
        assert_eq!(backend.peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn backend_panic_fails_the_job() {
        let orch = orchestrator(Arc::new(TestBackend::new(Behavior::Panic)), 2);
        let id = orch.submit(json!({"n": 1})).await.expect("submit");

        let view = wait_terminal(&orch, id).await;
        assert_eq!(view.status, JobStatus::Failed);
        let message = view.error_message.expect("message");
        assert!(message.contains("panicked"), "{message}");
        assert!(message.contains("backend exploded"), "{message}");
    }

    #[tokio::test]
    async fn backend_error_surfaces_through_get_result() {
        let orch = orchestrator(Arc::new(TestBackend::new(Behavior::Fail("exit code 2: boom"))), 2);
        let id = orch.submit(json!({"n": 1})).await.expect("submit");
        wait_terminal(&orch, id).await;

        assert_matches!(
            orch.get_result(id).await,
            Err(EngineError::JobFailed(message)) if message == "local run failed: exit code 2: boom"
        );
        assert_matches!(
            orch.get_artifact(id, "pose_0.cif").await,
            Err(EngineError::Core(CoreError::NotReady(_)))
        );
    }

    fn remote_orchestrator(provider: Arc<ScriptedProvider>, policy: PollPolicy) -> JobOrchestrator {
        let backend = RemoteBackend::new(provider, policy, Default::default());
        orchestrator(Arc::new(backend), 2)
    }

    #[tokio::test]
    async fn remote_job_completes_after_two_polls() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(status(json!({"status": "IN_PROGRESS"}))),
            Ok(completed_status()),
        ]));
        let orch = remote_orchestrator(provider.clone(), fast_policy());
        let id = orch.submit(request()).await.expect("submit");

        let view = wait_terminal(&orch, id).await;
        assert_eq!(view.status, JobStatus::Completed);
        assert_eq!(view.backend_kind, BackendKind::Remote);
        assert_eq!(view.remote_task_id.as_deref(), Some("rp-1"));

        let result = orch.get_result(id).await.expect("result");
        assert_eq!(result.payload["affinity_pred_value"], json!(-8.1));
        assert_eq!(result.payload["backend"], json!("remote"));
        let names: Vec<&str> = result.artifacts.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["pose_0.cif", "affinity.json"]);
        assert_eq!(
            orch.get_artifact(id, "pose_0.cif").await.expect("artifact"),
            b"data_pose_0"
        );
        assert_eq!(provider.submitted.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn remote_poll_exhaustion_fails_the_job() {
        let provider = Arc::new(ScriptedProvider::new(vec![Err(503)]));
        let orch = remote_orchestrator(provider, fast_policy());
        let id = orch.submit(request()).await.expect("submit");

        let view = wait_terminal(&orch, id).await;
        assert_eq!(view.status, JobStatus::Failed);
        let message = view.error_message.expect("message");
        assert!(message.starts_with("poll exhausted:"), "{message}");
        assert_eq!(view.remote_task_id.as_deref(), Some("rp-1"));
    }

    #[tokio::test]
    async fn remote_submission_failure_leaves_no_task_id() {
        let provider = Arc::new(ScriptedProvider {
            submit_error: Some(500),
            ..Default::default()
        });
        let orch = remote_orchestrator(provider, fast_policy());
        let id = orch.submit(request()).await.expect("submit");

        let view = wait_terminal(&orch, id).await;
        assert_eq!(view.status, JobStatus::Failed);
        assert!(view.remote_task_id.is_none());
        let message = view.error_message.expect("message");
        assert!(message.starts_with("submission failed:"), "{message}");
    }

    #[tokio::test]
    async fn remote_cancel_is_forwarded_to_the_provider() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(status(json!({"status": "IN_QUEUE"})))]));
        let orch = remote_orchestrator(provider.clone(), fast_policy());
        let id = orch.submit(request()).await.expect("submit");
        wait_for(&orch, id, |v| v.remote_task_id.is_some()).await;

        orch.cancel(id).await.expect("cancel");
        orch.shutdown().await;

        assert_eq!(orch.get_status(id).await.expect("status").status, JobStatus::Cancelled);
        assert_eq!(*provider.cancelled.lock().unwrap(), vec!["rp-1".to_string()]);
    }

    #[tokio::test]
    async fn incomplete_remote_credentials_fall_back_to_local() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = dir.path().to_string_lossy().into_owned();
        let config = EngineConfig::from_lookup(|key| match key {
            "RUNPOD_ENABLED" => Some("true".into()),
            "RUNPOD_ENDPOINT_ID" => Some("ep-123".into()),
            "STORAGE_DIR" => Some(storage.clone()),
            "BOLTZ_COMMAND" => Some("atomera-test-missing-boltz".into()),
            _ => None,
        })
        .expect("config");

        let orch = JobOrchestrator::from_config(&config, Arc::new(MemoryJobStore::new())).expect("orchestrator");
        assert_eq!(orch.backend_kind(), BackendKind::Local);

        let id = orch.submit(request()).await.expect("submit");
        let view = wait_terminal(&orch, id).await;
        assert_eq!(view.backend_kind, BackendKind::Local);
        assert_eq!(view.status, JobStatus::Failed);
        assert!(view.remote_task_id.is_none());
    }

    #[tokio::test]
    async fn purge_removes_only_old_terminal_jobs() {
        let gate = Arc::new(Semaphore::new(0));
        let orch = orchestrator(Arc::new(TestBackend::gated(gate.clone())), 2);
        let done = orch.submit(json!({"n": 1})).await.expect("submit");
        gate.add_permits(1);
        wait_terminal(&orch, done).await;
        let running = orch.submit(json!({"n": 2})).await.expect("submit");
        wait_for(&orch, running, |v| v.status == JobStatus::Running).await;

        assert_eq!(orch.purge_finished(chrono::Duration::hours(1)).await.expect("purge"), 0);
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(orch.purge_finished(chrono::Duration::zero()).await.expect("purge"), 1);

        assert_matches!(
            orch.get_status(done).await,
            Err(EngineError::Core(CoreError::NotFound { .. }))
        );
        assert_eq!(orch.get_status(running).await.expect("status").status, JobStatus::Running);
        gate.add_permits(1);
    }

    #[tokio::test]
    async fn recovery_fails_running_jobs_and_requeues_pending_ones() {
        let store = Arc::new(MemoryJobStore::new());
        let mut interrupted = Job::new(new_job_id(), json!({"n": 1}), BackendKind::Local);
        interrupted.start().expect("start");
        let queued = Job::new(new_job_id(), json!({"n": 2}), BackendKind::Local);
        let foreign = Job::new(new_job_id(), json!({"n": 3}), BackendKind::Remote);
        for job in [&interrupted, &queued, &foreign] {
            store.create(job).await.expect("create");
        }

        let orch = JobOrchestrator::new(store, Arc::new(TestBackend::new(Behavior::Succeed)), 2);
        let summary = orch.recover_interrupted().await.expect("recover");
        assert_eq!(summary, RecoverySummary { requeued: 1, failed: 2 });

        let view = orch.get_status(interrupted.id).await.expect("status");
        assert_eq!(view.status, JobStatus::Failed);
        assert!(view.error_message.expect("message").starts_with("interrupted"));
        assert_eq!(orch.get_status(foreign.id).await.expect("status").status, JobStatus::Failed);
        assert_eq!(wait_terminal(&orch, queued.id).await.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn shutdown_interrupts_running_jobs_and_refuses_new_ones() {
        let gate = Arc::new(Semaphore::new(0));
        let orch = orchestrator(Arc::new(TestBackend::gated(gate)), 1);
        let running = orch.submit(json!({"n": 1})).await.expect("submit");
        wait_for(&orch, running, |v| v.status == JobStatus::Running).await;
        let queued = orch.submit(json!({"n": 2})).await.expect("submit");

        orch.shutdown().await;

        let view = orch.get_status(running).await.expect("status");
        assert_eq!(view.status, JobStatus::Failed);
        assert!(view.error_message.expect("message").starts_with("interrupted"));
        assert_eq!(orch.get_status(queued).await.expect("status").status, JobStatus::Pending);
        assert_matches!(
            orch.submit(json!({"n": 3})).await,
            Err(EngineError::Core(CoreError::Internal(_)))
        );
    }
}
