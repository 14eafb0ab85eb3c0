//! The [`JobStore`] trait: durable registry of jobs and their artifacts.
//!
//! Stores are plain overwrite-by-id registries. They do not enforce the job
//! state machine; the orchestrator serializes read-modify-write cycles per
//! job and only ever hands validated [`Job`] values to [`JobStore::update`].

use async_trait::async_trait;
use atomera_core::types::JobId;

use crate::models::job::{Job, JobListQuery};

/// Errors raised by a [`JobStore`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Job {0} not found")]
    NotFound(JobId),

    #[error("Job {0} already exists")]
    AlreadyExists(JobId),

    #[error("Artifact {artifact} not found for job {job_id}")]
    ArtifactNotFound { job_id: JobId, artifact: String },

    #[error("Invalid artifact name: {0}")]
    InvalidArtifactName(String),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt job metadata: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Persistence for [`Job`] entities and their artifact bytes.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new job. Fails with [`StoreError::AlreadyExists`] if the id
    /// is taken.
    async fn create(&self, job: &Job) -> Result<(), StoreError>;

    /// Fetch a job by id, `None` if unknown.
    async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError>;

    /// Every stored job, in no particular order.
    async fn list_all(&self) -> Result<Vec<Job>, StoreError>;

    /// Jobs matching `query`, most recently updated first.
    async fn list(&self, query: &JobListQuery) -> Result<Vec<Job>, StoreError> {
        Ok(query.apply(self.list_all().await?))
    }

    /// Overwrite an existing job. Fails with [`StoreError::NotFound`] if the
    /// job was deleted in the meantime.
    async fn update(&self, job: &Job) -> Result<(), StoreError>;

    /// Remove a job and all of its artifacts. Returns `false` if unknown.
    async fn delete(&self, id: JobId) -> Result<bool, StoreError>;

    /// Store one artifact for an existing job, replacing any previous content.
    async fn write_artifact(&self, id: JobId, name: &str, data: &[u8]) -> Result<(), StoreError>;

    /// Read one artifact back.
    async fn read_artifact(&self, id: JobId, name: &str) -> Result<Vec<u8>, StoreError>;

    /// Cheap liveness probe used by the health endpoint.
    async fn health_check(&self) -> Result<(), StoreError>;
}

/// Reject artifact names that are not a single plain path component.
pub(crate) fn check_artifact_name(name: &str) -> Result<(), StoreError> {
    crate::models::job::validate_artifact_name(name)
        .map_err(|_| StoreError::InvalidArtifactName(name.to_string()))
}
