use atomera_core::error::CoreError;
use atomera_db::StoreError;

/// Errors returned by [`crate::orchestrator::JobOrchestrator`] operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A domain error: not found, validation, invalid transition, not ready.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The job reached `failed`; carries its stored error message.
    #[error("Job failed: {0}")]
    JobFailed(String),

    /// The job store could not be read or written.
    #[error("Storage error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => EngineError::Core(CoreError::NotFound {
                entity: "Job",
                id: id.to_string(),
            }),
            StoreError::ArtifactNotFound { artifact, .. } => EngineError::Core(CoreError::NotFound {
                entity: "Artifact",
                id: artifact,
            }),
            StoreError::InvalidArtifactName(name) => {
                EngineError::Core(CoreError::Validation(format!("Invalid artifact name '{name}'")))
            }
            other => EngineError::Store(other),
        }
    }
}
