//! In-memory [`JobStore`], used by tests and ephemeral deployments.

use std::collections::HashMap;

use async_trait::async_trait;
use atomera_core::types::JobId;
use tokio::sync::RwLock;

use crate::models::job::Job;
use crate::store::{check_artifact_name, JobStore, StoreError};

struct Entry {
    job: Job,
    artifacts: HashMap<String, Vec<u8>>,
}

/// Job registry held entirely in process memory.
#[derive(Default)]
pub struct MemoryJobStore {
    entries: RwLock<HashMap<JobId, Entry>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job: &Job) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(&job.id) {
            return Err(StoreError::AlreadyExists(job.id));
        }
        entries.insert(
            job.id,
            Entry {
                job: job.clone(),
                artifacts: HashMap::new(),
            },
        );
        Ok(())
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        Ok(self.entries.read().await.get(&id).map(|e| e.job.clone()))
    }

    async fn list_all(&self) -> Result<Vec<Job>, StoreError> {
        let entries = self.entries.read().await;
        Ok(entries.values().map(|e| e.job.clone()).collect())
    }

    async fn update(&self, job: &Job) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        let entry = entries.get_mut(&job.id).ok_or(StoreError::NotFound(job.id))?;
        entry.job = job.clone();
        Ok(())
    }

    async fn delete(&self, id: JobId) -> Result<bool, StoreError> {
        Ok(self.entries.write().await.remove(&id).is_some())
    }

    async fn write_artifact(&self, id: JobId, name: &str, data: &[u8]) -> Result<(), StoreError> {
        check_artifact_name(name)?;
        let mut entries = self.entries.write().await;
        let entry = entries.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        entry.artifacts.insert(name.to_string(), data.to_vec());
        Ok(())
    }

    async fn read_artifact(&self, id: JobId, name: &str) -> Result<Vec<u8>, StoreError> {
        check_artifact_name(name)?;
        let entries = self.entries.read().await;
        let entry = entries.get(&id).ok_or(StoreError::NotFound(id))?;
        entry
            .artifacts
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::ArtifactNotFound {
                job_id: id,
                artifact: name.to_string(),
            })
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
