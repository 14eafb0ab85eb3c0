//! File-system [`JobStore`].
//!
//! Layout under the storage root:
//!
//! ```text
//! {root}/{job_id}/metadata.json
//! {root}/{job_id}/artifacts/{name}
//! ```
//!
//! The directory name is the job id and listing enumerates directories.
//! Every file write goes to a temporary sibling first and is then renamed
//! into place, so readers never observe a partially written file.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use atomera_core::types::JobId;
use tokio::fs;

use crate::models::job::Job;
use crate::store::{check_artifact_name, JobStore, StoreError};

const METADATA_FILE: &str = "metadata.json";
const ARTIFACTS_DIR: &str = "artifacts";

/// Job registry persisted as one directory per job.
#[derive(Debug, Clone)]
pub struct FsJobStore {
    root: PathBuf,
}

impl FsJobStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        tracing::debug!(root = %root.display(), "Opened file job store");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn job_dir(&self, id: JobId) -> PathBuf {
        self.root.join(id.to_string())
    }

    fn metadata_path(&self, id: JobId) -> PathBuf {
        self.job_dir(id).join(METADATA_FILE)
    }

    fn artifact_path(&self, id: JobId, name: &str) -> PathBuf {
        self.job_dir(id).join(ARTIFACTS_DIR).join(name)
    }

    async fn read_job(path: &Path) -> Result<Option<Job>, StoreError> {
        match fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_metadata(&self, job: &Job) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(job)?;
        write_atomic(&self.metadata_path(job.id), &bytes)
            .await
            .map_err(|e| not_found_or_io(e, job.id))
    }

    async fn exists(&self, id: JobId) -> Result<bool, StoreError> {
        Ok(fs::try_exists(self.metadata_path(id)).await?)
    }
}

#[async_trait]
impl JobStore for FsJobStore {
    async fn create(&self, job: &Job) -> Result<(), StoreError> {
        match fs::create_dir(self.job_dir(job.id)).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(StoreError::AlreadyExists(job.id));
            }
            Err(e) => return Err(e.into()),
        }
        self.write_metadata(job).await
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        Self::read_job(&self.metadata_path(id)).await
    }

    async fn list_all(&self) -> Result<Vec<Job>, StoreError> {
        let mut jobs = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let Some(id) = name.to_str().and_then(|s| s.parse::<JobId>().ok()) else {
                continue;
            };
            match Self::read_job(&entry.path().join(METADATA_FILE)).await {
                Ok(Some(job)) => jobs.push(job),
                // Directory created but metadata not yet written, or deleted mid-scan.
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(job_id = %id, error = %e, "Skipping unreadable job metadata");
                }
            }
        }

        Ok(jobs)
    }

    async fn update(&self, job: &Job) -> Result<(), StoreError> {
        if !self.exists(job.id).await? {
            return Err(StoreError::NotFound(job.id));
        }
        self.write_metadata(job).await
    }

    async fn delete(&self, id: JobId) -> Result<bool, StoreError> {
        match fs::remove_dir_all(self.job_dir(id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_artifact(&self, id: JobId, name: &str, data: &[u8]) -> Result<(), StoreError> {
        check_artifact_name(name)?;
        if !self.exists(id).await? {
            return Err(StoreError::NotFound(id));
        }
        fs::create_dir_all(self.job_dir(id).join(ARTIFACTS_DIR))
            .await
            .map_err(|e| not_found_or_io(e, id))?;
        write_atomic(&self.artifact_path(id, name), data)
            .await
            .map_err(|e| not_found_or_io(e, id))
    }

    async fn read_artifact(&self, id: JobId, name: &str) -> Result<Vec<u8>, StoreError> {
        check_artifact_name(name)?;
        match fs::read(self.artifact_path(id, name)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                if self.exists(id).await? {
                    Err(StoreError::ArtifactNotFound {
                        job_id: id,
                        artifact: name.to_string(),
                    })
                } else {
                    Err(StoreError::NotFound(id))
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        fs::metadata(&self.root).await?;
        Ok(())
    }
}

/// Write `data` to a temporary sibling of `path`, then rename it over `path`.
async fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4()));
    fs::write(&tmp, data).await?;
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(())
}

/// A missing directory during a write means the job was deleted concurrently.
fn not_found_or_io(e: std::io::Error, id: JobId) -> StoreError {
    if e.kind() == ErrorKind::NotFound {
        StoreError::NotFound(id)
    } else {
        StoreError::Io(e)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
