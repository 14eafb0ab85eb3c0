//! Maps a [`BackendOutput`] into the stored result schema.
//!
//! Pure data mapping: the orchestrator persists the returned artifact bytes
//! and the manifest together with the job's terminal state.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use atomera_core::codec;
use atomera_db::models::job::{validate_artifact_name, ArtifactEntry};
use atomera_db::models::status::BackendKind;
use serde_json::json;

use crate::backend::{BackendOutput, ExecutionError, FileKind};

/// Result payload plus the artifacts to store alongside it.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledResult {
    pub payload: serde_json::Value,
    /// Manifest entries in storage order, each with its content.
    pub artifacts: Vec<(ArtifactEntry, Vec<u8>)>,
}

impl AssembledResult {
    pub fn manifest(&self) -> Vec<ArtifactEntry> {
        self.artifacts.iter().map(|(entry, _)| entry.clone()).collect()
    }
}

pub struct ResultAssembler;

impl ResultAssembler {
    /// Build the result record for a completed run.
    ///
    /// File names are reduced to their last path component. A name that is
    /// still not a safe file name fails the whole assembly; a repeated name
    /// keeps its first occurrence.
    pub fn assemble(
        output: BackendOutput,
        backend: BackendKind,
        elapsed: Option<Duration>,
    ) -> Result<AssembledResult, ExecutionError> {
        let mut seen = HashSet::new();
        let mut artifacts = Vec::with_capacity(output.files.len());
        let mut pose_files = Vec::new();

        for file in output.files {
            let name = safe_name(&file.name)?;
            if !seen.insert(name.clone()) {
                tracing::warn!(artifact = %name, "Duplicate artifact name, keeping first");
                continue;
            }
            if file.kind == FileKind::Pose {
                pose_files.push(name.clone());
            }
            let entry = ArtifactEntry {
                name,
                size_bytes: file.data.len() as u64,
                sha256: codec::digest(&file.data),
            };
            artifacts.push((entry, file.data));
        }

        let payload = json!({
            "affinity_pred_value": output.affinity_pred_value,
            "affinity_probability_binary": output.affinity_probability_binary,
            "confidence_score": output.confidence_score,
            "confidence_metrics": output.confidence_metrics,
            "poses_generated": pose_files.len(),
            "pose_files": pose_files,
            "backend": backend,
            "processing_time_seconds": elapsed.map(|d| d.as_secs_f64()),
        });

        Ok(AssembledResult { payload, artifacts })
    }
}

fn safe_name(raw: &str) -> Result<String, ExecutionError> {
    let base = Path::new(raw)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    validate_artifact_name(&base)
        .map_err(|_| ExecutionError::Payload(format!("unsafe artifact name '{raw}'")))?;
    Ok(base)
}
