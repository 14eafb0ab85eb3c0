//! Local execution backend: runs Boltz as a subprocess on this host.
//!
//! Each run gets a scratch directory `{work_root}/{job_id}` holding the
//! input YAML and Boltz's `--out_dir`. Boltz writes its results to
//! `predictions/<input name>/`; the pose structures and the affinity and
//! confidence JSON files found there become the run's output. The scratch
//! directory is removed when the run ends.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use atomera_core::process::{run_command, ProcessError, ProcessInput};
use atomera_core::request::PredictionRequest;
use atomera_db::models::status::BackendKind;
use tokio::fs;
use tokio::process::Command;

use crate::backend::{
    BackendOutput, ExecutionBackend, ExecutionContext, ExecutionError, FileKind, OutputFile,
};
use crate::config::{BoltzOptions, LocalConfig};

/// Progress once the input document is on disk.
const PROGRESS_PREPARED: u8 = 25;

/// Progress once the subprocess has been launched.
const PROGRESS_STARTED: u8 = 50;

/// Runs predictions with a locally installed Boltz.
pub struct LocalBackend {
    config: LocalConfig,
    boltz: BoltzOptions,
    work_root: PathBuf,
}

impl LocalBackend {
    pub fn new(config: LocalConfig, boltz: BoltzOptions, work_root: impl Into<PathBuf>) -> Self {
        Self {
            config,
            boltz,
            work_root: work_root.into(),
        }
    }

    /// Program and arguments for one `predict` invocation.
    fn command_line(&self, yaml: &Path, out_dir: &Path, use_msa: bool) -> Vec<String> {
        let mut args: Vec<String> = self.config.command.split_whitespace().map(String::from).collect();
        args.extend([
            "predict".to_string(),
            yaml.display().to_string(),
            "--out_dir".to_string(),
            out_dir.display().to_string(),
            "--devices".to_string(),
            self.boltz.devices.to_string(),
            "--diffusion_samples".to_string(),
            self.boltz.diffusion_samples.to_string(),
            "--accelerator".to_string(),
            self.boltz.accelerator.clone(),
        ]);
        if use_msa {
            args.push("--use_msa_server".to_string());
        }
        args
    }

    async fn run(&self, ctx: &ExecutionContext, work_dir: &Path) -> Result<BackendOutput, ExecutionError> {
        let request = PredictionRequest::from_value(&ctx.input)
            .map_err(|e| ExecutionError::InvalidInput(e.to_string()))?;

        let input_name = PredictionRequest::input_name(&ctx.job_id.to_string());
        let yaml_path = work_dir.join(format!("{input_name}.yaml"));
        let out_dir = work_dir.join("out");
        fs::create_dir_all(&out_dir).await?;
        fs::write(&yaml_path, request.to_input_yaml()).await?;
        ctx.report_percent(PROGRESS_PREPARED);

        let use_msa = self.boltz.use_msa_server && request.use_msa;
        let argv = self.command_line(&yaml_path, &out_dir, use_msa);
        let Some((program, args)) = argv.split_first() else {
            return Err(ExecutionError::LocalFailed("BOLTZ_COMMAND is empty".into()));
        };
        let mut cmd = Command::new(program);
        cmd.args(args);

        tracing::info!(job_id = %ctx.job_id, command = %argv.join(" "), "Starting local Boltz run");
        ctx.report_percent(PROGRESS_STARTED);

        let settings = ProcessInput {
            env_vars: vec![],
            working_directory: None,
            timeout: self.config.timeout,
        };
        let output = run_command(&mut cmd, &settings, &ctx.cancel)
            .await
            .map_err(|e| match e {
                ProcessError::NotFound(p) => {
                    ExecutionError::LocalFailed(format!("executable not found: {p}"))
                }
                ProcessError::Timeout { elapsed_ms } => ExecutionError::Timeout(format!(
                    "local run exceeded {}s (killed after {elapsed_ms}ms)",
                    self.config.timeout.as_secs()
                )),
                ProcessError::Cancelled { .. } => ExecutionError::Cancelled,
                ProcessError::Io(e) => ExecutionError::Io(e),
            })?;

        if !output.success() {
            return Err(ExecutionError::LocalFailed(format!(
                "exit code {}: {}",
                output.exit_code,
                output.stderr_tail().trim()
            )));
        }

        tracing::info!(
            job_id = %ctx.job_id,
            duration_ms = output.duration_ms,
            "Local Boltz run finished",
        );

        collect_predictions(&out_dir, &input_name).await
    }
}

#[async_trait]
impl ExecutionBackend for LocalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn execute(&self, ctx: ExecutionContext) -> Result<BackendOutput, ExecutionError> {
        let work_dir = self.work_root.join(ctx.job_id.to_string());
        fs::create_dir_all(&work_dir).await?;

        let result = self.run(&ctx, &work_dir).await;

        if let Err(e) = fs::remove_dir_all(&work_dir).await {
            tracing::warn!(job_id = %ctx.job_id, error = %e, "Failed to remove work directory");
        }
        result
    }
}

/// Read Boltz's prediction directory into a [`BackendOutput`].
///
/// Missing or unreadable affinity / confidence files leave the matching
/// values empty rather than failing the run.
async fn collect_predictions(out_dir: &Path, input_name: &str) -> Result<BackendOutput, ExecutionError> {
    let predictions = out_dir.join("predictions");
    if !fs::try_exists(&predictions).await? {
        return Err(ExecutionError::Payload(
            "no predictions directory generated by Boltz".into(),
        ));
    }
    let pred_dir = find_prediction_dir(&predictions, input_name).await?;

    let mut output = BackendOutput::default();
    let mut poses = Vec::new();
    let mut entries = fs::read_dir(&pred_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if entry.file_type().await?.is_file() && path.extension().is_some_and(|e| e == "cif") {
            poses.push(path);
        }
    }
    poses.sort();
    for path in poses {
        output.files.push(OutputFile {
            name: file_name(&path),
            kind: FileKind::Pose,
            data: fs::read(&path).await?,
        });
    }

    let affinity_path = pred_dir.join(format!("affinity_{input_name}.json"));
    if let Some((doc, bytes)) = read_json(&affinity_path).await {
        output.affinity_pred_value = doc.get("affinity_pred_value").and_then(|v| v.as_f64());
        output.affinity_probability_binary = doc
            .get("affinity_probability_binary")
            .and_then(|v| v.as_f64());
        output.files.push(OutputFile {
            name: file_name(&affinity_path),
            kind: FileKind::Auxiliary,
            data: bytes,
        });
    }

    let confidence_path = pred_dir.join(format!("confidence_{input_name}_model_0.json"));
    if let Some((doc, bytes)) = read_json(&confidence_path).await {
        output.confidence_score = doc.get("confidence_score").and_then(|v| v.as_f64());
        output.confidence_metrics = numeric_metrics(&doc);
        output.files.push(OutputFile {
            name: file_name(&confidence_path),
            kind: FileKind::Auxiliary,
            data: bytes,
        });
    }

    Ok(output)
}

/// The subdirectory named after the input, or the first one present.
async fn find_prediction_dir(predictions: &Path, input_name: &str) -> Result<PathBuf, ExecutionError> {
    let mut dirs = Vec::new();
    let mut entries = fs::read_dir(predictions).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();

    if let Some(dir) = dirs.iter().find(|d| file_name(d).contains(input_name)) {
        return Ok(dir.clone());
    }
    dirs.into_iter()
        .next()
        .ok_or_else(|| ExecutionError::Payload("no prediction subdirectory found".into()))
}

async fn read_json(path: &Path) -> Option<(serde_json::Value, Vec<u8>)> {
    let bytes = fs::read(path).await.ok()?;
    match serde_json::from_slice(&bytes) {
        Ok(doc) => Some((doc, bytes)),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Ignoring unparsable Boltz output file");
            None
        }
    }
}

fn numeric_metrics(doc: &serde_json::Value) -> BTreeMap<String, f64> {
    doc.as_object()
        .map(|map| {
            map.iter()
                .filter(|(key, _)| key.as_str() != "confidence_score")
                .filter_map(|(key, value)| value.as_f64().map(|v| (key.clone(), v)))
                .collect()
        })
        .unwrap_or_default()
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
