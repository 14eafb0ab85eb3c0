//! Subprocess execution with timeout and cooperative cancellation.
//!
//! [`run_command`] is what the local execution backend uses to launch the
//! modeling executable. The caller builds the [`tokio::process::Command`]
//! (program + arguments); environment, working directory, output capture,
//! the wall-clock limit and the cancellation signal are applied here.

use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Maximum stdout or stderr size captured per stream (10 MiB).
const MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// Number of trailing stderr characters kept in failure diagnostics.
const DIAGNOSTIC_TAIL_CHARS: usize = 2000;

/// Settings applied to a command before it is spawned.
#[derive(Debug, Clone)]
pub struct ProcessInput {
    /// Additional environment variables set for the child process.
    pub env_vars: Vec<(String, String)>,
    /// Working directory for the child process (uses current dir if `None`).
    pub working_directory: Option<String>,
    /// Maximum wall-clock time before the process is killed.
    pub timeout: Duration,
}

/// Captured output from a finished process.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    /// Process exit code (`-1` if killed by signal).
    pub exit_code: i32,
    pub duration_ms: u64,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// The last part of stderr, for error messages.
    pub fn stderr_tail(&self) -> String {
        tail(&self.stderr, DIAGNOSTIC_TAIL_CHARS)
    }
}

/// Errors that can occur while running a subprocess.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// The program could not be found on disk or on `PATH`.
    #[error("Executable not found: {0}")]
    NotFound(String),

    /// The process exceeded its timeout and was killed.
    #[error("Process timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    /// The cancellation token fired and the process was killed.
    #[error("Process cancelled after {elapsed_ms}ms")]
    Cancelled { elapsed_ms: u64 },

    /// An I/O error occurred while spawning or waiting on the process.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Spawn `cmd`, capture stdout/stderr, and enforce the timeout and the
/// cancellation token.
///
/// Stdin is closed immediately. A non-zero exit is NOT an error here; the
/// caller inspects [`ProcessOutput::exit_code`].
pub async fn run_command(
    cmd: &mut Command,
    input: &ProcessInput,
    cancel: &CancellationToken,
) -> Result<ProcessOutput, ProcessError> {
    // `kill_on_drop(true)` kills the child when it is dropped on timeout or cancel.
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    for (key, value) in &input.env_vars {
        cmd.env(key, value);
    }

    if let Some(dir) = &input.working_directory {
        cmd.current_dir(dir);
    }

    let program = cmd.as_std().get_program().to_string_lossy().into_owned();
    let start = Instant::now();

    let mut child = cmd.spawn().map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ProcessError::NotFound(program.clone()),
        _ => ProcessError::Io(e),
    })?;

    // Read the pipes in separate tasks so `child.wait()` can borrow `child`.
    let stdout_handle = child.stdout.take();
    let stderr_handle = child.stderr.take();
    let stdout_task = tokio::spawn(async move { read_stream(stdout_handle).await });
    let stderr_task = tokio::spawn(async move { read_stream(stderr_handle).await });

    let status = tokio::select! {
        _ = cancel.cancelled() => {
            return Err(ProcessError::Cancelled {
                elapsed_ms: start.elapsed().as_millis() as u64,
            });
        }
        waited = tokio::time::timeout(input.timeout, child.wait()) => match waited {
            Ok(status) => status?,
            Err(_elapsed) => {
                return Err(ProcessError::Timeout {
                    elapsed_ms: start.elapsed().as_millis() as u64,
                });
            }
        },
    };

    let duration_ms = start.elapsed().as_millis() as u64;
    let stdout_bytes = stdout_task.await.unwrap_or_default();
    let stderr_bytes = stderr_task.await.unwrap_or_default();

    Ok(ProcessOutput {
        stdout: String::from_utf8_lossy(&stdout_bytes).into_owned(),
        stderr: String::from_utf8_lossy(&stderr_bytes).into_owned(),
        exit_code: status.code().unwrap_or(-1),
        duration_ms,
    })
}

/// Read an entire output stream into a byte buffer, capped at [`MAX_OUTPUT_BYTES`].
async fn read_stream<R: AsyncRead + Unpin>(handle: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut h) = handle {
        let _ = (&mut h)
            .take(MAX_OUTPUT_BYTES as u64)
            .read_to_end(&mut buf)
            .await;
    }
    buf
}

/// Last `max_chars` characters of `text`.
fn tail(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    text.chars().skip(count - max_chars).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
