//! Engine configuration loaded from environment variables.
//!
//! Built once at startup and shared by `Arc`; nothing mutates it afterwards.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use atomera_core::error::CoreError;
use atomera_db::models::status::BackendKind;
use atomera_runpod::api::DEFAULT_BASE_URL;

/// Modeling options shared by the local command line and the remote input
/// document.
#[derive(Debug, Clone, PartialEq)]
pub struct BoltzOptions {
    pub devices: u32,
    pub accelerator: String,
    pub diffusion_samples: u32,
    pub use_msa_server: bool,
}

impl Default for BoltzOptions {
    fn default() -> Self {
        Self {
            devices: 1,
            accelerator: "auto".into(),
            diffusion_samples: 1,
            use_msa_server: true,
        }
    }
}

/// Settings for running the modeling executable as a local subprocess.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalConfig {
    /// Executable and any leading arguments, whitespace separated.
    pub command: String,
    /// Wall-clock limit for one run.
    pub timeout: Duration,
}

/// Settings for delegating jobs to the RunPod endpoint.
#[derive(Clone, PartialEq)]
pub struct RemoteConfig {
    pub api_key: String,
    pub endpoint_id: String,
    pub base_url: String,
    pub poll_interval: Duration,
    /// Wall-clock limit for one remote job, measured from submission.
    pub job_timeout: Duration,
    /// Consecutive failed polls tolerated before giving up.
    pub max_poll_failures: u32,
}

impl std::fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("api_key", &"<redacted>")
            .field("endpoint_id", &self.endpoint_id)
            .field("base_url", &self.base_url)
            .field("poll_interval", &self.poll_interval)
            .field("job_timeout", &self.job_timeout)
            .field("max_poll_failures", &self.max_poll_failures)
            .finish()
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root of the file job store.
    pub storage_dir: PathBuf,
    pub max_concurrent_jobs: usize,
    pub boltz: BoltzOptions,
    pub local: LocalConfig,
    /// `None` when remote execution is disabled or not fully configured.
    pub remote: Option<RemoteConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from("output/predictions"),
            max_concurrent_jobs: 4,
            boltz: BoltzOptions::default(),
            local: LocalConfig {
                command: "boltz".into(),
                timeout: Duration::from_secs(1800),
            },
            remote: None,
        }
    }
}

impl EngineConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                   | Default                    |
    /// |---------------------------|----------------------------|
    /// | `STORAGE_DIR`             | `output/predictions`       |
    /// | `MAX_CONCURRENT_JOBS`     | `4`                        |
    /// | `BOLTZ_COMMAND`           | `boltz`                    |
    /// | `BOLTZ_DEVICES`           | `1`                        |
    /// | `BOLTZ_ACCELERATOR`       | `auto`                     |
    /// | `BOLTZ_DIFFUSION_SAMPLES` | `1`                        |
    /// | `BOLTZ_USE_MSA_SERVER`    | `true`                     |
    /// | `LOCAL_TIMEOUT_SECS`      | `1800`                     |
    /// | `RUNPOD_ENABLED`          | `false`                    |
    /// | `RUNPOD_API_KEY`          | (none)                     |
    /// | `RUNPOD_ENDPOINT_ID`      | (none)                     |
    /// | `RUNPOD_BASE_URL`         | `https://api.runpod.ai/v2` |
    /// | `POLL_INTERVAL_SECS`      | `5`                        |
    /// | `JOB_TIMEOUT_SECS`        | `1800`                     |
    /// | `MAX_POLL_FAILURES`       | `3`                        |
    ///
    /// Remote execution that is enabled but lacks an API key or endpoint id
    /// is logged and disabled; every job then runs locally.
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`EngineConfig::from_env`], reading values through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, CoreError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let max_concurrent_jobs: usize = parse_or(&get, "MAX_CONCURRENT_JOBS", 4)?;
        if max_concurrent_jobs == 0 {
            return Err(CoreError::Validation(
                "MAX_CONCURRENT_JOBS must be at least 1".into(),
            ));
        }

        let boltz = BoltzOptions {
            devices: parse_or(&get, "BOLTZ_DEVICES", 1)?,
            accelerator: get("BOLTZ_ACCELERATOR").unwrap_or_else(|| "auto".into()),
            diffusion_samples: parse_or(&get, "BOLTZ_DIFFUSION_SAMPLES", 1)?,
            use_msa_server: parse_bool_or(&get, "BOLTZ_USE_MSA_SERVER", true)?,
        };

        let local = LocalConfig {
            command: get("BOLTZ_COMMAND").unwrap_or_else(|| "boltz".into()),
            timeout: Duration::from_secs(parse_or(&get, "LOCAL_TIMEOUT_SECS", 1800)?),
        };

        let remote = if parse_bool_or(&get, "RUNPOD_ENABLED", false)? {
            match (get("RUNPOD_API_KEY"), get("RUNPOD_ENDPOINT_ID")) {
                (Some(api_key), Some(endpoint_id)) => Some(RemoteConfig {
                    api_key,
                    endpoint_id,
                    base_url: get("RUNPOD_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.into()),
                    poll_interval: Duration::from_secs(parse_positive(&get, "POLL_INTERVAL_SECS", 5)?),
                    job_timeout: Duration::from_secs(parse_positive(&get, "JOB_TIMEOUT_SECS", 1800)?),
                    max_poll_failures: parse_or(&get, "MAX_POLL_FAILURES", 3)?,
                }),
                (api_key, endpoint_id) => {
                    tracing::warn!(
                        api_key_set = api_key.is_some(),
                        endpoint_id_set = endpoint_id.is_some(),
                        "RUNPOD_ENABLED is set but credentials are incomplete, falling back to local execution",
                    );
                    None
                }
            }
        } else {
            None
        };

        Ok(Self {
            storage_dir: PathBuf::from(
                get("STORAGE_DIR").unwrap_or_else(|| "output/predictions".into()),
            ),
            max_concurrent_jobs,
            boltz,
            local,
            remote,
        })
    }

    /// The backend every new job is assigned.
    pub fn effective_backend(&self) -> BackendKind {
        if self.remote.is_some() {
            BackendKind::Remote
        } else {
            BackendKind::Local
        }
    }
}

fn parse_or<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, CoreError> {
    match get(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| CoreError::Validation(format!("{key} has an invalid value '{raw}'"))),
    }
}

fn parse_positive(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: u64,
) -> Result<u64, CoreError> {
    match parse_or(get, key, default)? {
        0 => Err(CoreError::Validation(format!("{key} must be at least 1"))),
        value => Ok(value),
    }
}

fn parse_bool_or(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: bool,
) -> Result<bool, CoreError> {
    match get(key).map(|v| v.to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
        Some(v) => Err(CoreError::Validation(format!(
            "{key} must be a boolean, got '{v}'"
        ))),
    }
}
