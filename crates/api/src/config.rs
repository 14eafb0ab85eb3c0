use std::str::FromStr;

use atomera_core::error::CoreError;

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development. Engine settings
/// (backend selection, RunPod credentials, storage) live in
/// [`atomera_engine::EngineConfig`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `8000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS`.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Finished jobs older than this are purged (default: `24`).
    pub job_retention_hours: i64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8000,
            cors_origins: vec!["http://localhost:3000".into()],
            request_timeout_secs: 30,
            job_retention_hours: 24,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default                 |
    /// |------------------------|-------------------------|
    /// | `HOST`                 | `0.0.0.0`               |
    /// | `PORT`                 | `8000`                  |
    /// | `CORS_ORIGINS`         | `http://localhost:3000` |
    /// | `REQUEST_TIMEOUT_SECS` | `30`                    |
    /// | `JOB_RETENTION_HOURS`  | `24`                    |
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ServerConfig::from_env`], reading values through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, CoreError> {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let cors_origins = match get("CORS_ORIGINS") {
            Some(raw) => raw
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            None => defaults.cors_origins,
        };
        for origin in &cors_origins {
            axum::http::HeaderValue::from_str(origin).map_err(|_| {
                CoreError::Validation(format!("CORS_ORIGINS contains an invalid origin '{origin}'"))
            })?;
        }

        let job_retention_hours: i64 = parse_or(&get, "JOB_RETENTION_HOURS", defaults.job_retention_hours)?;
        if job_retention_hours < 1 {
            return Err(CoreError::Validation(
                "JOB_RETENTION_HOURS must be at least 1".into(),
            ));
        }

        Ok(Self {
            host: get("HOST").unwrap_or(defaults.host),
            port: parse_or(&get, "PORT", defaults.port)?,
            cors_origins,
            request_timeout_secs: parse_or(&get, "REQUEST_TIMEOUT_SECS", defaults.request_timeout_secs)?,
            job_retention_hours,
        })
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
