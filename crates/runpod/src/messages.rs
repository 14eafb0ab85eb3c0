//! RunPod response documents and provider status mapping.
//!
//! The status endpoint returns `{"id", "status", "output"?, "error"?}`.
//! [`StatusResponse::state`] collapses the provider's status strings into a
//! [`RemoteState`] the polling loop can act on.

use serde::Deserialize;

/// Response of `POST /{endpoint}/run`.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitResponse {
    /// Provider-assigned task id. Absent on malformed responses.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Response of `GET /{endpoint}/status/{id}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusResponse {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub status: String,
    /// Handler output; an object, or a JSON document encoded as a string.
    #[serde(default)]
    pub output: Option<serde_json::Value>,
    /// Provider error detail; a string or a structured object.
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}

/// Provider-side task status strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderStatus {
    InQueue,
    Queued,
    InProgress,
    Completed,
    Failed,
    Cancelled,
    TimedOut,
    /// Anything the provider reports that is not listed above.
    Other(String),
}

impl ProviderStatus {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "IN_QUEUE" => Self::InQueue,
            "QUEUED" => Self::Queued,
            "IN_PROGRESS" => Self::InProgress,
            "COMPLETED" => Self::Completed,
            "FAILED" => Self::Failed,
            "CANCELLED" => Self::Cancelled,
            "TIMED_OUT" => Self::TimedOut,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Remote task state as seen by the polling loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteState {
    /// Accepted but not yet picked up by a worker.
    Queued,
    /// Running, or a status string we do not recognise.
    InProgress,
    Succeeded,
    /// Failed, cancelled or timed out on the provider side.
    Failed { reason: String },
}

impl RemoteState {
    /// Progress percentage reported for this state.
    pub fn progress(&self) -> Option<u8> {
        match self {
            Self::Queued => Some(10),
            Self::InProgress => Some(50),
            Self::Succeeded => Some(100),
            Self::Failed { .. } => None,
        }
    }
}

impl StatusResponse {
    pub fn provider_status(&self) -> ProviderStatus {
        ProviderStatus::parse(&self.status)
    }

    /// Map the provider status onto a [`RemoteState`].
    ///
    /// Unrecognised status strings are treated as still in progress and
    /// logged; the caller's wall-clock timeout bounds how long that lasts.
    pub fn state(&self) -> RemoteState {
        match self.provider_status() {
            ProviderStatus::InQueue | ProviderStatus::Queued => RemoteState::Queued,
            ProviderStatus::InProgress => RemoteState::InProgress,
            ProviderStatus::Completed => RemoteState::Succeeded,
            ProviderStatus::Failed | ProviderStatus::Cancelled | ProviderStatus::TimedOut => {
                RemoteState::Failed {
                    reason: self.error_text(),
                }
            }
            ProviderStatus::Other(raw) => {
                tracing::warn!(
                    task_id = self.id.as_deref().unwrap_or("<unknown>"),
                    status = %raw,
                    "Unrecognized RunPod status, treating as in progress",
                );
                RemoteState::InProgress
            }
        }
    }

    /// Human-readable failure detail, falling back to the status itself.
    pub fn error_text(&self) -> String {
        match &self.error {
            Some(serde_json::Value::String(s)) if !s.trim().is_empty() => s.clone(),
            Some(serde_json::Value::Null) | None => format!("job {}", self.status.to_lowercase()),
            Some(serde_json::Value::String(_)) => format!("job {}", self.status.to_lowercase()),
            Some(other) => other.to_string(),
        }
    }
}
