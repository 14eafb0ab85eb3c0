//! REST API client for a RunPod serverless endpoint.
//!
//! Wraps the three calls the job engine needs (submit, status, cancel)
//! using [`reqwest`]. Every request carries the bearer API key and a
//! 30 second timeout. No call is retried here; retry policy belongs to
//! the polling loop.

use std::time::Duration;

use crate::messages::{StatusResponse, SubmitResponse};

/// Default RunPod serverless API base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.runpod.ai/v2";

/// Per-request timeout.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client bound to a single RunPod endpoint.
#[derive(Clone)]
pub struct RunPodApi {
    client: reqwest::Client,
    base_url: String,
    endpoint_id: String,
    api_key: String,
}

impl std::fmt::Debug for RunPodApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunPodApi")
            .field("base_url", &self.base_url)
            .field("endpoint_id", &self.endpoint_id)
            .finish_non_exhaustive()
    }
}

/// Errors from the RunPod REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum RunPodApiError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// RunPod returned a non-2xx status code.
    #[error("RunPod API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The submission was accepted but no task id came back.
    #[error("RunPod did not return a job id: {0}")]
    MissingJobId(String),
}

impl RunPodApi {
    /// Create a client for `endpoint_id` under `base_url`.
    pub fn new(
        base_url: impl Into<String>,
        endpoint_id: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, RunPodApiError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self::with_client(client, base_url, endpoint_id, api_key))
    }

    /// Create a client reusing an existing [`reqwest::Client`].
    pub fn with_client(
        client: reqwest::Client,
        base_url: impl Into<String>,
        endpoint_id: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            endpoint_id: endpoint_id.into(),
            api_key: api_key.into(),
        }
    }

    /// Queue a job on the endpoint.
    ///
    /// Sends `POST /{endpoint}/run` with `{"input": input}` and returns the
    /// provider task id.
    pub async fn submit_job(&self, input: &serde_json::Value) -> Result<String, RunPodApiError> {
        let body = serde_json::json!({ "input": input });

        let response = self
            .client
            .post(self.url("run"))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let text = Self::ensure_success(response).await?.text().await?;
        let parsed: SubmitResponse = serde_json::from_str(&text)
            .map_err(|_| RunPodApiError::MissingJobId(truncate(&text)))?;

        match parsed.id {
            Some(id) if !id.is_empty() => {
                tracing::debug!(
                    task_id = %id,
                    status = parsed.status.as_deref().unwrap_or(""),
                    "Submitted job to RunPod",
                );
                Ok(id)
            }
            _ => Err(RunPodApiError::MissingJobId(truncate(&text))),
        }
    }

    /// Fetch the status document for a task.
    ///
    /// Sends `GET /{endpoint}/status/{task_id}`. The document includes the
    /// handler output once the task has completed.
    pub async fn get_status(&self, task_id: &str) -> Result<StatusResponse, RunPodApiError> {
        let response = self
            .client
            .get(self.url(&format!("status/{task_id}")))
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Ask the provider to cancel a queued or running task.
    ///
    /// Sends `POST /{endpoint}/cancel/{task_id}`.
    pub async fn cancel_job(&self, task_id: &str) -> Result<(), RunPodApiError> {
        let response = self
            .client
            .post(self.url(&format!("cancel/{task_id}")))
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        Self::check_status(response).await
    }

    // ---- private helpers ----

    fn url(&self, path: &str) -> String {
        format!("{}/{}/{}", self.base_url, self.endpoint_id, path)
    }

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`RunPodApiError::ApiError`]
    /// containing the status and body text on failure.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, RunPodApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(RunPodApiError::ApiError {
                status: status.as_u16(),
                body: truncate(&body),
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, RunPodApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }

    /// Assert the response has a success status code, discarding the body.
    async fn check_status(response: reqwest::Response) -> Result<(), RunPodApiError> {
        Self::ensure_success(response).await?;
        Ok(())
    }
}

/// Keep error bodies to a loggable size.
fn truncate(body: &str) -> String {
    const MAX: usize = 500;
    if body.len() <= MAX {
        return body.to_string();
    }
    let mut end = MAX;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
