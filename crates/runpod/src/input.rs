//! Input document sent to the Boltz handler running on RunPod.

use atomera_core::codec;
use serde::Serialize;

/// Modeling options forwarded to the remote worker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InputConfig {
    pub devices: u32,
    pub accelerator: String,
    pub diffusion_samples: u32,
    pub use_msa_server: bool,
}

/// The `input` object of a `/run` submission.
#[derive(Debug, Clone, Serialize)]
pub struct PredictionInput {
    pub job_id: String,
    /// Boltz YAML document, base64 encoded.
    pub input_yaml: String,
    /// The original request, for the handler's own bookkeeping.
    pub request_data: serde_json::Value,
    pub config: InputConfig,
}

impl PredictionInput {
    pub fn new(
        job_id: impl Into<String>,
        yaml: &str,
        request_data: serde_json::Value,
        config: InputConfig,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            input_yaml: codec::encode_text(yaml),
            request_data,
            config,
        }
    }

    pub fn to_value(&self) -> serde_json::Value {
        // Only owned strings, numbers and bools: serialization cannot fail.
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
