//! Decoding of the Boltz handler's output document.
//!
//! A completed task's `output` is either a JSON object or a string holding
//! a JSON object. It carries the affinity summary and two file maps,
//! `pose_files` and `output_files`, each `{file name: base64 content}`.

use atomera_core::codec::{self, CodecError};
use serde_json::{Map, Value};

/// Decoded handler output with artifact bytes materialised.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedOutput {
    pub affinity_pred_value: Option<f64>,
    pub affinity_probability_binary: Option<f64>,
    pub confidence_score: Option<f64>,
    /// Predicted structures, sorted by name.
    pub pose_files: Vec<(String, Vec<u8>)>,
    /// Auxiliary result files, sorted by name.
    pub output_files: Vec<(String, Vec<u8>)>,
}

/// Errors raised while decoding a handler output document.
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("completed task has no output")]
    Missing,

    #[error("output is not a JSON object: {0}")]
    NotAnObject(String),

    #[error("field '{0}' must be an object of file name to base64 content")]
    InvalidFileMap(&'static str),

    #[error("handler reported an error: {0}")]
    HandlerError(String),

    #[error("artifact '{name}' failed to decode: {source}")]
    Codec {
        name: String,
        #[source]
        source: CodecError,
    },
}

/// Decode the `output` field of a completed status document.
pub fn decode_output(output: Option<&Value>) -> Result<DecodedOutput, OutputError> {
    let object = match output {
        None | Some(Value::Null) => return Err(OutputError::Missing),
        Some(Value::Object(map)) => map.clone(),
        Some(Value::String(text)) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => map,
            _ => return Err(OutputError::NotAnObject(preview(text))),
        },
        Some(other) => return Err(OutputError::NotAnObject(preview(&other.to_string()))),
    };

    // Some handler versions report a failure inside an otherwise successful task.
    if let Some(Value::String(error)) = object.get("error") {
        if !error.trim().is_empty() && !object.contains_key("affinity_pred_value") {
            return Err(OutputError::HandlerError(error.clone()));
        }
    }

    Ok(DecodedOutput {
        affinity_pred_value: object.get("affinity_pred_value").and_then(Value::as_f64),
        affinity_probability_binary: object
            .get("affinity_probability_binary")
            .and_then(Value::as_f64),
        confidence_score: object.get("confidence_score").and_then(Value::as_f64),
        pose_files: decode_files(&object, "pose_files")?,
        output_files: decode_files(&object, "output_files")?,
    })
}

fn decode_files(object: &Map<String, Value>, field: &'static str) -> Result<Vec<(String, Vec<u8>)>, OutputError> {
    let map = match object.get(field) {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Object(map)) => map,
        Some(_) => return Err(OutputError::InvalidFileMap(field)),
    };

    let mut files = Vec::with_capacity(map.len());
    for (name, content) in map {
        let encoded = content.as_str().ok_or(OutputError::InvalidFileMap(field))?;
        let bytes = codec::decode(encoded).map_err(|source| OutputError::Codec {
            name: name.clone(),
            source,
        })?;
        files.push((name.clone(), bytes));
    }
    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(files)
}

fn preview(text: &str) -> String {
    text.chars().take(120).collect()
}
