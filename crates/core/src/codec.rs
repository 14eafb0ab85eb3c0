//! Transport encoding for job artifacts.
//!
//! Artifacts (input documents, pose files, result JSON) cross the wire to
//! the remote provider as standard padded base64. [`encode`] and [`decode`]
//! are exact inverses for every byte sequence, including empty and
//! non-UTF-8 content. [`digest`] produces the SHA-256 recorded in the
//! artifact manifest so stored files can be checked after the fact.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::hashing::sha256_hex;

/// Errors raised when an encoded artifact cannot be decoded.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The input contains a byte outside the base64 alphabet.
    #[error("invalid base64 character {byte:#04x} at offset {offset}")]
    InvalidCharacter { offset: usize, byte: u8 },

    /// The input length or padding is not a valid base64 encoding.
    #[error("malformed base64 padding or length: {0}")]
    Malformed(String),
}

impl From<base64::DecodeError> for CodecError {
    fn from(err: base64::DecodeError) -> Self {
        match err {
            base64::DecodeError::InvalidByte(offset, byte) => {
                CodecError::InvalidCharacter { offset, byte }
            }
            other => CodecError::Malformed(other.to_string()),
        }
    }
}

/// Encode raw bytes into a transport-safe string.
pub fn encode(data: &[u8]) -> String {
    BASE64.encode(data)
}

/// Decode a transport string back into raw bytes.
pub fn decode(encoded: &str) -> Result<Vec<u8>, CodecError> {
    Ok(BASE64.decode(encoded.as_bytes())?)
}

/// Encode UTF-8 text (e.g. a YAML input document).
pub fn encode_text(text: &str) -> String {
    encode(text.as_bytes())
}

/// Hex SHA-256 of artifact content, as stored in the manifest.
pub fn digest(data: &[u8]) -> String {
    sha256_hex(data)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
