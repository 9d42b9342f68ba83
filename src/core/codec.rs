//! Versioned Structural Codec
//!
//! Every steady-state payload is a JSON record carrying a protocol version
//! field `v` next to its `type` tag:
//!
//! ```text
//! {"v":1,"type":"batch","events":[...]}
//! ```
//!
//! Decoding is purely structural: the text is parsed into a closed set of
//! serde types and nothing in it is ever evaluated. Oversized payloads and
//! unknown versions are rejected before the body is interpreted.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::constants::RECV_BUFFER_SIZE;

/// Wire protocol version.
pub const PROTOCOL_VERSION: u32 = 1;

/// Largest accepted payload (bytes).
pub const MAX_MESSAGE_SIZE: usize = RECV_BUFFER_SIZE;

/// Name of the version field.
const VERSION_FIELD: &str = "v";

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Payload is larger than the receive buffer.
    #[error("payload of {size} bytes exceeds the {limit} byte limit")]
    Oversized {
        /// Payload size
        size: usize,
        /// Configured limit
        limit: usize,
    },

    /// Payload is not a record.
    #[error("payload is not a record")]
    NotARecord,

    /// Version field missing or not an integer.
    #[error("payload has no protocol version")]
    MissingVersion,

    /// Version field does not match ours.
    #[error("protocol version {found} is not supported (expected {expected})")]
    VersionMismatch {
        /// Our version
        expected: u32,
        /// Peer's version
        found: u64,
    },

    /// JSON syntax or shape error.
    #[error("malformed payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encode a message into a versioned record.
pub fn encode<T: Serialize>(message: &T) -> Result<String, CodecError> {
    let mut value = serde_json::to_value(message)?;
    let record = value.as_object_mut().ok_or(CodecError::NotARecord)?;
    record.insert(VERSION_FIELD.to_string(), Value::from(PROTOCOL_VERSION));

    let text = serde_json::to_string(&value)?;
    check_size(&text)?;
    Ok(text)
}

/// Decode a versioned record.
pub fn decode<T: DeserializeOwned>(text: &str) -> Result<T, CodecError> {
    check_size(text)?;

    let mut value: Value = serde_json::from_str(text)?;
    let record = value.as_object_mut().ok_or(CodecError::NotARecord)?;
    let version = record
        .remove(VERSION_FIELD)
        .and_then(|v| v.as_u64())
        .ok_or(CodecError::MissingVersion)?;

    if version != u64::from(PROTOCOL_VERSION) {
        return Err(CodecError::VersionMismatch {
            expected: PROTOCOL_VERSION,
            found: version,
        });
    }

    Ok(serde_json::from_value(value)?)
}

/// Decode an unversioned literal, e.g. one element of a map file.
pub fn decode_literal<T: DeserializeOwned>(text: &str) -> Result<T, CodecError> {
    check_size(text)?;
    Ok(serde_json::from_str(text)?)
}

fn check_size(text: &str) -> Result<(), CodecError> {
    if text.len() > MAX_MESSAGE_SIZE {
        return Err(CodecError::Oversized {
            size: text.len(),
            limit: MAX_MESSAGE_SIZE,
        });
    }
    Ok(())
}
