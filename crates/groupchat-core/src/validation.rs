//! Wire-schema validation for inbound chat frames.
//!
//! Three stages run in order, each cheaper than the next stage's input:
//! [`check_size`] on the raw bytes, [`parse_body`] into a JSON object, then
//! [`validate_body`] against the recognised message shapes. [`validate_frame`]
//! chains all three.

use serde_json::{Map, Value};

use crate::errors::{FrameError, ValidationError};

/// Fields a `file` message must carry as non-empty strings.
const FILE_STRING_FIELDS: [&str; 4] = ["file_id", "filename", "mime_type", "url"];

/// Recognised values of the `type` discriminant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageKind {
    /// `{"type":"text","content":"..."}`
    Text,
    /// `{"type":"file","file_id":..., "filename":..., "mime_type":..., "url":..., "size_in_bytes":...}`
    File,
}

impl MessageKind {
    fn from_literal(s: &str) -> Option<Self> {
        match s {
            "text" => Some(Self::Text),
            "file" => Some(Self::File),
            _ => None,
        }
    }
}

/// Reject payloads longer than `limit` bytes.
pub fn check_size(raw: &[u8], limit: usize) -> Result<(), FrameError> {
    if raw.len() > limit {
        return Err(FrameError::TooLarge {
            len: raw.len(),
            limit,
        });
    }
    Ok(())
}

/// Parse raw bytes into a JSON object.
///
/// Arrays, scalars and malformed JSON are all `InvalidJson`.
pub fn parse_body(raw: &[u8]) -> Result<Map<String, Value>, FrameError> {
    match serde_json::from_slice::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        _ => Err(FrameError::InvalidJson),
    }
}

/// Validate a parsed body against the recognised message shapes.
pub fn validate_body(body: &Map<String, Value>) -> Result<MessageKind, ValidationError> {
    let literal = body
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ValidationError::MissingType)?;
    let kind = MessageKind::from_literal(literal).ok_or(ValidationError::UnsupportedType)?;

    match kind {
        MessageKind::Text => {
            if !non_empty_str(body, "content") {
                return Err(ValidationError::InvalidText);
            }
        }
        MessageKind::File => {
            let strings_ok = FILE_STRING_FIELDS.iter().all(|f| non_empty_str(body, f));
            let size_ok = body.get("size_in_bytes").is_some_and(|v| !v.is_null());
            if !(strings_ok && size_ok) {
                return Err(ValidationError::InvalidFile);
            }
        }
    }
    Ok(kind)
}

/// Size check, parse and schema validation in one call.
///
/// Returns the parsed body as a JSON value ready for persistence.
pub fn validate_frame(raw: &[u8], limit: usize) -> Result<Value, FrameError> {
    check_size(raw, limit)?;
    let body = parse_body(raw)?;
    let _kind = validate_body(&body)?;
    Ok(Value::Object(body))
}

fn non_empty_str(body: &Map<String, Value>, key: &str) -> bool {
    body.get(key)
        .and_then(Value::as_str)
        .is_some_and(|s| !s.is_empty())
}
