//! Maps failure payloads of unknown shape onto one readable message.
//!
//! Providers disagree on how errors look: some send `{"detail": ".."}`, some nest an
//! `{"error": {"message": ..}}` object whose message may itself be structured, and
//! transports surface native errors. [`normalize`] walks a fixed precedence list so
//! the caller always gets a single string, never a raw payload.

use std::error::Error as StdError;

use serde_json::Value;

/// Message returned when nothing recognizable is found.
pub const UNKNOWN_ERROR: &str = "Unknown error";

/// A failure value whose shape is not known ahead of time.
#[derive(Debug, Clone, Copy)]
pub enum RawError<'a> {
    /// An error raised by Rust code, typically the transport.
    Native(&'a (dyn StdError + 'static)),
    /// A plain string.
    Text(&'a str),
    /// A decoded JSON payload.
    Json(&'a Value),
}

impl<'a> From<&'a str> for RawError<'a> {
    fn from(value: &'a str) -> Self {
        RawError::Text(value)
    }
}

impl<'a> From<&'a Value> for RawError<'a> {
    fn from(value: &'a Value) -> Self {
        RawError::Json(value)
    }
}

/// Resolves `raw` to a human-readable message.
///
/// Precedence, first match wins:
///
/// 1. native error: its display string
/// 2. plain string (including a JSON string): as-is
/// 3. object with a non-empty `detail`
/// 4. object whose `error` is an object with a non-empty `message`
/// 5. [`UNKNOWN_ERROR`]
///
/// Empty strings count as absent, so an empty `detail` falls through to `error` and an
/// empty nested `message` falls through to the fallback. Structured `detail` or
/// `message` values are rendered as compact JSON.
///
/// # Examples
///
/// ```
/// use kotoba_engine::normalize::{normalize, RawError};
/// use serde_json::json;
///
/// assert_eq!(normalize(RawError::Json(&json!({"detail": "x"}))), "x");
/// assert_eq!(normalize(RawError::Text("y")), "y");
/// assert_eq!(normalize(RawError::Json(&json!({"error": {"message": "z"}}))), "z");
/// assert_eq!(normalize(RawError::Json(&json!({}))), "Unknown error");
/// ```
pub fn normalize(raw: RawError<'_>) -> String {
    match raw {
        RawError::Native(err) => err.to_string(),
        RawError::Text(text) => text.to_string(),
        RawError::Json(value) => normalize_value(value),
    }
}

/// Parses `body` as JSON when possible and normalizes it, otherwise returns the text.
pub fn normalize_body(body: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(value) => normalize_value(&value),
        Err(_) if !body.trim().is_empty() => body.trim().to_string(),
        Err(_) => UNKNOWN_ERROR.to_string(),
    }
}

fn normalize_value(value: &Value) -> String {
    if let Value::String(text) = value {
        return text.clone();
    }

    let Value::Object(map) = value else {
        return UNKNOWN_ERROR.to_string();
    };

    if let Some(detail) = map.get("detail").and_then(printable) {
        return detail;
    }

    if let Some(Value::Object(error)) = map.get("error") {
        if let Some(message) = error.get("message").and_then(printable) {
            return message;
        }
    }

    UNKNOWN_ERROR.to_string()
}

/// Renders a field value, treating null, `false` and empty strings as absent.
fn printable(value: &Value) -> Option<String> {
    match value {
        Value::Null | Value::Bool(false) => None,
        Value::String(text) if text.is_empty() => None,
        Value::String(text) => Some(text.clone()),
        other => serde_json::to_string(other).ok(),
    }
}
