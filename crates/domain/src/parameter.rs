//! Parameter — a named value usable in conditions and payload templates.
//!
//! A parameter starts with its configured `value`. When it is bound to a
//! `topic`, every message on that topic replaces the value, either with the
//! raw payload text or, if `json_pointer` is set, with the JSON value found
//! at that pointer.

use serde::{Deserialize, Serialize};

/// Definition of a parameter, as found in configuration or control messages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Parameter {
    /// Initial value.
    pub value: String,
    /// Topic whose messages update the value.
    pub topic: Option<String>,
    /// JSON pointer (RFC 6901) applied to the payload of `topic` messages.
    pub json_pointer: Option<String>,
}

impl Parameter {
    /// A constant parameter.
    #[must_use]
    pub fn constant(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            topic: None,
            json_pointer: None,
        }
    }

    /// A parameter that follows messages published on `topic`.
    #[must_use]
    pub fn bound(topic: impl Into<String>, json_pointer: Option<String>) -> Self {
        Self {
            value: String::new(),
            topic: Some(topic.into()),
            json_pointer,
        }
    }

    /// Compute the new value carried by `payload`.
    ///
    /// Returns `None` when a JSON pointer is configured but the payload is not
    /// JSON or does not contain the pointer.
    #[must_use]
    pub fn extract(&self, payload: &[u8]) -> Option<String> {
        match &self.json_pointer {
            None => Some(String::from_utf8_lossy(payload).into_owned()),
            Some(pointer) => json_value_at(payload, pointer).map(|value| value_to_text(&value)),
        }
    }
}

/// Look up `pointer` inside `payload` parsed as JSON.
#[must_use]
pub fn json_value_at(payload: &[u8], pointer: &str) -> Option<serde_json::Value> {
    let document: serde_json::Value = serde_json::from_slice(payload).ok()?;
    document.pointer(pointer).cloned()
}

/// Render a JSON value as plain text: strings lose their quotes, everything
/// else uses its JSON form.
#[must_use]
pub fn value_to_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
