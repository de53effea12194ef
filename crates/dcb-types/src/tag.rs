//! Key/value labels attached to events for secondary indexing.

use serde::{Deserialize, Serialize};

/// An opaque `key=value` label attached to an event.
///
/// Tags are treated as opaque strings at the engine level; the caller
/// decides what a given key means (e.g. `studentId`, `courseId`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    /// The tag's key, e.g. `"studentId"`.
    pub key: String,
    /// The tag's value, e.g. `"S1"`.
    pub value: String,
}

impl Tag {
    /// Builds a new tag from owned or borrowed string-like values.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// The `key=value` form used for index filenames and log messages.
    pub fn as_kv_string(&self) -> String {
        format!("{}={}", self.key, self.value)
    }
}
