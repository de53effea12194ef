//! Event metadata: the UTC commit timestamp plus optional correlation
//! identifiers threaded through a caller's workflow.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata carried alongside every persisted event.
///
/// `timestamp` is set by the caller, typically via [`Metadata::now`]
/// when building a [`crate::NewEvent`], and is carried through to the
/// committed [`crate::EventRecord`] unchanged; the engine never
/// overwrites it. The identifiers below are likewise caller-supplied
/// and opaque to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// Wall-clock time the event was committed, in UTC.
    pub timestamp: DateTime<Utc>,
    /// Identifier correlating this event with others in the same
    /// business transaction or request.
    pub correlation_id: Option<String>,
    /// Identifier of the event or command that caused this one.
    pub causation_id: Option<String>,
    /// Identifier of the operation (command handler, use case) that
    /// produced this event.
    pub operation_id: Option<String>,
    /// Identifier of the user or service principal that triggered
    /// this event.
    pub user_id: Option<String>,
}

impl Metadata {
    /// Builds metadata stamped with the current time and no
    /// correlation identifiers set.
    pub fn now() -> Self {
        Self {
            timestamp: Utc::now(),
            correlation_id: None,
            causation_id: None,
            operation_id: None,
            user_id: None,
        }
    }

    /// Returns a copy with `correlation_id` set.
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Returns a copy with `causation_id` set.
    pub fn with_causation_id(mut self, id: impl Into<String>) -> Self {
        self.causation_id = Some(id.into());
        self
    }

    /// Returns a copy with `operation_id` set.
    pub fn with_operation_id(mut self, id: impl Into<String>) -> Self {
        self.operation_id = Some(id.into());
        self
    }

    /// Returns a copy with `user_id` set.
    pub fn with_user_id(mut self, id: impl Into<String>) -> Self {
        self.user_id = Some(id.into());
        self
    }
}

impl Default for Metadata {
    fn default() -> Self {
        Self::now()
    }
}
