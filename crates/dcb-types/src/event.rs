//! The event record as persisted, and the builder callers use to
//! describe an event before it has been assigned a position.

use serde::{Deserialize, Serialize};

use crate::metadata::Metadata;
use crate::position::Position;
use crate::tag::Tag;

/// An event as submitted to `append`, before a position has been
/// assigned.
///
/// `event_type` defaults to `payload_type` when left unset, per the
/// data model: "`EventType` string ... defaults to the payload's type
/// name if not set".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEvent {
    /// Indexed event-type discriminator. Defaults to `payload_type`.
    pub event_type: Option<String>,
    /// Opaque, already-serialized domain payload.
    pub payload: Vec<u8>,
    /// Tag identifying how `payload` should be deserialized by the
    /// caller (a registry key, not interpreted by the engine).
    pub payload_type: String,
    /// Tags attached to this event, in caller-specified order.
    pub tags: Vec<Tag>,
    /// Caller-supplied metadata; the timestamp is typically left to
    /// `Metadata::now()` and is not overwritten by the engine.
    pub metadata: Metadata,
}

impl NewEvent {
    /// Builds a new event with an explicit indexed type.
    pub fn new(event_type: impl Into<String>, payload_type: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            event_type: Some(event_type.into()),
            payload,
            payload_type: payload_type.into(),
            tags: Vec::new(),
            metadata: Metadata::now(),
        }
    }

    /// Builds a new event whose indexed type will default to
    /// `payload_type` at append time.
    pub fn with_payload_type(payload_type: impl Into<String>, payload: Vec<u8>) -> Self {
        let payload_type = payload_type.into();
        Self {
            event_type: None,
            payload,
            payload_type,
            tags: Vec::new(),
            metadata: Metadata::now(),
        }
    }

    /// Returns a copy with the given tags appended.
    pub fn with_tags(mut self, tags: impl IntoIterator<Item = Tag>) -> Self {
        self.tags.extend(tags);
        self
    }

    /// Returns a copy with the given metadata.
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// The event type this event will be indexed under once resolved
    /// (explicit `event_type`, or `payload_type` as the default).
    pub fn resolved_event_type(&self) -> &str {
        self.event_type.as_deref().unwrap_or(&self.payload_type)
    }
}

/// An event as persisted: a `NewEvent` plus the `Position` assigned at
/// append time and its fully-resolved `event_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Sequence position assigned at commit time.
    pub position: Position,
    /// Indexed event-type discriminator (never `None` once persisted).
    pub event_type: String,
    /// Opaque domain payload bytes.
    pub payload: Vec<u8>,
    /// Deserializer tag for `payload`.
    pub payload_type: String,
    /// Tags attached to this event.
    pub tags: Vec<Tag>,
    /// Metadata recorded at append time.
    pub metadata: Metadata,
}

impl EventRecord {
    /// Assembles a persisted record from a `NewEvent` and its assigned
    /// position, resolving `event_type` per the default rule.
    pub fn from_new(event: NewEvent, position: Position) -> Self {
        let event_type = event.resolved_event_type().to_string();
        Self {
            position,
            event_type,
            payload: event.payload,
            payload_type: event.payload_type,
            tags: event.tags,
            metadata: event.metadata,
        }
    }

    /// Returns `true` if this record carries a tag with the given key
    /// and value.
    pub fn has_tag(&self, key: &str, value: &str) -> bool {
        self.tags.iter().any(|t| t.key == key && t.value == value)
    }
}
