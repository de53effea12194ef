#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **dcb-types** – Value types for the DCB event store.
//!
//! This crate defines the data model shared between the storage engine
//! (`dcb-store`) and any caller building decision models on top of it:
//! events, tags, metadata, queries, positions, and the error taxonomy.
//! It performs no I/O and makes no assumptions about where events are
//! persisted.

mod error;
mod event;
mod metadata;
mod position;
mod query;
mod tag;

pub use error::{ConfigError, OpenError, StoreError};
pub use event::{EventRecord, NewEvent};
pub use metadata::Metadata;
pub use position::Position;
pub use query::{AppendCondition, Query, QueryItem};
pub use tag::Tag;

/// Convenience re-export of the most commonly used types.
pub mod prelude {
    pub use crate::{
        AppendCondition, ConfigError, EventRecord, Metadata, NewEvent, OpenError, Position,
        Query, QueryItem, StoreError, Tag,
    };
}
