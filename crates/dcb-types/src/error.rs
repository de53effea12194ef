//! The error taxonomy shared by every layer of the engine.

use crate::position::Position;

/// Errors returned by append/read/maintenance operations.
///
/// Mirrors the kinds in the error handling design: `InvalidConfiguration`
/// is deliberately not a variant here (see [`ConfigError`]) because it can
/// only ever occur at startup, never once a store has been opened.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The DCB guard matched: a new event satisfying the condition's
    /// query was observed after the condition's watermark. Recoverable
    /// by the caller via retry.
    #[error("append condition failed: a matching event exists after position {after:?}")]
    AppendConditionFailed {
        /// The `afterSequencePosition` the guard was evaluated against.
        after: Option<Position>,
    },

    /// An explicit point lookup (by position, or a projection key)
    /// found nothing.
    #[error("not found: {0}")]
    NotFound(String),

    /// Disk full, permission denied, corrupted file, or any other
    /// I/O failure. The engine performs no silent recovery beyond the
    /// startup ledger reconciliation.
    #[error("I/O failure: {0}")]
    IoFailure(#[from] std::io::Error),

    /// Cooperative cancellation was observed. No partial commit is
    /// visible after a cancelled append.
    #[error("operation cancelled")]
    Cancelled,

    /// A user-supplied projection transition failed. The checkpoint
    /// is not advanced; the next run retries the same event.
    #[error("projection '{projection}' failed to apply event at position {position}: {reason}")]
    ProjectionApplyFailure {
        /// Name of the projection whose transition failed.
        projection: String,
        /// Position of the event being applied.
        position: Position,
        /// Human-readable failure reason.
        reason: String,
    },

    /// A record on disk could not be decoded (corrupt event file,
    /// unexpected index entry width, etc). Distinct from `IoFailure`
    /// because the underlying read succeeded; the bytes were wrong.
    #[error("corrupt record in {context}: {reason}")]
    CorruptRecord {
        /// Which file/stream the corruption was found in.
        context: String,
        /// Human-readable description.
        reason: String,
    },

    /// The decision-model retry loop exceeded its total deadline.
    #[error("decision loop timed out after {attempts} attempt(s)")]
    Timeout {
        /// Number of attempts made before the deadline elapsed.
        attempts: u32,
    },
}

/// Errors surfaced only at startup/configuration time, never during
/// append/read.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    /// `RootPath` was not an absolute path.
    #[error("root path must be absolute: {0}")]
    RootPathNotAbsolute(String),

    /// A context name was empty, contained a filesystem-reserved
    /// character, or matched an OS-reserved device name.
    #[error("invalid context name '{name}': {reason}")]
    InvalidContextName {
        /// The offending context name.
        name: String,
        /// Human-readable reason it was rejected.
        reason: String,
    },

    /// No contexts were configured for the store.
    #[error("at least one context must be configured")]
    NoContexts,
}

/// Error surfaced by `EventStore::open`, which can fail either because
/// the configuration itself is invalid or because recovering a
/// context's on-disk state hit an I/O failure.
#[derive(Debug, thiserror::Error)]
pub enum OpenError {
    /// The supplied [`StoreConfig`](crate) failed validation.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Recovering a context's ledger or directory layout failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}
