//! The 1-based, contiguous, monotonically increasing sequence number
//! assigned to every committed event within a context.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A position within a single context's event stream.
///
/// Positions start at 1; `Position(0)` is reserved to mean "before the
/// first event" (an empty checkpoint, an absent `afterSequencePosition`).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Position(pub u64);

impl Position {
    /// The sentinel "no position yet" value used by checkpoints and by
    /// `AppendCondition::after_sequence_position` absence.
    pub const ZERO: Position = Position(0);

    /// The first real position in any context.
    pub const FIRST: Position = Position(1);

    /// Returns the next position after this one.
    pub fn next(self) -> Position {
        Position(self.0 + 1)
    }

    /// Returns `true` if this position is the zero sentinel.
    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Raw `u64` value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Position {
    fn from(value: u64) -> Self {
        Position(value)
    }
}
