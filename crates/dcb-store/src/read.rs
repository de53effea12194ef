//! The read/query engine: resolve, load, order.

use dcb_types::{EventRecord, Position, Query, StoreError};
use tokio_util::sync::CancellationToken;

use crate::events::EventFileStore;
use crate::index::IndexManager;
use crate::query_engine::resolve_positions;

/// Direction events are returned in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Lowest position first (the default).
    #[default]
    Ascending,
    /// Highest position first. A full traversal in reverse order;
    /// there is no short-circuit unless `limit` is set.
    Descending,
}

/// Options controlling a `read` call.
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    /// Order to return matching events in.
    pub direction: Direction,
    /// Stop after this many events, if set.
    pub limit: Option<usize>,
}

impl ReadOptions {
    /// The default ascending, unlimited read.
    pub fn ascending() -> Self {
        Self::default()
    }

    /// A descending read, optionally limited.
    pub fn descending() -> Self {
        Self {
            direction: Direction::Descending,
            limit: None,
        }
    }

    /// Returns a copy with `limit` set.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Resolves and loads events matching `query` via the indices.
pub struct ReadEngine<'a> {
    indices: &'a IndexManager,
    events: &'a EventFileStore,
}

impl<'a> ReadEngine<'a> {
    /// Builds a read engine borrowing the index and event-file layers
    /// of a context.
    pub fn new(indices: &'a IndexManager, events: &'a EventFileStore) -> Self {
        Self { indices, events }
    }

    /// Reads events matching `query`, strictly after `after`, ordered
    /// and limited per `options`.
    ///
    /// Positions whose event file is missing are skipped silently;
    /// this is logged at `warn` by [`EventFileStore::read`].
    pub async fn read_after(
        &self,
        query: &Query,
        after: Position,
        head: Position,
        options: &ReadOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<EventRecord>, StoreError> {
        let mut positions: Vec<Position> = resolve_positions(self.indices, query, after, head)
            .await?
            .into_iter()
            .collect();
        if options.direction == Direction::Descending {
            positions.reverse();
        }

        let mut results = Vec::new();
        for position in positions {
            if cancel.is_cancelled() {
                return Err(StoreError::Cancelled);
            }
            if let Some(limit) = options.limit {
                if results.len() >= limit {
                    break;
                }
            }
            if let Some(event) = self.events.read(position).await? {
                if query.matches(&event) {
                    results.push(event);
                }
            }
        }
        Ok(results)
    }

    /// The `readLast` fast path: for a query with a single clause
    /// naming exactly one event type, reads index tails instead of
    /// scanning, verifies the candidate against the loaded event, and
    /// falls back to a full descending scan only if the tail doesn't
    /// line up to the true answer (can happen when an event matches
    /// the clause's tag list but its type list's tail belongs to a
    /// different event).
    ///
    /// Multi-clause queries always fall back to the descending scan: a
    /// per-clause tail only proves that clause's own maximum, and
    /// there is no way to combine independently-verified per-clause
    /// tails into the true maximum of their union without risking a
    /// stale answer (see [`Query::as_typed_clause`]).
    pub async fn read_last(
        &self,
        query: &Query,
        head: Position,
        cancel: &CancellationToken,
    ) -> Result<Option<EventRecord>, StoreError> {
        if query.is_all() {
            // Query::all() + readLast is legal but pathological; made
            // O(1) via the ledger head.
            if head.is_zero() {
                return Ok(None);
            }
            return self.events.read(head).await;
        }

        if let Some((event_type, tags)) = query.as_typed_clause() {
            if let Some(candidate) = self.tail_candidate_for_clause(event_type, tags, cancel).await? {
                return Ok(Some(candidate));
            }
            // The tail didn't verify; the true match (if any) sits
            // further back in the log, so fall back below.
        }

        let options = ReadOptions::descending().with_limit(1);
        let mut results = self
            .read_after(query, Position::ZERO, head, &options, cancel)
            .await?;
        Ok(results.pop())
    }

    async fn tail_candidate_for_clause(
        &self,
        event_type: &str,
        tags: &[dcb_types::Tag],
        cancel: &CancellationToken,
    ) -> Result<Option<EventRecord>, StoreError> {
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        let mut candidate = self.indices.last_for_type(event_type).await?;
        for tag in tags {
            let tag_tail = self.indices.last_for_tag(tag).await?;
            candidate = match (candidate, tag_tail) {
                (Some(a), Some(b)) => Some(a.min(b)),
                _ => None,
            };
            if candidate.is_none() {
                break;
            }
        }
        let Some(candidate) = candidate else {
            return Ok(None);
        };
        let Some(event) = self.events.read(candidate).await? else {
            return Ok(None);
        };
        let type_ok = event.event_type == event_type;
        let tags_ok = tags.iter().all(|t| event.has_tag(&t.key, &t.value));
        if type_ok && tags_ok {
            Ok(Some(event))
        } else {
            Ok(None)
        }
    }
}
