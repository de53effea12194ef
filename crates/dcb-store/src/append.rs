//! The append coordinator: guard evaluation, reservation, event write,
//! index write, and ledger commit as a single critical section.

use dcb_types::{AppendCondition, EventRecord, NewEvent, Position, StoreError};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::events::EventFileStore;
use crate::index::IndexManager;
use crate::ledger::Ledger;
use crate::query_engine::resolve_positions;

/// Wraps ledger + event write + index write in a single logical
/// transaction guarded by the DCB concurrency check.
///
/// `write_lock` must cover both the guard evaluation and the
/// reservation, so no other appender can slip a matching event in
/// between them.
pub struct AppendCoordinator {
    write_lock: Mutex<()>,
    ledger: Ledger,
    events: EventFileStore,
    indices: IndexManager,
}

impl AppendCoordinator {
    /// Builds a coordinator from its already-opened components.
    pub fn new(ledger: Ledger, events: EventFileStore, indices: IndexManager) -> Self {
        Self {
            write_lock: Mutex::new(()),
            ledger,
            events,
            indices,
        }
    }

    /// The durably-committed head, readable without the write lock.
    pub fn head(&self) -> Position {
        self.ledger.head()
    }

    /// Read-only access to the indices, shared with the read engine.
    pub fn indices(&self) -> &IndexManager {
        &self.indices
    }

    /// Read-only access to the event file store, shared with the read
    /// engine.
    pub fn events(&self) -> &EventFileStore {
        &self.events
    }

    /// Read-only access to the ledger, shared with maintenance
    /// operations.
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Commits `new_events` under `condition`, returning the assigned
    /// positions in submission order, or `AppendConditionFailed` if the
    /// guard matched.
    pub async fn append(
        &self,
        new_events: Vec<NewEvent>,
        condition: Option<AppendCondition>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Position>, StoreError> {
        if new_events.is_empty() {
            return Ok(Vec::new());
        }
        check_cancelled(cancel)?;

        let _guard = self.write_lock.lock().await;

        // Step 1: guard evaluation, atomic with reservation because we
        // hold `write_lock` until after the ledger commit.
        if let Some(condition) = &condition {
            check_cancelled(cancel)?;
            let after = condition.after_sequence_position.unwrap_or(Position::ZERO);
            let matches = resolve_positions(
                &self.indices,
                &condition.fail_if_events_match,
                after,
                self.ledger.head(),
            )
            .await?;
            // Confirm each index-level candidate against the loaded
            // event: index membership alone does not prove the full
            // clause (an empty-tag/empty-type item's "full range" can
            // include positions that don't actually satisfy a sibling
            // clause's constraints).
            for position in matches {
                if let Some(event) = self.events.read(position).await? {
                    if condition.fail_if_events_match.matches(&event) {
                        return Err(StoreError::AppendConditionFailed {
                            after: condition.after_sequence_position,
                        });
                    }
                }
            }
        }

        // Step 2: reserve.
        check_cancelled(cancel)?;
        let n = new_events.len() as u64;
        let (start, end) = self.ledger.reserve(n);

        // Step 3 + 4: write event files and update indices.
        let mut positions = Vec::with_capacity(new_events.len());
        for (offset, new_event) in new_events.into_iter().enumerate() {
            check_cancelled(cancel)?;
            let position = Position(start.get() + offset as u64);
            let record = EventRecord::from_new(new_event, position);
            self.events.write(&record).await?;
            self.indices.index_event(&record).await?;
            positions.push(position);
        }

        // Step 5: commit. A cancellation observed after this point is
        // ignored: the write has succeeded.
        self.ledger.commit(end).await?;

        tracing::info!(
            start = start.get(),
            end = end.get(),
            count = positions.len(),
            "appended events"
        );

        Ok(positions)
    }
}

fn check_cancelled(cancel: &CancellationToken) -> Result<(), StoreError> {
    if cancel.is_cancelled() {
        Err(StoreError::Cancelled)
    } else {
        Ok(())
    }
}
