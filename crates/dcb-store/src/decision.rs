//! `executeDecision`: bounded retry over the read-decide-append cycle.

use std::time::Duration;

use dcb_types::{AppendCondition, NewEvent, Position, StoreError};
use tokio_util::sync::CancellationToken;

/// What a decision function produces for one attempt: the events to
/// append and the guard to append them under.
pub struct Decision {
    /// Events to append if the guard holds.
    pub events: Vec<NewEvent>,
    /// The optimistic-concurrency guard for this attempt.
    pub condition: AppendCondition,
}

/// Runs `decide` then `append` in a loop, retrying on
/// `AppendConditionFailed` and giving up on any other error.
///
/// `decide` is given the current attempt number (starting at 1) so it
/// can re-derive its guard's `afterSequencePosition` against the
/// latest state before each retry. Retries stop once `max_attempts` is
/// reached or, if `deadline` is set, once the total elapsed time would
/// exceed it -- the deadline is evaluated once per loop iteration, not
/// per network call, so it bounds wall-clock time spent retrying
/// rather than any single attempt.
pub async fn execute_decision<D, A, DFut, AFut>(
    max_attempts: u32,
    deadline: Option<Duration>,
    cancel: &CancellationToken,
    mut decide: D,
    mut append: A,
) -> Result<Vec<Position>, StoreError>
where
    D: FnMut(u32) -> DFut,
    DFut: std::future::Future<Output = Result<Decision, StoreError>>,
    A: FnMut(Vec<NewEvent>, Option<AppendCondition>) -> AFut,
    AFut: std::future::Future<Output = Result<Vec<Position>, StoreError>>,
{
    let started = tokio::time::Instant::now();
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        if let Some(deadline) = deadline {
            if started.elapsed() >= deadline {
                return Err(StoreError::Timeout { attempts: attempt - 1 });
            }
        }
        if attempt > max_attempts {
            return Err(StoreError::Timeout { attempts: attempt - 1 });
        }

        let decision = decide(attempt).await?;
        match append(decision.events, Some(decision.condition)).await {
            Ok(positions) => return Ok(positions),
            Err(StoreError::AppendConditionFailed { .. }) => {
                tracing::debug!(attempt, "decision retry: append condition failed");
                continue;
            }
            Err(other) => return Err(other),
        }
    }
}
