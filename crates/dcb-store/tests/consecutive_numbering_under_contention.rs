//! Scenario: two contended writers racing `readLast` + guarded append
//! must still produce exactly `{1..1000}` with no duplicate or gap.

use std::collections::HashSet;
use std::sync::Arc;

use dcb_store::{Decision, EventStore, ReadOptions, StoreConfig};
use dcb_types::{AppendCondition, NewEvent, Position, Query, QueryItem};
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

const TOTAL: u64 = 1000;
const PER_WORKER: u64 = TOTAL / 2;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn consecutive_numbering_under_contention() {
    let dir = tempdir().unwrap();
    let config = StoreConfig::new(dir.path(), ["Inv".to_string()]);
    let store = Arc::new(EventStore::open(config).await.unwrap());

    let mut handles = Vec::new();
    for _ in 0..2 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let cancel = CancellationToken::new();
            let ctx = store.context("Inv").unwrap();
            for _ in 0..PER_WORKER {
                ctx.execute_decision(64, None, &cancel, |_attempt| async {
                    let query = Query::single(QueryItem::of_type("InvoiceCreated"));
                    let last = ctx.read_last(&query, &cancel).await?;
                    let (next, after) = match &last {
                        Some(event) => (u64::from_le_bytes(event.payload.clone().try_into().unwrap()) + 1, Some(event.position)),
                        None => (1, None),
                    };
                    Ok(Decision {
                        events: vec![NewEvent::with_payload_type("InvoiceCreated", next.to_le_bytes().to_vec())],
                        condition: AppendCondition::new(query, after),
                    })
                })
                .await
                .unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let cancel = CancellationToken::new();
    let ctx = store.context("Inv").unwrap();
    let events = ctx
        .read(&Query::all(), Position::ZERO, &ReadOptions::ascending(), &cancel)
        .await
        .unwrap();

    let ns: Vec<u64> = events
        .iter()
        .map(|e| u64::from_le_bytes(e.payload.clone().try_into().unwrap()))
        .collect();
    let unique: HashSet<u64> = ns.iter().copied().collect();

    assert_eq!(events.len(), TOTAL as usize);
    assert_eq!(unique.len(), TOTAL as usize);
    assert_eq!(unique, (1..=TOTAL).collect());
}
