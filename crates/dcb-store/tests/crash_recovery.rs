//! Scenario: an event file lands on disk but the ledger is never
//! advanced past it (the write succeeded; the crash happened before
//! commit). On reopen, the ledger must recover to the file's position.

use dcb_store::{ContextPaths, EventStore, ReadOptions, StoreConfig};
use dcb_types::{EventRecord, Metadata, NewEvent, Position, Query, QueryItem};
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn crash_between_event_write_and_ledger_commit_recovers_to_highest_file() {
    let dir = tempdir().unwrap();
    let config = StoreConfig::new(dir.path(), ["Orders".to_string()]);
    let cancel = CancellationToken::new();

    {
        let store = EventStore::open(config.clone()).await.unwrap();
        let ctx = store.context("Orders").unwrap();
        for _ in 0..41 {
            ctx.append(vec![NewEvent::with_payload_type("OrderPlaced", vec![])], None, &cancel)
                .await
                .unwrap();
        }
        assert_eq!(ctx.head(), Position(41));
    }

    // Simulate the crash window where the event file for position
    // 42 is written and renamed into place, but the process dies
    // before the ledger is advanced to 42.
    let paths = ContextPaths::new(dir.path(), "Orders");
    let record = EventRecord {
        position: Position(42),
        event_type: "OrderPlaced".to_string(),
        payload: vec![],
        payload_type: "OrderPlaced".to_string(),
        tags: vec![],
        metadata: Metadata::now(),
    };
    let bytes = rmp_serde::to_vec_named(&record).unwrap();
    tokio::fs::write(paths.event_file(Position(42)), bytes).await.unwrap();

    let store = EventStore::open(config).await.unwrap();
    let ctx = store.context("Orders").unwrap();
    assert_eq!(ctx.head(), Position(42), "recovery must prefer the on-disk file over the stale ledger");

    let positions = ctx
        .append(vec![NewEvent::with_payload_type("OrderPlaced", vec![])], None, &cancel)
        .await
        .unwrap();
    assert_eq!(positions, vec![Position(43)]);

    let all = ctx
        .read(&Query::single(QueryItem::all()), Position::ZERO, &ReadOptions::ascending(), &cancel)
        .await
        .unwrap();
    assert!(all.iter().any(|e| e.position == Position(42)));
}
