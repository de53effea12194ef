//! Scenario: `readLast({type=T})` performs exactly one event-file load
//! regardless of how many events of type T exist.

use dcb_store::{EventStore, StoreConfig};
use dcb_types::{NewEvent, Query, QueryItem};
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

const COUNT: u64 = 10_000;

#[tokio::test]
async fn read_last_performs_exactly_one_file_load() {
    let dir = tempdir().unwrap();
    let config = StoreConfig::new(dir.path(), ["Metrics".to_string()]);
    let store = EventStore::open(config).await.unwrap();
    let ctx = store.context("Metrics").unwrap();
    let cancel = CancellationToken::new();

    for i in 0..COUNT {
        ctx.append(
            vec![NewEvent::with_payload_type("T", i.to_le_bytes().to_vec())],
            None,
            &cancel,
        )
        .await
        .unwrap();
    }

    let before = ctx.event_reads_performed();
    let last = ctx
        .read_last(&Query::single(QueryItem::of_type("T")), &cancel)
        .await
        .unwrap()
        .unwrap();
    let reads = ctx.event_reads_performed() - before;

    assert_eq!(u64::from_le_bytes(last.payload.try_into().unwrap()), COUNT - 1);
    assert_eq!(reads, 1, "readLast must be O(1) in file I/O regardless of store size");
}
