//! Scenario: a guard scoped to one partition key must not be tripped
//! by a concurrent, unrelated write to a different key.

use std::sync::Arc;

use dcb_store::{EventStore, StoreConfig};
use dcb_types::{AppendCondition, NewEvent, Query, QueryItem, Tag};
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn scoped_guard_ignores_unrelated_writes() {
    let dir = tempdir().unwrap();
    let config = StoreConfig::new(dir.path(), ["Courses".to_string()]);
    let store = Arc::new(EventStore::open(config).await.unwrap());
    let cancel = CancellationToken::new();

    let guard_query = Query::single(QueryItem::of_type("CourseCreated").with_tags([Tag::new("courseId", "C1")]));
    let empty = store
        .context("Courses")
        .unwrap()
        .read_last(&guard_query, &cancel)
        .await
        .unwrap();
    assert!(empty.is_none());

    let store_b = store.clone();
    let writer_b = tokio::spawn(async move {
        let cancel = CancellationToken::new();
        store_b
            .context("Courses")
            .unwrap()
            .append(
                vec![NewEvent::with_payload_type("CourseCreated", vec![]).with_tags([Tag::new("courseId", "C2")])],
                None,
                &cancel,
            )
            .await
            .unwrap();
    });
    writer_b.await.unwrap();

    let result = store
        .context("Courses")
        .unwrap()
        .append(
            vec![NewEvent::with_payload_type("CourseCreated", vec![]).with_tags([Tag::new("courseId", "C1")])],
            Some(AppendCondition::new(guard_query, None)),
            &cancel,
        )
        .await;

    assert!(result.is_ok(), "unrelated write to C2 must not fail A's guard scoped to C1");
}
