//! Scenario: a guard with `after=null` enforces "at most one" even
//! with nothing previously read.

use dcb_store::{EventStore, StoreConfig};
use dcb_types::{AppendCondition, NewEvent, Query, QueryItem, StoreError, Tag};
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn uniqueness_bootstrap() {
    let dir = tempdir().unwrap();
    let config = StoreConfig::new(dir.path(), ["Enrollment".to_string()]);
    let store = EventStore::open(config).await.unwrap();
    let ctx = store.context("Enrollment").unwrap();
    let cancel = CancellationToken::new();

    let guard_query = Query::single(
        QueryItem::of_type("StudentRegistered").with_tags([Tag::new("studentId", "S1")]),
    );

    let first = ctx
        .append(
            vec![NewEvent::with_payload_type("StudentRegistered", vec![])
                .with_tags([Tag::new("studentId", "S1")])],
            Some(AppendCondition::new(guard_query.clone(), None)),
            &cancel,
        )
        .await;
    assert!(first.is_ok());

    let second = ctx
        .append(
            vec![NewEvent::with_payload_type("StudentRegistered", vec![])
                .with_tags([Tag::new("studentId", "S1")])],
            Some(AppendCondition::new(guard_query, None)),
            &cancel,
        )
        .await;
    assert!(matches!(second, Err(StoreError::AppendConditionFailed { .. })));
}
