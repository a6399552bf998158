//! Tests for the in-memory storage doubles

#![allow(clippy::unwrap_used)] // Tests can unwrap
#![allow(clippy::expect_used)] // Tests can expect

use chrono::Utc;
use eventide_core::checkpoint::{CheckpointRecord, CheckpointTracker};
use eventide_core::commit_log::{CommitLog, CommitLogError, NewChunk};
use eventide_core::snapshot::{Memento, SnapshotStore};
use eventide_core::stream::{Position, Version};
use eventide_testing::fixtures::{OrderState, added};
use eventide_testing::{InMemoryCheckpointTracker, InMemoryCommitLog, InMemorySnapshotStore};

fn new_chunk(partition: &str, expected: u64, count: u64, op: &str) -> NewChunk {
    NewChunk {
        partition_id: partition.into(),
        expected_version: Version::new(expected),
        event_count: count,
        payload: vec![1, 2, 3],
        operation_id: op.into(),
    }
}

#[tokio::test]
async fn append_assigns_positions_and_indexes() {
    let log = InMemoryCommitLog::new();

    let first = log.append(new_chunk("Order_1", 0, 2, "a")).await.unwrap();
    let second = log.append(new_chunk("Order_2", 0, 1, "b")).await.unwrap();
    let third = log.append(new_chunk("Order_1", 2, 1, "c")).await.unwrap();

    assert_eq!(first.position, Position::new(1));
    assert_eq!(first.index, Version::new(2));
    assert_eq!(second.position, Position::new(2));
    assert_eq!(third.index, Version::new(3));
    assert_eq!(log.partition_head("Order_1"), Version::new(3));
    assert_eq!(log.head_position().await.unwrap(), Position::new(3));
}

#[tokio::test]
async fn stale_expected_version_conflicts() {
    let log = InMemoryCommitLog::new();
    log.append(new_chunk("Order_1", 0, 1, "a")).await.unwrap();

    let err = log.append(new_chunk("Order_1", 0, 1, "b")).await.unwrap_err();
    assert_eq!(
        err,
        CommitLogError::ConcurrencyConflict {
            partition_id: "Order_1".into(),
            expected: Version::INITIAL,
            actual: Version::new(1),
        }
    );
    assert_eq!(log.len(), 1);
}

#[tokio::test]
async fn duplicate_operation_is_rejected_per_partition() {
    let log = InMemoryCommitLog::new();
    log.append(new_chunk("Order_1", 0, 1, "op")).await.unwrap();

    let err = log.append(new_chunk("Order_1", 1, 1, "op")).await.unwrap_err();
    assert!(matches!(err, CommitLogError::DuplicateOperation { .. }));

    // The same key in another partition is a different operation.
    log.append(new_chunk("Order_2", 0, 1, "op")).await.unwrap();
}

#[tokio::test]
async fn read_forward_filters_and_limits() {
    let log = InMemoryCommitLog::new();
    log.append(new_chunk("Order_1", 0, 1, "a")).await.unwrap();
    log.append(new_chunk("Customer_1", 0, 1, "b")).await.unwrap();
    log.append(new_chunk("Order_1", 1, 1, "c")).await.unwrap();
    log.append(new_chunk("Order_1", 2, 1, "d")).await.unwrap();

    let filter = vec!["Order_1".to_string()];
    let chunks = log.read_forward(Position::new(2), Some(&filter), 2).await.unwrap();
    let positions: Vec<u64> = chunks.iter().map(|c| c.position.value()).collect();
    assert_eq!(positions, vec![3, 4]);

    let all = log.read_forward(Position::ZERO, None, 100).await.unwrap();
    assert_eq!(all.len(), 4);

    let none = log.read_forward(Position::new(5), None, 100).await.unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn read_partition_by_index_range() {
    let log = InMemoryCommitLog::new();
    log.append(new_chunk("Order_1", 0, 2, "a")).await.unwrap();
    log.append(new_chunk("Order_1", 2, 2, "b")).await.unwrap();
    log.append(new_chunk("Order_1", 4, 1, "c")).await.unwrap();

    let chunks = log
        .read_partition("Order_1", Version::new(3), Version::MAX)
        .await
        .unwrap();
    let indexes: Vec<u64> = chunks.iter().map(|c| c.index.value()).collect();
    assert_eq!(indexes, vec![4, 5]);

    assert!(log
        .read_partition("Order_404", Version::INITIAL, Version::MAX)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn injected_read_failures_are_transport_errors() {
    let log = InMemoryCommitLog::new();
    log.fail_next_reads(1);

    let err = log.read_forward(Position::ZERO, None, 10).await.unwrap_err();
    assert!(err.is_transport());
    assert!(log.read_forward(Position::ZERO, None, 10).await.is_ok());

    log.set_unavailable(true);
    assert!(log.append(new_chunk("Order_1", 0, 1, "a")).await.is_err());
}

#[tokio::test]
async fn snapshot_store_keeps_latest_memento() {
    let store = InMemorySnapshotStore::new();
    let mut state = OrderState::default();
    eventide_core::aggregate::AggregateState::apply(&mut state, &added(3));

    store
        .save(Memento::capture("Order_1", Version::new(1), &state).unwrap())
        .await
        .unwrap();
    store
        .save(Memento::capture("Order_1", Version::new(5), &state).unwrap())
        .await
        .unwrap();

    let latest = store.load("Order_1").await.unwrap().unwrap();
    assert_eq!(latest.version, Version::new(5));
    assert_eq!(store.save_count(), 2);

    store.delete("Order_1").await.unwrap();
    assert!(store.load("Order_1").await.unwrap().is_none());
}

#[tokio::test]
async fn checkpoint_tracker_records_history() {
    let tracker = InMemoryCheckpointTracker::new();
    for position in [1, 3, 7] {
        tracker
            .save(CheckpointRecord::new("sum", Position::new(position), Utc::now()))
            .await
            .unwrap();
    }

    assert_eq!(tracker.position("sum"), Some(Position::new(7)));
    assert_eq!(
        tracker.history("sum"),
        vec![Position::new(1), Position::new(3), Position::new(7)]
    );
    assert_eq!(tracker.all().await.unwrap().len(), 1);

    tracker.set_failing(true);
    assert!(tracker.load("sum").await.is_err());
}
