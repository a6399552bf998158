//! Rebuilds and the long-running `run` loop.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{Sum, engine_with, eventually, order, seed_order};
use eventide_core::checkpoint::CheckpointRecord;
use eventide_core::projection::{ProjectionError, TypedProjection};
use eventide_core::stream::Position;
use eventide_runtime::HealthStatus;
use eventide_testing::{InMemoryCheckpointTracker, InMemoryCommitLog, init_tracing};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

fn typed(projection: Sum) -> Arc<TypedProjection<Sum>> {
    Arc::new(TypedProjection::new(projection))
}

#[tokio::test]
async fn rebuild_replays_from_scratch_and_rejoins_the_slot() {
    init_tracing();
    let log = Arc::new(InMemoryCommitLog::new());
    let tracker = Arc::new(InMemoryCheckpointTracker::new());
    let positions = seed_order(&log, &order(1), &[1, 2, 3]).await;

    let sum = typed(Sum::new("sum"));
    let (engine, _shutdown) = engine_with(&log, &tracker, vec![sum.clone()]);
    engine.catch_up().await.unwrap();
    assert_eq!(sum.inner().deliveries.load(Ordering::SeqCst), 3);

    engine.rebuild("sum").await.unwrap();

    assert_eq!(sum.inner().drops.load(Ordering::SeqCst), 1);
    assert_eq!(sum.inner().deliveries.load(Ordering::SeqCst), 6);
    assert_eq!(sum.inner().total(), 6);

    let status = engine.projection_status("sum").unwrap();
    assert!(!status.is_rebuilding);
    assert_eq!(status.checkpoint, positions[2]);

    let record = tracker.get("sum").unwrap();
    assert!(!record.is_rebuilding);
    assert_eq!(record.position, positions[2]);

    // The reset was persisted in rebuild mode before any replay.
    let writes: Vec<_> = tracker.writes().into_iter().filter(|r| r.name == "sum").collect();
    let reset = writes.iter().position(|r| r.is_rebuilding && r.position == Position::ZERO);
    assert!(reset.is_some_and(|i| i == 3));

    // Back in the slot: new chunks arrive through normal dispatch.
    seed_order(&log, &order(1), &[4]).await;
    engine.catch_up().await.unwrap();
    assert_eq!(sum.inner().total(), 10);
}

#[tokio::test]
async fn rebuild_leaves_slot_mates_alone() {
    let log = Arc::new(InMemoryCommitLog::new());
    let tracker = Arc::new(InMemoryCheckpointTracker::new());
    seed_order(&log, &order(1), &[1, 2]).await;

    let target = typed(Sum::in_slot("target", "orders"));
    let mate = typed(Sum::in_slot("mate", "orders"));
    let (engine, _shutdown) = engine_with(&log, &tracker, vec![target.clone(), mate.clone()]);
    engine.catch_up().await.unwrap();

    engine.rebuild("target").await.unwrap();

    assert_eq!(target.inner().drops.load(Ordering::SeqCst), 1);
    assert_eq!(mate.inner().drops.load(Ordering::SeqCst), 0);
    assert_eq!(mate.inner().deliveries.load(Ordering::SeqCst), 2);
    assert_eq!(target.inner().total(), 3);
}

#[tokio::test]
async fn rebuild_clears_a_fault_and_refaults_if_still_broken() {
    let log = Arc::new(InMemoryCommitLog::new());
    let tracker = Arc::new(InMemoryCheckpointTracker::new());
    let positions = seed_order(&log, &order(1), &[1, 2, 3]).await;

    let sum = typed(Sum::new("sum").failing_at(positions[1].value()));
    let (engine, _shutdown) = engine_with(&log, &tracker, vec![sum.clone()]);
    engine.catch_up().await.unwrap();
    assert!(engine.projection_status("sum").unwrap().is_faulted());

    let error = engine.rebuild("sum").await.unwrap_err();
    assert!(matches!(error, ProjectionError::EventProcessing(_)));
    let status = engine.projection_status("sum").unwrap();
    assert!(status.is_faulted());
    assert!(status.is_rebuilding);
    assert_eq!(status.checkpoint, positions[0]);

    sum.inner().heal();
    engine.rebuild("sum").await.unwrap();

    let status = engine.projection_status("sum").unwrap();
    assert!(!status.is_faulted());
    assert!(!status.is_rebuilding);
    assert_eq!(sum.inner().total(), 6);
    assert!(engine.health().is_healthy());
}

#[tokio::test]
async fn shutdown_cuts_a_rebuild_short_at_the_next_chunk() {
    let log = Arc::new(InMemoryCommitLog::new());
    let tracker = Arc::new(InMemoryCheckpointTracker::new());
    for n in 1..=50 {
        seed_order(&log, &order(n), &[1]).await;
    }

    let sum = typed(Sum::new("sum"));
    let (engine, shutdown) = engine_with(&log, &tracker, vec![sum.clone()]);
    engine.catch_up().await.unwrap();
    assert_eq!(sum.inner().deliveries.load(Ordering::SeqCst), 50);

    // The whole log fits in one batch; each chunk takes 20ms.
    sum.inner().slow_down(Duration::from_millis(20));
    let engine = Arc::new(engine);
    let rebuilding = tokio::spawn({
        let engine = Arc::clone(&engine);
        async move { engine.rebuild("sum").await }
    });

    eventually(|| sum.inner().deliveries.load(Ordering::SeqCst) > 52).await;
    shutdown.send(true).unwrap();
    let at_shutdown = sum.inner().deliveries.load(Ordering::SeqCst);

    tokio::time::timeout(Duration::from_secs(5), rebuilding)
        .await
        .expect("rebuild stops on shutdown")
        .unwrap()
        .unwrap();

    // Only the chunk already in the handler may finish.
    let delivered = sum.inner().deliveries.load(Ordering::SeqCst);
    assert!(delivered <= at_shutdown + 1, "{delivered} delivered after shutdown at {at_shutdown}");
    assert!(delivered < 100);

    let status = engine.projection_status("sum").unwrap();
    assert!(status.is_rebuilding);
    assert!(tracker.get("sum").unwrap().is_rebuilding);
    assert_eq!(status.checkpoint, Position::new(u64::try_from(delivered - 50).unwrap()));
}

#[tokio::test]
async fn run_follows_new_commits_until_shutdown() {
    init_tracing();
    let log = Arc::new(InMemoryCommitLog::new());
    let tracker = Arc::new(InMemoryCheckpointTracker::new());
    seed_order(&log, &order(1), &[1]).await;

    let sum = typed(Sum::new("sum"));
    let (engine, shutdown) = engine_with(&log, &tracker, vec![sum.clone()]);
    let engine = Arc::new(engine);
    let running = tokio::spawn(Arc::clone(&engine).run());

    eventually(|| sum.inner().total() == 1).await;
    let positions = seed_order(&log, &order(2), &[10, 20]).await;
    eventually(|| sum.inner().total() == 31).await;
    eventually(|| engine.is_checkpoint_projected_by_all_projections(positions[1])).await;

    shutdown.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("engine stops on shutdown")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn run_rides_out_commit_log_outages() {
    let log = Arc::new(InMemoryCommitLog::new());
    let tracker = Arc::new(InMemoryCheckpointTracker::new());
    seed_order(&log, &order(1), &[2, 3]).await;
    log.fail_next_reads(3);

    let sum = typed(Sum::new("sum"));
    let (engine, shutdown) = engine_with(&log, &tracker, vec![sum.clone()]);
    let engine = Arc::new(engine);
    let running = tokio::spawn(Arc::clone(&engine).run());

    eventually(|| sum.inner().total() == 5).await;
    assert!(!engine.projection_status("sum").unwrap().is_faulted());

    drop(shutdown);
    tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("engine stops when the shutdown sender is gone")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn interrupted_rebuild_resumes_on_run() {
    init_tracing();
    let log = Arc::new(InMemoryCommitLog::new());
    let tracker = Arc::new(InMemoryCheckpointTracker::new());
    let positions = seed_order(&log, &order(1), &[1, 2, 3]).await;
    let now = chrono::Utc::now();
    tracker.insert(CheckpointRecord::new("sum", positions[0], now).rebuilding(true));
    tracker.insert(CheckpointRecord::new("slot:sum", positions[2], now));

    let sum = typed(Sum::new("sum"));
    let (engine, shutdown) = engine_with(&log, &tracker, vec![sum.clone()]);

    engine.resume().await.unwrap();
    let status = engine.projection_status("sum").unwrap();
    assert!(status.is_rebuilding);
    assert_eq!(engine.slot_checkpoint("sum"), Some(positions[2]));
    let check = engine.health().checks.into_iter().next().unwrap();
    assert_eq!(check.status, HealthStatus::Degraded);

    let engine = Arc::new(engine);
    let running = tokio::spawn(Arc::clone(&engine).run());

    eventually(|| {
        engine
            .projection_status("sum")
            .is_some_and(|s| !s.is_rebuilding)
    })
    .await;
    assert_eq!(sum.inner().positions(), vec![positions[1], positions[2]]);
    assert_eq!(sum.inner().drops.load(Ordering::SeqCst), 0);
    assert!(!tracker.get("sum").unwrap().is_rebuilding);

    shutdown.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("engine stops on shutdown")
        .unwrap()
        .unwrap();
}
