//! Shared projections and seeding helpers for engine tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use eventide_core::commit_log::CommitLog;
use eventide_core::context::CommandContext;
use eventide_core::identity::Identity;
use eventide_core::projection::{ChunkView, Projection, ProjectionError, Result};
use eventide_core::stream::Position;
use eventide_projections::{EngineConfig, ProjectionEngine};
use eventide_runtime::AggregateRepository;
use eventide_runtime::retry::RetryPolicy;
use eventide_testing::fixtures::{CustomerEvent, CustomerState, OrderEvent, OrderState, added};
use eventide_testing::{InMemoryCheckpointTracker, InMemoryCommitLog, test_clock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Sums order amounts per position, so redelivered chunks are not counted twice.
pub struct Sum {
    name: String,
    slot: String,
    tags: Vec<String>,
    applied: Mutex<BTreeMap<Position, i64>>,
    fail_at: Mutex<Option<Position>>,
    delay: Mutex<Duration>,
    pub deliveries: AtomicUsize,
    pub drops: AtomicUsize,
}

impl Sum {
    pub fn new(name: &str) -> Self {
        Self::in_slot(name, name)
    }

    pub fn in_slot(name: &str, slot: &str) -> Self {
        Self {
            name: name.into(),
            slot: slot.into(),
            tags: vec!["Order".into()],
            applied: Mutex::new(BTreeMap::new()),
            fail_at: Mutex::new(None),
            delay: Mutex::new(Duration::ZERO),
            deliveries: AtomicUsize::new(0),
            drops: AtomicUsize::new(0),
        }
    }

    /// Fail whenever the chunk at `position` is delivered.
    pub fn failing_at(self, position: u64) -> Self {
        *self.fail_at.lock().unwrap() = Some(Position::new(position));
        self
    }

    /// Sleep this long before handling each chunk.
    pub fn slow_down(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn heal(&self) {
        *self.fail_at.lock().unwrap() = None;
    }

    pub fn total(&self) -> i64 {
        self.applied.lock().unwrap().values().sum()
    }

    pub fn positions(&self) -> Vec<Position> {
        self.applied.lock().unwrap().keys().copied().collect()
    }
}

impl Projection for Sum {
    type Event = OrderEvent;

    fn name(&self) -> &str {
        &self.name
    }

    fn slot(&self) -> &str {
        &self.slot
    }

    fn aggregate_tags(&self) -> &[String] {
        &self.tags
    }

    async fn handle(&self, chunk: &ChunkView<OrderEvent>) -> Result<bool> {
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.deliveries.fetch_add(1, Ordering::SeqCst);
        if *self.fail_at.lock().unwrap() == Some(chunk.position) {
            return Err(ProjectionError::EventProcessing(format!(
                "cannot sum chunk {}",
                chunk.position
            )));
        }

        let amount = chunk
            .events
            .iter()
            .map(|envelope| match envelope.event {
                OrderEvent::AmountAdded { amount } => amount,
                OrderEvent::Locked { .. } | OrderEvent::Unlocked => 0,
            })
            .sum();
        let previous = self.applied.lock().unwrap().insert(chunk.position, amount);
        Ok(previous.is_none())
    }

    async fn drop_data(&self) -> Result<()> {
        self.drops.fetch_add(1, Ordering::SeqCst);
        self.applied.lock().unwrap().clear();
        Ok(())
    }
}

/// Customer names in delivery order.
pub struct Directory {
    tags: Vec<String>,
    pub names: Mutex<Vec<String>>,
}

impl Default for Directory {
    fn default() -> Self {
        Self {
            tags: vec!["Customer".into()],
            names: Mutex::new(Vec::new()),
        }
    }
}

impl Projection for Directory {
    type Event = CustomerEvent;

    fn name(&self) -> &str {
        "directory"
    }

    fn aggregate_tags(&self) -> &[String] {
        &self.tags
    }

    async fn handle(&self, chunk: &ChunkView<CustomerEvent>) -> Result<bool> {
        let mut names = self.names.lock().unwrap();
        for envelope in &chunk.events {
            let CustomerEvent::Registered { name } = &envelope.event;
            names.push(name.clone());
        }
        Ok(true)
    }
}

pub fn order(n: u64) -> Identity {
    Identity::numeric("Order", n).unwrap()
}

pub fn customer(n: u64) -> Identity {
    Identity::numeric("Customer", n).unwrap()
}

pub fn repository(log: &Arc<InMemoryCommitLog>) -> AggregateRepository {
    AggregateRepository::new(log.clone(), Arc::new(test_clock()))
}

/// Commit one changeset per amount to `id`, returning the chunk positions.
pub async fn seed_order(log: &Arc<InMemoryCommitLog>, id: &Identity, amounts: &[i64]) -> Vec<Position> {
    let repo = repository(log);
    let ctx = CommandContext::new().with_user("alice");
    let mut aggregate = repo.load_or_create::<OrderState>(&ctx, id).await.unwrap();
    let mut positions = Vec::new();
    for amount in amounts {
        let commit_id = format!("{id}-{}", aggregate.version());
        aggregate.raise(added(*amount));
        let chunk = repo
            .save(&ctx, &mut aggregate, &commit_id, |_| {})
            .await
            .unwrap()
            .expect("one event raised");
        positions.push(chunk.position);
    }
    positions
}

pub async fn seed_customer(log: &Arc<InMemoryCommitLog>, id: &Identity, name: &str) -> Position {
    let repo = repository(log);
    let ctx = CommandContext::new();
    let mut aggregate = repo.load_or_create::<CustomerState>(&ctx, id).await.unwrap();
    aggregate.raise(CustomerEvent::Registered { name: name.into() });
    repo.save(&ctx, &mut aggregate, &format!("{id}-register"), |_| {})
        .await
        .unwrap()
        .expect("one event raised")
        .position
}

/// Short intervals so idle waits and backoff do not slow tests down.
pub fn fast_config() -> EngineConfig {
    EngineConfig::default()
        .with_poll_interval(Duration::from_millis(5))
        .with_transport_retry(
            RetryPolicy::default()
                .with_initial_delay(Duration::from_millis(1))
                .with_max_delay(Duration::from_millis(5)),
        )
}

pub fn log_handle(log: &Arc<InMemoryCommitLog>) -> Arc<dyn CommitLog> {
    log.clone()
}

/// Engine over `log` and `tracker` with the given projections.
pub fn engine_with(
    log: &Arc<InMemoryCommitLog>,
    tracker: &Arc<InMemoryCheckpointTracker>,
    handlers: Vec<Arc<dyn eventide_core::projection::ChunkHandler>>,
) -> (ProjectionEngine, tokio::sync::watch::Sender<bool>) {
    handlers
        .into_iter()
        .fold(
            ProjectionEngine::builder(log_handle(log), tracker.clone())
                .config(fast_config())
                .clock(Arc::new(test_clock())),
            eventide_projections::EngineBuilder::handler,
        )
        .build()
        .unwrap()
}

/// Poll `condition` until it holds or five seconds pass.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
