//! `ProjectionEngine`: catch-up delivery of the commit log to projections.
//!
//! # Overview
//!
//! The engine coordinates the lifecycle of every registered projection:
//! - Groups projections into **slots**; each slot owns one
//!   [`PollingSubscription`] over the commit log
//! - Dispatches each chunk, in global position order, to every projection of
//!   the slot that accepts its partition
//! - Persists per-projection and per-slot checkpoints once the whole slot
//!   has seen the chunk
//! - Isolates failing projections (**faulted**) so the rest keep progressing
//! - Rebuilds a single projection from scratch while the others stay live
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐
//! │  CommitLog  │
//! └──────┬──────┘
//!        │ read_forward (one cursor per slot)
//!        ▼
//! ┌─────────────────┐        ┌───────────────────┐
//! │ ProjectionEngine│───────►│ CheckpointTracker │
//! └────┬───────┬────┘        └───────────────────┘
//!      │       │
//!      ▼       ▼
//!  ┌──────┐ ┌──────┐
//!  │ slot │ │ slot │  (tokio task each, sequential within)
//!  └──────┘ └──────┘
//! ```
//!
//! # Delivery
//!
//! At-least-once. A projection's checkpoint only moves after its handler and
//! the checkpoint write both succeeded, so a crash in between replays the
//! chunk. Projections skip chunks at or below their own checkpoint, which
//! keeps a slot whose members resumed from different positions consistent.
//!
//! # Example
//!
//! ```ignore
//! use eventide_projections::{EngineConfig, ProjectionEngine};
//!
//! let (engine, shutdown) = ProjectionEngine::builder(commit_log, checkpoints)
//!     .projection(OrderTotals::default())
//!     .projection(CustomerDirectory::default())
//!     .config(EngineConfig::from_env())
//!     .build()?;
//!
//! let engine = Arc::new(engine);
//! tokio::spawn(async move {
//!     tokio::signal::ctrl_c().await.ok();
//!     shutdown.send(true).ok();
//! });
//!
//! engine.run().await?;
//! ```

use crate::subscription::{ChunkProcessor, PollOutcome, PollingSubscription, SubscriptionError};
use eventide_core::checkpoint::{CheckpointRecord, CheckpointTracker};
use eventide_core::commit_log::{Chunk, CommitLog};
use eventide_core::environment::{Clock, SystemClock};
use eventide_core::projection::{
    ChunkHandler, Projection, ProjectionError, ProjectionFuture, Result, TypedProjection,
};
use eventide_core::stream::Position;
use eventide_runtime::metrics::ProjectionMetrics;
use eventide_runtime::retry::RetryPolicy;
use eventide_runtime::{HealthCheck, HealthReport};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum chunks read per poll.
    pub batch_size: usize,
    /// Sleep between polls of a slot that has caught up.
    pub poll_interval: Duration,
    /// Backoff between retries after a transport or checkpoint failure.
    /// Only the delays are used; a slot retries until shutdown.
    pub transport_retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            poll_interval: Duration::from_millis(500),
            transport_retry: RetryPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Set the batch size.
    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the idle poll interval.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the transport backoff.
    #[must_use]
    pub fn with_transport_retry(mut self, retry: RetryPolicy) -> Self {
        self.transport_retry = retry;
        self
    }

    /// Load from environment variables.
    ///
    /// - `EVENTIDE_ENGINE_BATCH_SIZE` (default 100)
    /// - `EVENTIDE_ENGINE_POLL_INTERVAL_MS` (default 500)
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            batch_size: env::var("EVENTIDE_ENGINE_BATCH_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.batch_size),
            poll_interval: env::var("EVENTIDE_ENGINE_POLL_INTERVAL_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map_or(defaults.poll_interval, Duration::from_millis),
            transport_retry: defaults.transport_retry,
        }
    }
}

/// Why a projection stopped receiving chunks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fault {
    /// Position of the chunk the handler failed on.
    pub position: Position,
    /// Handler error message.
    pub message: String,
}

/// Point-in-time view of one projection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProjectionStatus {
    /// Projection name.
    pub name: String,
    /// Slot the projection runs in.
    pub slot: String,
    /// Last confirmed position.
    pub checkpoint: Position,
    /// Replaying from scratch on its own cursor.
    pub is_rebuilding: bool,
    /// Set once the handler failed; cleared by a rebuild or a restart.
    pub fault: Option<Fault>,
}

impl ProjectionStatus {
    /// Whether the projection is faulted.
    #[must_use]
    pub const fn is_faulted(&self) -> bool {
        self.fault.is_some()
    }
}

#[derive(Clone, Debug, Default)]
struct Progress {
    checkpoint: Position,
    rebuilding: bool,
    fault: Option<Fault>,
}

impl Progress {
    const fn is_live(&self) -> bool {
        !self.rebuilding && self.fault.is_none()
    }
}

#[derive(Default)]
struct EngineState {
    projections: BTreeMap<String, Progress>,
    slots: BTreeMap<String, Position>,
}

struct Slot {
    handlers: Vec<Arc<dyn ChunkHandler>>,
    /// Held for a whole poll, so nothing else sees a half-dispatched chunk.
    cursor: tokio::sync::Mutex<PollingSubscription>,
}

/// Registers projections and builds a [`ProjectionEngine`].
pub struct EngineBuilder {
    log: Arc<dyn CommitLog>,
    tracker: Arc<dyn CheckpointTracker>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    handlers: Vec<Arc<dyn ChunkHandler>>,
}

impl EngineBuilder {
    /// Register a typed projection.
    #[must_use]
    pub fn projection<P: Projection>(self, projection: P) -> Self {
        self.handler(Arc::new(TypedProjection::new(projection)))
    }

    /// Register a raw chunk handler.
    #[must_use]
    pub fn handler(mut self, handler: Arc<dyn ChunkHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Replace the configuration.
    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Clock used to stamp checkpoint records.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Build the engine.
    ///
    /// Returns the engine and a shutdown sender. Send `true` to stop
    /// [`ProjectionEngine::run`] and any rebuild in progress at the next
    /// chunk boundary.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Other`] if two projections share a name.
    pub fn build(self) -> Result<(ProjectionEngine, watch::Sender<bool>)> {
        let mut handlers = BTreeMap::new();
        let mut slots: BTreeMap<String, Vec<Arc<dyn ChunkHandler>>> = BTreeMap::new();
        let mut state = EngineState::default();

        for handler in self.handlers {
            let name = handler.name().to_string();
            if handlers.contains_key(&name) {
                return Err(ProjectionError::Other(format!(
                    "Projection {name} is registered twice"
                )));
            }
            state.projections.insert(name.clone(), Progress::default());
            state.slots.insert(handler.slot().to_string(), Position::ZERO);
            slots
                .entry(handler.slot().to_string())
                .or_default()
                .push(Arc::clone(&handler));
            handlers.insert(name, handler);
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let batch_size = self.config.batch_size;
        let slots = slots
            .into_iter()
            .map(|(name, handlers)| {
                let cursor = PollingSubscription::new(Arc::clone(&self.log), Position::ZERO, batch_size)
                    .with_shutdown(shutdown_rx.clone());
                (
                    name,
                    Slot {
                        handlers,
                        cursor: tokio::sync::Mutex::new(cursor),
                    },
                )
            })
            .collect();

        let engine = ProjectionEngine {
            log: self.log,
            tracker: self.tracker,
            clock: self.clock,
            config: self.config,
            handlers,
            slots,
            state: Mutex::new(state),
            shutdown: shutdown_rx,
        };
        Ok((engine, shutdown_tx))
    }
}

/// Delivers the commit log to registered projections.
pub struct ProjectionEngine {
    log: Arc<dyn CommitLog>,
    tracker: Arc<dyn CheckpointTracker>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    handlers: BTreeMap<String, Arc<dyn ChunkHandler>>,
    slots: BTreeMap<String, Slot>,
    state: Mutex<EngineState>,
    shutdown: watch::Receiver<bool>,
}

impl ProjectionEngine {
    /// Start registering projections.
    #[must_use]
    pub fn builder(log: Arc<dyn CommitLog>, tracker: Arc<dyn CheckpointTracker>) -> EngineBuilder {
        EngineBuilder {
            log,
            tracker,
            clock: Arc::new(SystemClock),
            config: EngineConfig::default(),
            handlers: Vec::new(),
        }
    }

    /// Engine configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Names of all slots.
    #[must_use]
    pub fn slots(&self) -> Vec<&str> {
        self.slots.keys().map(String::as_str).collect()
    }

    /// Load checkpoints and position every slot cursor.
    ///
    /// A slot resumes after the lowest checkpoint of its non-rebuilding
    /// projections. Faults are forgotten: a restart retries a faulted
    /// projection from its frozen checkpoint.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Checkpoint`] if the tracker fails.
    pub async fn resume(&self) -> Result<()> {
        let mut progress = BTreeMap::new();
        for name in self.handlers.keys() {
            let record = self.tracker.load(name).await?;
            let entry = record.map_or_else(Progress::default, |r| Progress {
                checkpoint: r.position,
                rebuilding: r.is_rebuilding,
                fault: None,
            });
            progress.insert(name.clone(), entry);
        }

        for (slot_name, slot) in &self.slots {
            let live_min = slot
                .handlers
                .iter()
                .filter_map(|h| progress.get(h.name()))
                .filter(|p| !p.rebuilding)
                .map(|p| p.checkpoint)
                .min();
            let start = match live_min {
                Some(position) => position,
                None => self
                    .tracker
                    .load(&CheckpointRecord::slot_key(slot_name))
                    .await?
                    .map_or(Position::ZERO, |r| r.position),
            };

            *slot.cursor.lock().await =
                PollingSubscription::new(Arc::clone(&self.log), start, self.config.batch_size)
                    .with_shutdown(self.shutdown.clone());
            self.state().slots.insert(slot_name.clone(), start);

            tracing::info!(slot = %slot_name, position = %start, "Resuming slot from checkpoint");
        }

        self.state().projections = progress;
        Ok(())
    }

    /// Run every slot until shutdown.
    ///
    /// Each slot is a tokio task; projections persisted in rebuild mode
    /// resume their rebuild in their own task. Transport and checkpoint
    /// failures are retried with backoff and never end the run.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Checkpoint`] if the initial checkpoint load
    /// fails, or [`ProjectionError::Other`] if a task panicked.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        self.resume().await?;
        tracing::info!(
            slots = self.slots.len(),
            projections = self.handlers.len(),
            "Projection engine started"
        );

        let mut tasks: JoinSet<Result<()>> = JoinSet::new();
        for slot in self.slots.keys().cloned() {
            let engine = Arc::clone(&self);
            tasks.spawn(async move {
                engine.slot_loop(&slot).await;
                Ok(())
            });
        }
        for name in self.rebuilding_projections() {
            let engine = Arc::clone(&self);
            tasks.spawn(async move { engine.resume_rebuild(&name).await });
        }

        let mut result = Ok(());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    tracing::error!(error = %error, "Rebuild stopped");
                }
                Err(join_error) => {
                    tracing::error!(error = %join_error, "Engine task failed");
                    result = Err(ProjectionError::Other(format!("Engine task failed: {join_error}")));
                }
            }
        }

        tracing::info!("Projection engine stopped");
        result
    }

    /// Poll one batch for a slot.
    ///
    /// # Errors
    ///
    /// - [`ProjectionError::UnknownProjection`] if no such slot exists
    /// - [`ProjectionError::Storage`] if the commit log read failed
    /// - [`ProjectionError::Checkpoint`] if a checkpoint write failed
    pub async fn poll_slot(&self, slot: &str) -> Result<PollOutcome> {
        let entry = self
            .slots
            .get(slot)
            .ok_or_else(|| ProjectionError::UnknownProjection(format!("slot {slot}")))?;
        Ok(self.poll(slot, entry).await?)
    }

    /// Poll every slot until each has caught up with the log head or
    /// shutdown is signalled.
    ///
    /// # Errors
    ///
    /// Returns the first poll error.
    pub async fn catch_up(&self) -> Result<()> {
        for (name, slot) in &self.slots {
            loop {
                let outcome = self.poll(name, slot).await?;
                if outcome.caught_up || outcome.stopped {
                    break;
                }
            }
        }
        Ok(())
    }

    /// Rebuild one projection from the start of the log.
    ///
    /// Drops its data, resets its checkpoint to 0 in rebuild mode and replays
    /// on a dedicated cursor while the slot keeps serving the other
    /// projections. Once the rebuild cursor reaches the slot checkpoint the
    /// projection rejoins its slot. Returns when that happens, on shutdown,
    /// or on a handler failure.
    ///
    /// # Errors
    ///
    /// - [`ProjectionError::UnknownProjection`] if `name` is not registered
    /// - the handler's error if it failed during replay (it is faulted)
    /// - [`ProjectionError::Checkpoint`] if the reset could not be stored
    pub async fn rebuild(&self, name: &str) -> Result<()> {
        let handler = self.handler(name)?;
        let slot = self.slot_of(&handler)?;

        tracing::info!(projection = %name, "Rebuilding projection");
        {
            // No slot dispatch may run between the reset and the mode switch.
            let _cursor = slot.cursor.lock().await;
            handler.drop_data().await?;
            self.tracker
                .save(CheckpointRecord::new(name, Position::ZERO, self.clock.now()).rebuilding(true))
                .await?;
            self.update(name, |p| {
                p.checkpoint = Position::ZERO;
                p.rebuilding = true;
                p.fault = None;
            });
        }

        self.run_rebuild(&handler, slot, Position::ZERO).await
    }

    /// Status of every projection, ordered by name.
    #[must_use]
    pub fn status(&self) -> Vec<ProjectionStatus> {
        let state = self.state();
        self.handlers
            .iter()
            .map(|(name, handler)| {
                let progress = state.projections.get(name).cloned().unwrap_or_default();
                ProjectionStatus {
                    name: name.clone(),
                    slot: handler.slot().to_string(),
                    checkpoint: progress.checkpoint,
                    is_rebuilding: progress.rebuilding,
                    fault: progress.fault,
                }
            })
            .collect()
    }

    /// Status of one projection.
    #[must_use]
    pub fn projection_status(&self, name: &str) -> Option<ProjectionStatus> {
        self.status().into_iter().find(|s| s.name == name)
    }

    /// Last position a slot fully dispatched.
    #[must_use]
    pub fn slot_checkpoint(&self, slot: &str) -> Option<Position> {
        self.state().slots.get(slot).copied()
    }

    /// Whether every live slot has dispatched `position`.
    ///
    /// A slot counts when at least one of its projections is neither
    /// rebuilding nor faulted. Commands use this to wait until their own
    /// write is visible in the read models.
    #[must_use]
    pub fn is_checkpoint_projected_by_all_projections(&self, position: Position) -> bool {
        let state = self.state();
        self.slots.iter().all(|(name, slot)| {
            let live = slot.handlers.iter().any(|h| {
                state
                    .projections
                    .get(h.name())
                    .is_some_and(Progress::is_live)
            });
            !live || state.slots.get(name).is_some_and(|cp| *cp >= position)
        })
    }

    /// Health of every projection: faulted is unhealthy, rebuilding degraded.
    #[must_use]
    pub fn health(&self) -> HealthReport {
        let checks = self
            .status()
            .into_iter()
            .map(|status| {
                let check = match (&status.fault, status.is_rebuilding) {
                    (Some(fault), _) => HealthCheck::unhealthy(
                        &status.name,
                        format!("faulted at position {}: {}", fault.position, fault.message),
                    ),
                    (None, true) => HealthCheck::degraded(&status.name, "rebuilding"),
                    (None, false) => HealthCheck::healthy(&status.name),
                };
                check
                    .with_metadata("slot", status.slot)
                    .with_metadata("checkpoint", status.checkpoint.to_string())
            })
            .collect();
        HealthReport::new(checks, self.clock.now())
    }

    async fn poll(&self, name: &str, slot: &Slot) -> std::result::Result<PollOutcome, SubscriptionError> {
        let mut cursor = slot.cursor.lock().await;
        let dispatch = SlotDispatch {
            engine: self,
            slot: name,
            handlers: &slot.handlers,
        };
        cursor.poll(&dispatch).await
    }

    async fn slot_loop(&self, name: &str) {
        let Some(slot) = self.slots.get(name) else {
            return;
        };
        let mut shutdown = self.shutdown.clone();
        let mut failures = 0_usize;

        while !*shutdown.borrow() {
            let wait = match self.poll(name, slot).await {
                Ok(outcome) => {
                    failures = 0;
                    outcome.caught_up.then_some(self.config.poll_interval)
                }
                Err(error) => {
                    let delay = self.config.transport_retry.delay_for_attempt(failures);
                    failures = failures.saturating_add(1);
                    tracing::warn!(
                        slot = %name,
                        error = %error,
                        attempt = failures,
                        delay_ms = delay.as_millis(),
                        "Slot poll failed, retrying"
                    );
                    Some(delay)
                }
            };

            if let Some(delay) = wait {
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }

        slot.cursor.lock().await.on_stopped();
        tracing::info!(slot = %name, "Slot stopped");
    }

    async fn resume_rebuild(&self, name: &str) -> Result<()> {
        let handler = self.handler(name)?;
        let slot = self.slot_of(&handler)?;
        let from = self
            .state()
            .projections
            .get(name)
            .map_or(Position::ZERO, |p| p.checkpoint);
        tracing::info!(projection = %name, position = %from, "Resuming rebuild");
        self.run_rebuild(&handler, slot, from).await
    }

    async fn run_rebuild(&self, handler: &Arc<dyn ChunkHandler>, slot: &Slot, from: Position) -> Result<()> {
        let name = handler.name();
        let mut cursor = PollingSubscription::new(Arc::clone(&self.log), from, self.config.batch_size)
            .with_shutdown(self.shutdown.clone());
        let dispatch = RebuildDispatch {
            engine: self,
            handler: handler.as_ref(),
        };
        let mut shutdown = self.shutdown.clone();
        let mut failures = 0_usize;

        loop {
            if *shutdown.borrow() {
                cursor.on_stopped();
                tracing::info!(projection = %name, position = %cursor.last_dispatched(), "Rebuild interrupted by shutdown");
                return Ok(());
            }
            if self.try_finish_rebuild(name, handler.slot(), slot, cursor.last_dispatched()).await? {
                return Ok(());
            }

            let wait = match cursor.poll(&dispatch).await {
                Ok(outcome) => {
                    failures = 0;
                    outcome.caught_up.then_some(self.config.poll_interval)
                }
                Err(error) => {
                    if self.is_faulted(name) {
                        return Err(error.into());
                    }
                    let delay = self.config.transport_retry.delay_for_attempt(failures);
                    failures = failures.saturating_add(1);
                    tracing::warn!(
                        projection = %name,
                        error = %error,
                        attempt = failures,
                        "Rebuild poll failed, retrying"
                    );
                    Some(delay)
                }
            };

            if let Some(delay) = wait {
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            cursor.on_stopped();
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    /// Switch a rebuilt projection back to its slot once it caught up.
    async fn try_finish_rebuild(
        &self,
        name: &str,
        slot_name: &str,
        slot: &Slot,
        position: Position,
    ) -> Result<bool> {
        let behind = |engine: &Self| {
            engine
                .slot_checkpoint(slot_name)
                .is_some_and(|live| position < live)
        };
        if behind(self) {
            return Ok(false);
        }

        let _cursor = slot.cursor.lock().await;
        if behind(self) {
            return Ok(false);
        }
        self.tracker
            .save(CheckpointRecord::new(name, position, self.clock.now()))
            .await?;
        self.update(name, |p| {
            p.checkpoint = position;
            p.rebuilding = false;
        });

        tracing::info!(projection = %name, position = %position, "Rebuild caught up with slot");
        Ok(true)
    }

    async fn dispatch_slot_chunk(
        &self,
        slot: &str,
        handlers: &[Arc<dyn ChunkHandler>],
        chunk: &Chunk,
    ) -> Result<()> {
        let position = chunk.position;
        let mut advanced = Vec::with_capacity(handlers.len());

        for handler in handlers {
            let name = handler.name();
            let Some(progress) = self.progress(name) else {
                continue;
            };
            if !progress.is_live() || progress.checkpoint >= position {
                continue;
            }
            if handler.accepts(&chunk.partition_id) {
                match handler.handle(chunk).await {
                    Ok(modified) => ProjectionMetrics::record_chunk(name, modified),
                    Err(error) => {
                        self.fault(name, position, &error);
                        continue;
                    }
                }
            }
            advanced.push(name);
        }

        let now = self.clock.now();
        for name in advanced {
            self.tracker
                .save(CheckpointRecord::new(name, position, now))
                .await?;
            self.update(name, |p| p.checkpoint = position);
        }
        self.tracker
            .save(CheckpointRecord::new(CheckpointRecord::slot_key(slot), position, now))
            .await?;
        self.state().slots.insert(slot.to_string(), position);
        ProjectionMetrics::record_checkpoint(slot, position.value());

        tracing::debug!(slot = %slot, position = %position, partition = %chunk.partition_id, "Chunk dispatched");
        Ok(())
    }

    async fn dispatch_rebuild_chunk(&self, handler: &dyn ChunkHandler, chunk: &Chunk) -> Result<()> {
        let name = handler.name();
        if handler.accepts(&chunk.partition_id) {
            match handler.handle(chunk).await {
                Ok(modified) => ProjectionMetrics::record_chunk(name, modified),
                Err(error) => {
                    self.fault(name, chunk.position, &error);
                    return Err(error);
                }
            }
        }

        self.tracker
            .save(CheckpointRecord::new(name, chunk.position, self.clock.now()).rebuilding(true))
            .await?;
        self.update(name, |p| p.checkpoint = chunk.position);
        Ok(())
    }

    fn fault(&self, name: &str, position: Position, error: &ProjectionError) {
        tracing::error!(
            projection = %name,
            position = %position,
            error = %error,
            "Projection faulted, it will receive no further chunks"
        );
        ProjectionMetrics::record_fault(name);
        self.update(name, |p| {
            p.fault = Some(Fault {
                position,
                message: error.to_string(),
            });
        });
    }

    fn handler(&self, name: &str) -> Result<Arc<dyn ChunkHandler>> {
        self.handlers
            .get(name)
            .cloned()
            .ok_or_else(|| ProjectionError::UnknownProjection(name.to_string()))
    }

    fn slot_of(&self, handler: &Arc<dyn ChunkHandler>) -> Result<&Slot> {
        self.slots
            .get(handler.slot())
            .ok_or_else(|| ProjectionError::UnknownProjection(format!("slot {}", handler.slot())))
    }

    fn rebuilding_projections(&self) -> Vec<String> {
        self.state()
            .projections
            .iter()
            .filter(|(_, p)| p.rebuilding)
            .map(|(name, _)| name.clone())
            .collect()
    }

    fn progress(&self, name: &str) -> Option<Progress> {
        self.state().projections.get(name).cloned()
    }

    fn is_faulted(&self, name: &str) -> bool {
        self.progress(name).is_some_and(|p| p.fault.is_some())
    }

    fn update(&self, name: &str, change: impl FnOnce(&mut Progress)) {
        if let Some(progress) = self.state().projections.get_mut(name) {
            change(progress);
        }
    }

    fn state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct SlotDispatch<'e> {
    engine: &'e ProjectionEngine,
    slot: &'e str,
    handlers: &'e [Arc<dyn ChunkHandler>],
}

impl ChunkProcessor for SlotDispatch<'_> {
    fn process<'a>(&'a self, chunk: &'a Chunk) -> ProjectionFuture<'a, ()> {
        Box::pin(self.engine.dispatch_slot_chunk(self.slot, self.handlers, chunk))
    }
}

struct RebuildDispatch<'e> {
    engine: &'e ProjectionEngine,
    handler: &'e dyn ChunkHandler,
}

impl ChunkProcessor for RebuildDispatch<'_> {
    fn process<'a>(&'a self, chunk: &'a Chunk) -> ProjectionFuture<'a, ()> {
        Box::pin(self.engine.dispatch_rebuild_chunk(self.handler, chunk))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_builders() {
        let config = EngineConfig::default()
            .with_batch_size(10)
            .with_poll_interval(Duration::from_millis(5));
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.poll_interval, Duration::from_millis(5));
        assert_eq!(config.transport_retry, RetryPolicy::default());
    }

    #[test]
    fn live_means_neither_rebuilding_nor_faulted() {
        assert!(Progress::default().is_live());
        let rebuilding = Progress {
            rebuilding: true,
            ..Progress::default()
        };
        assert!(!rebuilding.is_live());
        let faulted = Progress {
            fault: Some(Fault {
                position: Position::new(3),
                message: "boom".into(),
            }),
            ..Progress::default()
        };
        assert!(!faulted.is_live());
    }
}
