//! Polling cursor over the commit log.
//!
//! A [`PollingSubscription`] reads chunks forward in global position order and
//! hands each one to a [`ChunkProcessor`]. It never advances past a chunk the
//! processor rejected: the next [`poll`](PollingSubscription::poll) starts
//! again at that chunk.
//!
//! A cursor built [`with_shutdown`](PollingSubscription::with_shutdown)
//! checks the signal before every chunk, so a stop request ends a batch at
//! the next chunk boundary.
//!
//! # States
//!
//! ```text
//! Idle ──poll──► Reading ──chunk──► Dispatching ──ok──► Reading
//!                   │                    │
//!                   │ transport error    │ processor error
//!                   ▼                    ▼
//!                Reading (retry)       Failed ──poll──► Reading
//!
//! on_completed / on_stopped ──► Completed
//! ```

use eventide_core::commit_log::{Chunk, CommitLog, CommitLogError};
use eventide_core::projection::{ProjectionError, ProjectionFuture};
use eventide_core::stream::Position;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;

/// Errors surfaced by [`PollingSubscription::poll`].
#[derive(Error, Debug)]
pub enum SubscriptionError {
    /// The processor rejected a chunk; the cursor stays in front of it.
    #[error("Dispatching chunk at position {position} failed: {source}")]
    Dispatching {
        /// Position of the rejected chunk.
        position: Position,
        /// Processor error.
        #[source]
        source: ProjectionError,
    },

    /// Reading from the commit log failed.
    #[error("Reading after position {position} failed: {source}")]
    Transport {
        /// Last dispatched position when the read failed.
        position: Position,
        /// Commit log error.
        #[source]
        source: CommitLogError,
    },

    /// The subscription was completed or stopped.
    #[error("Subscription is completed")]
    Completed,
}

impl SubscriptionError {
    /// Whether the commit log, rather than the processor, failed.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}

impl From<SubscriptionError> for ProjectionError {
    fn from(error: SubscriptionError) -> Self {
        match error {
            SubscriptionError::Dispatching { source, .. } => source,
            SubscriptionError::Transport { source, .. } => Self::Storage(source.to_string()),
            completed @ SubscriptionError::Completed => Self::Other(completed.to_string()),
        }
    }
}

/// Cursor state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Created, never polled.
    Idle,
    /// Waiting on the commit log.
    Reading,
    /// A chunk is with the processor.
    Dispatching,
    /// Stopped or completed; further polls are refused.
    Completed,
    /// The processor rejected a chunk; the next poll retries it.
    Failed,
}

/// Receives chunks from a subscription.
///
/// # Dyn Compatibility
///
/// Uses `Pin<Box<dyn Future>>` returns so processors can be held as
/// `&dyn ChunkProcessor`.
pub trait ChunkProcessor: Send + Sync {
    /// Process one chunk.
    ///
    /// # Errors
    ///
    /// Any error stops the current batch; the chunk is offered again on the
    /// next poll.
    fn process<'a>(&'a self, chunk: &'a Chunk) -> ProjectionFuture<'a, ()>;
}

/// Result of one [`PollingSubscription::poll`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollOutcome {
    /// Chunks accepted by the processor.
    pub dispatched: usize,
    /// The read returned fewer chunks than the batch size.
    pub caught_up: bool,
    /// Shutdown was signalled before the batch was fully dispatched.
    pub stopped: bool,
}

/// Forward cursor over the commit log.
pub struct PollingSubscription {
    log: Arc<dyn CommitLog>,
    partitions: Option<Vec<String>>,
    batch_size: usize,
    state: SubscriptionState,
    last_dispatched: Position,
    failed_position: Option<Position>,
    last_error: Option<String>,
    dispatching_failed: bool,
    read_completed: bool,
    shutdown: Option<watch::Receiver<bool>>,
}

impl PollingSubscription {
    /// Cursor that resumes after `last_dispatched` (use [`Position::ZERO`] to
    /// start at the beginning of the log).
    #[must_use]
    pub fn new(log: Arc<dyn CommitLog>, last_dispatched: Position, batch_size: usize) -> Self {
        Self {
            log,
            partitions: None,
            batch_size: batch_size.max(1),
            state: SubscriptionState::Idle,
            last_dispatched,
            failed_position: None,
            last_error: None,
            dispatching_failed: false,
            read_completed: false,
            shutdown: None,
        }
    }

    /// Stop dispatching at the next chunk boundary once `shutdown` is `true`.
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Only read chunks of these partitions.
    #[must_use]
    pub fn with_partitions(mut self, partitions: Vec<String>) -> Self {
        self.partitions = Some(partitions);
        self
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> SubscriptionState {
        self.state
    }

    /// Position of the last chunk the processor accepted.
    #[must_use]
    pub const fn last_dispatched(&self) -> Position {
        self.last_dispatched
    }

    /// Position of the last failure, if any.
    #[must_use]
    pub const fn failed_position(&self) -> Option<Position> {
        self.failed_position
    }

    /// Message of the last failure, cleared by the next accepted chunk.
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Whether the last failure was a processor rejection.
    #[must_use]
    pub const fn dispatching_failed(&self) -> bool {
        self.dispatching_failed
    }

    /// Whether the subscription was completed or stopped.
    #[must_use]
    pub const fn read_completed(&self) -> bool {
        self.read_completed
    }

    /// Hand one chunk to the processor.
    ///
    /// # Errors
    ///
    /// Returns [`SubscriptionError::Dispatching`] if the processor rejects the
    /// chunk. The cursor does not move.
    pub async fn on_next<P>(&mut self, chunk: &Chunk, processor: &P) -> Result<(), SubscriptionError>
    where
        P: ChunkProcessor + ?Sized,
    {
        self.state = SubscriptionState::Dispatching;
        match processor.process(chunk).await {
            Ok(()) => {
                self.last_dispatched = chunk.position;
                self.last_error = None;
                self.dispatching_failed = false;
                self.state = SubscriptionState::Reading;
                Ok(())
            }
            Err(source) => {
                self.dispatching_failed = true;
                self.failed_position = Some(chunk.position);
                self.last_error = Some(source.to_string());
                self.state = SubscriptionState::Failed;
                Err(SubscriptionError::Dispatching {
                    position: chunk.position,
                    source,
                })
            }
        }
    }

    /// Record a transport error.
    ///
    /// `position` defaults to the last dispatched position when the caller
    /// does not know where the read failed.
    pub fn on_error(&mut self, position: Option<Position>, error: &CommitLogError) {
        self.failed_position = Some(position.unwrap_or(self.last_dispatched));
        self.last_error = Some(error.to_string());
        if self.state != SubscriptionState::Completed {
            self.state = SubscriptionState::Reading;
        }
    }

    /// Mark the subscription completed.
    pub fn on_completed(&mut self) {
        self.read_completed = true;
        self.state = SubscriptionState::Completed;
    }

    /// Mark the subscription stopped by its owner.
    pub fn on_stopped(&mut self) {
        self.on_completed();
    }

    /// Read one batch and dispatch it in order.
    ///
    /// A shutdown signal seen between chunks ends the batch early; the
    /// outcome then has `stopped` set and the cursor sits after the last
    /// accepted chunk.
    ///
    /// # Errors
    ///
    /// - [`SubscriptionError::Transport`] if the read failed; the next poll
    ///   retries from the same position
    /// - [`SubscriptionError::Dispatching`] if the processor rejected a chunk;
    ///   the rest of the batch is discarded
    /// - [`SubscriptionError::Completed`] after `on_completed`/`on_stopped`
    pub async fn poll<P>(&mut self, processor: &P) -> Result<PollOutcome, SubscriptionError>
    where
        P: ChunkProcessor + ?Sized,
    {
        if self.read_completed {
            return Err(SubscriptionError::Completed);
        }

        self.state = SubscriptionState::Reading;
        let from = self.last_dispatched.next();
        let read = self
            .log
            .read_forward(from, self.partitions.as_deref(), self.batch_size)
            .await;
        let chunks = match read {
            Ok(chunks) => chunks,
            Err(source) => {
                self.on_error(None, &source);
                return Err(SubscriptionError::Transport {
                    position: self.last_dispatched,
                    source,
                });
            }
        };

        let mut caught_up = chunks.len() < self.batch_size;
        let mut dispatched = 0;
        let mut stopped = false;
        for chunk in &chunks {
            if self.shutdown_requested() {
                stopped = true;
                caught_up = false;
                break;
            }
            self.on_next(chunk, processor).await?;
            dispatched += 1;
        }

        if dispatched > 0 {
            tracing::debug!(
                from = %from,
                to = %self.last_dispatched,
                dispatched,
                "Subscription batch dispatched"
            );
        }
        if stopped {
            tracing::debug!(
                position = %self.last_dispatched,
                dispatched,
                "Subscription batch cut short by shutdown"
            );
        }
        Ok(PollOutcome {
            dispatched,
            caught_up,
            stopped,
        })
    }
}
