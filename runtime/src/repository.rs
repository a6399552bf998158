//! Aggregate repository: load by replay, save with optimistic concurrency.
//!
//! # Load
//!
//! 1. Look up the latest memento of the stream. A memento is usable when its
//!    signature matches the state type, it decodes, and the stream actually
//!    reaches its version.
//! 2. Read the partition from the memento version (or from the start) and
//!    replay every event past the seeded version, in index order.
//! 3. Ask the [`SnapshotPolicy`] whether enough events were replayed to write
//!    a fresh memento.
//!
//! # Save
//!
//! All events raised since load go into one changeset whose expected version
//! is the version the aggregate was loaded at. The commit log rejects the
//! append if anyone else wrote to the stream in between.
//!
//! Snapshot failures never fail a load or a save; they are logged and the
//! memento is simply not written.

use crate::metrics::RepositoryMetrics;
use eventide_core::aggregate::{Aggregate, AggregateState};
use eventide_core::changeset::{Changeset, ChangesetCodec, ChangesetError, CodecError, Headers};
use eventide_core::commit_log::{Chunk, CommitLog, CommitLogError, NewChunk};
use eventide_core::context::CommandContext;
use eventide_core::environment::Clock;
use eventide_core::identity::{Identity, IdentityError};
use eventide_core::snapshot::{EveryNEvents, Memento, NeverSnapshot, SnapshotPolicy, SnapshotStore};
use eventide_core::stream::Version;
use serde::{Deserialize, Serialize};
use std::env;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// Errors returned by the repository.
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// Someone else wrote to the stream, or the aggregate is already checked out.
    #[error("Concurrency conflict on {aggregate_id}: {reason}")]
    Concurrency {
        /// Aggregate id string.
        aggregate_id: String,
        /// What collided.
        reason: String,
    },

    /// This commit id already landed in the stream.
    #[error("Commit {commit_id} was already applied to {aggregate_id}")]
    DuplicateCommit {
        /// Aggregate id string.
        aggregate_id: String,
        /// The repeated commit id.
        commit_id: String,
    },

    /// Commit log failure other than a conflict.
    #[error(transparent)]
    CommitLog(CommitLogError),

    /// A changeset failed to encode or decode.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// A stored partition id is not a valid identity.
    #[error(transparent)]
    Identity(#[from] IdentityError),
}

impl RepositoryError {
    /// Whether retrying the whole command may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Concurrency { .. })
    }
}

impl From<CommitLogError> for RepositoryError {
    fn from(error: CommitLogError) -> Self {
        match error {
            CommitLogError::ConcurrencyConflict {
                partition_id,
                expected,
                actual,
            } => Self::Concurrency {
                aggregate_id: partition_id,
                reason: format!("expected version {expected}, found {actual}"),
            },
            CommitLogError::DuplicateOperation {
                partition_id,
                operation_id,
            } => Self::DuplicateCommit {
                aggregate_id: partition_id,
                commit_id: operation_id,
            },
            other => Self::CommitLog(other),
        }
    }
}

impl From<ChangesetError> for RepositoryError {
    fn from(error: ChangesetError) -> Self {
        Self::Codec(CodecError::Invalid(error))
    }
}

/// Repository configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Write a memento every N replayed or committed events; 0 disables snapshots.
    pub snapshot_frequency: u64,
}

impl RepositoryConfig {
    /// Set the snapshot frequency.
    #[must_use]
    pub const fn with_snapshot_frequency(mut self, every: u64) -> Self {
        self.snapshot_frequency = every;
        self
    }

    /// Load from `EVENTIDE_SNAPSHOT_FREQUENCY` (default 0).
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            snapshot_frequency: env::var("EVENTIDE_SNAPSHOT_FREQUENCY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
        }
    }

    /// Snapshot policy matching this configuration.
    #[must_use]
    pub fn snapshot_policy(&self) -> Arc<dyn SnapshotPolicy> {
        if self.snapshot_frequency == 0 {
            Arc::new(NeverSnapshot)
        } else {
            Arc::new(EveryNEvents(self.snapshot_frequency))
        }
    }
}

/// Loads and saves aggregates of any state type against one commit log.
#[derive(Clone)]
pub struct AggregateRepository {
    log: Arc<dyn CommitLog>,
    snapshots: Option<Arc<dyn SnapshotStore>>,
    policy: Arc<dyn SnapshotPolicy>,
    clock: Arc<dyn Clock>,
}

impl AggregateRepository {
    /// Repository without snapshots.
    #[must_use]
    pub fn new(log: Arc<dyn CommitLog>, clock: Arc<dyn Clock>) -> Self {
        Self {
            log,
            snapshots: None,
            policy: Arc::new(NeverSnapshot),
            clock,
        }
    }

    /// Enable snapshots.
    #[must_use]
    pub fn with_snapshots(
        mut self,
        store: Arc<dyn SnapshotStore>,
        policy: Arc<dyn SnapshotPolicy>,
    ) -> Self {
        self.snapshots = Some(store);
        self.policy = policy;
        self
    }

    /// Enable snapshots with the policy described by `config`.
    #[must_use]
    pub fn with_config(self, store: Arc<dyn SnapshotStore>, config: &RepositoryConfig) -> Self {
        let policy = config.snapshot_policy();
        self.with_snapshots(store, policy)
    }

    /// The underlying commit log.
    #[must_use]
    pub fn commit_log(&self) -> &Arc<dyn CommitLog> {
        &self.log
    }

    /// Load an aggregate at its latest version.
    ///
    /// Returns `Ok(None)` when the stream has no chunks.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] if the commit log fails or a changeset does
    /// not decode as `S::Event`.
    pub async fn load<S: AggregateState>(
        &self,
        ctx: &CommandContext,
        id: &Identity,
    ) -> Result<Option<Aggregate<S>>, RepositoryError> {
        let started = Instant::now();
        let stream_id = id.to_string();

        let mut aggregate = match self.seed_from_snapshot::<S>(id, &stream_id).await? {
            Some(seeded) => seeded,
            None => {
                let mut aggregate = Aggregate::<S>::new(id.clone());
                let chunks = self
                    .log
                    .read_partition(&stream_id, Version::INITIAL, Version::MAX)
                    .await?;
                if chunks.is_empty() {
                    return Ok(None);
                }
                Self::replay_chunks(&mut aggregate, &chunks)?;
                aggregate
            }
        };

        let replayed = aggregate.events_since_snapshot();
        RepositoryMetrics::record_load(S::AGGREGATE_TYPE, replayed, started.elapsed());
        tracing::debug!(
            stream_id = %stream_id,
            correlation_id = %ctx.correlation_id,
            version = %aggregate.version(),
            replayed,
            "Aggregate loaded"
        );

        self.maybe_snapshot(&mut aggregate).await;
        Ok(Some(aggregate))
    }

    /// Load an aggregate, or start a new one at version 0 if the stream is empty.
    ///
    /// # Errors
    ///
    /// See [`AggregateRepository::load`].
    pub async fn load_or_create<S: AggregateState>(
        &self,
        ctx: &CommandContext,
        id: &Identity,
    ) -> Result<Aggregate<S>, RepositoryError> {
        Ok(self
            .load(ctx, id)
            .await?
            .unwrap_or_else(|| Aggregate::new(id.clone())))
    }

    /// Append every uncommitted event as one changeset.
    ///
    /// The headers are stamped from `ctx` and the clock, then handed to
    /// `mutate_headers` for caller-specific additions. `commit_id` is the
    /// idempotency key of the append.
    ///
    /// Returns `Ok(None)` without touching the log when nothing was raised.
    ///
    /// # Errors
    ///
    /// - [`RepositoryError::Concurrency`] if the stream moved since load
    /// - [`RepositoryError::DuplicateCommit`] if `commit_id` already landed
    /// - [`RepositoryError::CommitLog`] / [`RepositoryError::Codec`] otherwise
    pub async fn save<S, F>(
        &self,
        ctx: &CommandContext,
        aggregate: &mut Aggregate<S>,
        commit_id: &str,
        mutate_headers: F,
    ) -> Result<Option<Chunk>, RepositoryError>
    where
        S: AggregateState,
        F: FnOnce(&mut Headers) + Send,
    {
        let (expected, events) = aggregate.pending();
        if events.is_empty() {
            return Ok(None);
        }

        let started = Instant::now();
        let mut headers = ctx.headers(self.clock.now());
        mutate_headers(&mut headers);

        let event_count = events.len() as u64;
        let changeset = Changeset::new(expected, events.to_vec(), headers)?;
        let new_chunk = NewChunk {
            partition_id: aggregate.id().to_string(),
            expected_version: expected,
            event_count,
            payload: ChangesetCodec::encode(&changeset)?,
            operation_id: commit_id.to_string(),
        };

        let chunk = match self.log.append(new_chunk).await {
            Ok(chunk) => chunk,
            Err(error) => {
                let error = RepositoryError::from(error);
                if error.is_retryable() {
                    RepositoryMetrics::record_conflict(S::AGGREGATE_TYPE);
                    tracing::debug!(
                        stream_id = %aggregate.id(),
                        expected = %expected,
                        error = %error,
                        "Append rejected"
                    );
                }
                return Err(error);
            }
        };

        aggregate.commit();
        RepositoryMetrics::record_save(S::AGGREGATE_TYPE, started.elapsed());
        tracing::debug!(
            stream_id = %aggregate.id(),
            correlation_id = %ctx.correlation_id,
            position = %chunk.position,
            version = %chunk.index,
            events = event_count,
            "Changeset committed"
        );

        self.maybe_snapshot(aggregate).await;
        Ok(Some(chunk))
    }

    /// Seed from the latest usable memento and replay what follows it.
    ///
    /// Returns `None` when there is no usable memento.
    async fn seed_from_snapshot<S: AggregateState>(
        &self,
        id: &Identity,
        stream_id: &str,
    ) -> Result<Option<Aggregate<S>>, RepositoryError> {
        let Some(store) = &self.snapshots else {
            return Ok(None);
        };

        let memento = match store.load(stream_id).await {
            Ok(Some(memento)) => memento,
            Ok(None) => return Ok(None),
            Err(error) => {
                tracing::warn!(stream_id, error = %error, "Snapshot load failed, replaying from start");
                return Ok(None);
            }
        };

        if !memento.matches::<S>() {
            tracing::warn!(
                stream_id,
                found = %memento.signature,
                expected = S::SIGNATURE,
                "Ignoring snapshot with stale signature"
            );
            return Ok(None);
        }
        let Some(state) = memento.restore::<S>() else {
            tracing::warn!(stream_id, "Ignoring snapshot that does not decode");
            return Ok(None);
        };

        // Reading from the memento version also returns the chunk that ends
        // exactly there, which proves the stream reaches it.
        let chunks = self
            .log
            .read_partition(stream_id, memento.version, Version::MAX)
            .await?;
        if chunks.is_empty() {
            tracing::warn!(
                stream_id,
                snapshot_version = %memento.version,
                "Ignoring snapshot ahead of the stream"
            );
            return Ok(None);
        }

        let mut aggregate = Aggregate::restore(id.clone(), state, memento.version);
        Self::replay_chunks(&mut aggregate, &chunks)?;
        Ok(Some(aggregate))
    }

    fn replay_chunks<S: AggregateState>(
        aggregate: &mut Aggregate<S>,
        chunks: &[Chunk],
    ) -> Result<(), RepositoryError> {
        for chunk in chunks {
            let changeset = chunk.changeset::<S::Event>()?;
            for envelope in changeset.into_envelopes(aggregate.id()) {
                aggregate.replay(&envelope);
            }
        }
        Ok(())
    }

    async fn maybe_snapshot<S: AggregateState>(&self, aggregate: &mut Aggregate<S>) {
        let Some(store) = &self.snapshots else {
            return;
        };
        if !self.policy.should_snapshot(aggregate.events_since_snapshot()) {
            return;
        }

        let stream_id = aggregate.id().to_string();
        let written = match Memento::capture(stream_id.as_str(), aggregate.version(), aggregate.state()) {
            Ok(memento) => store.save(memento).await,
            Err(error) => Err(error),
        };
        match written {
            Ok(()) => {
                aggregate.mark_snapshot();
                RepositoryMetrics::record_snapshot();
                tracing::debug!(stream_id = %stream_id, version = %aggregate.version(), "Snapshot written");
            }
            Err(error) => {
                tracing::warn!(stream_id = %stream_id, error = %error, "Snapshot write failed");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use eventide_core::commit_log::CommitLogError;

    #[test]
    fn conflicts_map_to_retryable_concurrency() {
        let error = RepositoryError::from(CommitLogError::ConcurrencyConflict {
            partition_id: "Order_1".into(),
            expected: Version::new(1),
            actual: Version::new(2),
        });
        assert!(error.is_retryable());
        assert!(error.to_string().contains("Order_1"));
    }

    #[test]
    fn duplicates_and_transport_errors_are_not_retryable() {
        let duplicate = RepositoryError::from(CommitLogError::DuplicateOperation {
            partition_id: "Order_1".into(),
            operation_id: "cmd-1".into(),
        });
        assert!(matches!(duplicate, RepositoryError::DuplicateCommit { .. }));
        assert!(!duplicate.is_retryable());

        let down = RepositoryError::from(CommitLogError::Unavailable("down".into()));
        assert!(matches!(down, RepositoryError::CommitLog(_)));
        assert!(!down.is_retryable());
    }

    #[test]
    fn config_builds_matching_policy() {
        assert!(!RepositoryConfig::default().snapshot_policy().should_snapshot(1_000));
        let policy = RepositoryConfig::default()
            .with_snapshot_frequency(10)
            .snapshot_policy();
        assert!(!policy.should_snapshot(9));
        assert!(policy.should_snapshot(10));
    }
}
