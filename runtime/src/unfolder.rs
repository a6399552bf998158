//! Point-in-time read models folded from one aggregate stream.
//!
//! An [`EventUnfolder`] replays a single stream into a transient state, up to
//! a chosen version. Nothing about the result is stored except, optionally, a
//! memento that lets later calls skip the prefix they share.

use crate::repository::RepositoryError;
use eventide_core::aggregate::AggregateState;
use eventide_core::commit_log::CommitLog;
use eventide_core::context::CommandContext;
use eventide_core::identity::Identity;
use eventide_core::snapshot::{Memento, NeverSnapshot, SnapshotPolicy, SnapshotStore};
use eventide_core::stream::Version;
use std::marker::PhantomData;
use std::sync::Arc;

/// State folded up to a version.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Unfolded<S> {
    /// Folded state.
    pub state: S,
    /// Version of the last applied event.
    pub version: Version,
}

/// Replays one stream into the projector state `S`.
pub struct EventUnfolder<S> {
    log: Arc<dyn CommitLog>,
    snapshots: Option<Arc<dyn SnapshotStore>>,
    policy: Arc<dyn SnapshotPolicy>,
    _state: PhantomData<fn() -> S>,
}

impl<S: AggregateState> EventUnfolder<S> {
    /// Unfolder without mementos.
    #[must_use]
    pub fn new(log: Arc<dyn CommitLog>) -> Self {
        Self {
            log,
            snapshots: None,
            policy: Arc::new(NeverSnapshot),
            _state: PhantomData,
        }
    }

    /// Use and maintain mementos.
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

    /// Memento key of a stream for this projector.
    ///
    /// Kept apart from the aggregate's own snapshot key so both can coexist.
    #[must_use]
    pub fn memento_key(id: &Identity) -> String {
        format!("unfold:{}:{id}", S::SIGNATURE)
    }

    /// Fold every event of `id` with version `<= up_to_version`.
    ///
    /// Returns `Ok(None)` when the stream is empty.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] if the commit log fails or a changeset does
    /// not decode as `S::Event`.
    pub async fn get_projection(
        &self,
        ctx: &CommandContext,
        id: &Identity,
        up_to_version: Version,
    ) -> Result<Option<Unfolded<S>>, RepositoryError> {
        let key = Self::memento_key(id);
        let stored = self.load_memento(&key).await;

        let (mut state, mut version) = stored
            .as_ref()
            .filter(|m| m.version <= up_to_version)
            .and_then(|m| m.restore::<S>().map(|state| (state, m.version)))
            .unwrap_or_default();
        let seeded_at = version;

        let chunks = self
            .log
            .read_partition(&id.to_string(), version.next(), Version::MAX)
            .await?;
        if chunks.is_empty() && version.is_initial() {
            return Ok(None);
        }

        'chunks: for chunk in &chunks {
            for envelope in chunk.changeset::<S::Event>()?.into_envelopes(id) {
                if envelope.version > up_to_version {
                    break 'chunks;
                }
                if envelope.version > version {
                    state.apply(&envelope.event);
                    version = envelope.version;
                }
            }
        }

        tracing::debug!(
            stream_id = %id,
            correlation_id = %ctx.correlation_id,
            seeded_at = %seeded_at,
            version = %version,
            "Stream unfolded"
        );

        let newer_than_stored = stored.as_ref().is_none_or(|m| !m.matches::<S>() || m.version < version);
        if newer_than_stored && self.policy.should_snapshot(version.value() - seeded_at.value()) {
            self.save_memento(key, version, &state).await;
        }

        Ok(Some(Unfolded { state, version }))
    }

    async fn load_memento(&self, key: &str) -> Option<Memento> {
        let store = self.snapshots.as_ref()?;
        match store.load(key).await {
            Ok(memento) => memento,
            Err(error) => {
                tracing::warn!(key, error = %error, "Memento load failed, replaying from start");
                None
            }
        }
    }

    async fn save_memento(&self, key: String, version: Version, state: &S) {
        let Some(store) = &self.snapshots else {
            return;
        };
        let written = match Memento::capture(key.as_str(), version, state) {
            Ok(memento) => store.save(memento).await,
            Err(error) => Err(error),
        };
        if let Err(error) = written {
            tracing::warn!(key = %key, error = %error, "Memento write failed");
        }
    }
}
