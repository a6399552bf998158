//! In-memory commit log and snapshot store
//!
//! Provides fast, deterministic storage doubles for repository and engine tests:
//! - [`InMemoryCommitLog`]: partitioned append-only log with a global position
//! - [`InMemorySnapshotStore`]: latest memento per stream
//!
//! Both can be switched into a failing mode to exercise transport error paths.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Lock poisoning only happens after a test already panicked

use eventide_core::commit_log::{Chunk, CommitLog, CommitLogError, CommitLogFuture, NewChunk};
use eventide_core::snapshot::{Memento, SnapshotError, SnapshotFuture, SnapshotStore};
use eventide_core::stream::{Position, Version};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

#[derive(Debug, Default)]
struct LogState {
    chunks: Vec<Chunk>,
    partitions: HashMap<String, Vec<usize>>,
}

impl LogState {
    fn head(&self, partition_id: &str) -> Version {
        self.partitions
            .get(partition_id)
            .and_then(|slots| slots.last())
            .map_or(Version::INITIAL, |&slot| self.chunks[slot].index)
    }

    fn has_operation(&self, partition_id: &str, operation_id: &str) -> bool {
        self.partitions.get(partition_id).is_some_and(|slots| {
            slots
                .iter()
                .any(|&slot| self.chunks[slot].operation_id == operation_id)
        })
    }
}

/// In-memory commit log for fast, deterministic testing.
///
/// Positions start at 1 and increase by one per appended chunk. Clones share
/// the same underlying log.
///
/// # Example
///
/// ```
/// use eventide_testing::InMemoryCommitLog;
/// use eventide_core::commit_log::{CommitLog, NewChunk};
/// use eventide_core::stream::{Position, Version};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let log = InMemoryCommitLog::new();
/// let chunk = log
///     .append(NewChunk {
///         partition_id: "Order_1".into(),
///         expected_version: Version::INITIAL,
///         event_count: 1,
///         payload: vec![],
///         operation_id: "op-1".into(),
///     })
///     .await?;
/// assert_eq!(chunk.position, Position::new(1));
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryCommitLog {
    state: Arc<RwLock<LogState>>,
    unavailable: Arc<AtomicBool>,
    failing_reads: Arc<AtomicUsize>,
}

impl InMemoryCommitLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with [`CommitLogError::Unavailable`] until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make the next `count` read calls fail with [`CommitLogError::Unavailable`].
    pub fn fail_next_reads(&self, count: usize) {
        self.failing_reads.store(count, Ordering::SeqCst);
    }

    /// Number of chunks in the log.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().unwrap().chunks.len()
    }

    /// Whether the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of every chunk in position order.
    #[must_use]
    pub fn chunks(&self) -> Vec<Chunk> {
        self.state.read().unwrap().chunks.clone()
    }

    /// Current head (last chunk index) of a partition.
    #[must_use]
    pub fn partition_head(&self, partition_id: &str) -> Version {
        self.state.read().unwrap().head(partition_id)
    }

    fn check_available(&self) -> Result<(), CommitLogError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CommitLogError::Unavailable("commit log switched off".into()));
        }
        Ok(())
    }

    fn check_read(&self) -> Result<(), CommitLogError> {
        self.check_available()?;
        let consumed = self
            .failing_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if consumed {
            return Err(CommitLogError::Unavailable("injected read failure".into()));
        }
        Ok(())
    }
}

impl CommitLog for InMemoryCommitLog {
    fn append(&self, chunk: NewChunk) -> CommitLogFuture<'_, Chunk> {
        Box::pin(async move {
            self.check_available()?;
            let mut state = self.state.write().unwrap();

            if state.has_operation(&chunk.partition_id, &chunk.operation_id) {
                return Err(CommitLogError::DuplicateOperation {
                    partition_id: chunk.partition_id,
                    operation_id: chunk.operation_id,
                });
            }

            let actual = state.head(&chunk.partition_id);
            if actual != chunk.expected_version {
                return Err(CommitLogError::ConcurrencyConflict {
                    partition_id: chunk.partition_id,
                    expected: chunk.expected_version,
                    actual,
                });
            }

            let slot = state.chunks.len();
            let stored = Chunk {
                position: Position::new(slot as u64 + 1),
                index: chunk.index(),
                partition_id: chunk.partition_id,
                payload: chunk.payload,
                operation_id: chunk.operation_id,
            };
            state
                .partitions
                .entry(stored.partition_id.clone())
                .or_default()
                .push(slot);
            state.chunks.push(stored.clone());
            Ok(stored)
        })
    }

    fn read_forward<'a>(
        &'a self,
        from: Position,
        partitions: Option<&'a [String]>,
        limit: usize,
    ) -> CommitLogFuture<'a, Vec<Chunk>> {
        Box::pin(async move {
            self.check_read()?;
            let state = self.state.read().unwrap();
            let start = usize::try_from(from.value().saturating_sub(1)).unwrap_or(usize::MAX);
            Ok(state
                .chunks
                .iter()
                .skip(start)
                .filter(|chunk| partitions.is_none_or(|ids| ids.contains(&chunk.partition_id)))
                .take(limit)
                .cloned()
                .collect())
        })
    }

    fn read_partition<'a>(
        &'a self,
        partition_id: &'a str,
        from: Version,
        to: Version,
    ) -> CommitLogFuture<'a, Vec<Chunk>> {
        Box::pin(async move {
            self.check_read()?;
            let state = self.state.read().unwrap();
            Ok(state
                .partitions
                .get(partition_id)
                .map(|slots| {
                    slots
                        .iter()
                        .map(|&slot| &state.chunks[slot])
                        .filter(|chunk| chunk.index >= from && chunk.index <= to)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default())
        })
    }

    fn head_position(&self) -> CommitLogFuture<'_, Position> {
        Box::pin(async move {
            self.check_available()?;
            Ok(Position::new(self.len() as u64))
        })
    }
}

/// In-memory snapshot store.
///
/// Keeps the latest memento per stream and counts writes so tests can assert
/// when the snapshot policy fired.
#[derive(Clone, Debug, Default)]
pub struct InMemorySnapshotStore {
    mementos: Arc<RwLock<HashMap<String, Memento>>>,
    saves: Arc<AtomicUsize>,
    failing: Arc<AtomicBool>,
}

impl InMemorySnapshotStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest memento of a stream.
    #[must_use]
    pub fn get(&self, stream_id: &str) -> Option<Memento> {
        self.mementos.read().unwrap().get(stream_id).cloned()
    }

    /// Insert a memento directly, bypassing the save counter.
    pub fn insert(&self, memento: Memento) {
        self.mementos
            .write()
            .unwrap()
            .insert(memento.stream_id.clone(), memento);
    }

    /// Number of successful `save` calls.
    #[must_use]
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Make every call fail with [`SnapshotError::Storage`] until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), SnapshotError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SnapshotError::Storage("snapshot store switched off".into()));
        }
        Ok(())
    }
}

impl SnapshotStore for InMemorySnapshotStore {
    fn save(&self, memento: Memento) -> SnapshotFuture<'_, ()> {
        Box::pin(async move {
            self.check()?;
            self.insert(memento);
            self.saves.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn load<'a>(&'a self, stream_id: &'a str) -> SnapshotFuture<'a, Option<Memento>> {
        Box::pin(async move {
            self.check()?;
            Ok(self.get(stream_id))
        })
    }

    fn delete<'a>(&'a self, stream_id: &'a str) -> SnapshotFuture<'a, ()> {
        Box::pin(async move {
            self.check()?;
            self.mementos.write().unwrap().remove(stream_id);
            Ok(())
        })
    }
}
