//! Commit log contract: the append-only partitioned store under everything.
//!
//! The commit log is an external collaborator. This module only defines what
//! the repository and the projection engine need from it:
//!
//! - Append one [`Chunk`] to a partition with an expected-version check
//! - Read chunks forward from a global [`Position`], optionally filtered by partition
//! - Read one partition by local index range
//!
//! # Versions and indexes
//!
//! A partition is one aggregate stream. Each chunk holds one changeset, and its
//! local `index` is the stream [`Version`] *after* that changeset. The head of
//! a partition is therefore the index of its last chunk (0 when empty), and an
//! append is accepted only when `expected_version` equals that head.
//!
//! # Implementations
//!
//! - `InMemoryCommitLog` (in `eventide-testing`): fast, deterministic tests
//!
//! # Dyn Compatibility
//!
//! Methods return `Pin<Box<dyn Future>>` so the log can be shared as
//! `Arc<dyn CommitLog>` by repositories and projection cursors.

use crate::changeset::{Changeset, ChangesetCodec, CodecError};
use crate::event::Event;
use crate::stream::{Position, Version};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during commit log operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommitLogError {
    /// Optimistic concurrency conflict: the partition head moved.
    #[error("Concurrency conflict on {partition_id}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        /// The partition where the conflict occurred.
        partition_id: String,
        /// The version we expected the partition to be at.
        expected: Version,
        /// The actual head of the partition.
        actual: Version,
    },

    /// The operation id was already committed to this partition.
    #[error("Operation {operation_id} already committed to {partition_id}")]
    DuplicateOperation {
        /// Partition the duplicate targeted.
        partition_id: String,
        /// The repeated idempotency key.
        operation_id: String,
    },

    /// The store could not be reached; the same request may be retried.
    #[error("Commit log unavailable: {0}")]
    Unavailable(String),

    /// Any other storage failure.
    #[error("Commit log storage error: {0}")]
    Storage(String),
}

impl CommitLogError {
    /// Whether the failure is a transport problem rather than a rejected write.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// One physical commit record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chunk {
    /// Global position assigned by the store.
    pub position: Position,
    /// Partition (aggregate id string).
    pub partition_id: String,
    /// Local index: stream version after this chunk's changeset.
    pub index: Version,
    /// Encoded changeset.
    pub payload: Vec<u8>,
    /// Idempotency key supplied by the writer.
    pub operation_id: String,
}

impl Chunk {
    /// Decode the payload into a typed changeset.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] if the payload does not decode as `E`.
    pub fn changeset<E: Event + DeserializeOwned>(&self) -> Result<Changeset<E>, CodecError> {
        ChangesetCodec::decode(&self.payload)
    }
}

/// A chunk waiting to be appended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewChunk {
    /// Target partition.
    pub partition_id: String,
    /// Head the writer saw when it loaded the stream.
    pub expected_version: Version,
    /// Number of events in the payload; the chunk index is `expected_version + event_count`.
    pub event_count: u64,
    /// Encoded changeset.
    pub payload: Vec<u8>,
    /// Idempotency key.
    pub operation_id: String,
}

impl NewChunk {
    /// Index the chunk will receive once appended.
    #[must_use]
    pub fn index(&self) -> Version {
        self.expected_version + self.event_count
    }
}

/// Boxed future returned by commit log methods.
pub type CommitLogFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, CommitLogError>> + Send + 'a>>;

/// Append-only partitioned store with a global position counter.
pub trait CommitLog: Send + Sync {
    /// Append a chunk with optimistic concurrency control.
    ///
    /// # Errors
    ///
    /// - `ConcurrencyConflict`: the partition head is not `expected_version`
    /// - `DuplicateOperation`: `operation_id` already exists in the partition
    /// - `Unavailable` / `Storage`: backend failure
    fn append(&self, chunk: NewChunk) -> CommitLogFuture<'_, Chunk>;

    /// Read up to `limit` chunks with `position >= from`, in ascending position order.
    ///
    /// When `partitions` is `Some`, only chunks of those partitions are returned.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` or `Storage` on backend failure.
    fn read_forward<'a>(
        &'a self,
        from: Position,
        partitions: Option<&'a [String]>,
        limit: usize,
    ) -> CommitLogFuture<'a, Vec<Chunk>>;

    /// Read the chunks of one partition with `from <= index <= to`, in index order.
    ///
    /// Returns an empty vector for unknown partitions.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` or `Storage` on backend failure.
    fn read_partition<'a>(
        &'a self,
        partition_id: &'a str,
        from: Version,
        to: Version,
    ) -> CommitLogFuture<'a, Vec<Chunk>>;

    /// Highest position assigned so far (`Position::ZERO` when empty).
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` or `Storage` on backend failure.
    fn head_position(&self) -> CommitLogFuture<'_, Position>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concurrency_conflict_error_display() {
        let error = CommitLogError::ConcurrencyConflict {
            partition_id: "Order_1".to_string(),
            expected: Version::new(5),
            actual: Version::new(7),
        };

        let display = format!("{error}");
        assert!(display.contains("Order_1"));
        assert!(display.contains("expected version 5"));
        assert!(display.contains("found 7"));
    }

    #[test]
    fn only_unavailable_is_transport() {
        assert!(CommitLogError::Unavailable("down".into()).is_transport());
        assert!(!CommitLogError::Storage("disk".into()).is_transport());
    }

    #[test]
    fn new_chunk_index_adds_event_count() {
        let chunk = NewChunk {
            partition_id: "Order_1".into(),
            expected_version: Version::new(2),
            event_count: 3,
            payload: vec![],
            operation_id: "op".into(),
        };
        assert_eq!(chunk.index(), Version::new(5));
    }
}
