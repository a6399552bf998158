//! Durable projection progress.
//!
//! The engine keeps one [`CheckpointRecord`] per slot (`slot:{name}`) and one
//! per projection (`{name}`). Each record is the last global position whose
//! chunk was fully dispatched. Only the engine writes them.

use crate::projection::ProjectionFuture;
use crate::stream::Position;
use crate::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Progress of one slot or projection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    /// Slot key (`slot:{name}`) or projection name.
    pub name: String,
    /// Last dispatched global position (0 = nothing yet).
    pub position: Position,
    /// Whether the owner is replaying from scratch.
    pub is_rebuilding: bool,
    /// Time of the last write.
    pub updated_at: DateTime<Utc>,
}

impl CheckpointRecord {
    /// A record in normal (non-rebuilding) mode.
    #[must_use]
    pub fn new(name: impl Into<String>, position: Position, updated_at: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            position,
            is_rebuilding: false,
            updated_at,
        }
    }

    /// Set the rebuild flag.
    #[must_use]
    pub const fn rebuilding(mut self, is_rebuilding: bool) -> Self {
        self.is_rebuilding = is_rebuilding;
        self
    }

    /// Checkpoint key of a slot.
    #[must_use]
    pub fn slot_key(slot: &str) -> String {
        format!("slot:{slot}")
    }
}

/// Storage for checkpoint records.
///
/// # Dyn Compatibility
///
/// Uses `Pin<Box<dyn Future>>` returns so the engine can hold
/// `Arc<dyn CheckpointTracker>`.
pub trait CheckpointTracker: Send + Sync {
    /// Load one record.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Checkpoint`](crate::projection::ProjectionError::Checkpoint)
    /// if the backend fails.
    fn load<'a>(&'a self, name: &'a str) -> ProjectionFuture<'a, Option<CheckpointRecord>>;

    /// Insert or replace a record.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Checkpoint`](crate::projection::ProjectionError::Checkpoint)
    /// if the backend fails.
    fn save(&self, record: CheckpointRecord) -> ProjectionFuture<'_, ()>;

    /// All records, ordered by name.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Checkpoint`](crate::projection::ProjectionError::Checkpoint)
    /// if the backend fails.
    fn all(&self) -> ProjectionFuture<'_, Vec<CheckpointRecord>>;
}
