//! In-memory projection testing utilities
//!
//! Provides fast, deterministic checkpoint tracking for engine tests:
//! - [`InMemoryCheckpointTracker`]: `BTreeMap`-based checkpoint records with a
//!   write log, so tests can assert how progress moved over time

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Test utilities document panics where critical

use eventide_core::checkpoint::{CheckpointRecord, CheckpointTracker};
use eventide_core::projection::{ProjectionError, ProjectionFuture};
use eventide_core::stream::Position;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

/// In-memory checkpoint tracking for testing projection resumption.
///
/// # Example
///
/// ```
/// use eventide_testing::InMemoryCheckpointTracker;
/// use eventide_core::checkpoint::{CheckpointRecord, CheckpointTracker};
/// use eventide_core::stream::Position;
/// use chrono::Utc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let tracker = InMemoryCheckpointTracker::new();
///
/// tracker.save(CheckpointRecord::new("sum", Position::new(3), Utc::now())).await?;
///
/// let loaded = tracker.load("sum").await?;
/// assert_eq!(loaded.map(|r| r.position), Some(Position::new(3)));
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryCheckpointTracker {
    records: Arc<RwLock<BTreeMap<String, CheckpointRecord>>>,
    writes: Arc<RwLock<Vec<CheckpointRecord>>>,
    failing: Arc<AtomicBool>,
}

impl InMemoryCheckpointTracker {
    /// Create a new empty checkpoint tracker
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record without going through the write log.
    pub fn insert(&self, record: CheckpointRecord) {
        self.records
            .write()
            .unwrap()
            .insert(record.name.clone(), record);
    }

    /// Current position of a record.
    #[must_use]
    pub fn position(&self, name: &str) -> Option<Position> {
        self.records.read().unwrap().get(name).map(|r| r.position)
    }

    /// Current record by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<CheckpointRecord> {
        self.records.read().unwrap().get(name).cloned()
    }

    /// Every `save` call in order.
    #[must_use]
    pub fn writes(&self) -> Vec<CheckpointRecord> {
        self.writes.read().unwrap().clone()
    }

    /// Positions written for one record, in write order.
    #[must_use]
    pub fn history(&self, name: &str) -> Vec<Position> {
        self.writes
            .read()
            .unwrap()
            .iter()
            .filter(|r| r.name == name)
            .map(|r| r.position)
            .collect()
    }

    /// Make every call fail until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Get the number of tracked records
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().unwrap().len()
    }

    /// Check if no records are tracked
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().unwrap().is_empty()
    }

    fn check(&self) -> Result<(), ProjectionError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ProjectionError::Checkpoint("checkpoint store switched off".into()));
        }
        Ok(())
    }
}

impl CheckpointTracker for InMemoryCheckpointTracker {
    fn load<'a>(&'a self, name: &'a str) -> ProjectionFuture<'a, Option<CheckpointRecord>> {
        Box::pin(async move {
            self.check()?;
            Ok(self.get(name))
        })
    }

    fn save(&self, record: CheckpointRecord) -> ProjectionFuture<'_, ()> {
        Box::pin(async move {
            self.check()?;
            self.writes.write().unwrap().push(record.clone());
            self.insert(record);
            Ok(())
        })
    }

    fn all(&self) -> ProjectionFuture<'_, Vec<CheckpointRecord>> {
        Box::pin(async move {
            self.check()?;
            Ok(self.records.read().unwrap().values().cloned().collect())
        })
    }
}
