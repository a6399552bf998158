//! # Eventide Core
//!
//! Core traits and types for event-sourced aggregates and their projections.
//!
//! This crate holds no behaviour that touches I/O; it defines the vocabulary
//! shared by the repository (`eventide-runtime`), the projection engine
//! (`eventide-projections`) and the in-memory doubles (`eventide-testing`).
//!
//! ## Core Concepts
//!
//! - **Identity**: `"{Tag}_{Suffix}"` aggregate ids and their registry
//! - **Aggregate**: state folded from its own events, plus uncommitted events
//! - **Changeset**: the batch of events one save appends, with commit headers
//! - **Commit log**: append-only partitioned store with a global position
//! - **Snapshot**: memento of an aggregate state at a version
//! - **Projection**: read model fed chunk by chunk, tracked by checkpoints
//!
//! ## Write path
//!
//! ```text
//! command ──► load (snapshot + replay) ──► raise events ──► save (append changeset)
//!                                                               │
//!                                                               ▼
//!                          projections ◄── poll by position ◄── commit log
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};

pub mod aggregate;
pub mod changeset;
pub mod checkpoint;
pub mod commit_log;
pub mod context;
pub mod event;
pub mod grants;
pub mod identity;
pub mod projection;
pub mod snapshot;
pub mod stream;

/// Environment traits for dependency injection.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```ignore
    /// // Test - fixed time for deterministic tests
    /// struct FixedClock { time: DateTime<Utc> }
    /// impl Clock for FixedClock {
    ///     fn now(&self) -> DateTime<Utc> {
    ///         self.time
    ///     }
    /// }
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
