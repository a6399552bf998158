//! # Eventide Testing
//!
//! Testing utilities and helpers for Eventide.
//!
//! This crate provides:
//! - In-memory implementations of the storage contracts (commit log,
//!   snapshot store, checkpoint tracker)
//! - A fixed clock for deterministic commit timestamps
//! - Sample aggregates and proptest strategies
//! - `init_tracing` for readable test logs
//!
//! ## Example
//!
//! ```ignore
//! use eventide_testing::{InMemoryCommitLog, InMemorySnapshotStore, test_clock};
//!
//! #[tokio::test]
//! async fn saves_an_order() {
//!     let log = Arc::new(InMemoryCommitLog::new());
//!     let repo = AggregateRepository::new(log.clone(), Arc::new(test_clock()));
//!
//!     let mut order = repo.load_or_create::<OrderState>(&ctx, &id).await?;
//!     order.raise(added(10));
//!     repo.save(&ctx, &mut order, "cmd-1", |_| {}).await?;
//!
//!     assert_eq!(log.len(), 1);
//! }
//! ```

use chrono::{DateTime, Utc};
use eventide_core::environment::Clock;

mod commit_log_mocks;
pub mod fixtures;
mod projection_mocks;

pub use commit_log_mocks::{InMemoryCommitLog, InMemorySnapshotStore};
pub use projection_mocks::InMemoryCheckpointTracker;

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use eventide_testing::mocks::FixedClock;
    /// use eventide_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Test helpers and utilities.
pub mod helpers {
    use tracing_subscriber::EnvFilter;

    /// Install a fmt subscriber that writes through the test harness.
    ///
    /// Honours `RUST_LOG`; safe to call from every test.
    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use crate::fixtures::OrderEvent;
    use eventide_core::identity::Identity;
    use proptest::prelude::*;

    /// Any order event.
    pub fn order_event() -> impl Strategy<Value = OrderEvent> {
        prop_oneof![
            4 => (-1_000_i64..1_000).prop_map(|amount| OrderEvent::AmountAdded { amount }),
            1 => "[a-z]{1,8}".prop_map(|token| OrderEvent::Locked { token }),
            1 => Just(OrderEvent::Unlocked),
        ]
    }

    /// A history split into non-empty changesets.
    pub fn order_history() -> impl Strategy<Value = Vec<Vec<OrderEvent>>> {
        proptest::collection::vec(proptest::collection::vec(order_event(), 1..4), 1..8)
    }

    /// Identities with tag `Order` and a numeric suffix.
    pub fn order_identity() -> impl Strategy<Value = Identity> {
        (1_u64..10_000).prop_filter_map("valid identity", |n| Identity::numeric("Order", n).ok())
    }
}

// Re-export commonly used items
pub use helpers::init_tracing;
pub use mocks::{FixedClock, test_clock};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        let time1 = clock.now();
        let time2 = clock.now();
        assert_eq!(time1, time2);
    }
}
