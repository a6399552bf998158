//! Aggregate state and the in-memory aggregate root.
//!
//! An aggregate's state is a pure fold over its own events. Each state type
//! implements [`AggregateState::apply`] with an exhaustive `match` over its
//! event enum, so adding an event variant without handling it is a compile
//! error rather than a silently ignored message.
//!
//! [`Aggregate`] wraps a state with its identity, the version it was loaded
//! at, and the events raised since load (the uncommitted buffer).
//!
//! # Example
//!
//! ```
//! use eventide_core::aggregate::{Aggregate, AggregateState};
//! use eventide_core::event::Event;
//! use eventide_core::identity::Identity;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Clone, Debug, Serialize, Deserialize)]
//! enum CounterEvent { Added(i64) }
//!
//! impl Event for CounterEvent {
//!     fn event_type(&self) -> &'static str { "Added.v1" }
//! }
//!
//! #[derive(Clone, Debug, Default, Serialize, Deserialize)]
//! struct Counter { total: i64 }
//!
//! impl AggregateState for Counter {
//!     const AGGREGATE_TYPE: &'static str = "counter";
//!     const TAG: &'static str = "Counter";
//!     const SIGNATURE: &'static str = "counter.v1";
//!     type Event = CounterEvent;
//!
//!     fn apply(&mut self, event: &CounterEvent) {
//!         match event {
//!             CounterEvent::Added(n) => self.total += n,
//!         }
//!     }
//! }
//!
//! let mut counter = Aggregate::<Counter>::new(Identity::numeric("Counter", 1).unwrap());
//! counter.raise(CounterEvent::Added(5));
//! assert_eq!(counter.state().total, 5);
//! assert_eq!(counter.uncommitted().len(), 1);
//! ```

use crate::event::{Event, EventEnvelope};
use crate::identity::Identity;
use crate::stream::Version;
use serde::{Serialize, de::DeserializeOwned};
use std::fmt;
use thiserror::Error;

/// A business rule rejected a command.
///
/// Not retryable: retrying the same command against the same state fails the
/// same way.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct DomainError(pub String);

impl DomainError {
    /// Create a domain error from a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// In-memory fold of one aggregate's history.
pub trait AggregateState:
    Default + Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Aggregate type name (used in logs and the identity registry).
    const AGGREGATE_TYPE: &'static str;

    /// Identity tag owned by this aggregate type.
    const TAG: &'static str;

    /// Schema fingerprint of the serialized state.
    ///
    /// Bump it whenever the state layout or the meaning of `apply` changes;
    /// snapshots with another signature are ignored.
    const SIGNATURE: &'static str;

    /// Event enum of this aggregate.
    type Event: Event + Serialize + DeserializeOwned + Clone + fmt::Debug + Send + Sync;

    /// Apply one event. Must be deterministic.
    fn apply(&mut self, event: &Self::Event);
}

/// An aggregate instance: identity, state, version and uncommitted events.
#[derive(Clone, Debug)]
pub struct Aggregate<S: AggregateState> {
    id: Identity,
    state: S,
    version: Version,
    snapshot_version: Version,
    uncommitted: Vec<S::Event>,
}

impl<S: AggregateState> Aggregate<S> {
    /// A brand new aggregate at version 0.
    #[must_use]
    pub fn new(id: Identity) -> Self {
        Self::restore(id, S::default(), Version::INITIAL)
    }

    /// An aggregate seeded from a snapshot of `state` taken at `version`.
    #[must_use]
    pub const fn restore(id: Identity, state: S, version: Version) -> Self {
        Self {
            id,
            state,
            version,
            snapshot_version: version,
            uncommitted: Vec::new(),
        }
    }

    /// Identity of the aggregate.
    #[must_use]
    pub const fn id(&self) -> &Identity {
        &self.id
    }

    /// Current state, including uncommitted events.
    #[must_use]
    pub const fn state(&self) -> &S {
        &self.state
    }

    /// Version of the last committed event.
    #[must_use]
    pub const fn version(&self) -> Version {
        self.version
    }

    /// Whether nothing was ever committed for this aggregate.
    #[must_use]
    pub const fn is_new(&self) -> bool {
        self.version.is_initial()
    }

    /// Committed events applied since the state was last snapshotted.
    #[must_use]
    pub fn events_since_snapshot(&self) -> u64 {
        self.version.value().saturating_sub(self.snapshot_version.value())
    }

    /// Record that the current committed state was snapshotted.
    pub const fn mark_snapshot(&mut self) {
        self.snapshot_version = self.version;
    }

    /// Events raised since load.
    #[must_use]
    pub fn uncommitted(&self) -> &[S::Event] {
        &self.uncommitted
    }

    /// Raise a new event: apply it to the state and buffer it for save.
    pub fn raise(&mut self, event: S::Event) {
        self.state.apply(&event);
        self.uncommitted.push(event);
    }

    /// Replay a committed event during load.
    ///
    /// Events at or below the current version are skipped, which makes replay
    /// idempotent when a snapshot and the log overlap.
    pub fn replay(&mut self, envelope: &EventEnvelope<S::Event>) {
        if envelope.version <= self.version {
            return;
        }
        self.state.apply(&envelope.event);
        self.version = envelope.version;
    }

    /// Borrow the pending events and the version they will be appended after.
    #[must_use]
    pub fn pending(&self) -> (Version, &[S::Event]) {
        (self.version, &self.uncommitted)
    }

    /// Record a successful append of every pending event.
    ///
    /// Clears the uncommitted buffer and advances the version by the number
    /// of events that were pending.
    pub fn commit(&mut self) {
        let count = self.uncommitted.len() as u64;
        self.uncommitted.clear();
        self.version = self.version + count;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use uuid::Uuid;

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    enum CounterEvent {
        Added(i64),
        Reset,
    }

    impl Event for CounterEvent {
        fn event_type(&self) -> &'static str {
            match self {
                Self::Added(_) => "Added.v1",
                Self::Reset => "Reset.v1",
            }
        }
    }

    #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Counter {
        total: i64,
    }

    impl AggregateState for Counter {
        const AGGREGATE_TYPE: &'static str = "counter";
        const TAG: &'static str = "Counter";
        const SIGNATURE: &'static str = "counter.v1";
        type Event = CounterEvent;

        fn apply(&mut self, event: &CounterEvent) {
            match event {
                CounterEvent::Added(n) => self.total += n,
                CounterEvent::Reset => self.total = 0,
            }
        }
    }

    fn envelope(version: u64, event: CounterEvent) -> EventEnvelope<CounterEvent> {
        EventEnvelope {
            message_id: Uuid::new_v4(),
            aggregate_id: Identity::numeric("Counter", 1).unwrap(),
            version: Version::new(version),
            event,
            context: crate::changeset::Headers::new(),
        }
    }

    #[test]
    fn raise_applies_and_buffers() {
        let mut agg = Aggregate::<Counter>::new(Identity::numeric("Counter", 1).unwrap());
        agg.raise(CounterEvent::Added(2));
        agg.raise(CounterEvent::Added(3));

        assert_eq!(agg.state().total, 5);
        assert_eq!(agg.uncommitted().len(), 2);
        assert_eq!(agg.version(), Version::INITIAL);
        assert!(agg.is_new());
    }

    #[test]
    fn commit_clears_buffer_and_advances_version() {
        let mut agg = Aggregate::<Counter>::new(Identity::numeric("Counter", 1).unwrap());
        agg.raise(CounterEvent::Added(2));
        agg.raise(CounterEvent::Reset);
        agg.commit();

        assert!(agg.uncommitted().is_empty());
        assert_eq!(agg.version(), Version::new(2));
    }

    #[test]
    fn replay_skips_already_applied_versions() {
        let mut agg = Aggregate::restore(
            Identity::numeric("Counter", 1).unwrap(),
            Counter { total: 10 },
            Version::new(2),
        );
        agg.replay(&envelope(2, CounterEvent::Added(100)));
        agg.replay(&envelope(3, CounterEvent::Added(1)));

        assert_eq!(agg.state().total, 11);
        assert_eq!(agg.version(), Version::new(3));
        assert_eq!(agg.events_since_snapshot(), 1);
    }

    #[test]
    fn mark_snapshot_resets_the_counter() {
        let mut agg = Aggregate::<Counter>::new(Identity::numeric("Counter", 1).unwrap());
        agg.raise(CounterEvent::Added(1));
        agg.raise(CounterEvent::Added(1));
        agg.commit();
        assert_eq!(agg.events_since_snapshot(), 2);

        agg.mark_snapshot();
        assert_eq!(agg.events_since_snapshot(), 0);
    }

    #[test]
    fn domain_error_displays_message() {
        assert_eq!(DomainError::new("order already shipped").to_string(), "order already shipped");
    }
}
