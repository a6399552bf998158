//! Snapshots (mementos) and the policy that decides when to take them.
//!
//! A [`Memento`] freezes an aggregate state at a stream version so later loads
//! only replay what came after it. Snapshots are an optimisation: a missing,
//! undecodable or stale one is a cache miss, never an error.
//!
//! Staleness is detected through the state type's
//! [`AggregateState::SIGNATURE`]: a memento written by an older build carries
//! another signature and is ignored.

use crate::aggregate::AggregateState;
use crate::stream::Version;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Snapshot storage errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SnapshotError {
    /// Backend failure.
    #[error("Snapshot storage error: {0}")]
    Storage(String),

    /// State could not be serialized.
    #[error("Snapshot serialization error: {0}")]
    Serialization(String),
}

/// Serialized aggregate state at a given version.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Memento {
    /// Aggregate id string.
    pub stream_id: String,
    /// Stream version folded into `state`.
    pub version: Version,
    /// `bincode` bytes of the state.
    pub state: Vec<u8>,
    /// Schema fingerprint of the state type that wrote it.
    pub signature: String,
}

impl Memento {
    /// Capture a state.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Serialization`] if the state cannot be encoded.
    pub fn capture<S: AggregateState>(
        stream_id: impl Into<String>,
        version: Version,
        state: &S,
    ) -> Result<Self, SnapshotError> {
        let state =
            bincode::serialize(state).map_err(|e| SnapshotError::Serialization(e.to_string()))?;
        Ok(Self {
            stream_id: stream_id.into(),
            version,
            state,
            signature: S::SIGNATURE.to_string(),
        })
    }

    /// Whether this memento was written by the current `S`.
    #[must_use]
    pub fn matches<S: AggregateState>(&self) -> bool {
        self.signature == S::SIGNATURE
    }

    /// Decode the state if the signature matches.
    ///
    /// Returns `None` for stale or undecodable mementos.
    #[must_use]
    pub fn restore<S: AggregateState>(&self) -> Option<S> {
        if !self.matches::<S>() {
            return None;
        }
        bincode::deserialize(&self.state).ok()
    }
}

/// Boxed future returned by snapshot store methods.
pub type SnapshotFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, SnapshotError>> + Send + 'a>>;

/// Storage for the latest memento of each stream.
pub trait SnapshotStore: Send + Sync {
    /// Store a memento, replacing the previous one for the same stream.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Storage`] on backend failure.
    fn save(&self, memento: Memento) -> SnapshotFuture<'_, ()>;

    /// Latest memento for a stream, whatever its signature.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Storage`] on backend failure.
    fn load<'a>(&'a self, stream_id: &'a str) -> SnapshotFuture<'a, Option<Memento>>;

    /// Remove the memento of a stream.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Storage`] on backend failure.
    fn delete<'a>(&'a self, stream_id: &'a str) -> SnapshotFuture<'a, ()>;
}

/// Decides when a load or save should persist a new memento.
pub trait SnapshotPolicy: Send + Sync {
    /// Called with the number of events applied since the last memento.
    fn should_snapshot(&self, events_since_snapshot: u64) -> bool;
}

/// Never snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverSnapshot;

impl SnapshotPolicy for NeverSnapshot {
    fn should_snapshot(&self, _events_since_snapshot: u64) -> bool {
        false
    }
}

/// Snapshot once at least `n` events were applied since the last memento.
#[derive(Debug, Clone, Copy)]
pub struct EveryNEvents(pub u64);

impl SnapshotPolicy for EveryNEvents {
    fn should_snapshot(&self, events_since_snapshot: u64) -> bool {
        self.0 > 0 && events_since_snapshot >= self.0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::event::Event;

    #[derive(Clone, Debug, Serialize, Deserialize)]
    enum NoteEvent {
        Written(String),
    }

    impl Event for NoteEvent {
        fn event_type(&self) -> &'static str {
            "Written.v1"
        }
    }

    #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
    struct NoteV1 {
        lines: Vec<String>,
    }

    impl AggregateState for NoteV1 {
        const AGGREGATE_TYPE: &'static str = "note";
        const TAG: &'static str = "Note";
        const SIGNATURE: &'static str = "note.v1";
        type Event = NoteEvent;

        fn apply(&mut self, event: &NoteEvent) {
            let NoteEvent::Written(line) = event;
            self.lines.push(line.clone());
        }
    }

    #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
    struct NoteV2 {
        lines: Vec<String>,
    }

    impl AggregateState for NoteV2 {
        const AGGREGATE_TYPE: &'static str = "note";
        const TAG: &'static str = "Note";
        const SIGNATURE: &'static str = "note.v2";
        type Event = NoteEvent;

        fn apply(&mut self, event: &NoteEvent) {
            let NoteEvent::Written(line) = event;
            self.lines.insert(0, line.clone());
        }
    }

    #[test]
    fn capture_and_restore() {
        let state = NoteV1 { lines: vec!["a".into()] };
        let memento = Memento::capture("Note_1", Version::new(1), &state).unwrap();
        assert_eq!(memento.signature, "note.v1");
        assert_eq!(memento.restore::<NoteV1>(), Some(state));
    }

    #[test]
    fn signature_mismatch_restores_nothing() {
        let memento = Memento::capture("Note_1", Version::new(1), &NoteV1::default()).unwrap();
        assert!(!memento.matches::<NoteV2>());
        assert_eq!(memento.restore::<NoteV2>(), None);
    }

    #[test]
    fn corrupt_state_restores_nothing() {
        let mut memento =
            Memento::capture("Note_1", Version::new(1), &NoteV1 { lines: vec!["x".into()] }).unwrap();
        memento.state = vec![0xff; 3];
        assert_eq!(memento.restore::<NoteV1>(), None);
    }

    #[test]
    fn policies() {
        assert!(!NeverSnapshot.should_snapshot(1_000));
        assert!(!EveryNEvents(3).should_snapshot(2));
        assert!(EveryNEvents(3).should_snapshot(3));
        assert!(!EveryNEvents(0).should_snapshot(10));
    }
}
