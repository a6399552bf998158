//! Domain events and their stored representation.
//!
//! Events represent facts about things that have happened to one aggregate and
//! are immutable. Event bodies are serialized with `bincode`; everything an
//! event needs to know about *who* and *when* comes from the headers of the
//! changeset it was committed in, injected at read time into an
//! [`EventEnvelope`].
//!
//! # Example
//!
//! ```
//! use eventide_core::event::Event;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Clone, Debug, Serialize, Deserialize)]
//! enum OrderEvent {
//!     OrderPlaced { total: i64 },
//!     OrderShipped { tracking: String },
//! }
//!
//! impl Event for OrderEvent {
//!     fn event_type(&self) -> &'static str {
//!         match self {
//!             OrderEvent::OrderPlaced { .. } => "OrderPlaced.v1",
//!             OrderEvent::OrderShipped { .. } => "OrderShipped.v1",
//!         }
//!     }
//! }
//! ```

use crate::changeset::{Headers, header};
use crate::identity::Identity;
use crate::stream::Version;
use crate::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Error types for event operations.
#[derive(Error, Debug)]
pub enum EventError {
    /// Failed to serialize event to bytes.
    #[error("Failed to serialize event: {0}")]
    SerializationError(String),

    /// Failed to deserialize event from bytes.
    #[error("Failed to deserialize event: {0}")]
    DeserializationError(String),
}

/// An event that can be committed to the log and replayed to rebuild state.
///
/// The `event_type()` string should be stable and versioned
/// (`"OrderPlaced.v1"`), since it is stored next to the event body.
pub trait Event: Send + Sync + 'static {
    /// Returns the event type identifier for this event.
    fn event_type(&self) -> &'static str;

    /// Serialize this event to bincode bytes.
    ///
    /// # Errors
    ///
    /// Returns `EventError::SerializationError` if the event cannot be serialized.
    fn to_bytes(&self) -> Result<Vec<u8>, EventError>
    where
        Self: Serialize,
    {
        bincode::serialize(self).map_err(|e| EventError::SerializationError(e.to_string()))
    }

    /// Deserialize an event from bincode bytes.
    ///
    /// # Errors
    ///
    /// Returns `EventError::DeserializationError` if the bytes are corrupt or
    /// belong to an incompatible schema.
    fn from_bytes(bytes: &[u8]) -> Result<Self, EventError>
    where
        Self: DeserializeOwned + Sized,
    {
        bincode::deserialize(bytes).map_err(|e| EventError::DeserializationError(e.to_string()))
    }
}

/// A serialized event as it lives inside a stored changeset.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedEvent {
    /// The event type identifier (e.g., "OrderPlaced.v1").
    pub event_type: String,

    /// Unique id of this event message.
    pub message_id: Uuid,

    /// The bincode-serialized event data.
    pub data: Vec<u8>,
}

impl SerializedEvent {
    /// Create a serialized event from a typed event.
    ///
    /// # Errors
    ///
    /// Returns `EventError::SerializationError` if the event cannot be serialized.
    pub fn from_event<E: Event + Serialize>(event: &E, message_id: Uuid) -> Result<Self, EventError> {
        Ok(Self {
            event_type: event.event_type().to_string(),
            message_id,
            data: event.to_bytes()?,
        })
    }

    /// Decode the body back into a typed event.
    ///
    /// # Errors
    ///
    /// Returns `EventError::DeserializationError` if the body does not decode.
    pub fn decode<E: Event + DeserializeOwned>(&self) -> Result<E, EventError> {
        E::from_bytes(&self.data)
    }
}

impl fmt::Display for SerializedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SerializedEvent {{ type: {}, size: {} bytes }}",
            self.event_type,
            self.data.len()
        )
    }
}

/// A committed event together with its stream coordinates and context.
///
/// The `context` is a copy of the owning changeset's headers; it is never
/// stored on the event itself.
#[derive(Clone, Debug, PartialEq)]
pub struct EventEnvelope<E> {
    /// Unique id of this event message.
    pub message_id: Uuid,
    /// Aggregate the event belongs to.
    pub aggregate_id: Identity,
    /// 1-based version of this event within its aggregate stream.
    pub version: Version,
    /// The event body.
    pub event: E,
    /// Headers of the changeset the event was committed in.
    pub context: Headers,
}

impl<E> EventEnvelope<E> {
    /// The user who issued the command that produced this event.
    #[must_use]
    pub fn issued_by(&self) -> Option<&str> {
        self.context.get(header::ISSUED_BY).and_then(serde_json::Value::as_str)
    }

    /// Correlation id of the command that produced this event.
    #[must_use]
    pub fn correlation_id(&self) -> Option<&str> {
        self.context
            .get(header::CORRELATION_ID)
            .and_then(serde_json::Value::as_str)
    }

    /// When the changeset was committed.
    ///
    /// `override-timestamp` wins over `timestamp` when present, which lets
    /// imports keep their original dates.
    #[must_use]
    pub fn commit_timestamp(&self) -> Option<DateTime<Utc>> {
        [header::OVERRIDE_TIMESTAMP, header::TIMESTAMP]
            .iter()
            .filter_map(|key| self.context.get(*key).and_then(serde_json::Value::as_str))
            .find_map(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|ts| ts.with_timezone(&Utc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
    enum TestEvent {
        Created { id: String, value: i32 },
        Updated { id: String, new_value: i32 },
    }

    impl Event for TestEvent {
        fn event_type(&self) -> &'static str {
            match self {
                TestEvent::Created { .. } => "TestEvent.Created.v1",
                TestEvent::Updated { .. } => "TestEvent.Updated.v1",
            }
        }
    }

    fn envelope(context: Headers) -> Result<EventEnvelope<TestEvent>, crate::identity::IdentityError> {
        Ok(EventEnvelope {
            message_id: Uuid::nil(),
            aggregate_id: Identity::numeric("Test", 1)?,
            version: Version::new(1),
            event: TestEvent::Created { id: "t".into(), value: 1 },
            context,
        })
    }

    #[test]
    fn event_type_returns_correct_identifier() {
        let event = TestEvent::Updated { id: "test-1".to_string(), new_value: 42 };
        assert_eq!(event.event_type(), "TestEvent.Updated.v1");
    }

    #[test]
    #[allow(clippy::expect_used)]
    fn serialized_event_decodes_back() {
        let event = TestEvent::Created { id: "test-1".to_string(), value: 42 };
        let id = Uuid::new_v4();
        let serialized = SerializedEvent::from_event(&event, id).expect("serialize");

        assert_eq!(serialized.event_type, "TestEvent.Created.v1");
        assert_eq!(serialized.message_id, id);
        assert_eq!(serialized.decode::<TestEvent>().expect("decode"), event);
    }

    #[test]
    fn serialized_event_display() {
        let serialized = SerializedEvent {
            event_type: "TestEvent.v1".to_string(),
            message_id: Uuid::nil(),
            data: vec![1, 2, 3, 4, 5],
        };
        let display = format!("{serialized}");
        assert!(display.contains("TestEvent.v1"));
        assert!(display.contains("5 bytes"));
    }

    #[test]
    #[allow(clippy::expect_used)]
    fn envelope_reads_context_headers() {
        let mut context = Headers::new();
        context.insert(header::ISSUED_BY.into(), "user_1".into());
        context.insert(header::CORRELATION_ID.into(), "cmd-9".into());
        context.insert(header::TIMESTAMP.into(), "2025-01-01T00:00:00Z".into());

        let env = envelope(context).expect("identity");
        assert_eq!(env.issued_by(), Some("user_1"));
        assert_eq!(env.correlation_id(), Some("cmd-9"));
        assert_eq!(
            env.commit_timestamp().map(|t| t.to_rfc3339()),
            Some("2025-01-01T00:00:00+00:00".to_string())
        );
    }

    #[test]
    #[allow(clippy::expect_used)]
    fn override_timestamp_wins() {
        let mut context = Headers::new();
        context.insert(header::TIMESTAMP.into(), "2025-01-01T00:00:00Z".into());
        context.insert(header::OVERRIDE_TIMESTAMP.into(), "2020-06-01T12:00:00Z".into());

        let env = envelope(context).expect("identity");
        assert_eq!(
            env.commit_timestamp().map(|t| t.to_rfc3339()),
            Some("2020-06-01T12:00:00+00:00".to_string())
        );
    }

    #[test]
    #[allow(clippy::expect_used)]
    fn missing_context_yields_none() {
        let env = envelope(Headers::new()).expect("identity");
        assert_eq!(env.issued_by(), None);
        assert_eq!(env.commit_timestamp(), None);
    }
}
