//! Changesets: one atomic batch of events plus headers, and their codec.
//!
//! A [`Changeset`] is what a single `save` appends to the commit log. It
//! records the aggregate version *before* the batch (the expected version), the
//! events in order, and a header map carrying commit metadata.
//!
//! # Storage format
//!
//! [`ChangesetCodec`] writes a `bincode` envelope:
//!
//! ```text
//! StoredChangeset {
//!     aggregate_version: u64,
//!     events: Vec<SerializedEvent>,   // event_type + message_id + bincode body
//!     headers: String,                // JSON object
//! }
//! ```
//!
//! Headers are kept as JSON text because header values are arbitrary JSON
//! (including `null`), which `bincode` cannot describe on its own.

use crate::event::{Event, EventEnvelope, EventError, SerializedEvent};
use crate::identity::Identity;
use crate::stream::Version;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

/// Header map attached to every changeset.
///
/// Keys may contain dots; values may be any JSON value including `null`.
pub type Headers = BTreeMap<String, serde_json::Value>;

/// Well-known header keys.
pub mod header {
    /// Commit time, RFC 3339.
    pub const TIMESTAMP: &str = "timestamp";
    /// Id of the user who issued the command.
    pub const ISSUED_BY: &str = "issued-by";
    /// Correlation id of the originating command.
    pub const CORRELATION_ID: &str = "correlation-id";
    /// Optional replacement for `timestamp` (imports, migrations).
    pub const OVERRIDE_TIMESTAMP: &str = "override-timestamp";
    /// Optional tenant the command ran for.
    pub const TENANT_ID: &str = "tenant-id";
}

/// Changeset construction errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChangesetError {
    /// A changeset must carry at least one event.
    #[error("Changeset must contain at least one event")]
    Empty,
}

/// Changeset encoding/decoding errors.
#[derive(Error, Debug)]
pub enum CodecError {
    /// The envelope could not be written or read.
    #[error("Changeset envelope error: {0}")]
    Envelope(String),

    /// The header map could not be written or read.
    #[error("Changeset headers error: {0}")]
    Headers(String),

    /// An event body failed to serialize or deserialize.
    #[error(transparent)]
    Event(#[from] EventError),

    /// The decoded changeset violates its invariants.
    #[error(transparent)]
    Invalid(#[from] ChangesetError),
}

/// One event inside a changeset together with its message id.
#[derive(Clone, Debug, PartialEq)]
pub struct ChangesetEvent<E> {
    /// Unique id of this event message.
    pub message_id: Uuid,
    /// The event body.
    pub event: E,
}

/// An ordered, non-empty batch of events for one aggregate stream.
#[derive(Clone, Debug, PartialEq)]
pub struct Changeset<E> {
    aggregate_version: Version,
    events: Vec<ChangesetEvent<E>>,
    headers: Headers,
}

impl<E> Changeset<E> {
    /// Create a changeset, assigning a fresh message id to every event.
    ///
    /// # Errors
    ///
    /// Returns [`ChangesetError::Empty`] if `events` is empty.
    pub fn new(
        aggregate_version: Version,
        events: Vec<E>,
        headers: Headers,
    ) -> Result<Self, ChangesetError> {
        let events = events
            .into_iter()
            .map(|event| ChangesetEvent {
                message_id: Uuid::new_v4(),
                event,
            })
            .collect();
        Self::from_parts(aggregate_version, events, headers)
    }

    /// Create a changeset from events that already carry message ids.
    ///
    /// # Errors
    ///
    /// Returns [`ChangesetError::Empty`] if `events` is empty.
    pub fn from_parts(
        aggregate_version: Version,
        events: Vec<ChangesetEvent<E>>,
        headers: Headers,
    ) -> Result<Self, ChangesetError> {
        if events.is_empty() {
            return Err(ChangesetError::Empty);
        }
        Ok(Self {
            aggregate_version,
            events,
            headers,
        })
    }

    /// Version of the stream before this batch.
    #[must_use]
    pub const fn aggregate_version(&self) -> Version {
        self.aggregate_version
    }

    /// Version of the stream after this batch.
    #[must_use]
    pub fn final_version(&self) -> Version {
        self.aggregate_version + self.events.len() as u64
    }

    /// Events in commit order.
    #[must_use]
    pub fn events(&self) -> &[ChangesetEvent<E>] {
        &self.events
    }

    /// Number of events in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether the changeset holds no events. [`Changeset::new`] rejects
    /// empty event lists, so this is false for any constructed changeset.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Commit headers.
    #[must_use]
    pub const fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Expand into envelopes, injecting the headers as each event's context.
    #[must_use]
    pub fn into_envelopes(self, aggregate_id: &Identity) -> Vec<EventEnvelope<E>> {
        let base = self.aggregate_version;
        let headers = self.headers;
        self.events
            .into_iter()
            .enumerate()
            .map(|(offset, item)| EventEnvelope {
                message_id: item.message_id,
                aggregate_id: aggregate_id.clone(),
                version: base + offset as u64 + 1,
                event: item.event,
                context: headers.clone(),
            })
            .collect()
    }
}

#[derive(Serialize, Deserialize)]
struct StoredChangeset {
    aggregate_version: u64,
    events: Vec<SerializedEvent>,
    headers: String,
}

/// Summary of a stored changeset, readable without knowing the event type.
#[derive(Clone, Debug, PartialEq)]
pub struct ChangesetHeader {
    /// Version of the stream before the batch.
    pub aggregate_version: Version,
    /// Event type names in order.
    pub event_types: Vec<String>,
    /// Commit headers.
    pub headers: Headers,
}

/// Serializes changesets to and from their storage bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChangesetCodec;

impl ChangesetCodec {
    /// Encode a changeset for the commit log.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] if any event body or the headers fail to serialize.
    pub fn encode<E: Event + Serialize>(changeset: &Changeset<E>) -> Result<Vec<u8>, CodecError> {
        let events = changeset
            .events
            .iter()
            .map(|item| SerializedEvent::from_event(&item.event, item.message_id))
            .collect::<Result<Vec<_>, _>>()?;
        let headers = serde_json::to_string(&changeset.headers)
            .map_err(|e| CodecError::Headers(e.to_string()))?;
        let stored = StoredChangeset {
            aggregate_version: changeset.aggregate_version.value(),
            events,
            headers,
        };
        bincode::serialize(&stored).map_err(|e| CodecError::Envelope(e.to_string()))
    }

    /// Decode storage bytes into a typed changeset.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] if the envelope, headers or any event body fail to
    /// decode, or if the stored changeset is empty.
    pub fn decode<E: Event + DeserializeOwned>(bytes: &[u8]) -> Result<Changeset<E>, CodecError> {
        let stored = Self::read_envelope(bytes)?;
        let headers = Self::read_headers(&stored.headers)?;
        let events = stored
            .events
            .iter()
            .map(|serialized| {
                Ok(ChangesetEvent {
                    message_id: serialized.message_id,
                    event: serialized.decode::<E>()?,
                })
            })
            .collect::<Result<Vec<_>, CodecError>>()?;
        Ok(Changeset::from_parts(
            Version::new(stored.aggregate_version),
            events,
            headers,
        )?)
    }

    /// Read version, event types and headers without decoding event bodies.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] if the envelope or headers fail to decode.
    pub fn peek(bytes: &[u8]) -> Result<ChangesetHeader, CodecError> {
        let stored = Self::read_envelope(bytes)?;
        Ok(ChangesetHeader {
            aggregate_version: Version::new(stored.aggregate_version),
            event_types: stored.events.into_iter().map(|e| e.event_type).collect(),
            headers: Self::read_headers(&stored.headers)?,
        })
    }

    fn read_envelope(bytes: &[u8]) -> Result<StoredChangeset, CodecError> {
        bincode::deserialize(bytes).map_err(|e| CodecError::Envelope(e.to_string()))
    }

    fn read_headers(raw: &str) -> Result<Headers, CodecError> {
        serde_json::from_str(raw).map_err(|e| CodecError::Headers(e.to_string()))
    }
}
