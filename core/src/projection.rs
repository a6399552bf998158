//! Projection contract for read models built from the commit log.
//!
//! # Overview
//!
//! Projections are the **query side**: the projection engine reads chunks in
//! global position order and hands each one to every projection of a slot.
//!
//! Two levels of contract exist:
//!
//! - [`Projection`]: typed, the common case. The chunk is decoded into
//!   [`EventEnvelope`]s of the projection's event enum before `handle` runs.
//! - [`ChunkHandler`]: dyn-compatible, works on raw [`Chunk`]s. The engine only
//!   ever sees handlers; [`TypedProjection`] adapts a [`Projection`] into one.
//!
//! ## Filtering
//!
//! A projection only receives chunks whose partition tag is listed in
//! [`Projection::aggregate_tags`]; an empty list means every partition. A
//! typed projection must list its tags whenever the log carries other
//! aggregates, otherwise their chunks fail to decode and fault it.
//!
//! ## Example
//!
//! ```ignore
//! struct OrderTotals { totals: Mutex<HashMap<String, i64>> }
//!
//! impl Projection for OrderTotals {
//!     type Event = OrderEvent;
//!
//!     fn name(&self) -> &str { "order_totals" }
//!
//!     fn aggregate_tags(&self) -> &[String] { &self.tags }
//!
//!     async fn handle(&self, chunk: &ChunkView<OrderEvent>) -> Result<bool> {
//!         for envelope in &chunk.events {
//!             // update the read model
//!         }
//!         Ok(true)
//!     }
//! }
//! ```

use crate::changeset::{CodecError, Headers};
use crate::commit_log::Chunk;
use crate::event::{Event, EventEnvelope};
use crate::identity::Identity;
use crate::stream::{Position, Version};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::pin::Pin;

/// Error type for projection operations.
#[derive(Debug, thiserror::Error)]
pub enum ProjectionError {
    /// Storage backend error
    #[error("Storage error: {0}")]
    Storage(String),

    /// A chunk could not be decoded for this projection
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Checkpoint error
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Event processing error
    #[error("Event processing error: {0}")]
    EventProcessing(String),

    /// No projection is registered under this name
    #[error("Unknown projection: {0}")]
    UnknownProjection(String),

    /// Generic error
    #[error("Projection error: {0}")]
    Other(String),
}

impl From<CodecError> for ProjectionError {
    fn from(error: CodecError) -> Self {
        Self::Serialization(error.to_string())
    }
}

/// Result type for projection operations.
pub type Result<T> = std::result::Result<T, ProjectionError>;

/// Boxed future returned by dyn-compatible projection traits.
pub type ProjectionFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// A decoded chunk as seen by a typed projection.
#[derive(Clone, Debug, PartialEq)]
pub struct ChunkView<E> {
    /// Global position of the chunk.
    pub position: Position,
    /// Aggregate the chunk belongs to.
    pub aggregate_id: Identity,
    /// Stream version after the chunk.
    pub index: Version,
    /// Commit headers.
    pub headers: Headers,
    /// Events in stream order, with their context injected.
    pub events: Vec<EventEnvelope<E>>,
}

impl<E: Event + DeserializeOwned> ChunkView<E> {
    /// Decode a raw chunk.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Serialization`] if the partition id is not an
    /// identity or the payload does not decode as `E`.
    pub fn decode(chunk: &Chunk) -> Result<Self> {
        let aggregate_id: Identity = chunk
            .partition_id
            .parse()
            .map_err(|e: crate::identity::IdentityError| ProjectionError::Serialization(e.to_string()))?;
        let changeset = chunk.changeset::<E>()?;
        let headers = changeset.headers().clone();
        Ok(Self {
            position: chunk.position,
            index: chunk.index,
            headers,
            events: changeset.into_envelopes(&aggregate_id),
            aggregate_id,
        })
    }
}

/// A typed read model fed by the projection engine.
///
/// Handlers should be idempotent: delivery is at-least-once, and a restart
/// replays everything after the last saved checkpoint.
pub trait Projection: Send + Sync + 'static {
    /// Event enum this projection understands.
    type Event: Event + DeserializeOwned + Send + Sync;

    /// Unique projection name (used as its checkpoint key).
    fn name(&self) -> &str;

    /// Slot the projection runs in. Defaults to its own name.
    ///
    /// Projections sharing a slot share one cursor and are dispatched
    /// sequentially for each chunk.
    fn slot(&self) -> &str {
        self.name()
    }

    /// Identity tags this projection listens to; empty means all.
    fn aggregate_tags(&self) -> &[String] {
        &[]
    }

    /// Apply one chunk. Returns whether the read model changed.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError`] if the read model could not be updated.
    fn handle(&self, chunk: &ChunkView<Self::Event>) -> impl Future<Output = Result<bool>> + Send;

    /// Drop all read-model data before a rebuild. Default is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError`] if the data could not be dropped.
    fn drop_data(&self) -> impl Future<Output = Result<()>> + Send {
        async { Ok(()) }
    }
}

/// Dyn-compatible projection working on raw chunks.
///
/// # Dyn Compatibility
///
/// Uses `Pin<Box<dyn Future>>` returns so the engine can hold
/// `Arc<dyn ChunkHandler>` for projections of different event types.
pub trait ChunkHandler: Send + Sync {
    /// Unique projection name.
    fn name(&self) -> &str;

    /// Slot name.
    fn slot(&self) -> &str;

    /// Identity tags this handler listens to; empty means all.
    fn aggregate_tags(&self) -> &[String];

    /// Whether a chunk of `partition_id` should be dispatched here.
    fn accepts(&self, partition_id: &str) -> bool {
        let tags = self.aggregate_tags();
        tags.is_empty()
            || Identity::tag_of(partition_id).is_some_and(|tag| tags.iter().any(|t| t == tag))
    }

    /// Apply one raw chunk. Returns whether the read model changed.
    fn handle<'a>(&'a self, chunk: &'a Chunk) -> ProjectionFuture<'a, bool>;

    /// Drop all read-model data before a rebuild.
    fn drop_data(&self) -> ProjectionFuture<'_, ()>;
}

/// Adapts a typed [`Projection`] into a [`ChunkHandler`].
#[derive(Debug)]
pub struct TypedProjection<P>(P);

impl<P: Projection> TypedProjection<P> {
    /// Wrap a projection.
    #[must_use]
    pub const fn new(projection: P) -> Self {
        Self(projection)
    }

    /// Borrow the wrapped projection.
    #[must_use]
    pub const fn inner(&self) -> &P {
        &self.0
    }
}

impl<P: Projection> ChunkHandler for TypedProjection<P> {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn slot(&self) -> &str {
        self.0.slot()
    }

    fn aggregate_tags(&self) -> &[String] {
        self.0.aggregate_tags()
    }

    fn handle<'a>(&'a self, chunk: &'a Chunk) -> ProjectionFuture<'a, bool> {
        Box::pin(async move {
            let view = ChunkView::<P::Event>::decode(chunk)?;
            self.0.handle(&view).await
        })
    }

    fn drop_data(&self) -> ProjectionFuture<'_, ()> {
        Box::pin(self.0.drop_data())
    }
}
