//! Read side for Eventide.
//!
//! # Overview
//!
//! This crate turns the commit log into read models:
//! - **[`PollingSubscription`]**: cursor reading chunks forward in global
//!   position order, never skipping a chunk its processor rejected
//! - **[`ProjectionEngine`]**: groups projections into slots, dispatches every
//!   chunk to the projections that accept it, tracks checkpoints, isolates
//!   faulted projections and rebuilds them on demand
//! - **[`PostgresCheckpointTracker`]**: durable checkpoint storage
//!
//! # Building Projections
//!
//! Implement [`Projection`](eventide_core::projection::Projection) and register
//! it with the engine:
//!
//! ```ignore
//! use eventide_projections::{EngineConfig, ProjectionEngine};
//!
//! let (engine, shutdown) = ProjectionEngine::builder(commit_log, checkpoints)
//!     .projection(OrderTotals::default())
//!     .config(EngineConfig::from_env())
//!     .build()?;
//!
//! // Tests and tools can drive it synchronously
//! engine.catch_up().await?;
//!
//! // Services run it until shutdown
//! Arc::new(engine).run().await?;
//! ```

pub mod engine;
pub mod postgres;
pub mod subscription;

pub use engine::{EngineBuilder, EngineConfig, Fault, ProjectionEngine, ProjectionStatus};
pub use postgres::PostgresCheckpointTracker;
pub use subscription::{
    ChunkProcessor, PollOutcome, PollingSubscription, SubscriptionError, SubscriptionState,
};
