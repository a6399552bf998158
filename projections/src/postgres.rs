//! `PostgreSQL` checkpoint storage.
//!
//! # Overview
//!
//! [`PostgresCheckpointTracker`] persists slot and projection checkpoints in
//! the `projection_checkpoints` table, so the engine resumes where it left off
//! after a restart.
//!
//! Checkpoints belong to the read side. Keep them in the database that holds
//! the read models, so a read-model write and its checkpoint can share a
//! transaction when a projection needs exactly-once effects:
//!
//! ```text
//! Write Side (Commit Log)           Read Side (Projections)
//! ┌─────────────────────┐          ┌─────────────────────────┐
//! │  commit log         │          │  projection_checkpoints │
//! │  snapshots          │   →→→    │  order_totals           │
//! │                     │  Chunks  │  customer_directory     │
//! └─────────────────────┘          └─────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use eventide_projections::PostgresCheckpointTracker;
//!
//! let tracker = PostgresCheckpointTracker::new_with_separate_db(
//!     "postgres://localhost/projections",
//! ).await?;
//! tracker.migrate().await?;
//!
//! let (engine, shutdown) = ProjectionEngine::builder(log, Arc::new(tracker))
//!     .projection(OrderTotals::default())
//!     .build()?;
//! ```

use eventide_core::checkpoint::{CheckpointRecord, CheckpointTracker};
use eventide_core::projection::{ProjectionError, ProjectionFuture, Result};
use eventide_core::stream::Position;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;

/// PostgreSQL-backed checkpoint tracker.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE projection_checkpoints (
///     name TEXT PRIMARY KEY,
///     position BIGINT NOT NULL,
///     is_rebuilding BOOLEAN NOT NULL DEFAULT FALSE,
///     updated_at TIMESTAMPTZ NOT NULL
/// );
/// ```
#[derive(Clone)]
pub struct PostgresCheckpointTracker {
    pool: PgPool,
}

#[derive(FromRow)]
struct CheckpointRow {
    name: String,
    position: i64,
    is_rebuilding: bool,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<CheckpointRow> for CheckpointRecord {
    fn from(row: CheckpointRow) -> Self {
        // Positions are written from u64 and never negative.
        #[allow(clippy::cast_sign_loss)]
        let position = Position::new(row.position as u64);
        Self::new(row.name, position, row.updated_at).rebuilding(row.is_rebuilding)
    }
}

impl PostgresCheckpointTracker {
    /// Create a tracker on an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a tracker with its own connection pool.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Checkpoint`] if the connection fails.
    pub async fn new_with_separate_db(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(|e| ProjectionError::Checkpoint(format!("Failed to connect: {e}")))?;

        Ok(Self::new(pool))
    }

    /// Create the `projection_checkpoints` table if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Checkpoint`] if the migration fails.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| ProjectionError::Checkpoint(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl CheckpointTracker for PostgresCheckpointTracker {
    fn load<'a>(&'a self, name: &'a str) -> ProjectionFuture<'a, Option<CheckpointRecord>> {
        Box::pin(async move {
            let row: Option<CheckpointRow> = sqlx::query_as(
                "SELECT name, position, is_rebuilding, updated_at
                 FROM projection_checkpoints
                 WHERE name = $1",
            )
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| ProjectionError::Checkpoint(format!("Failed to load checkpoint: {e}")))?;

            Ok(row.map(CheckpointRecord::from))
        })
    }

    fn save(&self, record: CheckpointRecord) -> ProjectionFuture<'_, ()> {
        Box::pin(async move {
            // BIGINT is signed; wrapping would need 2^63 commits.
            #[allow(clippy::cast_possible_wrap)]
            let position = record.position.value() as i64;

            sqlx::query(
                "INSERT INTO projection_checkpoints (name, position, is_rebuilding, updated_at)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (name) DO UPDATE
                 SET position = EXCLUDED.position,
                     is_rebuilding = EXCLUDED.is_rebuilding,
                     updated_at = EXCLUDED.updated_at",
            )
            .bind(&record.name)
            .bind(position)
            .bind(record.is_rebuilding)
            .bind(record.updated_at)
            .execute(&self.pool)
            .await
            .map_err(|e| ProjectionError::Checkpoint(format!("Failed to save checkpoint: {e}")))?;

            tracing::trace!(name = %record.name, position = %record.position, "Checkpoint saved");
            Ok(())
        })
    }

    fn all(&self) -> ProjectionFuture<'_, Vec<CheckpointRecord>> {
        Box::pin(async move {
            let rows: Vec<CheckpointRow> = sqlx::query_as(
                "SELECT name, position, is_rebuilding, updated_at
                 FROM projection_checkpoints
                 ORDER BY name",
            )
            .fetch_all(&self.pool)
            .await
            .map_err(|e| ProjectionError::Checkpoint(format!("Failed to list checkpoints: {e}")))?;

            Ok(rows.into_iter().map(CheckpointRecord::from).collect())
        })
    }
}
