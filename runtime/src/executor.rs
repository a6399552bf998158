//! Command execution with bounded retry on concurrency conflicts.
//!
//! One command = checkout the aggregate, run the handler (which raises events),
//! save, release. A conflict on save means another writer got there first, so
//! the whole cycle runs again on a fresh load, up to the configured number of
//! retries. Every other failure is final.

use crate::cache::{CachedRepositoryFactory, LeaseOutcome};
use crate::metrics::CommandMetrics;
use crate::repository::RepositoryError;
use crate::retry::{RetryPolicy, retry_with_predicate};
use eventide_core::aggregate::{Aggregate, AggregateState, DomainError};
use eventide_core::commit_log::Chunk;
use eventide_core::context::CommandContext;
use eventide_core::identity::Identity;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;

/// Errors returned by [`CommandExecutor::execute`].
#[derive(Error, Debug)]
pub enum CommandError {
    /// Optimistic concurrency conflict; the command may be retried.
    #[error("Concurrency conflict on {aggregate_id}: {reason}")]
    Concurrency {
        /// Aggregate id string.
        aggregate_id: String,
        /// What collided.
        reason: String,
    },

    /// Every attempt hit a concurrency conflict.
    #[error("Command gave up after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        /// Attempts made, including the first.
        attempts: usize,
        /// Message of the last conflict.
        last_error: String,
    },

    /// A business rule rejected the command.
    #[error("Domain error: {0}")]
    Domain(String),

    /// The caller is not allowed to run the command.
    #[error("Security error: {0}")]
    Security(String),

    /// Any other repository failure.
    #[error(transparent)]
    Repository(RepositoryError),
}

impl CommandError {
    /// Whether running the command again may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Concurrency { .. })
    }
}

impl From<RepositoryError> for CommandError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::Concurrency {
                aggregate_id,
                reason,
            } => Self::Concurrency {
                aggregate_id,
                reason,
            },
            other => Self::Repository(other),
        }
    }
}

impl From<DomainError> for CommandError {
    fn from(error: DomainError) -> Self {
        Self::Domain(error.0)
    }
}

/// Runs command handlers against cached aggregates.
#[derive(Clone)]
pub struct CommandExecutor {
    factory: Arc<CachedRepositoryFactory>,
    retry: RetryPolicy,
}

impl CommandExecutor {
    /// Executor with the default retry policy (3 retries).
    #[must_use]
    pub fn new(factory: Arc<CachedRepositoryFactory>) -> Self {
        Self {
            factory,
            retry: RetryPolicy::default(),
        }
    }

    /// Replace the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The repository factory.
    #[must_use]
    pub const fn factory(&self) -> &Arc<CachedRepositoryFactory> {
        &self.factory
    }

    /// Run `handler` against the aggregate `id` and save what it raised.
    ///
    /// `commit_id` is the idempotency key of the save and is reused across
    /// retries. Returns the appended chunk, or `None` if the handler raised
    /// nothing.
    ///
    /// # Errors
    ///
    /// - [`CommandError::RetriesExhausted`] if every attempt conflicted
    /// - [`CommandError::Domain`] / [`CommandError::Security`] from the handler
    /// - [`CommandError::Repository`] for load/save failures
    pub async fn execute<S, F>(
        &self,
        ctx: &CommandContext,
        id: &Identity,
        commit_id: &str,
        handler: F,
    ) -> Result<Option<Chunk>, CommandError>
    where
        S: AggregateState,
        F: Fn(&mut Aggregate<S>) -> Result<(), CommandError> + Send + Sync,
    {
        let attempts = AtomicUsize::new(0);
        let result = retry_with_predicate(
            self.retry.clone(),
            || {
                if attempts.fetch_add(1, Ordering::SeqCst) > 0 {
                    CommandMetrics::record_retry();
                }
                self.attempt(ctx, id, commit_id, &handler)
            },
            CommandError::is_retryable,
        )
        .await;

        match result {
            Err(CommandError::Concurrency { aggregate_id, reason }) => {
                let attempts = attempts.load(Ordering::SeqCst);
                tracing::error!(
                    stream_id = %aggregate_id,
                    correlation_id = %ctx.correlation_id,
                    attempts,
                    "Command retries exhausted"
                );
                Err(CommandError::RetriesExhausted {
                    attempts,
                    last_error: format!("Concurrency conflict on {aggregate_id}: {reason}"),
                })
            }
            Err(CommandError::Security(message)) => {
                tracing::warn!(
                    stream_id = %id,
                    correlation_id = %ctx.correlation_id,
                    user_id = ctx.user_id.as_deref().unwrap_or("anonymous"),
                    reason = %message,
                    "Command rejected for security reasons"
                );
                Err(CommandError::Security(message))
            }
            other => other,
        }
    }

    async fn attempt<S, F>(
        &self,
        ctx: &CommandContext,
        id: &Identity,
        commit_id: &str,
        handler: &F,
    ) -> Result<Option<Chunk>, CommandError>
    where
        S: AggregateState,
        F: Fn(&mut Aggregate<S>) -> Result<(), CommandError> + Send + Sync,
    {
        let mut lease = self.factory.checkout::<S>(ctx, id).await?;

        if let Err(error) = handler(&mut *lease) {
            self.factory.release(lease, LeaseOutcome::Failure);
            return Err(error);
        }

        match self
            .factory
            .repository()
            .save(ctx, &mut *lease, commit_id, |_| {})
            .await
        {
            Ok(chunk) => {
                self.factory.release(lease, LeaseOutcome::Success);
                Ok(chunk)
            }
            Err(error) => {
                self.factory.release(lease, LeaseOutcome::Failure);
                Err(error.into())
            }
        }
    }
}
