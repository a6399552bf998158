//! # Eventide Runtime
//!
//! Write-side behaviour for event-sourced aggregates.
//!
//! ## Core Components
//!
//! - **`AggregateRepository`**: load by replay (optionally from a snapshot),
//!   save with optimistic concurrency
//! - **`CachedRepositoryFactory`**: at most one in-flight instance per
//!   aggregate id, reused across commands
//! - **`CommandExecutor`**: checkout → handle → save → release, retried on
//!   concurrency conflicts
//! - **`EventUnfolder`**: point-in-time state of one stream
//!
//! ## Example
//!
//! ```ignore
//! use eventide_runtime::{AggregateRepository, CachedRepositoryFactory, CommandExecutor};
//!
//! let repository = AggregateRepository::new(commit_log, Arc::new(SystemClock));
//! let factory = Arc::new(CachedRepositoryFactory::new(repository, CacheConfig::default()));
//! let executor = CommandExecutor::new(factory);
//!
//! executor
//!     .execute::<OrderState, _>(&ctx, &order_id, "cmd-42", |order| {
//!         order.raise(OrderEvent::AmountAdded { amount: 10 });
//!         Ok(())
//!     })
//!     .await?;
//! ```

/// Per-aggregate repository cache
pub mod cache;

/// Command execution with concurrency retry
pub mod executor;

/// Metrics for observability
pub mod metrics;

/// Aggregate repository
pub mod repository;

/// Retry logic with exponential backoff
pub mod retry;

/// Point-in-time stream folding
pub mod unfolder;

pub use cache::{CacheConfig, CacheStats, CachedRepositoryFactory, LeaseOutcome, RepositoryLease};
pub use executor::{CommandError, CommandExecutor};
pub use repository::{AggregateRepository, RepositoryConfig, RepositoryError};
pub use unfolder::{EventUnfolder, Unfolded};

/// Health check status levels
///
/// Indicates the current health state of a component or system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HealthStatus {
    /// Component is fully operational
    Healthy,

    /// Component is operational but lagging or rebuilding
    Degraded,

    /// Component is not operational
    Unhealthy,
}

impl HealthStatus {
    /// Check if status is healthy
    #[must_use]
    pub const fn is_healthy(self) -> bool {
        matches!(self, Self::Healthy)
    }

    /// Check if status is degraded
    #[must_use]
    pub const fn is_degraded(self) -> bool {
        matches!(self, Self::Degraded)
    }

    /// Check if status is unhealthy
    #[must_use]
    pub const fn is_unhealthy(self) -> bool {
        matches!(self, Self::Unhealthy)
    }

    /// Get the worst status between two statuses
    #[must_use]
    pub const fn worst(self, other: Self) -> Self {
        match (self, other) {
            (Self::Unhealthy, _) | (_, Self::Unhealthy) => Self::Unhealthy,
            (Self::Degraded, _) | (_, Self::Degraded) => Self::Degraded,
            _ => Self::Healthy,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Health check result for a component
#[derive(Debug, Clone)]
pub struct HealthCheck {
    /// Name of the component being checked
    pub component: String,

    /// Current health status
    pub status: HealthStatus,

    /// Optional message providing details
    pub message: Option<String>,

    /// Optional metadata (e.g., checkpoint, failing position)
    pub metadata: Vec<(String, String)>,
}

impl HealthCheck {
    /// Create a healthy check result
    #[must_use]
    pub fn healthy(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Healthy,
            message: None,
            metadata: Vec::new(),
        }
    }

    /// Create a degraded check result
    #[must_use]
    pub fn degraded(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Degraded,
            message: Some(message.into()),
            metadata: Vec::new(),
        }
    }

    /// Create an unhealthy check result
    #[must_use]
    pub fn unhealthy(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Unhealthy,
            message: Some(message.into()),
            metadata: Vec::new(),
        }
    }

    /// Add metadata to the health check
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.push((key.into(), value.into()));
        self
    }
}

/// Aggregated health report
///
/// Combines multiple health checks into an overall system status.
#[derive(Debug, Clone)]
pub struct HealthReport {
    /// Overall system status (worst of all checks)
    pub status: HealthStatus,

    /// Individual component checks
    pub checks: Vec<HealthCheck>,

    /// Timestamp when report was generated
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl HealthReport {
    /// Create a new health report from checks
    #[must_use]
    pub fn new(checks: Vec<HealthCheck>, timestamp: chrono::DateTime<chrono::Utc>) -> Self {
        let status = checks
            .iter()
            .map(|c| c.status)
            .fold(HealthStatus::Healthy, HealthStatus::worst);

        Self {
            status,
            checks,
            timestamp,
        }
    }

    /// Check if overall system is healthy
    #[must_use]
    pub const fn is_healthy(&self) -> bool {
        self.status.is_healthy()
    }

    /// Check if overall system is unhealthy
    #[must_use]
    pub const fn is_unhealthy(&self) -> bool {
        self.status.is_unhealthy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worst_status_wins() {
        assert_eq!(HealthStatus::Healthy.worst(HealthStatus::Degraded), HealthStatus::Degraded);
        assert_eq!(HealthStatus::Degraded.worst(HealthStatus::Unhealthy), HealthStatus::Unhealthy);
        assert_eq!(HealthStatus::Healthy.worst(HealthStatus::Healthy), HealthStatus::Healthy);
    }

    #[test]
    fn report_takes_worst_check() {
        let report = HealthReport::new(
            vec![
                HealthCheck::healthy("sum"),
                HealthCheck::degraded("totals", "rebuilding").with_metadata("checkpoint", "4"),
            ],
            chrono::Utc::now(),
        );
        assert_eq!(report.status, HealthStatus::Degraded);
        assert!(!report.is_healthy());
        assert!(!report.is_unhealthy());
    }
}
