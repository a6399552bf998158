//! Metrics for observability and monitoring.
//!
//! This module records metrics for all Eventide components through the
//! `metrics` facade:
//! - Repository loads, saves, conflicts and snapshots
//! - Repository cache hits, misses and evictions
//! - Projection dispatch, faults and checkpoints
//! - Command retries
//!
//! The library never installs a recorder; the host application picks an
//! exporter (Prometheus, statsd, ...) and calls [`register_metrics`] once.
//!
//! # Example
//!
//! ```rust,ignore
//! let handle = PrometheusBuilder::new().install_recorder()?;
//! eventide_runtime::metrics::register_metrics();
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use std::time::Duration;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, gauge, histogram};

/// Register all metric descriptions.
pub fn register_metrics() {
    // Repository Metrics
    describe_counter!(
        "eventide_repository_loads_total",
        "Total number of aggregate loads"
    );
    describe_counter!(
        "eventide_events_replayed_total",
        "Total number of events replayed while loading aggregates"
    );
    describe_histogram!(
        "eventide_repository_load_duration_seconds",
        "Time taken to load an aggregate"
    );
    describe_counter!(
        "eventide_repository_saves_total",
        "Total number of changesets appended"
    );
    describe_histogram!(
        "eventide_repository_save_duration_seconds",
        "Time taken to append a changeset"
    );
    describe_counter!(
        "eventide_repository_conflicts_total",
        "Total number of optimistic concurrency conflicts"
    );
    describe_counter!(
        "eventide_repository_snapshots_total",
        "Total number of snapshots written"
    );

    // Cache Metrics
    describe_counter!(
        "eventide_cache_hits_total",
        "Total number of checkouts served from the repository cache"
    );
    describe_counter!(
        "eventide_cache_misses_total",
        "Total number of checkouts that loaded a fresh aggregate"
    );
    describe_counter!(
        "eventide_cache_evictions_total",
        "Total number of cache entries evicted"
    );
    describe_gauge!(
        "eventide_cache_entries",
        "Current number of cached aggregates"
    );

    // Projection Metrics
    describe_counter!(
        "eventide_projection_chunks_total",
        "Total number of chunks dispatched to projections"
    );
    describe_counter!(
        "eventide_projection_faults_total",
        "Total number of projections marked faulted"
    );
    describe_gauge!(
        "eventide_projection_checkpoint",
        "Last checkpointed global position per slot"
    );

    // Command Metrics
    describe_counter!(
        "eventide_command_retries_total",
        "Total number of command retries after a concurrency conflict"
    );
}

/// Repository metrics recorder.
pub struct RepositoryMetrics;

impl RepositoryMetrics {
    /// Record an aggregate load.
    pub fn record_load(aggregate_type: &'static str, replayed: u64, duration: Duration) {
        counter!("eventide_repository_loads_total", "aggregate" => aggregate_type).increment(1);
        counter!("eventide_events_replayed_total", "aggregate" => aggregate_type).increment(replayed);
        histogram!("eventide_repository_load_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a changeset append.
    pub fn record_save(aggregate_type: &'static str, duration: Duration) {
        counter!("eventide_repository_saves_total", "aggregate" => aggregate_type).increment(1);
        histogram!("eventide_repository_save_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a concurrency conflict.
    pub fn record_conflict(aggregate_type: &'static str) {
        counter!("eventide_repository_conflicts_total", "aggregate" => aggregate_type).increment(1);
    }

    /// Record a snapshot write.
    pub fn record_snapshot() {
        counter!("eventide_repository_snapshots_total").increment(1);
    }
}

/// Cache metrics recorder.
pub struct CacheMetrics;

impl CacheMetrics {
    /// Record a cache hit.
    pub fn record_hit() {
        counter!("eventide_cache_hits_total").increment(1);
    }

    /// Record a cache miss.
    pub fn record_miss() {
        counter!("eventide_cache_misses_total").increment(1);
    }

    /// Record evictions.
    pub fn record_evictions(count: u64) {
        counter!("eventide_cache_evictions_total").increment(count);
    }

    /// Record the current cache size.
    #[allow(clippy::cast_precision_loss)]
    pub fn record_size(entries: usize) {
        gauge!("eventide_cache_entries").set(entries as f64);
    }
}

/// Projection metrics recorder.
pub struct ProjectionMetrics;

impl ProjectionMetrics {
    /// Record one chunk handled by a projection.
    pub fn record_chunk(projection: &str, modified: bool) {
        counter!(
            "eventide_projection_chunks_total",
            "projection" => projection.to_string(),
            "modified" => if modified { "true" } else { "false" }
        )
        .increment(1);
    }

    /// Record a projection fault.
    pub fn record_fault(projection: &str) {
        counter!("eventide_projection_faults_total", "projection" => projection.to_string())
            .increment(1);
    }

    /// Record a slot checkpoint.
    #[allow(clippy::cast_precision_loss)]
    pub fn record_checkpoint(slot: &str, position: u64) {
        gauge!("eventide_projection_checkpoint", "slot" => slot.to_string()).set(position as f64);
    }
}

/// Command metrics recorder.
pub struct CommandMetrics;

impl CommandMetrics {
    /// Record a retry after a concurrency conflict.
    pub fn record_retry() {
        counter!("eventide_command_retries_total").increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusBuilder;

    #[test]
    fn repository_metrics_are_rendered() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            register_metrics();
            RepositoryMetrics::record_load("order", 3, Duration::from_millis(5));
            RepositoryMetrics::record_save("order", Duration::from_millis(2));
            RepositoryMetrics::record_conflict("order");
        });

        let rendered = handle.render();
        assert!(rendered.contains("eventide_repository_loads_total"));
        assert!(rendered.contains("eventide_events_replayed_total{aggregate=\"order\"} 3"));
        assert!(rendered.contains("eventide_repository_conflicts_total"));
    }

    #[test]
    fn projection_and_cache_metrics_are_rendered() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            CacheMetrics::record_hit();
            CacheMetrics::record_size(4);
            ProjectionMetrics::record_chunk("sum", true);
            ProjectionMetrics::record_checkpoint("sum", 42);
            CommandMetrics::record_retry();
        });

        let rendered = handle.render();
        assert!(rendered.contains("eventide_cache_hits_total"));
        assert!(rendered.contains("eventide_cache_entries 4"));
        assert!(rendered.contains("eventide_projection_checkpoint{slot=\"sum\"} 42"));
        assert!(rendered.contains("eventide_command_retries_total"));
    }
}
