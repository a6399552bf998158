//! Per-aggregate repository cache with a single-writer guarantee.
//!
//! [`CachedRepositoryFactory`] hands out [`RepositoryLease`]s. A lease owns the
//! loaded aggregate exclusively until it is released:
//!
//! - **Hit**: the entry is free, so it is marked in use and the cached
//!   aggregate is reused without touching the commit log.
//! - **Miss**: the aggregate is loaded fresh and cached on successful release.
//! - **Collision**: the entry is already in use. Two writers on one aggregate
//!   break the cache contract, so the entry is evicted and the second caller
//!   gets [`RepositoryError::Concurrency`].
//!
//! Entries expire after a sliding period of inactivity. Expiry never evicts an
//! entry that is in use; [`CachedRepositoryFactory::evict_expired`] skips it
//! and it becomes eligible again once released.

use crate::metrics::CacheMetrics;
use crate::repository::{AggregateRepository, RepositoryError};
use eventide_core::aggregate::{Aggregate, AggregateState};
use eventide_core::context::CommandContext;
use eventide_core::identity::Identity;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::env;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// When false every checkout loads fresh and nothing is kept.
    pub enabled: bool,
    /// Inactivity after which a free entry expires.
    pub sliding_expiration: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sliding_expiration: Duration::from_secs(600),
        }
    }
}

impl CacheConfig {
    /// Cache switched off.
    #[must_use]
    pub fn disabled() -> Self {
        Self::default().with_enabled(false)
    }

    /// Enable or disable caching.
    #[must_use]
    pub const fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the sliding expiration.
    #[must_use]
    pub const fn with_sliding_expiration(mut self, expiration: Duration) -> Self {
        self.sliding_expiration = expiration;
        self
    }

    /// Load from `EVENTIDE_CACHE_ENABLED` (default true) and
    /// `EVENTIDE_CACHE_EXPIRATION_SECS` (default 600).
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            enabled: env::var("EVENTIDE_CACHE_ENABLED")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.enabled),
            sliding_expiration: env::var("EVENTIDE_CACHE_EXPIRATION_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map_or(defaults.sliding_expiration, Duration::from_secs),
        }
    }
}

/// How a leased command ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseOutcome {
    /// The command finished; the aggregate may be reused.
    Success,
    /// The command failed or timed out; the aggregate must be reloaded.
    Failure,
}

/// Cache statistics
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Checkouts served from the cache.
    pub hits: u64,
    /// Checkouts that loaded the aggregate.
    pub misses: u64,
    /// Entries removed for any reason.
    pub evictions: u64,
    /// Current number of entries.
    pub size: usize,
}

struct CachedAggregate {
    aggregate: Option<Box<dyn Any + Send>>,
    in_use: bool,
    generation: u64,
    last_accessed: Instant,
}

impl CachedAggregate {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.last_accessed.elapsed() >= ttl
    }

    fn touch(&mut self) {
        self.last_accessed = Instant::now();
    }
}

/// Exclusive ownership of one aggregate between checkout and release.
#[derive(Debug)]
pub struct RepositoryLease<S: AggregateState> {
    aggregate: Aggregate<S>,
    generation: Option<u64>,
    from_cache: bool,
}

impl<S: AggregateState> RepositoryLease<S> {
    /// Whether the aggregate came from the cache rather than the commit log.
    #[must_use]
    pub const fn from_cache(&self) -> bool {
        self.from_cache
    }

    /// Give up the lease without returning the aggregate to the cache.
    #[must_use]
    pub fn into_inner(self) -> Aggregate<S> {
        self.aggregate
    }
}

impl<S: AggregateState> Deref for RepositoryLease<S> {
    type Target = Aggregate<S>;

    fn deref(&self) -> &Self::Target {
        &self.aggregate
    }
}

impl<S: AggregateState> DerefMut for RepositoryLease<S> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.aggregate
    }
}

/// Process-wide cache of loaded aggregates keyed by id string.
pub struct CachedRepositoryFactory {
    repository: AggregateRepository,
    config: CacheConfig,
    entries: Mutex<HashMap<String, CachedAggregate>>,
    next_generation: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl CachedRepositoryFactory {
    /// Create a factory over a repository.
    #[must_use]
    pub fn new(repository: AggregateRepository, config: CacheConfig) -> Self {
        Self {
            repository,
            config,
            entries: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// The repository used for loads.
    #[must_use]
    pub const fn repository(&self) -> &AggregateRepository {
        &self.repository
    }

    /// Cache configuration.
    #[must_use]
    pub const fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Check out an aggregate for exclusive use.
    ///
    /// # Errors
    ///
    /// - [`RepositoryError::Concurrency`] if the aggregate is already checked out
    /// - any load error from [`AggregateRepository::load_or_create`]
    pub async fn checkout<S: AggregateState>(
        &self,
        ctx: &CommandContext,
        id: &Identity,
    ) -> Result<RepositoryLease<S>, RepositoryError> {
        if !self.config.enabled {
            let aggregate = self.repository.load_or_create::<S>(ctx, id).await?;
            return Ok(RepositoryLease {
                aggregate,
                generation: None,
                from_cache: false,
            });
        }

        let key = id.to_string();
        let generation = match self.claim::<S>(&key)? {
            Claim::Hit(aggregate, generation) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                CacheMetrics::record_hit();
                tracing::debug!(stream_id = %key, version = %aggregate.version(), "Repository cache hit");
                return Ok(RepositoryLease {
                    aggregate: *aggregate,
                    generation: Some(generation),
                    from_cache: true,
                });
            }
            Claim::Miss(generation) => generation,
        };

        self.misses.fetch_add(1, Ordering::Relaxed);
        CacheMetrics::record_miss();
        match self.repository.load_or_create::<S>(ctx, id).await {
            Ok(aggregate) => Ok(RepositoryLease {
                aggregate,
                generation: Some(generation),
                from_cache: false,
            }),
            Err(error) => {
                self.remove_generation(&key, generation);
                Err(error)
            }
        }
    }

    /// Return a lease.
    ///
    /// On success the aggregate stays cached for the next checkout. On failure,
    /// or if the aggregate still holds uncommitted events, the entry is evicted
    /// so the next checkout reloads from the commit log.
    pub fn release<S: AggregateState>(&self, lease: RepositoryLease<S>, outcome: LeaseOutcome) {
        let Some(generation) = lease.generation else {
            return;
        };
        let key = lease.aggregate.id().to_string();
        let reusable = outcome == LeaseOutcome::Success && lease.aggregate.uncommitted().is_empty();

        let mut entries = self.lock();
        let Some(entry) = entries.get_mut(&key).filter(|e| e.generation == generation) else {
            // Evicted while checked out; the aggregate is dropped.
            return;
        };

        if reusable {
            entry.aggregate = Some(Box::new(lease.aggregate));
            entry.in_use = false;
            entry.touch();
        } else {
            entries.remove(&key);
            drop(entries);
            self.record_evictions(1);
            tracing::debug!(stream_id = %key, ?outcome, "Evicted aggregate after release");
        }
    }

    /// Drop every free entry whose sliding expiration has passed.
    ///
    /// Entries currently checked out are skipped. Returns the number removed.
    pub fn evict_expired(&self) -> usize {
        let ttl = self.config.sliding_expiration;
        let mut entries = self.lock();
        let removed = sweep_expired(&mut entries, ttl);
        let size = entries.len();
        drop(entries);

        if removed > 0 {
            self.record_evictions(removed as u64);
            tracing::debug!(removed, remaining = size, "Evicted expired aggregates");
        }
        CacheMetrics::record_size(size);
        removed
    }

    /// Drop a free entry, e.g. after an out-of-band write to its stream.
    ///
    /// Returns whether an entry was removed.
    pub fn invalidate(&self, id: &Identity) -> bool {
        let key = id.to_string();
        let mut entries = self.lock();
        if entries.get(&key).is_some_and(|e| !e.in_use) {
            entries.remove(&key);
            drop(entries);
            self.record_evictions(1);
            return true;
        }
        false
    }

    /// Whether an aggregate is currently checked out.
    #[must_use]
    pub fn is_checked_out(&self, id: &Identity) -> bool {
        self.lock()
            .get(&id.to_string())
            .is_some_and(|entry| entry.in_use)
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            size: self.lock().len(),
        }
    }

    /// Check-and-set under the mutex: claim an existing free entry or reserve a new one.
    fn claim<S: AggregateState>(&self, key: &str) -> Result<Claim<S>, RepositoryError> {
        let ttl = self.config.sliding_expiration;
        let mut entries = self.lock();

        if let Some(entry) = entries.get_mut(key) {
            if entry.in_use {
                entries.remove(key);
                drop(entries);
                self.record_evictions(1);
                tracing::warn!(stream_id = %key, "Aggregate checked out twice, evicting cache entry");
                return Err(RepositoryError::Concurrency {
                    aggregate_id: key.to_string(),
                    reason: "aggregate is already checked out".to_string(),
                });
            }

            let cached = if entry.is_expired(ttl) {
                None
            } else {
                entry
                    .aggregate
                    .take()
                    .and_then(|boxed| boxed.downcast::<Aggregate<S>>().ok())
            };
            if let Some(aggregate) = cached {
                entry.in_use = true;
                entry.touch();
                return Ok(Claim::Hit(aggregate, entry.generation));
            }
            // Expired or cached under another state type: reload.
            entries.remove(key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            CacheMetrics::record_evictions(1);
        }

        // Misses also sweep idle entries past their expiration.
        let swept = sweep_expired(&mut entries, ttl);
        if swept > 0 {
            self.record_evictions(swept as u64);
            tracing::trace!(swept, "Swept expired aggregates");
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        entries.insert(
            key.to_string(),
            CachedAggregate {
                aggregate: None,
                in_use: true,
                generation,
                last_accessed: Instant::now(),
            },
        );
        CacheMetrics::record_size(entries.len());
        Ok(Claim::Miss(generation))
    }

    fn remove_generation(&self, key: &str, generation: u64) {
        let mut entries = self.lock();
        if entries.get(key).is_some_and(|e| e.generation == generation) {
            entries.remove(key);
        }
    }

    fn record_evictions(&self, count: u64) {
        self.evictions.fetch_add(count, Ordering::Relaxed);
        CacheMetrics::record_evictions(count);
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CachedAggregate>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Remove free entries past `ttl`, returning how many went.
fn sweep_expired(entries: &mut HashMap<String, CachedAggregate>, ttl: Duration) -> usize {
    let before = entries.len();
    entries.retain(|_, entry| entry.in_use || !entry.is_expired(ttl));
    before - entries.len()
}

enum Claim<S: AggregateState> {
    Hit(Box<Aggregate<S>>, u64),
    Miss(u64),
}
