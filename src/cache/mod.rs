//! Layered query cache.
//!
//! Two tiers sit in front of the tribunal fetch pipeline: a bounded
//! in-process tier ([`MemoryCache`]) handling request coalescing and
//! stale-while-revalidate, and a persistent tier (any [`CacheStore`]) for
//! cross-session reuse. The persistent tier is consulted only on memory
//! misses, and a persistent hit repopulates the memory tier. A query that
//! discovers new movements invalidates both tiers for its process before
//! the fresh result is written back.
//!
//! Expired entries are dropped by an explicit sweeper task owned by this
//! object and aborted on shutdown; no ambient timers outlive the cache.

mod memory;

pub use memory::{FlightGuard, Lookup, MemoryCache};

use crate::models::{QueryOptions, QueryResult};
use crate::storage::CacheStore;
use crate::{Clock, Result};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Default freshness window for coalescing identical requests.
pub const DEFAULT_FRESH_TTL: Duration = Duration::from_secs(5);

/// Default stale window for serve-while-revalidate.
pub const DEFAULT_STALE_TTL: Duration = Duration::from_secs(30 * 60);

/// Default persistent-tier TTL.
pub const DEFAULT_PERSISTENT_TTL_SECS: u64 = 24 * 3600;

/// Default memory-tier capacity.
const DEFAULT_CAPACITY: usize = 4096;

/// Serializable cache counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStatsSnapshot {
    /// Fresh memory-tier hits.
    pub hits: u64,
    /// Stale values served while a refresh ran.
    pub stale_served: u64,
    /// Lookups answered by joining an in-flight request.
    pub coalesced: u64,
    /// Memory-tier misses.
    pub misses: u64,
    /// Misses answered by the persistent tier.
    pub persistent_hits: u64,
    /// Entries currently held in the memory tier.
    pub memory_entries: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    stale_served: AtomicU64,
    coalesced: AtomicU64,
    misses: AtomicU64,
    persistent_hits: AtomicU64,
}

/// Two-tier cache for query results.
pub struct QueryCache {
    memory: MemoryCache<QueryResult>,
    persistent: Option<Arc<dyn CacheStore>>,
    clock: Arc<dyn Clock>,
    persistent_ttl_secs: u64,
    counters: Counters,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl QueryCache {
    /// Creates a cache with default windows over an optional persistent tier.
    #[must_use]
    pub fn new(persistent: Option<Arc<dyn CacheStore>>, clock: Arc<dyn Clock>) -> Self {
        Self::with_ttls(
            persistent,
            clock,
            DEFAULT_FRESH_TTL,
            DEFAULT_STALE_TTL,
            DEFAULT_PERSISTENT_TTL_SECS,
        )
    }

    /// Creates a cache with explicit windows.
    #[must_use]
    pub fn with_ttls(
        persistent: Option<Arc<dyn CacheStore>>,
        clock: Arc<dyn Clock>,
        fresh_ttl: Duration,
        stale_ttl: Duration,
        persistent_ttl_secs: u64,
    ) -> Self {
        Self {
            memory: MemoryCache::new(DEFAULT_CAPACITY, fresh_ttl, stale_ttl),
            persistent,
            clock,
            persistent_ttl_secs,
            counters: Counters::default(),
            sweeper: Mutex::new(None),
        }
    }

    /// Builds the cache key for a process query.
    ///
    /// The process digits are embedded so per-process invalidation can match
    /// on prefix regardless of the option bits.
    #[must_use]
    pub fn signature(process_number: &str, options: QueryOptions) -> String {
        format!(
            "movements:{process_number}:n{}p{}",
            u8::from(options.novelty_detection),
            u8::from(options.persist),
        )
    }

    /// Starts a memory-tier lookup, recording counters.
    pub fn begin(&self, key: &str) -> Lookup<QueryResult> {
        let lookup = self.memory.begin(key);
        match &lookup {
            Lookup::Fresh(_) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("cache_lookups_total", "outcome" => "fresh").increment(1);
            },
            Lookup::Stale(_) | Lookup::StaleRefresh(..) => {
                self.counters.stale_served.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("cache_lookups_total", "outcome" => "stale").increment(1);
            },
            Lookup::Pending(_) => {
                self.counters.coalesced.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("cache_lookups_total", "outcome" => "coalesced").increment(1);
            },
            Lookup::Miss(_) => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("cache_lookups_total", "outcome" => "miss").increment(1);
            },
        }
        lookup
    }

    /// Consults the persistent tier for a missed key.
    ///
    /// A hit repopulates the memory tier and is returned with `from_cache`
    /// set. Persistent-tier errors degrade to a miss.
    pub fn persistent_lookup(&self, key: &str) -> Option<QueryResult> {
        let store = self.persistent.as_ref()?;
        match store.get(key, self.clock.now_ts()) {
            Ok(Some(payload)) => match serde_json::from_str::<QueryResult>(&payload) {
                Ok(mut result) => {
                    result.from_cache = true;
                    self.memory.insert(key, result.clone());
                    self.counters.persistent_hits.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!("cache_lookups_total", "outcome" => "persistent")
                        .increment(1);
                    Some(result)
                },
                Err(e) => {
                    tracing::warn!(key, error = %e, "Discarding undecodable cache row");
                    None
                },
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(key, error = %e, "Persistent cache read failed");
                None
            },
        }
    }

    /// Writes a fresh result through to the persistent tier.
    ///
    /// The memory tier is populated by the caller's [`FlightGuard`]; this
    /// only covers the cross-session copy. Write failures are logged, never
    /// surfaced: caching is best-effort.
    pub fn store_persistent(&self, key: &str, process_number: &str, result: &QueryResult) {
        let Some(store) = self.persistent.as_ref() else {
            return;
        };
        let payload = match serde_json::to_string(result) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(key, error = %e, "Result not serializable for cache");
                return;
            },
        };
        if let Err(e) = store.put(
            key,
            process_number,
            &payload,
            self.clock.now_ts(),
            self.persistent_ttl_secs,
        ) {
            tracing::warn!(key, error = %e, "Persistent cache write failed");
        }
    }

    /// Invalidates both tiers for one process.
    pub fn invalidate_process(&self, process_number: &str) {
        let prefix = format!("movements:{process_number}:");
        let removed = self.memory.invalidate_where(|key| key.starts_with(&prefix));
        if let Some(store) = self.persistent.as_ref() {
            if let Err(e) = store.invalidate_process(process_number) {
                tracing::warn!(process = process_number, error = %e, "Persistent invalidation failed");
            }
        }
        tracing::debug!(process = process_number, removed, "Cache invalidated for process");
    }

    /// Drops expired entries from both tiers.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Storage`] when the persistent tier fails.
    pub fn evict_expired(&self) -> Result<usize> {
        let mut removed = self.memory.evict_expired();
        if let Some(store) = self.persistent.as_ref() {
            removed += store.evict_expired(self.clock.now_ts())?;
        }
        metrics::counter!("cache_evictions_total")
            .increment(u64::try_from(removed).unwrap_or(u64::MAX));
        Ok(removed)
    }

    /// Spawns the periodic eviction sweeper.
    ///
    /// The task is owned here and aborted by [`Self::stop_sweeper`] (or on
    /// drop), so no timer outlives the cache — test runs stay clean.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) {
        let cache = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                match cache.evict_expired() {
                    Ok(removed) if removed > 0 => {
                        tracing::debug!(removed, "Cache sweep removed expired entries");
                    },
                    Ok(_) => {},
                    Err(e) => tracing::warn!(error = %e, "Cache sweep failed"),
                }
            }
        });
        let mut slot = self.sweeper.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(previous) = slot.replace(handle) {
            previous.abort();
        }
    }

    /// Stops the periodic sweeper, if running.
    pub fn stop_sweeper(&self) {
        let mut slot = self.sweeper.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(handle) = slot.take() {
            handle.abort();
        }
    }

    /// Returns a point-in-time counters snapshot.
    #[must_use]
    pub fn stats(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.counters.hits.load(Ordering::Relaxed),
            stale_served: self.counters.stale_served.load(Ordering::Relaxed),
            coalesced: self.counters.coalesced.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            persistent_hits: self.counters.persistent_hits.load(Ordering::Relaxed),
            memory_entries: u64::try_from(self.memory.len()).unwrap_or(u64::MAX),
        }
    }
}

impl Drop for QueryCache {
    fn drop(&mut self) {
        self.stop_sweeper();
    }
}
