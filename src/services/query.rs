//! Query orchestration: the boundary the surrounding layers call.
//!
//! `MovementQueryService` wires the parser, cache, scheduler, executor and
//! ingestion into the full read path: parse and route the case number,
//! consult the cache tiers, submit a fetch to the tribunal's worker on a
//! miss, ingest the raw movements and hand back a uniform [`QueryResult`].
//! Per-item failures are encoded in the result, never raised, so a batch
//! always answers every requested number.
//!
//! All collaborators are injected at construction; there is no global
//! state and no ambient clock.

use crate::cache::{Lookup, QueryCache, CacheStatsSnapshot, DEFAULT_FRESH_TTL, DEFAULT_PERSISTENT_TTL_SECS, DEFAULT_STALE_TTL};
use crate::cnj::parse_case_number;
use crate::executor::{MovementFetcher, QueryExecutor, RawMovement};
use crate::models::{
    BatchResult, BatchSummary, Movement, NoveltyRecord, NoveltyStats, QueryOptions, QueryResult,
    TribunalId,
};
use crate::notify::{LogSink, NotificationSink};
use crate::scheduler::{LimitRegistry, TribunalScheduler, SchedulerStatsSnapshot};
use crate::services::{IngestionService, NoveltyService};
use crate::services::novelty::{DEFAULT_NOVELTY_TTL_SECS, DEFAULT_SWEEP_INTERVAL};
use crate::storage::{CacheStore, MovementStore};
use crate::{Clock, Error, Result, SystemClock};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;

/// Point-in-time view of the whole engine, for status surfaces.
#[derive(Debug, Clone, Serialize)]
pub struct SystemStatistics {
    /// Novelty totals and per-priority unread counts.
    pub novelties: NoveltyStats,
    /// Global scheduler completion counters.
    pub scheduler: SchedulerStatsSnapshot,
    /// Tribunals with a running worker.
    pub active_tribunals: usize,
    /// Cache tier counters.
    pub cache: CacheStatsSnapshot,
    /// Movements persisted across all processes.
    pub stored_movements: u64,
}

/// Outcome of a forced cleanup run.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CleanupReport {
    /// Novelty records deleted because their window elapsed.
    pub expired_novelties: usize,
    /// Cache entries evicted across both tiers.
    pub evicted_cache_entries: usize,
}

/// Per-item bookkeeping that only batch aggregation cares about.
#[derive(Debug, Clone, Copy)]
struct ItemMeta {
    duplicates: usize,
    persisted: bool,
}

impl Default for ItemMeta {
    fn default() -> Self {
        Self {
            duplicates: 0,
            persisted: true,
        }
    }
}

/// The tribunal query orchestration engine.
///
/// Cheap to clone; every field is shared. See [`Self::builder`] for
/// construction.
#[derive(Clone)]
pub struct MovementQueryService {
    scheduler: Arc<TribunalScheduler<Vec<RawMovement>>>,
    executor: QueryExecutor,
    ingestion: IngestionService,
    novelty: Arc<NoveltyService>,
    cache: Arc<QueryCache>,
    store: Arc<dyn MovementStore>,
}

impl MovementQueryService {
    /// Starts a builder over a fetch capability and a combined store.
    ///
    /// The store backs both movements and the persistent cache tier, which
    /// is the common arrangement with [`crate::storage::SqliteStore`]. Use
    /// [`MovementQueryServiceBuilder::new`] to wire the tiers separately.
    pub fn builder<S>(fetcher: Arc<dyn MovementFetcher>, store: Arc<S>) -> MovementQueryServiceBuilder
    where
        S: MovementStore + CacheStore + Send + Sync + 'static,
    {
        let movements: Arc<dyn MovementStore> = Arc::clone(&store) as Arc<dyn MovementStore>;
        let cache: Arc<dyn CacheStore> = store;
        MovementQueryServiceBuilder::new(fetcher, movements).with_cache_store(cache)
    }

    /// Queries one process number.
    ///
    /// Always returns a [`QueryResult`]; failures are encoded in it.
    #[tracing::instrument(skip(self, options), fields(process = %process_number))]
    pub async fn query_one(&self, process_number: &str, options: QueryOptions) -> QueryResult {
        self.query_one_inner(process_number, options).await.0
    }

    async fn query_one_inner(
        &self,
        process_number: &str,
        options: QueryOptions,
    ) -> (QueryResult, ItemMeta) {
        let started = Instant::now();

        let parsed = parse_case_number(process_number);
        if !parsed.is_valid {
            metrics::counter!("queries_total", "outcome" => "invalid").increment(1);
            let error = Error::InvalidCaseNumber(process_number.to_string());
            return (
                QueryResult::failure(process_number, &error),
                ItemMeta::default(),
            );
        }
        let Some(tribunal) = parsed.tribunal.clone() else {
            metrics::counter!("queries_total", "outcome" => "unrouted").increment(1);
            let error = Error::UnknownTribunal {
                number: process_number.to_string(),
                key: parsed.routing_key(),
            };
            return (
                QueryResult::failure(process_number, &error),
                ItemMeta::default(),
            );
        };
        let digits = parsed.digits();

        if !options.use_cache {
            return self.fetch_fresh(&digits, &tribunal, options, started).await;
        }

        let key = QueryCache::signature(&digits, options);
        match self.cache.begin(&key) {
            Lookup::Fresh(result) | Lookup::Stale(result) => {
                (finish_cached(result, started), ItemMeta::default())
            },
            Lookup::StaleRefresh(result, guard) => {
                // Serve the stale value now; refresh for the next caller.
                let service = self.clone();
                let digits = digits.clone();
                let tribunal = tribunal.clone();
                tokio::spawn(async move {
                    let (fresh, _meta) = service
                        .fetch_fresh(&digits, &tribunal, options, Instant::now())
                        .await;
                    if fresh.success {
                        if fresh.new_movements > 0 {
                            service.cache.invalidate_process(&digits);
                        }
                        let key = QueryCache::signature(&digits, options);
                        service.cache.store_persistent(&key, &digits, &fresh);
                        guard.complete(fresh);
                    } else {
                        guard.fail();
                    }
                });
                (finish_cached(result, started), ItemMeta::default())
            },
            Lookup::Pending(mut rx) => match rx.recv().await {
                Ok(Some(result)) => (finish_cached(result, started), ItemMeta::default()),
                Ok(None) | Err(_) => {
                    let error = Error::Fetch {
                        tribunal: tribunal.to_string(),
                        cause: "coalesced request failed".to_string(),
                    };
                    let mut result = QueryResult::failure(&digits, &error);
                    result.tribunal = Some(tribunal);
                    (result, ItemMeta::default())
                },
            },
            Lookup::Miss(guard) => {
                if let Some(hit) = self.cache.persistent_lookup(&key) {
                    guard.complete(hit.clone());
                    return (finish_cached(hit, started), ItemMeta::default());
                }
                let (result, meta) = self.fetch_fresh(&digits, &tribunal, options, started).await;
                if result.success {
                    if result.new_movements > 0 {
                        self.cache.invalidate_process(&digits);
                    }
                    guard.complete(result.clone());
                    self.cache.store_persistent(&key, &digits, &result);
                } else {
                    guard.fail();
                }
                (result, meta)
            },
        }
    }

    /// Fetches through the scheduler and ingests the raw batch.
    async fn fetch_fresh(
        &self,
        digits: &str,
        tribunal: &TribunalId,
        options: QueryOptions,
        started: Instant,
    ) -> (QueryResult, ItemMeta) {
        let priority = self.scheduler.limits_for(tribunal).priority_class;
        let work = self.executor.unit_of_work(digits, tribunal);

        let raw = match self.scheduler.submit(tribunal, priority, work).await {
            Ok(raw) => raw,
            Err(error) => {
                metrics::counter!("queries_total", "outcome" => "failed").increment(1);
                let mut result = QueryResult::failure(digits, &error);
                result.tribunal = Some(tribunal.clone());
                result.query_duration_ms = elapsed_ms(started);
                return (result, ItemMeta::default());
            },
        };

        let report =
            self.ingestion
                .ingest(digits, tribunal, &raw, options.novelty_detection, options.persist);

        // The result carries everything known for the process, stored rows
        // first. Fresh movements that did not reach the store (persistence
        // off or degraded) are appended so the caller never loses them.
        let mut movements = match self.store.movements_for(digits) {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!(process = digits, error = %e, "Stored movements unavailable");
                Vec::new()
            },
        };
        let present: HashSet<String> =
            movements.iter().map(|m| m.content_hash.clone()).collect();
        for movement in &report.movements {
            if !present.contains(&movement.content_hash) {
                movements.push(movement.clone());
            }
        }

        metrics::counter!("queries_total", "outcome" => "ok").increment(1);
        metrics::histogram!("query_duration_ms").record(elapsed_ms_f64(started));
        let result = QueryResult {
            success: true,
            process_number: digits.to_string(),
            tribunal: Some(tribunal.clone()),
            total_movements: movements.len(),
            new_movements: report.new_movements,
            movements,
            query_duration_ms: elapsed_ms(started),
            from_cache: false,
            error: None,
        };
        let meta = ItemMeta {
            duplicates: report.duplicates,
            persisted: report.persisted,
        };
        (result, meta)
    }

    /// Queries a batch of process numbers concurrently.
    ///
    /// Per-tribunal ordering and throttling still hold — the scheduler
    /// serializes within each tribunal — but distinct tribunals proceed in
    /// parallel. Results come back in request order, one per number.
    #[tracing::instrument(skip(self, process_numbers), fields(batch = process_numbers.len()))]
    pub async fn query_batch(&self, process_numbers: &[String]) -> BatchResult {
        let mut set = JoinSet::new();
        for (index, number) in process_numbers.iter().enumerate() {
            let service = self.clone();
            let number = number.clone();
            set.spawn(async move {
                let outcome = service.query_one_inner(&number, QueryOptions::default()).await;
                (index, outcome)
            });
        }

        let mut slots: Vec<Option<(QueryResult, ItemMeta)>> =
            (0..process_numbers.len()).map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, outcome)) => slots[index] = Some(outcome),
                Err(e) => tracing::error!(error = %e, "Batch query task panicked"),
            }
        }

        let mut results = Vec::with_capacity(process_numbers.len());
        let mut summary = BatchSummary {
            total: process_numbers.len(),
            ..BatchSummary::default()
        };
        let mut errors = Vec::new();
        let mut persisted = true;
        let mut new_movements = 0;
        let mut duplicates = 0;
        let mut seen_tribunals = HashSet::new();

        for (index, slot) in slots.into_iter().enumerate() {
            let (result, meta) = slot.unwrap_or_else(|| {
                // A panicked task still owes the caller its slot.
                let error = Error::Fetch {
                    tribunal: "unknown".to_string(),
                    cause: "query task failed".to_string(),
                };
                (
                    QueryResult::failure(&process_numbers[index], &error),
                    ItemMeta::default(),
                )
            });
            if result.success {
                summary.successful += 1;
                summary.total_movements += result.total_movements;
            } else {
                summary.failed += 1;
                if let Some(message) = &result.error {
                    errors.push(format!("{}: {message}", result.process_number));
                }
            }
            if let Some(tribunal) = &result.tribunal {
                if seen_tribunals.insert(tribunal.clone()) {
                    summary.tribunals.push(tribunal.clone());
                }
            }
            persisted &= meta.persisted;
            new_movements += result.new_movements;
            duplicates += meta.duplicates;
            results.push(result);
        }

        BatchResult {
            success: summary.failed == 0,
            results,
            summary,
            errors,
            persisted,
            new_movements,
            duplicates,
        }
    }

    /// Returns every movement stored for a process, oldest first.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidCaseNumber`] for malformed input, or
    /// [`Error::Storage`] when the store fails.
    pub fn stored_movements(&self, process_number: &str) -> Result<Vec<Movement>> {
        let parsed = parse_case_number(process_number);
        if !parsed.is_valid {
            return Err(Error::InvalidCaseNumber(process_number.to_string()));
        }
        self.store.movements_for(&parsed.digits())
    }

    /// Returns unread, unexpired novelties, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] when the store fails.
    pub fn unread_novelties(&self, limit: usize) -> Result<Vec<NoveltyRecord>> {
        self.novelty.unread(limit)
    }

    /// Marks novelties read; idempotent per id. Returns how many flipped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] when the store fails.
    pub fn mark_novelties_read(&self, ids: &[String]) -> Result<usize> {
        self.novelty.mark_read(ids)
    }

    /// Marks every unread novelty read. Returns how many flipped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] when the store fails.
    pub fn mark_all_novelties_read(&self) -> Result<usize> {
        self.novelty.mark_all_read()
    }

    /// Aggregated engine statistics.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] when the store fails.
    pub fn statistics(&self) -> Result<SystemStatistics> {
        Ok(SystemStatistics {
            novelties: self.novelty.stats()?,
            scheduler: self.scheduler.stats(),
            active_tribunals: self.scheduler.active_tribunals(),
            cache: self.cache.stats(),
            stored_movements: self.store.movement_count()?,
        })
    }

    /// Forces the novelty-expiry sweep and cache eviction now.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] when either sweep fails.
    pub fn run_cleanup(&self) -> Result<CleanupReport> {
        let sweep = self.novelty.sweep()?;
        let evicted = self.cache.evict_expired()?;
        Ok(CleanupReport {
            expired_novelties: sweep.removed,
            evicted_cache_entries: evicted,
        })
    }

    /// Starts the periodic maintenance tasks (novelty sweep, cache sweep).
    ///
    /// Both tasks are owned by their components and stopped by
    /// [`Self::shutdown`].
    pub fn start_maintenance(&self) {
        self.novelty.spawn_sweeper(DEFAULT_SWEEP_INTERVAL);
        self.cache.spawn_sweeper(DEFAULT_SWEEP_INTERVAL);
    }

    /// Fails all pending scheduler work and stops maintenance tasks.
    pub fn shutdown(&self) {
        self.scheduler.clear_all();
        self.novelty.stop_sweeper();
        self.cache.stop_sweeper();
        tracing::info!("Query service shut down");
    }
}

/// Stamps a cache-tier result for return to the current caller.
fn finish_cached(mut result: QueryResult, started: Instant) -> QueryResult {
    result.from_cache = true;
    result.query_duration_ms = elapsed_ms(started);
    result
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[allow(clippy::cast_precision_loss)]
fn elapsed_ms_f64(started: Instant) -> f64 {
    started.elapsed().as_millis() as f64
}

/// Builder wiring a [`MovementQueryService`] from its collaborators.
pub struct MovementQueryServiceBuilder {
    fetcher: Arc<dyn MovementFetcher>,
    store: Arc<dyn MovementStore>,
    cache_store: Option<Arc<dyn CacheStore>>,
    sink: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    limits: LimitRegistry,
    request_timeout: Option<Duration>,
    fresh_ttl: Duration,
    stale_ttl: Duration,
    persistent_ttl_secs: u64,
    novelty_ttl_secs: u64,
}

impl MovementQueryServiceBuilder {
    /// Starts a builder with default policies and a log-only sink.
    #[must_use]
    pub fn new(fetcher: Arc<dyn MovementFetcher>, store: Arc<dyn MovementStore>) -> Self {
        Self {
            fetcher,
            store,
            cache_store: None,
            sink: Arc::new(LogSink),
            clock: Arc::new(SystemClock),
            limits: LimitRegistry::default(),
            request_timeout: None,
            fresh_ttl: DEFAULT_FRESH_TTL,
            stale_ttl: DEFAULT_STALE_TTL,
            persistent_ttl_secs: DEFAULT_PERSISTENT_TTL_SECS,
            novelty_ttl_secs: DEFAULT_NOVELTY_TTL_SECS,
        }
    }

    /// Sets the persistent cache tier.
    #[must_use]
    pub fn with_cache_store(mut self, cache_store: Arc<dyn CacheStore>) -> Self {
        self.cache_store = Some(cache_store);
        self
    }

    /// Disables the persistent cache tier (memory tier only).
    #[must_use]
    pub fn without_persistent_cache(mut self) -> Self {
        self.cache_store = None;
        self
    }

    /// Sets the notification sink invoked per created novelty.
    #[must_use]
    pub fn with_notification_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Sets the clock used for expiry decisions.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets the per-tribunal limit registry.
    #[must_use]
    pub fn with_limits(mut self, limits: LimitRegistry) -> Self {
        self.limits = limits;
        self
    }

    /// Sets the per-request queue deadline.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Sets the cache windows (coalescing, stale, persistent).
    #[must_use]
    pub const fn with_cache_ttls(
        mut self,
        fresh: Duration,
        stale: Duration,
        persistent_secs: u64,
    ) -> Self {
        self.fresh_ttl = fresh;
        self.stale_ttl = stale;
        self.persistent_ttl_secs = persistent_secs;
        self
    }

    /// Sets the novelty visibility window.
    #[must_use]
    pub const fn with_novelty_ttl_secs(mut self, secs: u64) -> Self {
        self.novelty_ttl_secs = secs;
        self
    }

    /// Builds the service.
    #[must_use]
    pub fn build(self) -> MovementQueryService {
        let mut scheduler = TribunalScheduler::new(self.limits);
        if let Some(timeout) = self.request_timeout {
            scheduler = scheduler.with_request_timeout(timeout);
        }
        let ingestion = IngestionService::new(
            Arc::clone(&self.store),
            self.sink,
            Arc::clone(&self.clock),
        )
        .with_novelty_ttl_secs(self.novelty_ttl_secs);
        let novelty = Arc::new(NoveltyService::new(
            Arc::clone(&self.store),
            Arc::clone(&self.clock),
        ));
        let cache = Arc::new(QueryCache::with_ttls(
            self.cache_store,
            self.clock,
            self.fresh_ttl,
            self.stale_ttl,
            self.persistent_ttl_secs,
        ));

        MovementQueryService {
            scheduler: Arc::new(scheduler),
            executor: QueryExecutor::new(self.fetcher),
            ingestion,
            novelty,
            cache,
            store: self.store,
        }
    }
}
