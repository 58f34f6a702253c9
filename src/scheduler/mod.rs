//! Per-tribunal rate-limited priority scheduler.
//!
//! The scheduler owns one independent worker task per tribunal. Each worker
//! enforces that tribunal's quota structurally — strictly one in-flight
//! request, priority-then-FIFO ordering, sliding-window ceilings, minimum
//! pacing — and retries transient failures with exponential backoff. A
//! global failure-rate monitor blocks a tribunal whose failures push the
//! overall ratio past 0.5 once enough completions have been observed.
//!
//! # Architecture
//!
//! ```text
//! submit(tribunal, priority, work)
//!        │
//!        ▼
//! ┌────────────────┐   mpsc    ┌───────────────────────────────┐
//! │ TribunalSched. │ ────────> │ Worker (one task per tribunal)│
//! │  worker map    │           │  queue · windows · blocking   │
//! └────────────────┘           └──────────────┬────────────────┘
//!        ▲                                    │ oneshot
//!        └────────────── result ◄─────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use andamento::scheduler::{TribunalScheduler, LimitRegistry};
//!
//! let scheduler: TribunalScheduler<u32> = TribunalScheduler::new(LimitRegistry::default());
//! let value = scheduler.submit(&tribunal, 1, work).await?;
//! ```

mod config;
mod queue;
mod window;
mod worker;

pub use config::{LimitRegistry, TribunalLimitConfig};
pub use queue::{UnitOfWork, WorkFuture};
pub use window::SlidingWindow;

use crate::models::TribunalId;
use crate::{Error, Result};
use queue::QueuedRequest;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use uuid::Uuid;
use worker::{Worker, WorkerCommand};

/// Default per-request queue deadline.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Completions observed before the failure monitor may trip.
const FAILURE_MONITOR_MIN_SAMPLES: u64 = 10;

/// Failure ratio above which a failing tribunal is blocked.
const FAILURE_MONITOR_THRESHOLD: f64 = 0.5;

/// Global completion counters shared by all tribunal workers.
///
/// Updated from concurrently running workers, hence atomics.
#[derive(Debug, Default)]
pub struct SchedulerStats {
    total: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
}

impl SchedulerStats {
    pub(crate) fn record_success(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.successes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Ratio of failed to total completions, 0.0 when nothing has run.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn failure_ratio(&self) -> f64 {
        let total = self.total.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        self.failures.load(Ordering::Relaxed) as f64 / total as f64
    }

    /// Returns `true` once enough completions exist and the ratio is past
    /// the blocking threshold.
    #[must_use]
    pub fn should_trip(&self) -> bool {
        self.total.load(Ordering::Relaxed) >= FAILURE_MONITOR_MIN_SAMPLES
            && self.failure_ratio() > FAILURE_MONITOR_THRESHOLD
    }

    /// Takes a point-in-time snapshot.
    #[must_use]
    pub fn snapshot(&self) -> SchedulerStatsSnapshot {
        let total = self.total.load(Ordering::Relaxed);
        let successes = self.successes.load(Ordering::Relaxed);
        let failures = self.failures.load(Ordering::Relaxed);
        SchedulerStatsSnapshot {
            total_requests: total,
            successes,
            failures,
            failure_ratio: self.failure_ratio(),
        }
    }
}

/// Serializable snapshot of [`SchedulerStats`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerStatsSnapshot {
    /// Completions observed across all tribunals.
    pub total_requests: u64,
    /// Successful completions.
    pub successes: u64,
    /// Failed completions (after internal retries).
    pub failures: u64,
    /// failures / total.
    pub failure_ratio: f64,
}

/// Rate-limited priority scheduler over independent tribunal workers.
///
/// Generic over the unit-of-work payload so tests can drive it with plain
/// values; the query pipeline instantiates it with raw movement batches.
pub struct TribunalScheduler<T> {
    workers: Mutex<HashMap<TribunalId, mpsc::UnboundedSender<WorkerCommand<T>>>>,
    limits: Mutex<LimitRegistry>,
    stats: Arc<SchedulerStats>,
    request_timeout: Duration,
}

impl<T: Send + 'static> TribunalScheduler<T> {
    /// Creates a scheduler over the given limit registry.
    #[must_use]
    pub fn new(limits: LimitRegistry) -> Self {
        Self {
            workers: Mutex::new(HashMap::new()),
            limits: Mutex::new(limits),
            stats: Arc::new(SchedulerStats::default()),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Overrides the per-request queue deadline.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Submits a unit of work for a tribunal and awaits its completion.
    ///
    /// `priority` is clamped to 1 (highest) – 5 (lowest). The call resolves
    /// once the work ran (after any internal retries), the deadline passed,
    /// or the queue was cleared.
    ///
    /// # Errors
    ///
    /// [`Error::QueueTimeout`] past the deadline, [`Error::QueueCleared`]
    /// after a bulk clear, [`Error::SchedulerClosed`] after shutdown, or
    /// whatever terminal error the unit of work produced.
    pub async fn submit(
        &self,
        tribunal: &TribunalId,
        priority: u8,
        work: UnitOfWork<T>,
    ) -> Result<T> {
        let priority = priority.clamp(1, 5);
        let (done, rx) = oneshot::channel();
        let now = Instant::now();
        let request = QueuedRequest {
            id: Uuid::new_v4(),
            tribunal: tribunal.clone(),
            priority,
            enqueued_at: now,
            deadline: now + self.request_timeout,
            retry_count: 0,
            generation: 0,
            work,
            done,
        };

        let sender = self.worker_channel(tribunal);
        if sender.send(WorkerCommand::Submit(request)).is_err() {
            return Err(Error::SchedulerClosed);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_closed)) => Err(Error::SchedulerClosed),
            Err(_elapsed) => Err(Error::QueueTimeout {
                tribunal: tribunal.to_string(),
                waited_ms: u64::try_from(self.request_timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }

    /// Hot-swaps a tribunal's limit policy.
    ///
    /// Takes effect for the next permit check; requests already executing
    /// are unaffected.
    pub fn update_limits(&self, tribunal: &TribunalId, config: TribunalLimitConfig) {
        self.limits
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .set(tribunal.clone(), config.clone());
        let workers = self.workers.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(sender) = workers.get(tribunal) {
            let _ = sender.send(WorkerCommand::UpdateLimits(config));
        }
    }

    /// Returns the configured policy for a tribunal.
    #[must_use]
    pub fn limits_for(&self, tribunal: &TribunalId) -> TribunalLimitConfig {
        self.limits
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .for_tribunal(tribunal)
    }

    /// Fails every pending request on every tribunal immediately.
    ///
    /// Used at shutdown and by tests; requests parked in a backoff delay
    /// are failed when their re-enqueue arrives against the new generation.
    pub fn clear_all(&self) {
        let workers = self.workers.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        for sender in workers.values() {
            let _ = sender.send(WorkerCommand::Clear);
        }
    }

    /// Returns a snapshot of the global completion statistics.
    #[must_use]
    pub fn stats(&self) -> SchedulerStatsSnapshot {
        self.stats.snapshot()
    }

    /// Number of tribunals with a running worker.
    #[must_use]
    pub fn active_tribunals(&self) -> usize {
        self.workers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    fn worker_channel(&self, tribunal: &TribunalId) -> mpsc::UnboundedSender<WorkerCommand<T>> {
        let mut workers = self.workers.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(sender) = workers.get(tribunal) {
            return sender.clone();
        }
        let config = self
            .limits
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .for_tribunal(tribunal);
        let sender = Worker::spawn(tribunal.clone(), config, Arc::clone(&self.stats));
        workers.insert(tribunal.clone(), sender.clone());
        metrics::gauge!("scheduler_active_tribunals").set(usize_to_f64(workers.len()));
        sender
    }
}

/// Converts usize to f64 for metrics, capping at `u32::MAX`.
#[inline]
fn usize_to_f64(value: usize) -> f64 {
    let capped = u32::try_from(value).unwrap_or(u32::MAX);
    f64::from(capped)
}
