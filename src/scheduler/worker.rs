//! Per-tribunal worker task.
//!
//! One worker owns one tribunal's queue and counters exclusively and runs
//! strictly sequentially: a single in-flight request at a time is what makes
//! the per-tribunal limit structural rather than advisory. Workers for
//! different tribunals run concurrently and share nothing but the global
//! completion statistics.

use super::config::TribunalLimitConfig;
use super::queue::{QueuedRequest, RequestQueue};
use super::window::SlidingWindow;
use super::SchedulerStats;
use crate::models::TribunalId;
use crate::Error;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Minimum spacing between consecutive executions on one tribunal.
const MIN_PACING: Duration = Duration::from_secs(1);

/// Window covered by the burst ceiling.
const BURST_WINDOW: Duration = Duration::from_secs(10);

/// Commands accepted by a worker.
pub(crate) enum WorkerCommand<T> {
    /// A fresh submission.
    Submit(QueuedRequest<T>),
    /// A request re-entering after a backoff delay.
    Requeue(QueuedRequest<T>),
    /// Hot-swap the tribunal's limit policy.
    UpdateLimits(TribunalLimitConfig),
    /// Fail every pending request immediately.
    Clear,
}

/// Mutable per-tribunal counters, owned by the worker.
struct TribunalStatus {
    minute: SlidingWindow,
    hour: SlidingWindow,
    day: SlidingWindow,
    burst: SlidingWindow,
    last_request: Option<Instant>,
    blocked_until: Option<Instant>,
}

impl TribunalStatus {
    fn new() -> Self {
        Self {
            minute: SlidingWindow::new(Duration::from_secs(60)),
            hour: SlidingWindow::new(Duration::from_secs(3600)),
            day: SlidingWindow::new(Duration::from_secs(86_400)),
            burst: SlidingWindow::new(BURST_WINDOW),
            last_request: None,
            blocked_until: None,
        }
    }

    /// Returns how long the head of the queue must wait, or `None` when a
    /// request may execute right now. The wait is the maximum across every
    /// violated constraint so one re-check suffices in the common case.
    fn permit_wait(&mut self, now: Instant, config: &TribunalLimitConfig) -> Option<Duration> {
        let mut waits: Vec<Duration> = Vec::new();

        if let Some(until) = self.blocked_until {
            if until > now {
                waits.push(until.saturating_duration_since(now));
            }
        }
        if let Some(wait) = self.minute.wait_for_slot(now, config.requests_per_minute) {
            waits.push(wait);
        }
        if let Some(wait) = self.hour.wait_for_slot(now, config.requests_per_hour) {
            waits.push(wait);
        }
        if let Some(wait) = self.day.wait_for_slot(now, config.requests_per_day) {
            waits.push(wait);
        }
        if let Some(wait) = self.burst.wait_for_slot(now, config.burst_limit) {
            waits.push(wait);
        }
        if let Some(last) = self.last_request {
            let next_allowed = last + MIN_PACING;
            if next_allowed > now {
                waits.push(next_allowed.saturating_duration_since(now));
            }
        }

        waits.into_iter().max()
    }

    fn record_request(&mut self, now: Instant) {
        self.minute.record(now);
        self.hour.record(now);
        self.day.record(now);
        self.burst.record(now);
        self.last_request = Some(now);
    }

    fn block_for(&mut self, now: Instant, duration: Duration) {
        self.blocked_until = Some(now + duration);
    }

    fn clear_block(&mut self) {
        self.blocked_until = None;
    }
}

/// One tribunal's processing loop.
pub(crate) struct Worker<T> {
    tribunal: TribunalId,
    config: TribunalLimitConfig,
    status: TribunalStatus,
    queue: RequestQueue<T>,
    rx: mpsc::UnboundedReceiver<WorkerCommand<T>>,
    /// Weak so the worker's own requeue path never keeps the channel open:
    /// once the scheduler drops its sender, `recv` ends and the worker exits.
    requeue_tx: mpsc::WeakUnboundedSender<WorkerCommand<T>>,
    stats: Arc<SchedulerStats>,
    generation: u64,
}

impl<T: Send + 'static> Worker<T> {
    /// Spawns the worker task and returns its command channel.
    pub fn spawn(
        tribunal: TribunalId,
        config: TribunalLimitConfig,
        stats: Arc<SchedulerStats>,
    ) -> mpsc::UnboundedSender<WorkerCommand<T>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = Self {
            tribunal: tribunal.clone(),
            config,
            status: TribunalStatus::new(),
            queue: RequestQueue::new(),
            rx,
            requeue_tx: tx.downgrade(),
            stats,
            generation: 0,
        };
        tokio::spawn(worker.run());
        tracing::debug!(tribunal = %tribunal, "Tribunal worker spawned");
        tx
    }

    async fn run(mut self) {
        loop {
            if self.queue.is_empty() {
                match self.rx.recv().await {
                    Some(command) => self.handle(command),
                    None => break,
                }
            }

            // Drain whatever else already arrived so a burst of same-tick
            // submissions is ordered by priority, not by arrival.
            while let Ok(command) = self.rx.try_recv() {
                self.handle(command);
            }
            if self.queue.is_empty() {
                continue;
            }

            let now = Instant::now();
            if let Some(wait) = self.status.permit_wait(now, &self.config) {
                tracing::trace!(
                    tribunal = %self.tribunal,
                    wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                    queued = self.queue.len(),
                    "Quota exhausted, waiting"
                );
                tokio::select! {
                    command = self.rx.recv() => match command {
                        Some(command) => self.handle(command),
                        None => break,
                    },
                    () = tokio::time::sleep(wait) => {},
                }
                continue;
            }

            self.execute_head().await;
        }

        // Channel closed: the scheduler is gone. Fail whatever is left.
        for request in self.queue.drain() {
            let _ = request.done.send(Err(Error::SchedulerClosed));
        }
    }

    fn handle(&mut self, command: WorkerCommand<T>) {
        match command {
            WorkerCommand::Submit(request) => {
                self.queue.insert(request);
                self.record_depth();
            },
            WorkerCommand::Requeue(request) => {
                if request.generation != self.generation {
                    let tribunal = request.tribunal.to_string();
                    let _ = request.done.send(Err(Error::QueueCleared { tribunal }));
                    return;
                }
                if request.done.is_closed() {
                    // Caller stopped waiting mid-backoff; never execute it.
                    tracing::debug!(
                        tribunal = %self.tribunal,
                        request_id = %request.id,
                        "Dropping abandoned retry"
                    );
                    return;
                }
                self.queue.insert(request);
                self.record_depth();
            },
            WorkerCommand::UpdateLimits(config) => {
                tracing::info!(tribunal = %self.tribunal, "Limit policy updated");
                self.config = config;
            },
            WorkerCommand::Clear => {
                self.generation += 1;
                let drained = self.queue.drain();
                tracing::info!(
                    tribunal = %self.tribunal,
                    cleared = drained.len(),
                    "Queue cleared"
                );
                for request in drained {
                    let tribunal = request.tribunal.to_string();
                    let _ = request.done.send(Err(Error::QueueCleared { tribunal }));
                }
                self.record_depth();
            },
        }
    }

    async fn execute_head(&mut self) {
        let Some(request) = self.queue.pop() else {
            return;
        };
        self.record_depth();

        let now = Instant::now();
        if request.is_dead(now) {
            let waited_ms =
                u64::try_from(now.saturating_duration_since(request.enqueued_at).as_millis())
                    .unwrap_or(u64::MAX);
            let _ = request.done.send(Err(Error::QueueTimeout {
                tribunal: request.tribunal.to_string(),
                waited_ms,
            }));
            metrics::counter!(
                "scheduler_requests_total",
                "tribunal" => self.tribunal.to_string(),
                "status" => "expired"
            )
            .increment(1);
            return;
        }

        self.status.record_request(now);
        tracing::debug!(
            tribunal = %self.tribunal,
            request_id = %request.id,
            priority = request.priority,
            retry = request.retry_count,
            "Executing request"
        );

        let result = (request.work)().await;
        match result {
            Ok(value) => {
                // A success clears any standing failure block.
                self.status.clear_block();
                self.stats.record_success();
                metrics::counter!(
                    "scheduler_requests_total",
                    "tribunal" => self.tribunal.to_string(),
                    "status" => "success"
                )
                .increment(1);
                let _ = request.done.send(Ok(value));
            },
            Err(error) => self.complete_failure(request, error),
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn complete_failure(&mut self, mut request: QueuedRequest<T>, error: Error) {
        self.stats.record_failure();
        metrics::counter!(
            "scheduler_requests_total",
            "tribunal" => self.tribunal.to_string(),
            "status" => "failure"
        )
        .increment(1);

        if self.stats.should_trip() {
            let block = Duration::from_secs(self.config.cooldown_secs * 2);
            self.status.block_for(Instant::now(), block);
            metrics::counter!(
                "scheduler_blocked_total",
                "tribunal" => self.tribunal.to_string()
            )
            .increment(1);
            tracing::warn!(
                tribunal = %self.tribunal,
                failure_ratio = self.stats.failure_ratio(),
                block_secs = block.as_secs(),
                "Failure ratio above threshold, tribunal blocked"
            );
        }

        if error.is_retryable() && request.retry_count < self.config.max_retries {
            request.retry_count += 1;
            let exponent = i32::try_from(request.retry_count).unwrap_or(i32::MAX) - 1;
            let delay = Duration::from_secs_f64(
                (self.config.cooldown_secs as f64) * self.config.backoff_multiplier.powi(exponent),
            );
            metrics::counter!(
                "scheduler_retries_total",
                "tribunal" => self.tribunal.to_string()
            )
            .increment(1);
            tracing::debug!(
                tribunal = %self.tribunal,
                request_id = %request.id,
                retry = request.retry_count,
                delay_secs = delay.as_secs_f64(),
                "Scheduling retry"
            );
            let tx = self.requeue_tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                // A scheduler shut down mid-backoff drops the retry here.
                if let Some(tx) = tx.upgrade() {
                    let _ = tx.send(WorkerCommand::Requeue(request));
                }
            });
        } else {
            tracing::warn!(
                tribunal = %self.tribunal,
                request_id = %request.id,
                retries = request.retry_count,
                error = %error,
                "Request failed permanently"
            );
            let _ = request.done.send(Err(error));
        }
    }

    fn record_depth(&self) {
        metrics::gauge!(
            "scheduler_queue_depth",
            "tribunal" => self.tribunal.to_string()
        )
        .set(usize_to_f64(self.queue.len()));
    }
}

/// Converts usize to f64 for metrics, capping at `u32::MAX`.
#[inline]
fn usize_to_f64(value: usize) -> f64 {
    let capped = u32::try_from(value).unwrap_or(u32::MAX);
    f64::from(capped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::queue::{UnitOfWork, WorkFuture};
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::oneshot;
    use uuid::Uuid;

    fn counting_work(calls: Arc<AtomicU32>) -> UnitOfWork<u32> {
        Arc::new(move || {
            let calls = Arc::clone(&calls);
            Box::pin(async move { Ok(calls.fetch_add(1, Ordering::SeqCst) + 1) }) as WorkFuture<u32>
        })
    }

    fn submit(
        tx: &mpsc::UnboundedSender<WorkerCommand<u32>>,
        priority: u8,
        work: UnitOfWork<u32>,
    ) -> oneshot::Receiver<crate::Result<u32>> {
        let (done, rx) = oneshot::channel();
        let request = QueuedRequest {
            id: Uuid::new_v4(),
            tribunal: TribunalId::new("TJSP"),
            priority,
            enqueued_at: Instant::now(),
            deadline: Instant::now() + Duration::from_secs(300),
            retry_count: 0,
            generation: 0,
            work,
            done,
        };
        tx.send(WorkerCommand::Submit(request)).unwrap();
        rx
    }

    #[tokio::test(start_paused = true)]
    async fn test_executes_submitted_work() {
        let calls = Arc::new(AtomicU32::new(0));
        let tx = Worker::spawn(
            TribunalId::new("TJSP"),
            TribunalLimitConfig::default(),
            Arc::new(SchedulerStats::default()),
        );

        let rx = submit(&tx, 3, counting_work(Arc::clone(&calls)));
        assert_eq!(rx.await.unwrap().unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_minimum_pacing_between_executions() {
        let calls = Arc::new(AtomicU32::new(0));
        let tx = Worker::spawn(
            TribunalId::new("TJSP"),
            TribunalLimitConfig::default().with_requests_per_minute(100).with_burst_limit(100),
            Arc::new(SchedulerStats::default()),
        );

        let start = Instant::now();
        let first = submit(&tx, 3, counting_work(Arc::clone(&calls)));
        let second = submit(&tx, 3, counting_work(Arc::clone(&calls)));
        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_fails_pending() {
        let tx = Worker::spawn(
            TribunalId::new("TJSP"),
            // One-per-minute so the second submission is still queued.
            TribunalLimitConfig::default().with_requests_per_minute(1),
            Arc::new(SchedulerStats::default()),
        );

        let calls = Arc::new(AtomicU32::new(0));
        let first = submit(&tx, 3, counting_work(Arc::clone(&calls)));
        first.await.unwrap().unwrap();

        let second = submit(&tx, 3, counting_work(Arc::clone(&calls)));
        // Give the worker a tick to queue it, then clear.
        tokio::task::yield_now().await;
        tx.send(WorkerCommand::Clear).unwrap();

        match second.await.unwrap() {
            Err(Error::QueueCleared { tribunal }) => assert_eq!(tribunal, "TJSP"),
            other => panic!("expected QueueCleared, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_with_backoff_then_success() {
        let attempts = Arc::new(AtomicU32::new(0));
        let work: UnitOfWork<u32> = {
            let attempts = Arc::clone(&attempts);
            Arc::new(move || {
                let attempts = Arc::clone(&attempts);
                Box::pin(async move {
                    let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 4 {
                        Err(Error::Fetch {
                            tribunal: "TJSP".to_string(),
                            cause: format!("attempt {n}"),
                        })
                    } else {
                        Ok(n)
                    }
                }) as WorkFuture<u32>
            })
        };

        let tx = Worker::spawn(
            TribunalId::new("TJSP"),
            TribunalLimitConfig::default()
                .with_cooldown_secs(10)
                .with_backoff_multiplier(2.0)
                .with_max_retries(3)
                .with_requests_per_minute(100)
                .with_burst_limit(100),
            Arc::new(SchedulerStats::default()),
        );

        let start = Instant::now();
        let rx = submit(&tx, 3, work);
        assert_eq!(rx.await.unwrap().unwrap(), 4);
        // Delays of 10 + 20 + 40 seconds before the 4th attempt.
        assert!(start.elapsed() >= Duration::from_secs(70));
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted_surfaces_fetch_error() {
        let work: UnitOfWork<u32> = Arc::new(|| {
            Box::pin(async {
                Err(Error::Fetch {
                    tribunal: "TJSP".to_string(),
                    cause: "offline".to_string(),
                })
            }) as WorkFuture<u32>
        });

        let tx = Worker::spawn(
            TribunalId::new("TJSP"),
            TribunalLimitConfig::default()
                .with_cooldown_secs(1)
                .with_max_retries(2)
                .with_requests_per_minute(100)
                .with_burst_limit(100),
            Arc::new(SchedulerStats::default()),
        );

        let rx = submit(&tx, 3, work);
        match rx.await.unwrap() {
            Err(Error::Fetch { cause, .. }) => assert_eq!(cause, "offline"),
            other => panic!("expected Fetch error, got {other:?}"),
        }
    }
}
