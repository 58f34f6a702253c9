//! Priority-sorted request queue.

use crate::models::TribunalId;
use crate::Result;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::time::Instant;
use uuid::Uuid;

/// Boxed future produced by a unit of work.
pub type WorkFuture<T> = Pin<Box<dyn Future<Output = Result<T>> + Send>>;

/// A re-invocable unit of work.
///
/// The scheduler calls the factory once per attempt, so retries re-run the
/// underlying fetch instead of polling a spent future.
pub type UnitOfWork<T> = Arc<dyn Fn() -> WorkFuture<T> + Send + Sync>;

/// A request waiting in a tribunal queue.
pub(crate) struct QueuedRequest<T> {
    /// Request id, for log correlation.
    pub id: Uuid,
    /// The tribunal whose queue holds this request.
    pub tribunal: TribunalId,
    /// Priority, 1 (highest) to 5 (lowest).
    pub priority: u8,
    /// When the request entered the scheduler.
    pub enqueued_at: Instant,
    /// Hard deadline; the worker never executes past it.
    pub deadline: Instant,
    /// Attempts already failed.
    pub retry_count: u32,
    /// Queue generation at submission; a bulk clear bumps the generation
    /// and orphans in-flight backoff re-enqueues.
    pub generation: u64,
    /// The work factory.
    pub work: UnitOfWork<T>,
    /// Completion channel back to the caller.
    pub done: oneshot::Sender<Result<T>>,
}

impl<T> QueuedRequest<T> {
    /// Returns `true` when the caller stopped waiting or the deadline passed.
    pub fn is_dead(&self, now: Instant) -> bool {
        self.done.is_closed() || now >= self.deadline
    }
}

/// Queue kept priority-sorted with FIFO order among equal priorities.
pub(crate) struct RequestQueue<T> {
    entries: VecDeque<QueuedRequest<T>>,
}

impl<T> RequestQueue<T> {
    pub const fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }

    /// Inserts before the first entry with a strictly greater priority
    /// number, preserving submission order among equals. Retried requests
    /// re-enter by their original priority and compete fairly with new
    /// arrivals of the same class.
    pub fn insert(&mut self, request: QueuedRequest<T>) {
        let position = self
            .entries
            .iter()
            .position(|entry| entry.priority > request.priority)
            .unwrap_or(self.entries.len());
        self.entries.insert(position, request);
    }

    pub fn pop(&mut self) -> Option<QueuedRequest<T>> {
        self.entries.pop_front()
    }

    pub fn drain(&mut self) -> Vec<QueuedRequest<T>> {
        self.entries.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(priority: u8, marker: u32) -> (QueuedRequest<()>, oneshot::Receiver<Result<()>>) {
        let (done, rx) = oneshot::channel();
        let req = QueuedRequest {
            id: Uuid::new_v4(),
            tribunal: TribunalId::new("TJSP"),
            priority,
            enqueued_at: Instant::now(),
            deadline: Instant::now() + std::time::Duration::from_secs(300),
            retry_count: marker,
            generation: 0,
            work: Arc::new(|| Box::pin(async { Ok(()) }) as WorkFuture<()>),
            done,
        };
        (req, rx)
    }

    #[tokio::test]
    async fn test_priority_ordering_with_fifo_ties() {
        let mut queue = RequestQueue::new();
        let mut receivers = Vec::new();
        // Submission order [5, 1, 3, 1]; markers track identity.
        for (priority, marker) in [(5, 0), (1, 1), (3, 2), (1, 3)] {
            let (req, rx) = request(priority, marker);
            queue.insert(req);
            receivers.push(rx);
        }

        let order: Vec<(u8, u32)> = std::iter::from_fn(|| queue.pop())
            .map(|r| (r.priority, r.retry_count))
            .collect();
        assert_eq!(order, vec![(1, 1), (1, 3), (3, 2), (5, 0)]);
    }

    #[tokio::test]
    async fn test_drain_empties_queue() {
        let mut queue = RequestQueue::new();
        let (req, _rx) = request(2, 0);
        queue.insert(req);
        let (req, _rx2) = request(4, 1);
        queue.insert(req);

        assert_eq!(queue.len(), 2);
        let drained = queue.drain();
        assert_eq!(drained.len(), 2);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_dead_when_receiver_dropped() {
        let (req, rx) = request(1, 0);
        drop(rx);
        assert!(req.is_dead(Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dead_past_deadline() {
        let (req, _rx) = request(1, 0);
        assert!(!req.is_dead(Instant::now()));
        tokio::time::advance(std::time::Duration::from_secs(301)).await;
        assert!(req.is_dead(Instant::now()));
    }
}
