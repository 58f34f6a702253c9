//! Novelty lifecycle: unread queries, acknowledgement and expiry sweeps.
//!
//! Novelty records are created by ingestion with a bounded visibility
//! window (48 hours by default). This service answers the notification
//! layer's queries and runs the periodic sweep that deletes expired
//! records. The sweep only ever touches novelty rows; the underlying
//! persisted movements are not its business.

use crate::models::{NoveltyRecord, NoveltyStats};
use crate::storage::MovementStore;
use crate::{Clock, Result};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Default novelty visibility window.
pub const DEFAULT_NOVELTY_TTL_SECS: u64 = 48 * 3600;

/// Default interval between expiry sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

/// Default page size for unread queries.
pub const DEFAULT_UNREAD_LIMIT: usize = 50;

/// Outcome of one expiry sweep.
#[derive(Debug, Clone, Copy, Default)]
pub struct SweepReport {
    /// Novelty records deleted because their window elapsed.
    pub removed: usize,
}

/// Query and lifecycle operations over novelty records.
pub struct NoveltyService {
    store: Arc<dyn MovementStore>,
    clock: Arc<dyn Clock>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl NoveltyService {
    /// Creates a novelty service over its collaborators.
    #[must_use]
    pub fn new(store: Arc<dyn MovementStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            sweeper: Mutex::new(None),
        }
    }

    /// Returns unread, unexpired novelties, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Storage`] when the store fails.
    pub fn unread(&self, limit: usize) -> Result<Vec<NoveltyRecord>> {
        self.store.unread_novelties(limit, self.clock.now_ts())
    }

    /// Marks the given novelties read.
    ///
    /// Idempotent: ids already read (or unknown) are no-ops. Returns how
    /// many records actually flipped.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Storage`] when the store fails.
    pub fn mark_read(&self, ids: &[String]) -> Result<usize> {
        let flipped = self.store.mark_read(ids, self.clock.now_ts())?;
        if flipped > 0 {
            metrics::counter!("novelties_read_total")
                .increment(u64::try_from(flipped).unwrap_or(u64::MAX));
        }
        Ok(flipped)
    }

    /// Marks every unread novelty read. Returns how many flipped.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Storage`] when the store fails.
    pub fn mark_all_read(&self) -> Result<usize> {
        let flipped = self.store.mark_all_read(self.clock.now_ts())?;
        tracing::info!(flipped, "All novelties marked read");
        Ok(flipped)
    }

    /// Aggregated novelty statistics.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Storage`] when the store fails.
    pub fn stats(&self) -> Result<NoveltyStats> {
        self.store.novelty_stats(self.clock.now_ts())
    }

    /// Deletes every novelty whose visibility window elapsed.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Storage`] when the store fails.
    #[tracing::instrument(skip(self))]
    pub fn sweep(&self) -> Result<SweepReport> {
        let removed = self.store.delete_expired_novelties(self.clock.now_ts())?;
        if removed > 0 {
            tracing::info!(removed, "Expired novelties swept");
            metrics::counter!("novelties_expired_total")
                .increment(u64::try_from(removed).unwrap_or(u64::MAX));
        }
        Ok(SweepReport { removed })
    }

    /// Spawns the periodic sweep task.
    ///
    /// The task is owned here and aborted by [`Self::stop_sweeper`] or on
    /// drop; it never outlives the service.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) {
        let service = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The immediate first tick would sweep at startup; skip it.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = service.sweep() {
                    tracing::warn!(error = %e, "Novelty sweep failed");
                }
            }
        });
        let mut slot = self.sweeper.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(previous) = slot.replace(handle) {
            previous.abort();
        }
    }

    /// Stops the periodic sweep task, if running.
    pub fn stop_sweeper(&self) {
        let mut slot = self.sweeper.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(handle) = slot.take() {
            handle.abort();
        }
    }
}

impl Drop for NoveltyService {
    fn drop(&mut self) {
        self.stop_sweeper();
    }
}
