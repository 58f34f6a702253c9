//! Timestamped sliding-window request log.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Rolling request counter over a fixed window.
///
/// Stores the timestamp of every admitted request and counts the ones still
/// inside the window. Unlike a counter that resets when the elapsed time
/// since the last request exceeds the window, this log can never over-admit
/// a burst that straddles a window boundary: any rolling window observes at
/// most the configured ceiling.
///
/// Uses `tokio::time::Instant` so paused-clock tests drive time
/// deterministically.
#[derive(Debug)]
pub struct SlidingWindow {
    window: Duration,
    log: VecDeque<Instant>,
}

impl SlidingWindow {
    /// Creates an empty log over the given window.
    #[must_use]
    pub const fn new(window: Duration) -> Self {
        Self {
            window,
            log: VecDeque::new(),
        }
    }

    /// Records an admitted request at `now`.
    pub fn record(&mut self, now: Instant) {
        self.log.push_back(now);
        self.evict_expired(now);
    }

    /// Returns how many requests remain inside the window at `now`.
    pub fn count(&mut self, now: Instant) -> usize {
        self.evict_expired(now);
        self.log.len()
    }

    /// Returns how long until a slot frees up under `limit`, or `None` when
    /// a request may be admitted right now.
    ///
    /// The wait is measured to the moment the oldest in-window entry slides
    /// out, plus one millisecond so the re-check lands strictly after it.
    pub fn wait_for_slot(&mut self, now: Instant, limit: u32) -> Option<Duration> {
        self.evict_expired(now);
        if self.log.len() < limit as usize {
            return None;
        }
        let oldest = *self.log.front()?;
        let freed_at = oldest + self.window;
        Some(freed_at.saturating_duration_since(now) + Duration::from_millis(1))
    }

    fn evict_expired(&mut self, now: Instant) {
        let threshold = now.checked_sub(self.window).unwrap_or(now);
        while self
            .log
            .front()
            .is_some_and(|timestamp| *timestamp <= threshold)
        {
            self.log.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_empty_window_admits() {
        let mut window = SlidingWindow::new(Duration::from_secs(60));
        assert_eq!(window.count(Instant::now()), 0);
        assert!(window.wait_for_slot(Instant::now(), 1).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_count_tracks_recorded_requests() {
        let mut window = SlidingWindow::new(Duration::from_secs(60));
        let now = Instant::now();
        window.record(now);
        window.record(now);
        assert_eq!(window.count(now), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_slide_out() {
        let mut window = SlidingWindow::new(Duration::from_secs(60));
        window.record(Instant::now());

        tokio::time::advance(Duration::from_secs(30)).await;
        window.record(Instant::now());
        assert_eq!(window.count(Instant::now()), 2);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(window.count(Instant::now()), 1);

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(window.count(Instant::now()), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_slot_at_ceiling() {
        let mut window = SlidingWindow::new(Duration::from_secs(60));
        let start = Instant::now();
        window.record(start);

        tokio::time::advance(Duration::from_secs(10)).await;
        let wait = window.wait_for_slot(Instant::now(), 1).unwrap();
        // The slot opens when the first entry leaves the window, 50s out.
        assert!(wait >= Duration::from_secs(50));
        assert!(wait <= Duration::from_secs(51));

        tokio::time::advance(wait).await;
        assert!(window.wait_for_slot(Instant::now(), 1).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_straddling_burst_not_over_admitted() {
        // A reset-on-idle counter would admit 2 at the boundary; the log
        // keeps the rolling window honest.
        let mut window = SlidingWindow::new(Duration::from_secs(60));
        window.record(Instant::now());
        tokio::time::advance(Duration::from_secs(59)).await;
        window.record(Instant::now());
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(window.count(Instant::now()), 1);
        assert!(window.wait_for_slot(Instant::now(), 2).is_none());
        assert!(window.wait_for_slot(Instant::now(), 1).is_some());
    }
}
