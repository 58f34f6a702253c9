//! Novelty notification sinks.
//!
//! Ingestion invokes the configured sink exactly once per created novelty.
//! Sinks are infallible by contract: delivery problems are theirs to log,
//! never a reason to fail ingestion.

use crate::models::{NoveltyPriority, TribunalId};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Event describing a newly created novelty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoveltyEvent {
    /// The CNJ process number (digits only).
    pub process_number: String,
    /// The tribunal that published the movement.
    pub tribunal: TribunalId,
    /// Identity hash of the underlying movement.
    pub movement_hash: String,
    /// Movement title.
    pub title: String,
    /// Classified priority.
    pub priority: NoveltyPriority,
    /// Unix timestamp (seconds) of novelty creation.
    pub created_at: u64,
}

/// Receiver of novelty events.
pub trait NotificationSink: Send + Sync {
    /// Called once per newly created novelty.
    fn notify(&self, event: &NoveltyEvent);
}

/// Sink that writes a structured log line per novelty.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn notify(&self, event: &NoveltyEvent) {
        tracing::info!(
            process = %event.process_number,
            tribunal = %event.tribunal,
            priority = %event.priority,
            title = %event.title,
            "New movement discovered"
        );
    }
}

const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Sink broadcasting events to in-process subscribers.
///
/// Embedders subscribe to drive push notifications or UI badges; a send
/// with no subscribers is a silent no-op.
pub struct BroadcastSink {
    sender: broadcast::Sender<NoveltyEvent>,
}

impl BroadcastSink {
    /// Creates a sink with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribes to future novelty events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<NoveltyEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl NotificationSink for BroadcastSink {
    fn notify(&self, event: &NoveltyEvent) {
        metrics::counter!("novelty_notifications_total").increment(1);
        if self.sender.send(event.clone()).is_err() {
            tracing::debug!(
                process = %event.process_number,
                "No notification subscribers, event dropped"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event() -> NoveltyEvent {
        NoveltyEvent {
            process_number: "00012345620245020001".to_string(),
            tribunal: TribunalId::new("TRT2"),
            movement_hash: "cd".repeat(32),
            title: "Sentença proferida".to_string(),
            priority: NoveltyPriority::Urgent,
            created_at: 1_700_000_000,
        }
    }

    #[tokio::test]
    async fn test_broadcast_sink_delivers_to_subscriber() {
        let sink = BroadcastSink::default();
        let mut receiver = sink.subscribe();
        sink.notify(&sample_event());

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.priority, NoveltyPriority::Urgent);
        assert_eq!(event.tribunal, TribunalId::new("TRT2"));
    }

    #[test]
    fn test_broadcast_sink_without_subscribers_is_noop() {
        let sink = BroadcastSink::default();
        // Must not panic or block.
        sink.notify(&sample_event());
    }

    #[test]
    fn test_log_sink_is_infallible() {
        LogSink.notify(&sample_event());
    }
}
