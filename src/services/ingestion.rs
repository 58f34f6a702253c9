//! Movement ingestion: deduplication, persistence and novelty creation.
//!
//! Raw movements from a fetch may overlap arbitrarily with what is already
//! stored for the process. Ingestion computes each movement's identity hash,
//! discards the ones whose hash is already known, persists the rest and
//! registers a novelty per new movement. Re-ingesting the same batch stores
//! nothing and creates nothing.
//!
//! Persistence is best-effort: a failing store is logged and degrades the
//! report, it never costs the caller the freshly fetched movements.

use crate::executor::RawMovement;
use crate::models::{Movement, NoveltyRecord, TribunalId};
use crate::notify::{NotificationSink, NoveltyEvent};
use crate::services::classifier::{classify_priority, derive_tags};
use crate::services::novelty::DEFAULT_NOVELTY_TTL_SECS;
use crate::services::MovementHasher;
use crate::storage::MovementStore;
use crate::Clock;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

/// Outcome of ingesting one raw batch.
#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    /// Movements first observed by this ingestion, in fetch order.
    pub movements: Vec<Movement>,
    /// How many movements were new.
    pub new_movements: usize,
    /// How many were discarded as already known.
    pub duplicates: usize,
    /// Novelty records actually created.
    pub novelties_created: usize,
    /// Whether every new movement reached the store.
    pub persisted: bool,
}

/// Deduplicating ingestion pipeline.
#[derive(Clone)]
pub struct IngestionService {
    store: Arc<dyn MovementStore>,
    sink: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    novelty_ttl_secs: u64,
}

impl IngestionService {
    /// Creates an ingestion service over its collaborators.
    #[must_use]
    pub fn new(
        store: Arc<dyn MovementStore>,
        sink: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            sink,
            clock,
            novelty_ttl_secs: DEFAULT_NOVELTY_TTL_SECS,
        }
    }

    /// Overrides the novelty visibility window.
    #[must_use]
    pub const fn with_novelty_ttl_secs(mut self, secs: u64) -> Self {
        self.novelty_ttl_secs = secs;
        self
    }

    /// Ingests one raw batch for a process.
    ///
    /// `create_novelties` and `persist` map to the caller's query options
    /// and are independent of each other. When the stored hash set cannot
    /// be read, dedup degrades to batch-internal only and novelty creation
    /// is skipped for the run — re-announcing every old event would be
    /// worse than announcing none.
    #[tracing::instrument(skip(self, raw), fields(process = %process_number, tribunal = %tribunal, batch = raw.len()))]
    pub fn ingest(
        &self,
        process_number: &str,
        tribunal: &TribunalId,
        raw: &[RawMovement],
        create_novelties: bool,
        persist: bool,
    ) -> IngestReport {
        let (mut seen, dedup_degraded) = match self.store.known_hashes(process_number) {
            Ok(hashes) => (hashes, false),
            Err(e) => {
                tracing::warn!(error = %e, "Stored hashes unavailable, dedup degraded to batch scope");
                metrics::counter!("ingest_dedup_degraded_total").increment(1);
                (HashSet::new(), true)
            },
        };

        let now = self.clock.now_ts();
        let mut report = IngestReport {
            persisted: true,
            ..IngestReport::default()
        };

        for movement in raw {
            let hash = MovementHasher::hash(process_number, tribunal, movement);
            if !seen.insert(hash.clone()) {
                report.duplicates += 1;
                continue;
            }
            report.movements.push(Movement {
                process_number: process_number.to_string(),
                tribunal: tribunal.clone(),
                movement_date: movement.date,
                code: movement.code.clone(),
                title: movement.title.clone(),
                description: movement.description.clone(),
                official: movement.official,
                content_hash: hash,
                discovered_at: now,
                is_new: true,
                metadata: movement.metadata.clone(),
            });
        }
        report.new_movements = report.movements.len();

        if persist && !report.movements.is_empty() {
            match self.store.save_movements(&report.movements) {
                Ok(inserted) => {
                    if inserted < report.new_movements {
                        // A concurrent ingestion won the race for some rows.
                        tracing::debug!(
                            expected = report.new_movements,
                            inserted,
                            "Some movements were already stored"
                        );
                    }
                },
                Err(e) => {
                    tracing::warn!(error = %e, "Movements not persisted");
                    report.persisted = false;
                },
            }
        }

        if create_novelties && !dedup_degraded {
            for movement in &report.movements {
                if self.register_novelty(movement, now) {
                    report.novelties_created += 1;
                }
            }
        }

        metrics::counter!("ingest_movements_total", "outcome" => "new")
            .increment(u64::try_from(report.new_movements).unwrap_or(u64::MAX));
        metrics::counter!("ingest_movements_total", "outcome" => "duplicate")
            .increment(u64::try_from(report.duplicates).unwrap_or(u64::MAX));
        tracing::debug!(
            new = report.new_movements,
            duplicates = report.duplicates,
            novelties = report.novelties_created,
            "Batch ingested"
        );
        report
    }

    /// Creates, stores and announces one novelty. Returns `true` on success.
    fn register_novelty(&self, movement: &Movement, now: u64) -> bool {
        let text = movement.classification_text();
        let novelty = NoveltyRecord {
            id: Uuid::new_v4().to_string(),
            process_number: movement.process_number.clone(),
            movement_hash: movement.content_hash.clone(),
            title: movement.title.clone(),
            tribunal: movement.tribunal.clone(),
            priority: classify_priority(&text),
            tags: derive_tags(&text),
            read: false,
            created_at: now,
            expires_at: now + self.novelty_ttl_secs,
        };

        if let Err(e) = self.store.save_novelty(&novelty) {
            tracing::warn!(hash = %movement.content_hash, error = %e, "Novelty not stored");
            return false;
        }

        self.sink.notify(&NoveltyEvent {
            process_number: novelty.process_number.clone(),
            tribunal: novelty.tribunal.clone(),
            movement_hash: novelty.movement_hash.clone(),
            title: novelty.title.clone(),
            priority: novelty.priority,
            created_at: novelty.created_at,
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NoveltyPriority;
    use crate::storage::SqliteStore;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    struct FixedClock(AtomicU64);

    impl Clock for FixedClock {
        fn now_ts(&self) -> u64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[derive(Default)]
    struct CollectingSink {
        events: Mutex<Vec<NoveltyEvent>>,
    }

    impl NotificationSink for CollectingSink {
        fn notify(&self, event: &NoveltyEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    fn raw(title: &str) -> RawMovement {
        RawMovement {
            date: NaiveDate::from_ymd_opt(2024, 3, 14).unwrap(),
            code: None,
            title: title.to_string(),
            description: "texto da movimentação".to_string(),
            official: true,
            metadata: serde_json::Value::Null,
        }
    }

    fn service() -> (IngestionService, Arc<SqliteStore>, Arc<CollectingSink>) {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let sink = Arc::new(CollectingSink::default());
        let clock = Arc::new(FixedClock(AtomicU64::new(1_700_000_000)));
        let service = IngestionService::new(
            Arc::clone(&store) as Arc<dyn MovementStore>,
            Arc::clone(&sink) as Arc<dyn NotificationSink>,
            clock,
        );
        (service, store, sink)
    }

    #[test]
    fn test_ingest_is_idempotent() {
        let (service, store, _sink) = service();
        let tribunal = TribunalId::new("TRT2");
        let batch: Vec<RawMovement> =
            ["a", "b", "c", "d", "e"].iter().map(|t| raw(t)).collect();

        let first = service.ingest("p1", &tribunal, &batch, true, true);
        assert_eq!(first.new_movements, 5);
        assert_eq!(first.duplicates, 0);

        let second = service.ingest("p1", &tribunal, &batch, true, true);
        assert_eq!(second.new_movements, 0);
        assert_eq!(second.duplicates, 5);
        assert_eq!(second.novelties_created, 0);
        assert_eq!(store.movement_count().unwrap(), 5);
    }

    #[test]
    fn test_ingest_dedupes_within_batch() {
        let (service, store, _sink) = service();
        let tribunal = TribunalId::new("TJSP");
        let batch = vec![raw("Despacho"), raw("Despacho"), raw("Sentença")];

        let report = service.ingest("p1", &tribunal, &batch, false, true);
        assert_eq!(report.new_movements, 2);
        assert_eq!(report.duplicates, 1);
        assert_eq!(store.movement_count().unwrap(), 2);
    }

    #[test]
    fn test_novelties_classified_and_announced() {
        let (service, store, sink) = service();
        let tribunal = TribunalId::new("TRT2");
        let batch = vec![raw("Sentença proferida"), raw("Juntada de petição")];

        let report = service.ingest("p1", &tribunal, &batch, true, true);
        assert_eq!(report.novelties_created, 2);

        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].priority, NoveltyPriority::Urgent);
        assert_eq!(events[1].priority, NoveltyPriority::Low);

        let unread = store.unread_novelties(10, 1_700_000_001).unwrap();
        assert_eq!(unread.len(), 2);
        assert_eq!(unread[0].expires_at, 1_700_000_000 + 48 * 3600);
    }

    #[test]
    fn test_novelty_detection_can_be_disabled() {
        let (service, store, sink) = service();
        let report =
            service.ingest("p1", &TribunalId::new("TJSP"), &[raw("Sentença")], false, true);
        assert_eq!(report.new_movements, 1);
        assert_eq!(report.novelties_created, 0);
        assert!(sink.events.lock().unwrap().is_empty());
        assert!(store.unread_novelties(10, 1_700_000_001).unwrap().is_empty());
    }

    #[test]
    fn test_persistence_can_be_disabled() {
        let (service, store, _sink) = service();
        let report =
            service.ingest("p1", &TribunalId::new("TJSP"), &[raw("Despacho")], false, false);
        assert_eq!(report.new_movements, 1);
        assert!(report.persisted);
        assert_eq!(store.movement_count().unwrap(), 0);
    }

    #[test]
    fn test_empty_batch_is_noop() {
        let (service, _store, sink) = service();
        let report = service.ingest("p1", &TribunalId::new("TJSP"), &[], true, true);
        assert_eq!(report.new_movements, 0);
        assert_eq!(report.duplicates, 0);
        assert!(report.persisted);
        assert!(sink.events.lock().unwrap().is_empty());
    }
}
