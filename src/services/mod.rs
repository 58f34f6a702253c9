//! Service layer: ingestion, novelty lifecycle and query orchestration.

mod classifier;
mod hasher;
mod ingestion;
mod novelty;
mod query;

pub use classifier::{ClassificationRule, RULES, classify_priority, derive_tags};
pub use hasher::MovementHasher;
pub use ingestion::{IngestReport, IngestionService};
pub use novelty::{
    DEFAULT_NOVELTY_TTL_SECS, DEFAULT_SWEEP_INTERVAL, DEFAULT_UNREAD_LIMIT, NoveltyService,
    SweepReport,
};
pub use query::{CleanupReport, MovementQueryService, MovementQueryServiceBuilder, SystemStatistics};
