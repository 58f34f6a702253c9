//! # Andamento
//!
//! Tribunal movement query orchestration for CNJ-numbered legal processes.
//!
//! Andamento routes movement queries for Brazilian judicial processes to the
//! correct tribunal, enforces each tribunal's rate-limit policy through a
//! per-tribunal priority scheduler, deduplicates movements across re-fetches,
//! and surfaces newly observed movements as time-bounded novelty records.
//!
//! ## Features
//!
//! - CNJ case-number parsing and tribunal resolution (shape-lenient, with
//!   opt-in check-digit verification)
//! - One independent rate-limited worker per tribunal with priority-FIFO
//!   ordering, exponential backoff and a global failure circuit breaker
//! - SHA-256 movement identity hashing with idempotent ingestion
//! - Novelty records with a 48-hour visibility window and hourly sweeps
//! - Two-tier cache (in-memory + SQLite) with request coalescing and
//!   stale-while-revalidate
//!
//! ## Example
//!
//! ```rust,ignore
//! use andamento::{MovementQueryService, QueryOptions};
//!
//! let service = MovementQueryService::builder(fetcher, store).build();
//! let result = service
//!     .query_one("0001234-56.2024.5.02.0001", QueryOptions::default())
//!     .await;
//! println!("{} movements, {} new", result.total_movements, result.new_movements);
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

// Module declarations
pub mod api;
pub mod cache;
pub mod cnj;
pub mod config;
pub mod executor;
pub mod models;
pub mod notify;
pub mod observability;
pub mod scheduler;
pub mod services;
pub mod storage;

// Re-exports for convenience
pub use cnj::{ParsedCaseNumber, parse_case_number, verify_check_digits};
pub use config::AndamentoConfig;
pub use executor::{FixtureFetcher, MovementFetcher, QueryExecutor, RawMovement};
pub use models::{
    BatchResult, Movement, NoveltyPriority, NoveltyRecord, QueryOptions, QueryResult, TribunalId,
};
pub use scheduler::{TribunalLimitConfig, TribunalScheduler};
pub use services::{IngestionService, MovementQueryService, NoveltyService};
pub use storage::{CacheStore, MovementStore, SqliteStore};

/// Error type for andamento operations.
///
/// Uses `thiserror` for automatic `Display` and `Error` trait implementations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When | Retried |
/// |---------|-------------|---------|
/// | `InvalidCaseNumber` | Input does not match the 20-digit CNJ shape | never |
/// | `UnknownTribunal` | Number parses but maps to no registered tribunal | never |
/// | `QueueTimeout` | Request waited past its deadline in a tribunal queue | caller's choice, later |
/// | `Fetch` | Network or tribunal-side failure during a fetch | internally, up to `max_retries` |
/// | `Storage` | SQLite operation failed | never; results degrade to in-memory |
/// | `QueueCleared` | Pending request dropped by a bulk queue clear | never |
/// | `SchedulerClosed` | Submission after scheduler shutdown | never |
#[derive(Debug, ThisError)]
pub enum Error {
    /// The input string is not a syntactically valid CNJ case number.
    #[error("invalid case number: {0}")]
    InvalidCaseNumber(String),

    /// The case number parses but its tribunal key is not registered.
    ///
    /// Routing cannot proceed without a tribunal identity; callers must
    /// surface this to the user rather than retry.
    #[error("no tribunal registered for case number '{number}' (routing key '{key}')")]
    UnknownTribunal {
        /// The case number as given by the caller.
        number: String,
        /// The routing key derived from segment and region codes.
        key: String,
    },

    /// A queued request exceeded its deadline before the tribunal's quota
    /// allowed it to execute.
    #[error("request timed out after {waited_ms}ms in queue for tribunal {tribunal}")]
    QueueTimeout {
        /// The tribunal whose queue the request waited in.
        tribunal: String,
        /// How long the request waited, in milliseconds.
        waited_ms: u64,
    },

    /// A tribunal fetch failed.
    ///
    /// The scheduler retries this variant internally with exponential
    /// backoff; it only reaches callers once retries are exhausted.
    #[error("fetch against tribunal {tribunal} failed: {cause}")]
    Fetch {
        /// The tribunal the fetch was issued against.
        tribunal: String,
        /// The underlying cause.
        cause: String,
    },

    /// A storage operation failed.
    ///
    /// Persistence is best-effort on the ingestion path: freshly fetched
    /// movements are still returned even when they could not be saved.
    #[error("storage operation '{operation}' failed: {cause}")]
    Storage {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// The request was removed by a bulk queue clear before executing.
    #[error("queue for tribunal {tribunal} was cleared before execution")]
    QueueCleared {
        /// The tribunal whose queue was cleared.
        tribunal: String,
    },

    /// The scheduler has shut down and accepts no further work.
    #[error("scheduler is shut down")]
    SchedulerClosed,
}

impl Error {
    /// Builds a [`Error::Storage`] from an operation name and any error.
    pub fn storage(operation: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::Storage {
            operation: operation.into(),
            cause: cause.to_string(),
        }
    }

    /// Returns `true` if the scheduler may retry this error internally.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Fetch { .. })
    }
}

/// Result type alias for andamento operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Clock capability for wall-clock timestamps.
///
/// Injected wherever expiry decisions are made (novelty TTLs, cache rows) so
/// tests can drive time deterministically instead of sleeping.
pub trait Clock: Send + Sync {
    /// Returns the current Unix timestamp in seconds.
    fn now_ts(&self) -> u64;
}

/// System clock backed by `SystemTime`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ts(&self) -> u64 {
        current_timestamp()
    }
}

/// Returns the current Unix timestamp in seconds.
///
/// Centralized utility to avoid duplicate implementations across the
/// codebase. Uses `SystemTime::now()` with fallback to 0 if the system
/// clock is before the Unix epoch.
#[must_use]
pub fn current_timestamp() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidCaseNumber("abc".to_string());
        assert_eq!(err.to_string(), "invalid case number: abc");

        let err = Error::UnknownTribunal {
            number: "0001234-56.2024.8.99.0001".to_string(),
            key: "99".to_string(),
        };
        assert!(err.to_string().contains("routing key '99'"));

        let err = Error::Fetch {
            tribunal: "TJSP".to_string(),
            cause: "connection reset".to_string(),
        };
        assert!(err.to_string().contains("TJSP"));
        assert!(err.to_string().contains("connection reset"));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(
            Error::Fetch {
                tribunal: "TJSP".to_string(),
                cause: "timeout".to_string(),
            }
            .is_retryable()
        );
        assert!(!Error::InvalidCaseNumber("x".to_string()).is_retryable());
        assert!(
            !Error::QueueTimeout {
                tribunal: "TJSP".to_string(),
                waited_ms: 300_000,
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_system_clock_reasonable() {
        let clock = SystemClock;
        // 2020-01-01 as a sanity floor
        assert!(clock.now_ts() > 1_577_836_800);
    }
}
