//! Query result shapes returned to callers and over HTTP.

use super::{Movement, TribunalId};
use serde::{Deserialize, Serialize};

/// Options controlling a single process query.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QueryOptions {
    /// Consult and populate the cache tiers.
    #[serde(default = "default_true")]
    pub use_cache: bool,
    /// Create novelty records for newly observed movements.
    #[serde(default = "default_true")]
    pub novelty_detection: bool,
    /// Persist fetched movements to storage.
    #[serde(default = "default_true")]
    pub persist: bool,
}

const fn default_true() -> bool {
    true
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            use_cache: true,
            novelty_detection: true,
            persist: true,
        }
    }
}

/// Result of querying one process number.
///
/// Always produced, success or not: per-item failures inside a batch are
/// encoded here rather than raised, so a requested process number is never
/// silently dropped from a batch result set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    /// Whether the query completed without error.
    pub success: bool,
    /// The process number as requested.
    pub process_number: String,
    /// Resolved tribunal, when the number routed successfully.
    pub tribunal: Option<TribunalId>,
    /// Movements known for the process after this query.
    pub movements: Vec<Movement>,
    /// Total movement count (`movements.len()`, denormalized for JSON readers).
    pub total_movements: usize,
    /// How many movements were first observed by this query.
    pub new_movements: usize,
    /// Wall time spent serving the query, in milliseconds.
    pub query_duration_ms: u64,
    /// Whether the result was served from a cache tier.
    pub from_cache: bool,
    /// Error message when `success` is false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryResult {
    /// Builds a failed result for a process number.
    #[must_use]
    pub fn failure(process_number: impl Into<String>, error: &crate::Error) -> Self {
        Self {
            success: false,
            process_number: process_number.into(),
            tribunal: None,
            movements: Vec::new(),
            total_movements: 0,
            new_movements: 0,
            query_duration_ms: 0,
            from_cache: false,
            error: Some(error.to_string()),
        }
    }
}

/// Aggregate summary of a batch query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Number of process numbers requested.
    pub total: usize,
    /// Queries that completed successfully.
    pub successful: usize,
    /// Queries that failed.
    pub failed: usize,
    /// Movements returned across all successful queries.
    pub total_movements: usize,
    /// Distinct tribunals touched by the batch.
    pub tribunals: Vec<TribunalId>,
}

/// Result of a batch query.
///
/// The batch itself never fails for per-item errors; `results` holds one
/// entry per requested number, in request order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    /// Whether every item in the batch succeeded.
    pub success: bool,
    /// Per-process results, in request order.
    pub results: Vec<QueryResult>,
    /// Aggregate summary.
    pub summary: BatchSummary,
    /// Error messages of failed items, for quick scanning.
    pub errors: Vec<String>,
    /// Whether all newly fetched movements were persisted.
    pub persisted: bool,
    /// Newly observed movements across the batch.
    pub new_movements: usize,
    /// Duplicate movements discarded across the batch.
    pub duplicates: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_default_all_enabled() {
        let options = QueryOptions::default();
        assert!(options.use_cache);
        assert!(options.novelty_detection);
        assert!(options.persist);
    }

    #[test]
    fn test_options_deserialize_missing_fields() {
        let options: QueryOptions = serde_json::from_str("{}").unwrap();
        assert!(options.use_cache);
        assert!(options.persist);
    }

    #[test]
    fn test_failure_result_carries_message() {
        let err = crate::Error::InvalidCaseNumber("12".to_string());
        let result = QueryResult::failure("12", &err);
        assert!(!result.success);
        assert_eq!(result.process_number, "12");
        assert!(result.error.unwrap().contains("invalid case number"));
    }

    #[test]
    fn test_error_field_omitted_on_success() {
        let result = QueryResult {
            success: true,
            process_number: "0".repeat(20),
            tribunal: Some(TribunalId::new("TJSP")),
            movements: Vec::new(),
            total_movements: 0,
            new_movements: 0,
            query_duration_ms: 12,
            from_cache: true,
            error: None,
        };
        let json = serde_json::to_string(&result).unwrap();
        assert!(!json.contains("\"error\""));
    }
}
