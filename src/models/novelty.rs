//! Novelty records and priorities.

use super::TribunalId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Priority assigned to a novelty by the keyword classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoveltyPriority {
    /// Judgment rendered (sentença) — immediate attention.
    Urgent,
    /// Decision, hearing or summons.
    High,
    /// Routine judicial order (despacho).
    Medium,
    /// Everything else.
    #[default]
    Low,
}

impl NoveltyPriority {
    /// Returns all priority variants, highest first.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Urgent, Self::High, Self::Medium, Self::Low]
    }

    /// Returns the priority as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Urgent => "urgent",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }

    /// Parses a priority string (case-insensitive).
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "urgent" => Some(Self::Urgent),
            "high" => Some(Self::High),
            "medium" => Some(Self::Medium),
            "low" => Some(Self::Low),
            _ => None,
        }
    }
}

impl fmt::Display for NoveltyPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recently discovered movement awaiting acknowledgement.
///
/// A novelty always refers to exactly one movement (by content hash) and is
/// only ever created for a movement first observed now. Visibility is
/// bounded: once `expires_at` passes, the record is swept without touching
/// the underlying persisted movement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoveltyRecord {
    /// Unique identifier.
    pub id: String,
    /// The CNJ process number (digits only).
    pub process_number: String,
    /// Identity hash of the movement this novelty wraps.
    pub movement_hash: String,
    /// Title of the movement, denormalized for listing without a join.
    pub title: String,
    /// The tribunal that published the movement.
    pub tribunal: TribunalId,
    /// Classified priority.
    pub priority: NoveltyPriority,
    /// Keyword tags derived from the movement text.
    pub tags: Vec<String>,
    /// Whether the novelty has been acknowledged.
    pub read: bool,
    /// Unix timestamp (seconds) when the novelty was created.
    pub created_at: u64,
    /// Unix timestamp (seconds) after which the novelty is swept.
    pub expires_at: u64,
}

impl NoveltyRecord {
    /// Returns the remaining visibility window in whole hours at `now`.
    ///
    /// Derived, never stored. Zero once expired.
    #[must_use]
    pub const fn remaining_hours(&self, now: u64) -> u64 {
        if now >= self.expires_at {
            0
        } else {
            (self.expires_at - now) / 3600
        }
    }

    /// Returns `true` if the visibility window has elapsed at `now`.
    #[must_use]
    pub const fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }
}

/// Aggregated novelty statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NoveltyStats {
    /// Total novelty records currently held (read and unread).
    pub total: u64,
    /// Unread, unexpired novelty records.
    pub unread: u64,
    /// Unread counts keyed by priority name.
    pub by_priority: HashMap<String, u64>,
}
