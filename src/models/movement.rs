//! Movement types.

use super::TribunalId;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A discrete procedural event recorded against a process by a tribunal.
///
/// Identity is the `content_hash`: re-fetching the same underlying event
/// always re-derives the same hash, which is what makes ingestion
/// idempotent across overlapping fetches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Movement {
    /// The CNJ process number this movement belongs to (digits only).
    pub process_number: String,
    /// The tribunal that published the movement.
    pub tribunal: TribunalId,
    /// Date of the movement as recorded by the tribunal.
    pub movement_date: NaiveDate,
    /// Optional tribunal-side movement code.
    pub code: Option<String>,
    /// Short title of the movement.
    pub title: String,
    /// Full description text.
    pub description: String,
    /// Whether the movement came from an official publication.
    pub official: bool,
    /// SHA-256 identity hash over the semantically identifying fields.
    pub content_hash: String,
    /// Unix timestamp (seconds) when this movement was first observed.
    pub discovered_at: u64,
    /// Whether this movement was new when last ingested.
    pub is_new: bool,
    /// Free-form metadata carried from the fetch layer.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,
}

impl Movement {
    /// Returns the text used for keyword classification (title + description).
    #[must_use]
    pub fn classification_text(&self) -> String {
        format!("{} {}", self.title, self.description)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Movement {
        Movement {
            process_number: "00012345620245020001".to_string(),
            tribunal: TribunalId::new("TRT2"),
            movement_date: NaiveDate::from_ymd_opt(2024, 3, 14).unwrap(),
            code: Some("123".to_string()),
            title: "Despacho".to_string(),
            description: "Vistos os autos.".to_string(),
            official: true,
            content_hash: "ab".repeat(32),
            discovered_at: 1_700_000_000,
            is_new: true,
            metadata: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_serde_roundtrip() {
        let movement = sample();
        let json = serde_json::to_string(&movement).unwrap();
        let back: Movement = serde_json::from_str(&json).unwrap();
        assert_eq!(back.content_hash, movement.content_hash);
        assert_eq!(back.movement_date, movement.movement_date);
        assert_eq!(back.tribunal, movement.tribunal);
    }

    #[test]
    fn test_null_metadata_omitted() {
        let json = serde_json::to_string(&sample()).unwrap();
        assert!(!json.contains("metadata"));
    }

    #[test]
    fn test_classification_text_joins_title_and_description() {
        let text = sample().classification_text();
        assert!(text.contains("Despacho"));
        assert!(text.contains("Vistos"));
    }
}
