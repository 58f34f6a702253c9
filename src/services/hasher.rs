//! Movement identity hashing.
//!
//! A movement's identity is a SHA-256 hash over its semantically
//! identifying fields. Text fields are normalized first so cosmetic
//! differences between fetches of the same event (casing, padding,
//! collapsed whitespace) never mint a second identity.

use crate::executor::RawMovement;
use crate::models::TribunalId;
use sha2::{Digest, Sha256};

/// Field separator inside the hash input; movements never contain it.
const FIELD_SEPARATOR: char = '\u{1f}';

/// Identity hasher for movements.
///
/// # Example
///
/// ```rust,ignore
/// let hash = MovementHasher::hash("00012345620245020001", &tribunal, &raw);
/// assert_eq!(hash.len(), 64);
/// ```
pub struct MovementHasher;

impl MovementHasher {
    /// Computes the identity hash for a raw movement.
    ///
    /// Covers (process, tribunal, date, title, description): the fields
    /// that identify the underlying event. Discovery timestamps, codes and
    /// metadata are deliberately excluded — they may differ between
    /// fetches of the same event.
    #[must_use]
    pub fn hash(process_number: &str, tribunal: &TribunalId, movement: &RawMovement) -> String {
        let input = [
            process_number,
            tribunal.as_str(),
            &movement.date.to_string(),
            &Self::normalize(&movement.title),
            &Self::normalize(&movement.description),
        ]
        .join(&FIELD_SEPARATOR.to_string());

        let mut hasher = Sha256::new();
        hasher.update(input.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Normalizes text for consistent hashing.
    ///
    /// Trims, lowercases and collapses whitespace runs to single spaces.
    #[must_use]
    pub fn normalize(text: &str) -> String {
        text.trim()
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn raw(title: &str, description: &str) -> RawMovement {
        RawMovement {
            date: NaiveDate::from_ymd_opt(2024, 3, 14).unwrap(),
            code: None,
            title: title.to_string(),
            description: description.to_string(),
            official: false,
            metadata: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_hash_is_64_hex_chars() {
        let hash = MovementHasher::hash(
            "00012345620245020001",
            &TribunalId::new("TRT2"),
            &raw("Despacho", "Vistos."),
        );
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_same_event_same_hash_across_fetches() {
        let tribunal = TribunalId::new("TRT2");
        let first = MovementHasher::hash("p1", &tribunal, &raw("Despacho", "Vistos os autos."));
        let refetched =
            MovementHasher::hash("p1", &tribunal, &raw("  DESPACHO ", "Vistos  os autos. "));
        assert_eq!(first, refetched);
    }

    #[test]
    fn test_hash_distinguishes_processes_and_tribunals() {
        let movement = raw("Despacho", "Vistos.");
        let a = MovementHasher::hash("p1", &TribunalId::new("TRT2"), &movement);
        let b = MovementHasher::hash("p2", &TribunalId::new("TRT2"), &movement);
        let c = MovementHasher::hash("p1", &TribunalId::new("TJSP"), &movement);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_hash_ignores_code_and_metadata() {
        let tribunal = TribunalId::new("TRT2");
        let mut with_extras = raw("Despacho", "Vistos.");
        with_extras.code = Some("123".to_string());
        with_extras.metadata = serde_json::json!({"página": 4});
        let plain = raw("Despacho", "Vistos.");
        assert_eq!(
            MovementHasher::hash("p1", &tribunal, &with_extras),
            MovementHasher::hash("p1", &tribunal, &plain)
        );
    }

    #[test]
    fn test_field_boundaries_matter() {
        let tribunal = TribunalId::new("TRT2");
        let a = MovementHasher::hash("p1", &tribunal, &raw("ab", "c"));
        let b = MovementHasher::hash("p1", &tribunal, &raw("a", "bc"));
        assert_ne!(a, b);
    }
}
