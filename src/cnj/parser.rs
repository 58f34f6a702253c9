//! CNJ case-number parser.

use super::tribunals::{TribunalInfo, resolve_tribunal, segment_name};
use crate::models::TribunalId;
use once_cell::sync::Lazy;
use regex::Regex;

/// Canonical punctuated shape: `NNNNNNN-DD.AAAA.J.TR.OOOO`.
static CANONICAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{7})-(\d{2})\.(\d{4})\.(\d)\.(\d{2})\.(\d{4})$")
        .unwrap_or_else(|e| unreachable!("canonical pattern is fixed at compile time: {e}"))
});

/// A parsed CNJ case number.
///
/// Immutable value produced per parse call. `is_valid` reflects shape only:
/// check digits are not verified here (see [`verify_check_digits`]), and a
/// shape-valid number may still carry no resolved tribunal when its routing
/// key is absent from the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCaseNumber {
    /// Whether the input matched the 20-digit CNJ shape.
    pub is_valid: bool,
    /// Seven-digit sequential number.
    pub sequential: String,
    /// Two check digits, carried through unverified.
    pub check_digits: String,
    /// Four-digit filing year.
    pub year: String,
    /// Single-digit judicial segment code.
    pub segment: u8,
    /// Judicial-branch name for the segment, when the code is known.
    pub segment_label: Option<&'static str>,
    /// Two-digit tribunal region code.
    pub region: String,
    /// Four-digit origin unit code.
    pub origin: String,
    /// Resolved tribunal identity, when the routing key is registered.
    pub tribunal: Option<TribunalId>,
    /// Display name of the resolved tribunal.
    pub tribunal_name: Option<&'static str>,
}

impl ParsedCaseNumber {
    fn invalid() -> Self {
        Self {
            is_valid: false,
            sequential: String::new(),
            check_digits: String::new(),
            year: String::new(),
            segment: 0,
            segment_label: None,
            region: String::new(),
            origin: String::new(),
            tribunal: None,
            tribunal_name: None,
        }
    }

    /// Returns the routing key used for tribunal resolution.
    ///
    /// Labor-segment numbers key on `region + "_5"`; every other segment
    /// keys on the bare region code.
    #[must_use]
    pub fn routing_key(&self) -> String {
        if self.segment == 5 {
            format!("{}_5", self.region)
        } else {
            self.region.clone()
        }
    }

    /// Returns the 20 digits with no punctuation.
    #[must_use]
    pub fn digits(&self) -> String {
        format!(
            "{}{}{}{}{}{}",
            self.sequential, self.check_digits, self.year, self.segment, self.region, self.origin
        )
    }

    /// Returns the canonical punctuated rendering.
    #[must_use]
    pub fn canonical(&self) -> String {
        format!(
            "{}-{}.{}.{}.{}.{}",
            self.sequential, self.check_digits, self.year, self.segment, self.region, self.origin
        )
    }
}

/// Parses a loosely formatted CNJ case number.
///
/// Everything except digits, dots and dashes is stripped first. Input then
/// matches either the canonical punctuated shape or a bare run of exactly
/// 20 digits; anything else yields `is_valid = false`. Total and
/// deterministic: never panics, never touches shared state.
///
/// # Example
///
/// ```rust
/// use andamento::cnj::parse_case_number;
///
/// let parsed = parse_case_number("0001234-56.2024.5.02.0001");
/// assert!(parsed.is_valid);
/// assert_eq!(parsed.segment, 5);
/// assert_eq!(parsed.tribunal.unwrap().as_str(), "TRT2");
/// ```
#[must_use]
pub fn parse_case_number(input: &str) -> ParsedCaseNumber {
    let cleaned: String = input
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();

    let fields = if let Some(captures) = CANONICAL.captures(&cleaned) {
        let group = |i| captures.get(i).map_or("", |m| m.as_str()).to_string();
        Some((group(1), group(2), group(3), group(4), group(5), group(6)))
    } else {
        let digits: String = cleaned.chars().filter(char::is_ascii_digit).collect();
        if digits.len() == 20 {
            Some((
                digits[0..7].to_string(),
                digits[7..9].to_string(),
                digits[9..13].to_string(),
                digits[13..14].to_string(),
                digits[14..16].to_string(),
                digits[16..20].to_string(),
            ))
        } else {
            None
        }
    };

    let Some((sequential, check_digits, year, segment_str, region, origin)) = fields else {
        return ParsedCaseNumber::invalid();
    };

    // Single digit by construction.
    let segment = segment_str.parse::<u8>().unwrap_or(0);

    let mut parsed = ParsedCaseNumber {
        is_valid: true,
        sequential,
        check_digits,
        year,
        segment,
        segment_label: segment_name(segment),
        region,
        origin,
        tribunal: None,
        tribunal_name: None,
    };

    if let Some(TribunalInfo { slug, name }) = resolve_tribunal(&parsed.routing_key()) {
        parsed.tribunal = Some(TribunalId::new(slug));
        parsed.tribunal_name = Some(name);
    }

    parsed
}

/// Computes the two CNJ check digits for the given fields.
///
/// The numbering resolution uses ISO 7064 MOD 97-10 over the concatenation
/// `sequential · year · segment · region · origin`:
/// `DD = 98 - (fields · 100 mod 97)`.
///
/// Returns `None` if any field contains a non-digit.
#[must_use]
pub fn compute_check_digits(
    sequential: &str,
    year: &str,
    segment: u8,
    region: &str,
    origin: &str,
) -> Option<u8> {
    let base = format!("{sequential}{year}{segment}{region}{origin}");
    let remainder = mod97(&format!("{base}00"))?;
    u8::try_from(98 - remainder).ok()
}

/// Verifies a parsed number's check digits.
///
/// Opt-in strictness: [`parse_case_number`] deliberately accepts any
/// shape-valid number, so callers that need the checksum guarantee call
/// this separately. A number passes when the 20 digits rearranged as
/// `sequential · year · segment · region · origin · DD` are ≡ 1 (mod 97).
#[must_use]
pub fn verify_check_digits(parsed: &ParsedCaseNumber) -> bool {
    if !parsed.is_valid {
        return false;
    }
    let full = format!(
        "{}{}{}{}{}{}",
        parsed.sequential, parsed.year, parsed.segment, parsed.region, parsed.origin, parsed.check_digits
    );
    mod97(&full) == Some(1)
}

/// Remainder of a decimal digit string modulo 97, digit by digit.
fn mod97(digits: &str) -> Option<u64> {
    let mut remainder: u64 = 0;
    for c in digits.chars() {
        let d = c.to_digit(10)?;
        remainder = (remainder * 10 + u64::from(d)) % 97;
    }
    Some(remainder)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_canonical_form() {
        let parsed = parse_case_number("0001234-56.2024.5.02.0001");
        assert!(parsed.is_valid);
        assert_eq!(parsed.sequential, "0001234");
        assert_eq!(parsed.check_digits, "56");
        assert_eq!(parsed.year, "2024");
        assert_eq!(parsed.segment, 5);
        assert_eq!(parsed.segment_label, Some("Justiça do Trabalho"));
        assert_eq!(parsed.region, "02");
        assert_eq!(parsed.origin, "0001");
        assert_eq!(parsed.tribunal, Some(TribunalId::new("TRT2")));
        assert!(parsed.tribunal_name.unwrap().contains("2ª Região"));
    }

    #[test]
    fn test_parse_bare_digits() {
        let parsed = parse_case_number("00012345620245020001");
        assert!(parsed.is_valid);
        assert_eq!(parsed.sequential, "0001234");
        assert_eq!(parsed.check_digits, "56");
        assert_eq!(parsed.year, "2024");
        assert_eq!(parsed.segment, 5);
        assert_eq!(parsed.region, "02");
        assert_eq!(parsed.canonical(), "0001234-56.2024.5.02.0001");
    }

    #[test]
    fn test_parse_strips_noise_characters() {
        let parsed = parse_case_number("  0001234-56.2024.8.26.0100 (autos) ");
        assert!(parsed.is_valid);
        assert_eq!(parsed.tribunal, Some(TribunalId::new("TJSP")));
    }

    #[test]
    fn test_parse_rejects_wrong_shapes() {
        for input in [
            "",
            "abc",
            "123",
            "0001234-56.2024.5.02",
            "0001234-56.2024.5.02.00010",
            "000123456202450200011",
            "0001234_56.2024.5.02.0001x9",
        ] {
            let parsed = parse_case_number(input);
            assert!(!parsed.is_valid, "input {input:?} should be rejected");
            assert!(parsed.tribunal.is_none());
        }
    }

    #[test]
    fn test_parse_unknown_tribunal_stays_valid() {
        let parsed = parse_case_number("0001234-56.2024.8.99.0001");
        assert!(parsed.is_valid);
        assert!(parsed.tribunal.is_none());
        assert!(parsed.tribunal_name.is_none());
        assert_eq!(parsed.routing_key(), "99");
    }

    #[test]
    fn test_routing_key_labor_suffix() {
        let labor = parse_case_number("0001234-56.2024.5.02.0001");
        assert_eq!(labor.routing_key(), "02_5");
        let state = parse_case_number("0001234-56.2024.8.02.0001");
        assert_eq!(state.routing_key(), "02");
    }

    #[test]
    fn test_digits_reassembles_20() {
        let parsed = parse_case_number("0001234-56.2024.5.02.0001");
        assert_eq!(parsed.digits(), "00012345620245020001");
        assert_eq!(parsed.digits().len(), 20);
    }

    #[test]
    fn test_check_digit_verification() {
        // 98 - (000123420245020001 * 100 mod 97) = 95
        let valid = parse_case_number("0001234-95.2024.5.02.0001");
        assert!(verify_check_digits(&valid));

        // Same fields with well-shaped but incorrect digits fail.
        let invalid = parse_case_number("0001234-56.2024.5.02.0001");
        assert!(invalid.is_valid);
        assert!(!verify_check_digits(&invalid));
    }

    #[test]
    fn test_compute_check_digits_agrees_with_verify() {
        let dd = compute_check_digits("0001234", "2024", 5, "02", "0001").unwrap();
        assert_eq!(dd, 95);
        let number = format!("0001234-{dd:02}.2024.5.02.0001");
        assert!(verify_check_digits(&parse_case_number(&number)));
    }

    #[test]
    fn test_verify_rejects_invalid_parse() {
        assert!(!verify_check_digits(&parse_case_number("not a number")));
    }
}
