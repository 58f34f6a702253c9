//! Static tribunal registry and judicial segment table.

use crate::models::TribunalId;

/// Registry entry for a known tribunal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TribunalInfo {
    /// Short routing slug, e.g. `"TJSP"` or `"TRT2"`.
    pub slug: &'static str,
    /// Human-readable tribunal name.
    pub name: &'static str,
}

/// Returns the judicial-branch name for a segment code.
#[must_use]
pub const fn segment_name(segment: u8) -> Option<&'static str> {
    match segment {
        1 => Some("Supremo Tribunal Federal"),
        2 => Some("Conselho Nacional de Justiça"),
        3 => Some("Superior Tribunal de Justiça"),
        4 => Some("Justiça Federal"),
        5 => Some("Justiça do Trabalho"),
        6 => Some("Justiça Eleitoral"),
        7 => Some("Justiça Militar da União"),
        8 => Some("Justiça Estadual"),
        9 => Some("Justiça Militar Estadual"),
        _ => None,
    }
}

/// State-court (segment 8) region codes, indexed by the two-digit TR field.
///
/// These are the codes fixed by the numbering resolution; the bare region
/// code is the routing key for every segment except labor.
const STATE_COURTS: &[(&str, &str, &str)] = &[
    ("01", "TJAC", "Tribunal de Justiça do Acre"),
    ("02", "TJAL", "Tribunal de Justiça de Alagoas"),
    ("03", "TJAP", "Tribunal de Justiça do Amapá"),
    ("04", "TJAM", "Tribunal de Justiça do Amazonas"),
    ("05", "TJBA", "Tribunal de Justiça da Bahia"),
    ("06", "TJCE", "Tribunal de Justiça do Ceará"),
    ("07", "TJDFT", "Tribunal de Justiça do Distrito Federal e dos Territórios"),
    ("08", "TJES", "Tribunal de Justiça do Espírito Santo"),
    ("09", "TJGO", "Tribunal de Justiça de Goiás"),
    ("10", "TJMA", "Tribunal de Justiça do Maranhão"),
    ("11", "TJMT", "Tribunal de Justiça de Mato Grosso"),
    ("12", "TJMS", "Tribunal de Justiça de Mato Grosso do Sul"),
    ("13", "TJMG", "Tribunal de Justiça de Minas Gerais"),
    ("14", "TJPA", "Tribunal de Justiça do Pará"),
    ("15", "TJPB", "Tribunal de Justiça da Paraíba"),
    ("16", "TJPR", "Tribunal de Justiça do Paraná"),
    ("17", "TJPE", "Tribunal de Justiça de Pernambuco"),
    ("18", "TJPI", "Tribunal de Justiça do Piauí"),
    ("19", "TJRJ", "Tribunal de Justiça do Rio de Janeiro"),
    ("20", "TJRN", "Tribunal de Justiça do Rio Grande do Norte"),
    ("21", "TJRS", "Tribunal de Justiça do Rio Grande do Sul"),
    ("22", "TJRO", "Tribunal de Justiça de Rondônia"),
    ("23", "TJRR", "Tribunal de Justiça de Roraima"),
    ("24", "TJSC", "Tribunal de Justiça de Santa Catarina"),
    ("25", "TJSE", "Tribunal de Justiça de Sergipe"),
    ("26", "TJSP", "Tribunal de Justiça de São Paulo"),
    ("27", "TJTO", "Tribunal de Justiça do Tocantins"),
];

/// Regional labor tribunals (segment 5), keyed by `TR + "_5"`.
const LABOR_COURTS: &[(&str, &str, &str)] = &[
    ("01_5", "TRT1", "Tribunal Regional do Trabalho da 1ª Região"),
    ("02_5", "TRT2", "Tribunal Regional do Trabalho da 2ª Região"),
    ("03_5", "TRT3", "Tribunal Regional do Trabalho da 3ª Região"),
    ("04_5", "TRT4", "Tribunal Regional do Trabalho da 4ª Região"),
    ("05_5", "TRT5", "Tribunal Regional do Trabalho da 5ª Região"),
    ("06_5", "TRT6", "Tribunal Regional do Trabalho da 6ª Região"),
    ("07_5", "TRT7", "Tribunal Regional do Trabalho da 7ª Região"),
    ("08_5", "TRT8", "Tribunal Regional do Trabalho da 8ª Região"),
    ("09_5", "TRT9", "Tribunal Regional do Trabalho da 9ª Região"),
    ("10_5", "TRT10", "Tribunal Regional do Trabalho da 10ª Região"),
    ("11_5", "TRT11", "Tribunal Regional do Trabalho da 11ª Região"),
    ("12_5", "TRT12", "Tribunal Regional do Trabalho da 12ª Região"),
    ("13_5", "TRT13", "Tribunal Regional do Trabalho da 13ª Região"),
    ("14_5", "TRT14", "Tribunal Regional do Trabalho da 14ª Região"),
    ("15_5", "TRT15", "Tribunal Regional do Trabalho da 15ª Região"),
    ("16_5", "TRT16", "Tribunal Regional do Trabalho da 16ª Região"),
    ("17_5", "TRT17", "Tribunal Regional do Trabalho da 17ª Região"),
    ("18_5", "TRT18", "Tribunal Regional do Trabalho da 18ª Região"),
    ("19_5", "TRT19", "Tribunal Regional do Trabalho da 19ª Região"),
    ("20_5", "TRT20", "Tribunal Regional do Trabalho da 20ª Região"),
    ("21_5", "TRT21", "Tribunal Regional do Trabalho da 21ª Região"),
    ("22_5", "TRT22", "Tribunal Regional do Trabalho da 22ª Região"),
    ("23_5", "TRT23", "Tribunal Regional do Trabalho da 23ª Região"),
    ("24_5", "TRT24", "Tribunal Regional do Trabalho da 24ª Região"),
];

/// Resolves a routing key to a registered tribunal.
///
/// The key is the bare two-digit region code, except for the labor segment
/// where it is `region + "_5"`. Returns `None` for keys outside the
/// registry; callers must treat that as "valid number, routing impossible".
#[must_use]
pub fn resolve_tribunal(key: &str) -> Option<TribunalInfo> {
    let lookup = |table: &[(&str, &str, &str)]| {
        table
            .iter()
            .find(|(k, _, _)| *k == key)
            .map(|(_, slug, name)| TribunalInfo { slug, name })
    };
    lookup(LABOR_COURTS).or_else(|| lookup(STATE_COURTS))
}

impl TribunalInfo {
    /// Returns the routing identity for this tribunal.
    #[must_use]
    pub fn id(&self) -> TribunalId {
        TribunalId::new(self.slug)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_names_cover_valid_codes() {
        for segment in 1..=9 {
            assert!(segment_name(segment).is_some(), "segment {segment}");
        }
        assert!(segment_name(0).is_none());
    }

    #[test]
    fn test_resolve_state_court() {
        let info = resolve_tribunal("26").unwrap();
        assert_eq!(info.slug, "TJSP");
        assert_eq!(info.id(), TribunalId::new("TJSP"));
    }

    #[test]
    fn test_resolve_labor_court_uses_suffixed_key() {
        let info = resolve_tribunal("02_5").unwrap();
        assert_eq!(info.slug, "TRT2");
        assert!(info.name.contains("2ª Região"));
        // The bare labor region code resolves to a state court instead.
        assert_eq!(resolve_tribunal("02").unwrap().slug, "TJAL");
    }

    #[test]
    fn test_resolve_unknown_key() {
        assert!(resolve_tribunal("99").is_none());
        assert!(resolve_tribunal("99_5").is_none());
        assert!(resolve_tribunal("").is_none());
    }

    #[test]
    fn test_all_27_state_courts_registered() {
        for region in 1..=27 {
            let key = format!("{region:02}");
            assert!(resolve_tribunal(&key).is_some(), "region {key}");
        }
    }

    #[test]
    fn test_all_24_labor_regions_registered() {
        for region in 1..=24 {
            let key = format!("{region:02}_5");
            assert!(resolve_tribunal(&key).is_some(), "region {key}");
        }
    }
}
