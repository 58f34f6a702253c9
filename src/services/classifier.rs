//! Keyword classification of movements.
//!
//! A single ordered rule table is the source of truth for both priority and
//! tags. Priority takes the first matching rule; tags collect every match.
//! Matching is case-insensitive over the normalized movement text and fully
//! deterministic, so the table can be unit-tested in isolation from
//! ingestion.

use crate::models::NoveltyPriority;
use crate::services::MovementHasher;

/// One classification rule: a keyword, the priority it implies when it is
/// the first match, and the tag it contributes.
#[derive(Debug, Clone, Copy)]
pub struct ClassificationRule {
    /// Lowercase keyword searched in the movement text.
    pub keyword: &'static str,
    /// Priority assigned when this is the first matching rule.
    pub priority: NoveltyPriority,
    /// Tag contributed whenever the keyword matches.
    pub tag: &'static str,
}

/// The rule table, in precedence order.
///
/// The first four groups fix the priority ladder (sentença above
/// decisão/audiência/intimação above despacho); the rest only contribute
/// tags and leave priority at the default.
pub const RULES: &[ClassificationRule] = &[
    ClassificationRule {
        keyword: "sentença",
        priority: NoveltyPriority::Urgent,
        tag: "sentença",
    },
    ClassificationRule {
        keyword: "decisão",
        priority: NoveltyPriority::High,
        tag: "decisão",
    },
    ClassificationRule {
        keyword: "audiência",
        priority: NoveltyPriority::High,
        tag: "audiência",
    },
    ClassificationRule {
        keyword: "intimação",
        priority: NoveltyPriority::High,
        tag: "intimação",
    },
    ClassificationRule {
        keyword: "despacho",
        priority: NoveltyPriority::Medium,
        tag: "despacho",
    },
    ClassificationRule {
        keyword: "recurso",
        priority: NoveltyPriority::Low,
        tag: "recurso",
    },
    ClassificationRule {
        keyword: "embargos",
        priority: NoveltyPriority::Low,
        tag: "embargos",
    },
    ClassificationRule {
        keyword: "liminar",
        priority: NoveltyPriority::Low,
        tag: "liminar",
    },
    ClassificationRule {
        keyword: "prazo",
        priority: NoveltyPriority::Low,
        tag: "prazo",
    },
    ClassificationRule {
        keyword: "citação",
        priority: NoveltyPriority::Low,
        tag: "citação",
    },
    ClassificationRule {
        keyword: "julgamento",
        priority: NoveltyPriority::Low,
        tag: "julgamento",
    },
    ClassificationRule {
        keyword: "arquivamento",
        priority: NoveltyPriority::Low,
        tag: "arquivamento",
    },
];

/// Classifies the priority of a movement text.
///
/// First matching rule wins; no match means [`NoveltyPriority::Low`].
#[must_use]
pub fn classify_priority(text: &str) -> NoveltyPriority {
    let normalized = MovementHasher::normalize(text);
    RULES
        .iter()
        .find(|rule| normalized.contains(rule.keyword))
        .map_or(NoveltyPriority::Low, |rule| rule.priority)
}

/// Derives the tag set for a movement text, in table order.
#[must_use]
pub fn derive_tags(text: &str) -> Vec<String> {
    let normalized = MovementHasher::normalize(text);
    RULES
        .iter()
        .filter(|rule| normalized.contains(rule.keyword))
        .map(|rule| rule.tag.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("Sentença proferida nos autos", NoveltyPriority::Urgent; "sentenca is urgent")]
    #[test_case("Decisão interlocutória publicada", NoveltyPriority::High; "decisao is high")]
    #[test_case("Audiência designada para 10/04", NoveltyPriority::High; "audiencia is high")]
    #[test_case("Intimação da parte autora", NoveltyPriority::High; "intimacao is high")]
    #[test_case("Despacho de mero expediente", NoveltyPriority::Medium; "despacho is medium")]
    #[test_case("Juntada de petição", NoveltyPriority::Low; "unmatched is low")]
    #[test_case("", NoveltyPriority::Low; "empty is low")]
    fn test_priority_ladder(text: &str, expected: NoveltyPriority) {
        assert_eq!(classify_priority(text), expected);
    }

    #[test]
    fn test_precedence_first_match_wins() {
        // Both keywords present: sentença outranks despacho regardless of
        // position in the text.
        let text = "Despacho determinando publicação da sentença";
        assert_eq!(classify_priority(text), NoveltyPriority::Urgent);
    }

    #[test]
    fn test_matching_is_case_insensitive() {
        assert_eq!(classify_priority("SENTENÇA PUBLICADA"), NoveltyPriority::Urgent);
    }

    #[test]
    fn test_tags_collect_all_matches_in_order() {
        let tags = derive_tags("Intimação sobre decisão e prazo de recurso");
        assert_eq!(tags, vec!["decisão", "intimação", "recurso", "prazo"]);
    }

    #[test]
    fn test_tags_empty_for_unmatched_text() {
        assert!(derive_tags("Conclusos ao relator").is_empty());
    }

    #[test]
    fn test_classification_is_deterministic() {
        let text = "Audiência de instrução; intimação das partes";
        assert_eq!(classify_priority(text), classify_priority(text));
        assert_eq!(derive_tags(text), derive_tags(text));
    }

    #[test]
    fn test_rule_table_priorities_descend() {
        // Table order must match the priority ladder so first-match-wins
        // always selects the strongest classification.
        let ranks: Vec<u8> = RULES
            .iter()
            .map(|rule| match rule.priority {
                NoveltyPriority::Urgent => 0,
                NoveltyPriority::High => 1,
                NoveltyPriority::Medium => 2,
                NoveltyPriority::Low => 3,
            })
            .collect();
        let mut sorted = ranks.clone();
        sorted.sort_unstable();
        assert_eq!(ranks, sorted);
    }
}
