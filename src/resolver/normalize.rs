//! Team-name normalization and fuzzy matching.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::models::Sport;

/// Colloquial → canonical, applied after normalization. Keys must already
/// be in normalized form.
const SOCCER_ALIASES: [(&str, &str); 8] = [
    ("man utd", "manchester united"),
    ("man united", "manchester united"),
    ("man city", "manchester city"),
    ("spurs", "tottenham hotspur"),
    ("wolves", "wolverhampton wanderers"),
    ("inter", "inter milan"),
    ("psg", "paris saint germain"),
    ("atletico", "atletico madrid"),
];

const HOCKEY_ALIASES: [(&str, &str); 6] = [
    ("vegas", "vegas golden knights"),
    ("tampa bay", "tampa bay lightning"),
    ("montreal", "montreal canadiens"),
    ("ny rangers", "new york rangers"),
    ("ny islanders", "new york islanders"),
    ("la kings", "los angeles kings"),
];

const FOOTBALL_ALIASES: [(&str, &str); 4] = [
    ("niners", "san francisco 49ers"),
    ("bucs", "tampa bay buccaneers"),
    ("pats", "new england patriots"),
    ("washington", "washington commanders"),
];

/// Tokens that mark a reserve or age-limited side. A senior team must never
/// match one of these.
const YOUTH_TAGS: [&str; 12] = [
    "u16", "u17", "u18", "u19", "u20", "u21", "u23", "b", "ii", "reserve", "reserves", "women",
];

/// NFD-decompose, drop combining marks, lowercase, collapse whitespace,
/// then apply the sport's alias table. Idempotent.
pub fn normalize_team(name: &str, sport: Sport) -> String {
    let stripped: String = name
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase();

    let collapsed = stripped
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    let aliases: &[(&str, &str)] = match sport {
        Sport::Soccer => &SOCCER_ALIASES,
        Sport::Hockey => &HOCKEY_ALIASES,
        Sport::Football => &FOOTBALL_ALIASES,
    };
    for (alias, canonical) in aliases {
        if collapsed == *alias {
            return canonical.to_string();
        }
    }
    collapsed
}

fn youth_tags(name: &str) -> Vec<&str> {
    name.split_whitespace()
        .filter(|token| YOUTH_TAGS.contains(token))
        .collect()
}

/// True when exactly one side carries a youth/reserve tag, or the tags
/// differ (senior vs U21, U19 vs U21, ...).
pub fn youth_mismatch(a: &str, b: &str) -> bool {
    youth_tags(a) != youth_tags(b)
}

/// Case-insensitive equality, or prefix/substring containment, on already
/// normalized names, guarded so a senior side never matches a reserve or
/// age-limited squad.
pub fn fuzzy_match(a: &str, b: &str) -> bool {
    if a.is_empty() || b.is_empty() {
        return false;
    }
    if youth_mismatch(a, b) {
        return false;
    }
    a == b || a.starts_with(b) || b.starts_with(a) || a.contains(b) || b.contains(a)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_is_idempotent() {
        for (name, sport) in [
            ("  Atlético   Madrid ", Sport::Soccer),
            ("Montréal Canadiens", Sport::Hockey),
            ("SAN FRANCISCO 49ers", Sport::Football),
        ] {
            let once = normalize_team(name, sport);
            let twice = normalize_team(&once, sport);
            assert_eq!(once, twice, "{name}");
        }
    }

    #[test]
    fn diacritics_and_whitespace_are_stripped() {
        assert_eq!(
            normalize_team("Atlético  Madrid", Sport::Soccer),
            "atletico madrid"
        );
        assert_eq!(
            normalize_team("Montréal Canadiens", Sport::Hockey),
            "montreal canadiens"
        );
    }

    #[test]
    fn aliases_apply_after_normalization() {
        assert_eq!(normalize_team("Man Utd", Sport::Soccer), "manchester united");
        assert_eq!(normalize_team("SPURS", Sport::Soccer), "tottenham hotspur");
        assert_eq!(normalize_team("Vegas", Sport::Hockey), "vegas golden knights");
    }

    #[test]
    fn fuzzy_match_orientations() {
        assert!(fuzzy_match("manchester united", "manchester united"));
        assert!(fuzzy_match("manchester", "manchester united"));
        assert!(fuzzy_match("detroit red wings", "detroit"));
        assert!(!fuzzy_match("manchester united", "liverpool"));
        assert!(!fuzzy_match("", "liverpool"));
    }

    #[test]
    fn youth_guard_blocks_reserve_sides() {
        assert!(!fuzzy_match("barcelona", "barcelona b"));
        assert!(!fuzzy_match("england", "england u21"));
        assert!(!fuzzy_match("england u19", "england u21"));
        // Same tag on both sides is a legitimate match.
        assert!(fuzzy_match("england u21", "england u21"));
    }
}
