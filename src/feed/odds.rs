//! Vig removal: pre-match decimal odds → implied probabilities.

/// Strip the bookmaker margin from a 2-way book. Odds must be finite and
/// greater than 1.0 (a decimal quote at or below even money for both sides
/// is a feed error, not a book).
pub fn remove_vig2(home: f64, away: f64) -> Option<(f64, f64)> {
    let probs = remove_vig(&[home, away])?;
    Some((probs[0], probs[1]))
}

/// 3-way variant (soccer: home/draw/away).
pub fn remove_vig3(home: f64, draw: f64, away: f64) -> Option<(f64, f64, f64)> {
    let probs = remove_vig(&[home, draw, away])?;
    Some((probs[0], probs[1], probs[2]))
}

fn remove_vig(odds: &[f64]) -> Option<Vec<f64>> {
    if odds.iter().any(|d| !d.is_finite() || *d <= 1.0) {
        return None;
    }
    let raw: Vec<f64> = odds.iter().map(|d| 1.0 / d).collect();
    let total: f64 = raw.iter().sum();
    if total <= 0.0 {
        return None;
    }
    Some(raw.iter().map(|p| p / total).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_way_sums_to_one() {
        let (home, away) = remove_vig2(1.83, 2.10).unwrap();
        assert!((home + away - 1.0).abs() < 1e-12);
        assert!(home > away);
    }

    #[test]
    fn three_way_sums_to_one() {
        let (home, draw, away) = remove_vig3(2.20, 3.40, 3.60).unwrap();
        assert!((home + draw + away - 1.0).abs() < 1e-12);
        assert!(home > draw && draw > away);
    }

    #[test]
    fn idempotent_on_normalized_tuples() {
        // A vig-free tuple reinterpreted as decimal odds must come back
        // unchanged.
        let (home, draw, away) = remove_vig3(2.05, 3.50, 4.10).unwrap();
        let (h2, d2, a2) = remove_vig3(1.0 / home, 1.0 / draw, 1.0 / away).unwrap();
        assert!((home - h2).abs() < 1e-12);
        assert!((draw - d2).abs() < 1e-12);
        assert!((away - a2).abs() < 1e-12);
    }

    #[test]
    fn rejects_degenerate_odds() {
        assert!(remove_vig2(1.0, 2.0).is_none());
        assert!(remove_vig2(0.0, 2.0).is_none());
        assert!(remove_vig2(f64::NAN, 2.0).is_none());
        assert!(remove_vig3(2.0, f64::INFINITY, 3.0).is_none());
    }
}
