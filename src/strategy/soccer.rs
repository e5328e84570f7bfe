//! Soccer pricing: 3-way Poisson allocation of the remaining goal mass.
//!
//! Expected total goals g₀ comes from the pregame book (fallback 2.75);
//! the remaining mass shrinks with the clock and is split by relative
//! pregame strength. Red cards cut the short-handed side's share.

use crate::game::context::ScoreState;
use crate::models::Sport;
use crate::strategy::{clamp_prob, margin_mass, OutcomePrices, SportModel};

/// Per red card: scoring dampener for the carded side, small uplift for
/// the opponent playing against ten.
const RED_CARD_DAMPENER: f64 = 0.72;
const RED_CARD_OPPONENT_BOOST: f64 = 1.1;

pub struct SoccerModel;

impl SportModel for SoccerModel {
    fn price(&self, state: &ScoreState) -> OutcomePrices {
        let (strength_home, strength_away) = match state.pregame {
            Some(p) if p.home + p.away > 0.0 => {
                let total = p.home + p.away;
                (p.home / total, p.away / total)
            }
            _ => (0.5, 0.5),
        };

        let sport = Sport::Soccer;
        let g0 = state
            .pregame
            .and_then(|p| p.expected_goals)
            .unwrap_or_else(|| sport.default_total_goals());
        let time_frac = (state.time_left_min / sport.regulation_minutes()).clamp(0.0, 1.0);
        let remaining = g0 * time_frac;

        let mut lambda_home = remaining * strength_home;
        let mut lambda_away = remaining * strength_away;

        for _ in 0..state.home_red_cards {
            lambda_home *= RED_CARD_DAMPENER;
            lambda_away *= RED_CARD_OPPONENT_BOOST;
        }
        for _ in 0..state.away_red_cards {
            lambda_away *= RED_CARD_DAMPENER;
            lambda_home *= RED_CARD_OPPONENT_BOOST;
        }

        let diff = state.home_score as i32 - state.away_score as i32;
        let (win, level, lose) = margin_mass(diff, lambda_home, lambda_away);

        OutcomePrices {
            home: clamp_prob(win),
            away: clamp_prob(lose),
            draw: Some(clamp_prob(level)),
        }
    }
}
