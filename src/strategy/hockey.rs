//! Hockey pricing: time-decayed Poisson convergence from the pregame
//! baseline toward the current lead.
//!
//! Remaining goal mass shrinks linearly with the clock and is split by
//! pregame strength; regulation-level mass goes to overtime, where the
//! pregame favorite keeps its edge.

use crate::game::context::ScoreState;
use crate::models::Sport;
use crate::strategy::{clamp_prob, margin_mass, OutcomePrices, SportModel};

/// Expected-goal uplift while a power play is running.
const POWER_PLAY_BOOST: f64 = 1.3;

pub struct HockeyModel;

impl SportModel for HockeyModel {
    fn price(&self, state: &ScoreState) -> OutcomePrices {
        let (strength_home, strength_away) = match state.pregame {
            Some(p) if p.home + p.away > 0.0 => {
                let total = p.home + p.away;
                (p.home / total, p.away / total)
            }
            _ => (0.5, 0.5),
        };

        let sport = Sport::Hockey;
        let time_frac = (state.time_left_min / sport.regulation_minutes()).clamp(0.0, 1.0);
        let remaining = state
            .pregame
            .and_then(|p| p.expected_goals)
            .unwrap_or_else(|| sport.default_total_goals())
            * time_frac;

        let mut lambda_home = remaining * strength_home;
        let mut lambda_away = remaining * strength_away;

        if state.power_play {
            // The shorthanded side is the one with more penalties drawn.
            if state.away_penalties > state.home_penalties {
                lambda_home *= POWER_PLAY_BOOST;
            } else if state.home_penalties > state.away_penalties {
                lambda_away *= POWER_PLAY_BOOST;
            }
        }

        let diff = state.home_score as i32 - state.away_score as i32;
        let (win, level, lose) = margin_mass(diff, lambda_home, lambda_away);

        // Ties head to overtime; split that mass by pregame strength.
        let home = win + level * strength_home;
        let away = lose + level * strength_away;

        OutcomePrices {
            home: clamp_prob(home),
            away: clamp_prob(away),
            draw: None,
        }
    }
}
