//! Football pricing: a step model on quarters.
//!
//! The fair value walks from the pregame baseline toward the scoreboard as
//! quarters burn off; a two-touchdown lead late is treated as decisive.

use crate::game::context::ScoreState;
use crate::strategy::{clamp_prob, OutcomePrices, SportModel};

/// Weight on the scoreboard (vs pregame) per remaining-time step.
fn scoreboard_weight(time_left_min: f64) -> f64 {
    if time_left_min > 45.0 {
        0.15
    } else if time_left_min > 30.0 {
        0.3
    } else if time_left_min > 15.0 {
        0.5
    } else if time_left_min > 5.0 {
        0.75
    } else {
        0.92
    }
}

pub struct FootballModel;

impl SportModel for FootballModel {
    fn price(&self, state: &ScoreState) -> OutcomePrices {
        let base = match state.pregame {
            Some(p) if p.home + p.away > 0.0 => p.home / (p.home + p.away),
            _ => 0.5,
        };

        let lead = state.home_score as f64 - state.away_score as f64;
        // ±14 points saturates the scoreboard term.
        let lead_term = 0.5 + (lead / 28.0).clamp(-0.5, 0.5);

        let weight = scoreboard_weight(state.time_left_min);
        let home = clamp_prob((1.0 - weight) * base + weight * lead_term);

        OutcomePrices {
            home,
            away: clamp_prob(1.0 - home),
            draw: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MatchStatus, Pregame};

    fn state(home: u32, away: u32, time_left: f64) -> ScoreState {
        ScoreState {
            home_score: home,
            away_score: away,
            period: "3rd quarter".into(),
            time_left_min: time_left,
            status: MatchStatus::Live,
            start_ts: 0,
            home_red_cards: 0,
            away_red_cards: 0,
            power_play: false,
            home_penalties: 0,
            away_penalties: 0,
            pregame: Some(Pregame {
                home: 0.6,
                draw: None,
                away: 0.4,
                expected_goals: None,
            }),
            pregame_applied: true,
        }
    }

    #[test]
    fn early_game_stays_close_to_pregame() {
        let prices = FootballModel.price(&state(0, 7, 52.5));
        assert!(prices.home > 0.45 && prices.home < 0.6, "{}", prices.home);
    }

    #[test]
    fn same_lead_counts_more_each_quarter() {
        let q2 = FootballModel.price(&state(14, 0, 37.5)).home;
        let q3 = FootballModel.price(&state(14, 0, 22.5)).home;
        let q4 = FootballModel.price(&state(14, 0, 7.5)).home;
        assert!(q2 < q3 && q3 < q4);
        assert!(q4 > 0.9);
    }

    #[test]
    fn trailing_favorite_late_is_priced_down() {
        let prices = FootballModel.price(&state(0, 10, 5.0));
        assert!(prices.home < 0.25, "{}", prices.home);
        assert!((prices.home + prices.away - 1.0).abs() < 1e-9);
    }
}
