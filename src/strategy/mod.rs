//! Strategy engine: price outcomes with the sport model, compare against
//! live quotes, and publish intent batches when the edge clears the bar.
//!
//! The engine runs on the owning actor's task and mutates nothing shared;
//! its only output is a synchronous `OrderIntents` publish.

pub mod football;
pub mod hockey;
pub mod soccer;

use std::collections::HashMap;
use std::sync::Arc;

use statrs::distribution::{Discrete, Poisson};
use tracing::debug;

use crate::bus::{BusEvent, EventBus};
use crate::game::context::{GameContext, ScoreState};
use crate::models::{MatchStatus, OrderIntent, Outcome, Side, Sport};

/// Default edge required before an intent is emitted.
pub const DEFAULT_MIN_EDGE: f64 = 0.02;

/// Fair probabilities for a game's outcomes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutcomePrices {
    pub home: f64,
    pub away: f64,
    pub draw: Option<f64>,
}

/// Per-sport pricing capability.
pub trait SportModel: Send + Sync {
    fn price(&self, state: &ScoreState) -> OutcomePrices;
}

pub struct StrategyConfig {
    /// Per-sport minimum edge; sports absent here use the default.
    pub min_edge: HashMap<Sport, f64>,
    /// When false, mock frames never reach the engine; when true, mock
    /// intents are forced to 1¢.
    pub mock_enabled: bool,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            min_edge: HashMap::new(),
            mock_enabled: false,
        }
    }
}

pub struct StrategyEngine {
    bus: Arc<EventBus>,
    models: HashMap<Sport, Box<dyn SportModel>>,
    config: StrategyConfig,
}

impl StrategyEngine {
    pub fn new(bus: Arc<EventBus>, config: StrategyConfig) -> Self {
        let mut models: HashMap<Sport, Box<dyn SportModel>> = HashMap::new();
        models.insert(Sport::Hockey, Box::new(hockey::HockeyModel));
        models.insert(Sport::Soccer, Box::new(soccer::SoccerModel));
        models.insert(Sport::Football, Box::new(football::FootballModel));
        Self {
            bus,
            models,
            config,
        }
    }

    fn min_edge(&self, sport: Sport) -> f64 {
        self.config
            .min_edge
            .get(&sport)
            .copied()
            .unwrap_or(DEFAULT_MIN_EDGE)
    }

    /// Evaluate the game and publish an intent batch when any outcome's
    /// fair value clears the quoted ask by the sport's minimum edge.
    pub fn evaluate(&self, ctx: &mut GameContext, overturn: bool) {
        if ctx.state.status == MatchStatus::GameFinish {
            return;
        }
        let Some(model) = self.models.get(&ctx.sport) else {
            return;
        };

        let prices = model.price(&ctx.state);
        let min_edge = self.min_edge(ctx.sport);

        let mut outcomes = vec![(Outcome::Home, prices.home), (Outcome::Away, prices.away)];
        if let Some(draw) = prices.draw {
            outcomes.push((Outcome::Draw, draw));
        }

        let mut intents = Vec::new();
        let mut awaiting = false;

        for (outcome, fair) in outcomes {
            let Some(ticker) = ctx.tickers.ticker_for(outcome) else {
                continue;
            };
            let ask = ctx.quotes.quote(ticker).and_then(|q| q.yes_ask);
            let ask = match ask {
                // An unknown or sub-penny quote gates this outcome until
                // market data lands.
                None => {
                    awaiting = true;
                    continue;
                }
                Some(a) if a < 1 => {
                    awaiting = true;
                    continue;
                }
                // Liquidity-taking stops below 99¢.
                Some(a) if a >= 99 => continue,
                Some(a) => a,
            };

            let edge = fair - ask as f64 / 100.0;
            if edge < min_edge {
                continue;
            }

            let limit_cents = if ctx.mock && self.config.mock_enabled {
                1
            } else {
                ask
            };
            intents.push(OrderIntent {
                ticker: ticker.to_string(),
                side: Side::Yes,
                outcome,
                limit_cents,
                home_score: ctx.state.home_score,
                away_score: ctx.state.away_score,
                sport: ctx.sport,
                league: ctx.league.clone(),
                eid: ctx.eid.clone(),
                reason: format!(
                    "{} fair {:.3} vs ask {}c (edge {:.1}%)",
                    outcome.as_str(),
                    fair,
                    ask,
                    edge * 100.0
                ),
                overturn,
                slam: false,
            });
        }

        ctx.awaiting_quotes = awaiting;

        if intents.is_empty() {
            debug!(eid = %ctx.eid, awaiting, "no edge");
            return;
        }
        self.bus.publish(BusEvent::OrderIntents(intents));
    }
}

/// Poisson pmf table 0..n; a vanishing rate degenerates to all mass at 0.
pub(crate) fn pmf_table(lambda: f64, n: usize) -> Vec<f64> {
    if lambda <= 1e-9 {
        let mut table = vec![0.0; n];
        table[0] = 1.0;
        return table;
    }
    // `Poisson::new` only rejects non-positive and non-finite rates.
    let poisson = Poisson::new(lambda).expect("positive finite rate");
    (0..n as u64).map(|k| poisson.pmf(k)).collect()
}

/// Split the final score-margin distribution into (home win, level, away
/// win) mass given the current margin and each side's remaining goal rate.
pub(crate) fn margin_mass(
    current_diff: i32,
    lambda_home: f64,
    lambda_away: f64,
) -> (f64, f64, f64) {
    const N: usize = 24;
    let home_pmf = pmf_table(lambda_home, N);
    let away_pmf = pmf_table(lambda_away, N);

    let mut win = 0.0;
    let mut level = 0.0;
    let mut lose = 0.0;
    for (i, ph) in home_pmf.iter().enumerate() {
        for (j, pa) in away_pmf.iter().enumerate() {
            let mass = ph * pa;
            let diff = current_diff + i as i32 - j as i32;
            if diff > 0 {
                win += mass;
            } else if diff == 0 {
                level += mass;
            } else {
                lose += mass;
            }
        }
    }

    // Renormalize the truncation remainder.
    let total = win + level + lose;
    (win / total, level / total, lose / total)
}

pub(crate) fn clamp_prob(p: f64) -> f64 {
    p.clamp(0.01, 0.99)
}
