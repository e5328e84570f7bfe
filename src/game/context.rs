//! Per-game state. A `GameContext` is owned by exactly one actor task and
//! mutated only from that task's mailbox jobs.

use std::collections::HashMap;
use std::sync::Arc;

use crate::game::overturn::OverturnMachine;
use crate::models::{
    GameUpdate, MarketData, MatchStatus, Outcome, PlacedOrder, Pregame, QuoteSnapshot, Sport,
};
use crate::observers::{GameEvent, GameObserver};

/// Outcome tickers resolved for one game.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTickers {
    pub event_ticker: String,
    pub home: String,
    pub away: String,
    /// Soccer only.
    pub draw: Option<String>,
}

impl ResolvedTickers {
    pub fn ticker_for(&self, outcome: Outcome) -> Option<&str> {
        match outcome {
            Outcome::Home => Some(self.home.as_str()),
            Outcome::Away => Some(self.away.as_str()),
            Outcome::Draw => self.draw.as_deref(),
        }
    }

    pub fn all(&self) -> Vec<String> {
        let mut tickers = vec![self.home.clone(), self.away.clone()];
        if let Some(draw) = &self.draw {
            tickers.push(draw.clone());
        }
        tickers
    }
}

/// Outcome ticker → last known quote.
#[derive(Debug, Default)]
pub struct TickerMap {
    quotes: HashMap<String, QuoteSnapshot>,
}

impl TickerMap {
    pub fn seed(&mut self, ticker: &str, quote: QuoteSnapshot) {
        self.quotes.insert(ticker.to_string(), quote);
    }

    pub fn apply(&mut self, update: &MarketData) {
        self.quotes
            .entry(update.ticker.clone())
            .or_default()
            .apply(update);
    }

    pub fn quote(&self, ticker: &str) -> Option<&QuoteSnapshot> {
        self.quotes.get(ticker)
    }
}

/// Live scoring state. One flat struct covers all three sports; the model
/// registry reads the fields its sport cares about.
#[derive(Debug, Clone)]
pub struct ScoreState {
    pub home_score: u32,
    pub away_score: u32,
    pub period: String,
    pub time_left_min: f64,
    pub status: MatchStatus,
    pub start_ts: i64,
    pub home_red_cards: u32,
    pub away_red_cards: u32,
    pub power_play: bool,
    pub home_penalties: u32,
    pub away_penalties: u32,
    pub pregame: Option<Pregame>,
    pub pregame_applied: bool,
}

impl ScoreState {
    pub fn score(&self) -> (u32, u32) {
        (self.home_score, self.away_score)
    }

    /// Signed lead for an outcome's team (positive = that team ahead).
    pub fn lead_for(&self, outcome: Outcome) -> i32 {
        let diff = self.home_score as i32 - self.away_score as i32;
        match outcome {
            Outcome::Home => diff,
            Outcome::Away => -diff,
            Outcome::Draw => 0,
        }
    }
}

/// Everything one actor owns for one game.
pub struct GameContext {
    pub eid: String,
    pub sport: Sport,
    pub league: String,
    pub home_team: String,
    pub away_team: String,
    pub home_norm: String,
    pub away_norm: String,
    pub mock: bool,
    pub state: ScoreState,
    pub tickers: ResolvedTickers,
    pub quotes: TickerMap,
    pub overturn: OverturnMachine,
    pub orders: Vec<PlacedOrder>,
    pub spent_cents: i64,
    /// Set when a model evaluation skipped outcomes for missing quotes; a
    /// MarketData arrival then re-runs the strategy.
    pub awaiting_quotes: bool,
    /// GameStart is delivered to observers exactly once.
    pub started_notified: bool,
    pub observers: Vec<Arc<dyn GameObserver>>,
}

impl GameContext {
    pub fn new(update: &GameUpdate, home_norm: String, away_norm: String, tickers: ResolvedTickers) -> Self {
        Self {
            eid: update.eid.clone(),
            sport: update.sport,
            league: update.league.clone(),
            home_team: update.home_team.clone(),
            away_team: update.away_team.clone(),
            home_norm,
            away_norm,
            mock: update.is_mock(),
            state: ScoreState {
                // Scores start at 0-0; the creating frame is processed
                // like any other, so a game discovered mid-flight gets an
                // immediate score event and pricing pass.
                home_score: 0,
                away_score: 0,
                period: update.period.clone(),
                time_left_min: update.time_left_min,
                status: MatchStatus::GameStart,
                start_ts: update.start_ts,
                home_red_cards: update.home_red_cards,
                away_red_cards: update.away_red_cards,
                power_play: update.power_play,
                home_penalties: update.home_penalties,
                away_penalties: update.away_penalties,
                pregame: update.pregame,
                pregame_applied: false,
            },
            tickers,
            quotes: TickerMap::default(),
            overturn: OverturnMachine::default(),
            orders: Vec::new(),
            spent_cents: 0,
            awaiting_quotes: false,
            started_notified: false,
            observers: Vec::new(),
        }
    }

    /// Latch the pregame strength the first time a frame carries one.
    pub fn apply_pregame(&mut self, pregame: Option<Pregame>) {
        if self.state.pregame_applied {
            return;
        }
        if let Some(pregame) = pregame.or(self.state.pregame) {
            self.state.pregame = Some(pregame);
            self.state.pregame_applied = true;
        }
    }

    pub fn record_fill(&mut self, order: PlacedOrder) {
        self.spent_cents += order.cost_cents;
        self.orders.push(order);
    }

    /// Notify every registered observer, in registration order.
    pub fn notify(&self, event: &GameEvent) {
        for observer in &self.observers {
            observer.on_event(self, event);
        }
    }
}
