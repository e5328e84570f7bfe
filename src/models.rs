//! Shared domain types: sports, game snapshots, quotes, order intents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sports covered by the provider feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sport {
    Hockey,
    Soccer,
    Football,
}

impl Sport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sport::Hockey => "hockey",
            Sport::Soccer => "soccer",
            Sport::Football => "football",
        }
    }

    /// Webhook path segment → sport. `/webhook` and `/webhook/goalserve`
    /// are legacy hockey aliases and handled at the router.
    pub fn from_path(segment: &str) -> Option<Self> {
        match segment {
            "hockey" => Some(Sport::Hockey),
            "soccer" => Some(Sport::Soccer),
            "football" => Some(Sport::Football),
            _ => None,
        }
    }

    /// Regulation length in minutes.
    pub fn regulation_minutes(&self) -> f64 {
        match self {
            Sport::Hockey => 60.0,
            Sport::Soccer => 90.0,
            Sport::Football => 60.0,
        }
    }

    /// Expected total goals/points for a full game when the pregame book is
    /// silent. Feeds the Poisson remaining-mass models.
    pub fn default_total_goals(&self) -> f64 {
        match self {
            Sport::Hockey => 6.1,
            Sport::Soccer => 2.75,
            Sport::Football => 45.0,
        }
    }

    /// How far a market's expiration may sit from the game start before the
    /// resolver warns about the match.
    pub fn match_window(&self) -> chrono::Duration {
        match self {
            Sport::Hockey => chrono::Duration::hours(12),
            Sport::Soccer => chrono::Duration::hours(16),
            Sport::Football => chrono::Duration::hours(12),
        }
    }

    /// Soccer markets carry a third, draw outcome.
    pub fn has_draw(&self) -> bool {
        matches!(self, Sport::Soccer)
    }

    pub const ALL: [Sport; 3] = [Sport::Hockey, Sport::Soccer, Sport::Football];
}

impl std::fmt::Display for Sport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Game lifecycle as seen by the actor. The provider only ever reports
/// GameStart/Live/Overtime/GameFinish; the score-diff and overturn logic
/// infers the rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    GameStart,
    Live,
    Overtime,
    GameFinish,
    ScoreChange,
    OverturnPending,
    OverturnConfirmed,
    OverturnRejected,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatus::GameStart => "game_start",
            MatchStatus::Live => "live",
            MatchStatus::Overtime => "overtime",
            MatchStatus::GameFinish => "game_finish",
            MatchStatus::ScoreChange => "score_change",
            MatchStatus::OverturnPending => "overturn_pending",
            MatchStatus::OverturnConfirmed => "overturn_confirmed",
            MatchStatus::OverturnRejected => "overturn_rejected",
        }
    }
}

/// Vig-free pregame strength extracted from the pre-match book.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pregame {
    pub home: f64,
    /// Soccer only (3-way book).
    pub draw: Option<f64>,
    pub away: f64,
    /// Poisson expected total goals, when the book quotes a total.
    pub expected_goals: Option<f64>,
}

/// One normalized snapshot derived from a single provider frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameUpdate {
    pub eid: String,
    pub sport: Sport,
    pub league: String,
    pub home_team: String,
    pub away_team: String,
    pub home_score: u32,
    pub away_score: u32,
    /// Free-form provider period string, lowercased and trimmed.
    pub period: String,
    /// Minutes remaining in regulation, ≥ 0.
    pub time_left_min: f64,
    /// UTC seconds; 0 when the provider omits it.
    pub start_ts: i64,
    pub home_red_cards: u32,
    pub away_red_cards: u32,
    pub power_play: bool,
    pub home_penalties: u32,
    pub away_penalties: u32,
    pub status: MatchStatus,
    pub pregame: Option<Pregame>,
}

impl GameUpdate {
    pub fn score(&self) -> (u32, u32) {
        (self.home_score, self.away_score)
    }

    /// Mock games force 1¢ limit prices so nothing real fills.
    pub fn is_mock(&self) -> bool {
        self.eid.starts_with("MOCK-")
    }
}

/// Contract side on the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Yes,
    No,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Yes => "yes",
            Side::No => "no",
        }
    }
}

/// Which team (or the draw) an outcome ticker settles on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Home,
    Away,
    Draw,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Home => "home",
            Outcome::Away => "away",
            Outcome::Draw => "draw",
        }
    }
}

/// Last known exchange quote for one outcome ticker, in cents.
///
/// The ticker stream only carries bids; asks are the complement of the
/// opposite bid (yes_ask = 100 − no_bid).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct QuoteSnapshot {
    pub yes_bid: Option<i64>,
    pub yes_ask: Option<i64>,
    pub no_bid: Option<i64>,
    pub no_ask: Option<i64>,
    pub volume: i64,
    pub updated_at: Option<DateTime<Utc>>,
}

impl QuoteSnapshot {
    /// Fold a ticker delta into the snapshot; absent fields keep their
    /// previous value.
    pub fn apply(&mut self, update: &MarketData) {
        if let Some(yes_bid) = update.yes_bid {
            self.yes_bid = Some(yes_bid);
            self.no_ask = Some(100 - yes_bid);
        }
        if let Some(no_bid) = update.no_bid {
            self.no_bid = Some(no_bid);
            self.yes_ask = Some(100 - no_bid);
        }
        if let Some(volume) = update.volume {
            self.volume = volume;
        }
        self.updated_at = Some(update.received_at);
    }
}

/// One ticker update off the exchange stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketData {
    pub ticker: String,
    pub yes_bid: Option<i64>,
    pub no_bid: Option<i64>,
    pub volume: Option<i64>,
    pub received_at: DateTime<Utc>,
}

/// Quote-stream connectivity event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WsStatus {
    Connected,
    Disconnected { reason: String },
}

/// One limit order the strategy wants placed. Strategies publish these in
/// batches so a two-sided group travels atomically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderIntent {
    pub ticker: String,
    pub side: Side,
    pub outcome: Outcome,
    /// Limit price in cents (1..=99).
    pub limit_cents: i64,
    pub home_score: u32,
    pub away_score: u32,
    pub sport: Sport,
    pub league: String,
    pub eid: String,
    pub reason: String,
    /// Set when this emission follows a confirmed overturn; the lane clears
    /// the ticker's idempotency entries before checking.
    pub overturn: bool,
    /// Slam orders carry no expiration (arbitrage groups only).
    pub slam: bool,
}

impl OrderIntent {
    /// Idempotency key: one order per (ticker, score) per lane.
    pub fn idempotency_key(&self) -> String {
        format!("{}|{}-{}", self.ticker, self.home_score, self.away_score)
    }
}

/// An order the exchange accepted, as recorded in the game's history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacedOrder {
    pub order_id: String,
    pub ticker: String,
    pub side: Side,
    pub cost_cents: i64,
    pub placed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchKind {
    Regular,
    /// No-TTL arbitrage group.
    Slam,
}

impl BatchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchKind::Regular => "regular",
            BatchKind::Slam => "slam",
        }
    }
}

/// One leg of a placed batch, updated as the exchange responds and fills
/// backfill.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchLeg {
    pub ticker: String,
    pub side: Side,
    pub limit_cents: i64,
    pub cost_cents: i64,
    pub fill_count: i64,
    pub total_count: i64,
    pub order_id: Option<String>,
}

/// A batch of orders handed to the exchange, as seen by the tracking
/// observer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRecord {
    pub batch_id: String,
    pub eid: String,
    pub sport: Sport,
    pub league: String,
    pub home_team: String,
    pub away_team: String,
    pub kind: BatchKind,
    pub legs: Vec<BatchLeg>,
    pub home_score: u32,
    pub away_score: u32,
    pub period: String,
    pub time_left_min: f64,
    pub placed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sport_path_roundtrip() {
        for sport in Sport::ALL {
            assert_eq!(Sport::from_path(sport.as_str()), Some(sport));
        }
        assert_eq!(Sport::from_path("cricket"), None);
    }

    #[test]
    fn quote_apply_derives_asks() {
        let mut quote = QuoteSnapshot::default();
        quote.apply(&MarketData {
            ticker: "T".into(),
            yes_bid: Some(40),
            no_bid: Some(55),
            volume: Some(123),
            received_at: Utc::now(),
        });
        assert_eq!(quote.yes_ask, Some(45));
        assert_eq!(quote.no_ask, Some(60));
        assert_eq!(quote.volume, 123);

        // Absent fields keep their previous values.
        quote.apply(&MarketData {
            ticker: "T".into(),
            yes_bid: None,
            no_bid: Some(50),
            volume: None,
            received_at: Utc::now(),
        });
        assert_eq!(quote.yes_bid, Some(40));
        assert_eq!(quote.yes_ask, Some(50));
        assert_eq!(quote.volume, 123);
    }

    #[test]
    fn idempotency_key_includes_score() {
        let intent = OrderIntent {
            ticker: "KXNHLGAME-25NOV01DETCHI-DET".into(),
            side: Side::Yes,
            outcome: Outcome::Home,
            limit_cents: 70,
            home_score: 3,
            away_score: 0,
            sport: Sport::Hockey,
            league: "NHL".into(),
            eid: "G2".into(),
            reason: "edge".into(),
            overturn: false,
            slam: false,
        };
        assert_eq!(
            intent.idempotency_key(),
            "KXNHLGAME-25NOV01DETCHI-DET|3-0"
        );
    }
}
