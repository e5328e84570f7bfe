//! Training observer: one row per score-bearing transition, with the
//! quotes in force at that moment, for offline model fitting.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use tracing::warn;

use crate::game::context::GameContext;
use crate::models::Outcome;
use crate::observers::{GameEvent, GameObserver};

const TRAINING_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS training_snapshots (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    eid TEXT NOT NULL,
    sport TEXT NOT NULL,
    league TEXT NOT NULL,
    event TEXT NOT NULL,
    home_score INTEGER NOT NULL,
    away_score INTEGER NOT NULL,
    period TEXT NOT NULL,
    time_left_min REAL NOT NULL,
    home_yes_ask INTEGER,
    away_yes_ask INTEGER,
    draw_yes_ask INTEGER,
    recorded_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_training_eid ON training_snapshots(eid, recorded_at);
"#;

pub struct TrainingObserver {
    conn: Arc<Mutex<Connection>>,
}

impl TrainingObserver {
    pub fn new(conn: Arc<Mutex<Connection>>) -> anyhow::Result<Self> {
        conn.lock().execute_batch(TRAINING_SCHEMA)?;
        Ok(Self { conn })
    }

    fn ask(ctx: &GameContext, outcome: Outcome) -> Option<i64> {
        let ticker = ctx.tickers.ticker_for(outcome)?;
        ctx.quotes.quote(ticker).and_then(|q| q.yes_ask)
    }
}

impl GameObserver for TrainingObserver {
    fn name(&self) -> &'static str {
        "training"
    }

    fn on_event(&self, ctx: &GameContext, event: &GameEvent) {
        if !matches!(
            event,
            GameEvent::GameStart | GameEvent::ScoreChange { .. } | GameEvent::GameFinish
        ) {
            return;
        }
        let result = self.conn.lock().execute(
            "INSERT INTO training_snapshots
             (eid, sport, league, event, home_score, away_score, period,
              time_left_min, home_yes_ask, away_yes_ask, draw_yes_ask, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                ctx.eid,
                ctx.sport.as_str(),
                ctx.league,
                event.tag(),
                ctx.state.home_score,
                ctx.state.away_score,
                ctx.state.period,
                ctx.state.time_left_min,
                Self::ask(ctx, Outcome::Home),
                Self::ask(ctx, Outcome::Away),
                Self::ask(ctx, Outcome::Draw),
                Utc::now().timestamp(),
            ],
        );
        if let Err(e) = result {
            warn!(eid = %ctx.eid, error = %e, "training snapshot insert failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::context::ResolvedTickers;
    use crate::models::{GameUpdate, MatchStatus, Sport};

    fn ctx() -> GameContext {
        let update = GameUpdate {
            eid: "E5".into(),
            sport: Sport::Soccer,
            league: "EPL".into(),
            home_team: "Arsenal".into(),
            away_team: "Chelsea".into(),
            home_score: 1,
            away_score: 0,
            period: "2nd half".into(),
            time_left_min: 30.0,
            start_ts: 0,
            home_red_cards: 0,
            away_red_cards: 0,
            power_play: false,
            home_penalties: 0,
            away_penalties: 0,
            status: MatchStatus::Live,
            pregame: None,
        };
        GameContext::new(
            &update,
            "arsenal".into(),
            "chelsea".into(),
            ResolvedTickers {
                event_ticker: "EV".into(),
                home: "EV-ARS".into(),
                away: "EV-CHE".into(),
                draw: Some("EV-TIE".into()),
            },
        )
    }

    #[test]
    fn score_events_write_rows_and_info_does_not() {
        let conn = Arc::new(Mutex::new(Connection::open_in_memory().unwrap()));
        let observer = TrainingObserver::new(conn.clone()).unwrap();
        let ctx = ctx();

        observer.on_event(&ctx, &GameEvent::GameStart);
        observer.on_event(&ctx, &GameEvent::ScoreChange { overturn: false });
        observer.on_event(&ctx, &GameEvent::Info);
        observer.on_event(&ctx, &GameEvent::OverturnRejected);
        observer.on_event(&ctx, &GameEvent::GameFinish);

        let count: i64 = conn
            .lock()
            .query_row("SELECT COUNT(*) FROM training_snapshots", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 3);
    }
}
