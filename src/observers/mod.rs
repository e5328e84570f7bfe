//! Game observers: side channels notified on every state transition.
//!
//! Observers run synchronously on the owning actor's task and must return
//! quickly; anything slow (price captures, fill polls) is scheduled onto
//! background tasks from inside the callback.

pub mod tracking;
pub mod training;

use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{params, Connection};
use tracing::{debug, info, warn};

use crate::game::context::GameContext;
use crate::models::{BatchRecord, PlacedOrder};

/// State transition tags delivered to observers.
#[derive(Debug, Clone)]
pub enum GameEvent {
    GameStart,
    ScoreChange { overturn: bool },
    OverturnPending { old: (u32, u32), new: (u32, u32) },
    OverturnRejected,
    /// Non-score update: period tick, power-play flip, red card.
    Info,
    BatchPlaced(Arc<BatchRecord>),
    OrderFill { order: PlacedOrder },
    GameFinish,
}

impl GameEvent {
    pub fn tag(&self) -> &'static str {
        match self {
            GameEvent::GameStart => "game_start",
            GameEvent::ScoreChange { overturn: false } => "score_change",
            GameEvent::ScoreChange { overturn: true } => "score_change_overturn",
            GameEvent::OverturnPending { .. } => "overturn_pending",
            GameEvent::OverturnRejected => "overturn_rejected",
            GameEvent::Info => "info",
            GameEvent::BatchPlaced(_) => "batch_placed",
            GameEvent::OrderFill { .. } => "order_fill",
            GameEvent::GameFinish => "game_finish",
        }
    }
}

pub trait GameObserver: Send + Sync {
    fn name(&self) -> &'static str;
    fn on_event(&self, ctx: &GameContext, event: &GameEvent);
}

/// Structured-log observer; the only one with no storage behind it.
pub struct DisplayObserver;

impl GameObserver for DisplayObserver {
    fn name(&self) -> &'static str {
        "display"
    }

    fn on_event(&self, ctx: &GameContext, event: &GameEvent) {
        match event {
            GameEvent::ScoreChange { overturn } => info!(
                eid = %ctx.eid,
                sport = %ctx.sport,
                score = format!("{}-{}", ctx.state.home_score, ctx.state.away_score),
                overturn,
                "score change"
            ),
            GameEvent::OverturnPending { old, new } => warn!(
                eid = %ctx.eid,
                old = format!("{}-{}", old.0, old.1),
                new = format!("{}-{}", new.0, new.1),
                "score drop pending confirmation"
            ),
            GameEvent::OverturnRejected => {
                info!(eid = %ctx.eid, "score drop rejected, keeping stored score")
            }
            GameEvent::GameFinish => info!(
                eid = %ctx.eid,
                final_score = format!("{}-{}", ctx.state.home_score, ctx.state.away_score),
                spent_cents = ctx.spent_cents,
                "game finished"
            ),
            GameEvent::BatchPlaced(batch) => info!(
                eid = %ctx.eid,
                batch_id = %batch.batch_id,
                legs = batch.legs.len(),
                "order batch placed"
            ),
            GameEvent::OrderFill { order } => info!(
                eid = %ctx.eid,
                order_id = %order.order_id,
                ticker = %order.ticker,
                cost_cents = order.cost_cents,
                "order filled"
            ),
            GameEvent::GameStart | GameEvent::Info => {
                debug!(eid = %ctx.eid, event = event.tag(), "game update")
            }
        }
    }
}

/// Appends every overturn transition to sqlite for later provider-quality
/// review.
pub struct OverturnLogObserver {
    conn: Arc<Mutex<Connection>>,
}

const OVERTURN_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS overturn_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    eid TEXT NOT NULL,
    sport TEXT NOT NULL,
    transition TEXT NOT NULL,
    old_home INTEGER,
    old_away INTEGER,
    new_home INTEGER,
    new_away INTEGER,
    logged_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
);
CREATE INDEX IF NOT EXISTS idx_overturn_eid ON overturn_log(eid, logged_at);
"#;

impl OverturnLogObserver {
    pub fn new(conn: Arc<Mutex<Connection>>) -> anyhow::Result<Self> {
        conn.lock().execute_batch(OVERTURN_SCHEMA)?;
        Ok(Self { conn })
    }

    fn append(
        &self,
        ctx: &GameContext,
        transition: &str,
        old: Option<(u32, u32)>,
        new: Option<(u32, u32)>,
    ) {
        let result = self.conn.lock().execute(
            "INSERT INTO overturn_log (eid, sport, transition, old_home, old_away, new_home, new_away)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                ctx.eid,
                ctx.sport.as_str(),
                transition,
                old.map(|s| s.0),
                old.map(|s| s.1),
                new.map(|s| s.0),
                new.map(|s| s.1),
            ],
        );
        if let Err(e) = result {
            warn!(eid = %ctx.eid, error = %e, "overturn log insert failed");
        }
    }
}

impl GameObserver for OverturnLogObserver {
    fn name(&self) -> &'static str {
        "overturn_log"
    }

    fn on_event(&self, ctx: &GameContext, event: &GameEvent) {
        match event {
            GameEvent::OverturnPending { old, new } => {
                self.append(ctx, "pending", Some(*old), Some(*new))
            }
            GameEvent::OverturnRejected => self.append(ctx, "rejected", None, None),
            GameEvent::ScoreChange { overturn: true } => {
                self.append(ctx, "confirmed", None, Some(ctx.state.score()))
            }
            _ => {}
        }
    }
}
