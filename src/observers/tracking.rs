//! Tracking observer: records every placed batch, captures the quote
//! trajectory shortly after placement, backfills fill counts once the
//! order TTL passes, and settles P&L on game finish.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use tracing::{debug, info, warn};

use crate::game::context::GameContext;
use crate::game::store::GameStore;
use crate::kalshi::http::Bucket;
use crate::kalshi::ExchangeApi;
use crate::models::{BatchRecord, Outcome, Side};
use crate::observers::{GameEvent, GameObserver};

/// Quote captures relative to placement.
const CAPTURE_OFFSETS: [u64; 3] = [1, 5, 10];
/// Fill status is polled this long after the order TTL.
const BACKFILL_SLACK: Duration = Duration::from_secs(5);

const TRACKING_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS batches (
    batch_id TEXT PRIMARY KEY,
    eid TEXT NOT NULL,
    sport TEXT NOT NULL,
    league TEXT NOT NULL,
    home_team TEXT NOT NULL,
    away_team TEXT NOT NULL,
    kind TEXT NOT NULL,
    home_score INTEGER NOT NULL,
    away_score INTEGER NOT NULL,
    period TEXT NOT NULL,
    time_left_min REAL NOT NULL,
    placed_at INTEGER NOT NULL
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS batch_legs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    batch_id TEXT NOT NULL,
    ticker TEXT NOT NULL,
    side TEXT NOT NULL,
    limit_cents INTEGER NOT NULL,
    cost_cents INTEGER NOT NULL,
    fill_count INTEGER NOT NULL,
    total_count INTEGER NOT NULL,
    order_id TEXT
);
CREATE INDEX IF NOT EXISTS idx_legs_batch ON batch_legs(batch_id);

CREATE TABLE IF NOT EXISTS price_captures (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    batch_id TEXT NOT NULL,
    ticker TEXT NOT NULL,
    offset_secs INTEGER NOT NULL,
    yes_ask_cents INTEGER,
    captured_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_captures_batch ON price_captures(batch_id);

CREATE TABLE IF NOT EXISTS settlements (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    eid TEXT NOT NULL,
    sport TEXT NOT NULL,
    final_home INTEGER NOT NULL,
    final_away INTEGER NOT NULL,
    payout_cents INTEGER NOT NULL,
    cost_cents INTEGER NOT NULL,
    pnl_cents INTEGER NOT NULL,
    settled_at INTEGER NOT NULL
);
"#;

pub struct TrackingObserver {
    conn: Arc<Mutex<Connection>>,
    client: Arc<dyn ExchangeApi>,
    store: Arc<GameStore>,
    /// Read-budget gate for the optional fill polls.
    budget: Arc<Bucket>,
    order_ttl: Duration,
}

impl TrackingObserver {
    pub fn new(
        conn: Arc<Mutex<Connection>>,
        client: Arc<dyn ExchangeApi>,
        store: Arc<GameStore>,
        budget: Arc<Bucket>,
        order_ttl: Duration,
    ) -> anyhow::Result<Self> {
        conn.lock().execute_batch(TRACKING_SCHEMA)?;
        Ok(Self {
            conn,
            client,
            store,
            budget,
            order_ttl,
        })
    }

    fn record_batch(&self, batch: &BatchRecord) {
        let conn = self.conn.lock();
        let result = conn.execute(
            "INSERT OR REPLACE INTO batches
             (batch_id, eid, sport, league, home_team, away_team, kind,
              home_score, away_score, period, time_left_min, placed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                batch.batch_id,
                batch.eid,
                batch.sport.as_str(),
                batch.league,
                batch.home_team,
                batch.away_team,
                batch.kind.as_str(),
                batch.home_score,
                batch.away_score,
                batch.period,
                batch.time_left_min,
                batch.placed_at.timestamp(),
            ],
        );
        if let Err(e) = result {
            warn!(batch_id = %batch.batch_id, error = %e, "batch insert failed");
            return;
        }
        for leg in &batch.legs {
            let result = conn.execute(
                "INSERT INTO batch_legs
                 (batch_id, ticker, side, limit_cents, cost_cents, fill_count, total_count, order_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    batch.batch_id,
                    leg.ticker,
                    leg.side.as_str(),
                    leg.limit_cents,
                    leg.cost_cents,
                    leg.fill_count,
                    leg.total_count,
                    leg.order_id,
                ],
            );
            if let Err(e) = result {
                warn!(batch_id = %batch.batch_id, error = %e, "leg insert failed");
            }
        }
    }

    /// Capture the ticker's yes-ask at +1 s, +5 s, +10 s via short reads
    /// into the owning actor.
    fn schedule_captures(&self, ctx: &GameContext, batch: &Arc<BatchRecord>) {
        for offset in CAPTURE_OFFSETS {
            for leg in &batch.legs {
                let conn = self.conn.clone();
                let store = self.store.clone();
                let sport = ctx.sport;
                let eid = ctx.eid.clone();
                let ticker = leg.ticker.clone();
                let batch_id = batch.batch_id.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_secs(offset)).await;
                    let Some(actor) = store.get(sport, &eid) else {
                        return;
                    };
                    let ticker_for_read = ticker.clone();
                    let ask = actor
                        .read(move |ctx| {
                            ctx.quotes.quote(&ticker_for_read).and_then(|q| q.yes_ask)
                        })
                        .await
                        .flatten();
                    let result = conn.lock().execute(
                        "INSERT INTO price_captures (batch_id, ticker, offset_secs, yes_ask_cents, captured_at)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                        params![batch_id, ticker, offset, ask, Utc::now().timestamp()],
                    );
                    if let Err(e) = result {
                        debug!(error = %e, "price capture insert failed");
                    }
                });
            }
        }
    }

    /// After TTL + 5 s, ask the exchange how each leg actually filled.
    /// Skipped entirely when the read budget is empty.
    fn schedule_fill_backfill(&self, batch: &Arc<BatchRecord>) {
        let delay = self.order_ttl + BACKFILL_SLACK;
        let conn = self.conn.clone();
        let client = self.client.clone();
        let budget = self.budget.clone();
        let batch = batch.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            for leg in &batch.legs {
                let Some(order_id) = &leg.order_id else {
                    continue;
                };
                if !budget.try_acquire() {
                    debug!(batch_id = %batch.batch_id, "fill backfill skipped, read budget empty");
                    return;
                }
                match client.get_order(order_id).await {
                    Ok(order) => {
                        let cost = if order.fill_cost_cents() > 0 {
                            order.fill_cost_cents()
                        } else {
                            leg.cost_cents
                        };
                        let result = conn.lock().execute(
                            "UPDATE batch_legs SET fill_count = ?1, cost_cents = ?2
                             WHERE batch_id = ?3 AND ticker = ?4",
                            params![order.filled_count(), cost, batch.batch_id, leg.ticker],
                        );
                        if let Err(e) = result {
                            debug!(error = %e, "fill backfill update failed");
                        }
                    }
                    Err(e) => debug!(order_id, error = %e, "fill backfill poll failed"),
                }
            }
        });
    }

    /// Win-or-lose payout per leg: yes on the winning outcome settles at
    /// 100¢, no on a losing outcome settles at 100¢, anything else at 0.
    fn settle(&self, ctx: &GameContext) {
        let winner = match ctx.state.home_score.cmp(&ctx.state.away_score) {
            std::cmp::Ordering::Greater => Outcome::Home,
            std::cmp::Ordering::Less => Outcome::Away,
            std::cmp::Ordering::Equal => Outcome::Draw,
        };

        let conn = self.conn.lock();
        let mut stmt = match conn.prepare(
            "SELECT l.ticker, l.side, l.cost_cents, l.fill_count
             FROM batch_legs l JOIN batches b ON b.batch_id = l.batch_id
             WHERE b.eid = ?1",
        ) {
            Ok(stmt) => stmt,
            Err(e) => {
                warn!(eid = %ctx.eid, error = %e, "settlement query failed");
                return;
            }
        };

        let rows = stmt.query_map(params![ctx.eid], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
            ))
        });
        let rows = match rows {
            Ok(rows) => rows,
            Err(e) => {
                warn!(eid = %ctx.eid, error = %e, "settlement rows failed");
                return;
            }
        };

        let mut payout = 0i64;
        let mut cost = 0i64;
        for row in rows.flatten() {
            let (ticker, side, cost_cents, fill_count) = row;
            if fill_count == 0 {
                continue;
            }
            cost += cost_cents;
            let leg_outcome = [Outcome::Home, Outcome::Away, Outcome::Draw]
                .into_iter()
                .find(|o| ctx.tickers.ticker_for(*o) == Some(ticker.as_str()));
            let Some(leg_outcome) = leg_outcome else {
                continue;
            };
            let won = match side.as_str() {
                s if s == Side::Yes.as_str() => leg_outcome == winner,
                _ => leg_outcome != winner,
            };
            if won {
                payout += 100 * fill_count;
            }
        }
        let pnl = payout - cost;
        let result = conn.execute(
            "INSERT INTO settlements
             (eid, sport, final_home, final_away, payout_cents, cost_cents, pnl_cents, settled_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                ctx.eid,
                ctx.sport.as_str(),
                ctx.state.home_score,
                ctx.state.away_score,
                payout,
                cost,
                pnl,
                Utc::now().timestamp(),
            ],
        );
        if let Err(e) = result {
            warn!(eid = %ctx.eid, error = %e, "settlement insert failed");
            return;
        }
        info!(
            eid = %ctx.eid,
            payout_cents = payout,
            cost_cents = cost,
            pnl_cents = pnl,
            "game settled"
        );
    }
}

impl GameObserver for TrackingObserver {
    fn name(&self) -> &'static str {
        "tracking"
    }

    fn on_event(&self, ctx: &GameContext, event: &GameEvent) {
        match event {
            GameEvent::BatchPlaced(batch) => {
                self.record_batch(batch);
                self.schedule_captures(ctx, batch);
                self.schedule_fill_backfill(batch);
            }
            GameEvent::OrderFill { order } => {
                let result = self.conn.lock().execute(
                    "UPDATE batch_legs SET fill_count = total_count
                     WHERE order_id = ?1 AND fill_count = 0",
                    params![order.order_id],
                );
                if let Err(e) = result {
                    debug!(error = %e, "fill mark failed");
                }
            }
            GameEvent::GameFinish => self.settle(ctx),
            _ => {}
        }
    }
}
