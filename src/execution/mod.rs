//! Execution lanes: risk caps, idempotency, throttling, and asynchronous
//! batch placement.
//!
//! A lane is a `(sport, league)` partition of risk state with a
//! `(sport, "*")` fallback. Intent checks and optimistic recording happen
//! synchronously under the lane lock on the publishing actor's task; only
//! the exchange call runs on a spawned task, and fills come back through
//! the owning game's mailbox.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::game::store::GameStore;
use crate::kalshi::{BatchOrderRequest, ExchangeApi, OrderRequest};
use crate::models::{
    BatchKind, BatchLeg, BatchRecord, OrderIntent, PlacedOrder, Sport,
};
use crate::observers::GameEvent;

pub static ORDERS_PLACED: AtomicU64 = AtomicU64::new(0);
pub static ORDERS_REJECTED: AtomicU64 = AtomicU64::new(0);
pub static EXCHANGE_ERRORS: AtomicU64 = AtomicU64::new(0);

pub const DEFAULT_ORDER_TTL: Duration = Duration::from_secs(60);

/// Risk limits for one `(sport, league)` lane.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct LaneLimits {
    pub max_game_cents: i64,
    #[serde(default)]
    pub throttle_ms: u64,
    #[serde(default = "default_ttl_seconds")]
    pub order_ttl_seconds: u64,
}

fn default_ttl_seconds() -> u64 {
    DEFAULT_ORDER_TTL.as_secs()
}

/// Per-sport block of the risk-limits file.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct SportLimits {
    pub max_sport_cents: i64,
    pub leagues: HashMap<String, LaneLimits>,
}

/// The whole risk-limits file, keyed by sport name. A league key of `"*"`
/// is the sport's fallback lane.
pub type RiskLimits = HashMap<Sport, SportLimits>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    NoLane,
    GameCap,
    SportCap,
    Throttle,
    Duplicate,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::NoLane => "no lane",
            RejectReason::GameCap => "game cap",
            RejectReason::SportCap => "sport cap",
            RejectReason::Throttle => "throttle",
            RejectReason::Duplicate => "duplicate",
        }
    }
}

/// Cumulative spend guard shared by every lane of one sport.
struct SportGuard {
    max_cents: i64,
    spent: AtomicI64,
}

impl SportGuard {
    /// Reserve `cents` unless it would breach the cap.
    fn try_reserve(&self, cents: i64) -> bool {
        let mut current = self.spent.load(Ordering::Acquire);
        loop {
            if current + cents > self.max_cents {
                return false;
            }
            match self.spent.compare_exchange_weak(
                current,
                current + cents,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    fn spent_cents(&self) -> i64 {
        self.spent.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
struct LaneState {
    last_send: Option<Instant>,
    seen: HashSet<String>,
    game_spent: HashMap<String, i64>,
}

#[derive(Debug)]
struct Lane {
    league: String,
    max_game_cents: i64,
    min_interval: Duration,
    order_ttl: Duration,
    state: Mutex<LaneState>,
}

impl Lane {
    fn new(league: &str, limits: &LaneLimits) -> Self {
        Self {
            league: league.to_string(),
            max_game_cents: limits.max_game_cents,
            min_interval: Duration::from_millis(limits.throttle_ms),
            order_ttl: Duration::from_secs(limits.order_ttl_seconds),
            state: Mutex::new(LaneState {
                last_send: None,
                seen: HashSet::new(),
                game_spent: HashMap::new(),
            }),
        }
    }

    /// Drop idempotency entries for one ticker (confirmed overturn).
    fn clear_ticker(&self, ticker: &str) {
        let prefix = format!("{ticker}|");
        self.state.lock().seen.retain(|key| !key.starts_with(&prefix));
    }
}

pub struct LaneRouter {
    lanes: HashMap<(Sport, String), Arc<Lane>>,
    guards: HashMap<Sport, Arc<SportGuard>>,
    client: Arc<dyn ExchangeApi>,
    store: Arc<GameStore>,
    placements: TaskTracker,
    /// Approved batches are logged but never sent when set.
    dry_run: bool,
}

impl LaneRouter {
    pub fn new(
        limits: &RiskLimits,
        client: Arc<dyn ExchangeApi>,
        store: Arc<GameStore>,
        dry_run: bool,
    ) -> Self {
        let mut lanes = HashMap::new();
        let mut guards = HashMap::new();
        for (sport, sport_limits) in limits {
            guards.insert(
                *sport,
                Arc::new(SportGuard {
                    max_cents: sport_limits.max_sport_cents,
                    spent: AtomicI64::new(0),
                }),
            );
            for (league, lane_limits) in &sport_limits.leagues {
                lanes.insert(
                    (*sport, league.clone()),
                    Arc::new(Lane::new(league, lane_limits)),
                );
            }
        }
        Self {
            lanes,
            guards,
            client,
            store,
            placements: TaskTracker::new(),
            dry_run,
        }
    }

    fn lane(&self, sport: Sport, league: &str) -> Option<Arc<Lane>> {
        self.lanes
            .get(&(sport, league.to_string()))
            .or_else(|| self.lanes.get(&(sport, "*".to_string())))
            .cloned()
    }

    /// Cumulative approved cents for a sport (diagnostics and tests).
    pub fn sport_spent_cents(&self, sport: Sport) -> i64 {
        self.guards
            .get(&sport)
            .map(|g| g.spent_cents())
            .unwrap_or(0)
    }

    /// Route one intent batch. Checks and optimistic recording run on the
    /// caller's task; approved intents ship on a spawned placement task.
    pub fn handle_batch(&self, intents: &[OrderIntent]) {
        if intents.is_empty() {
            return;
        }

        // A confirmed overturn clears the affected tickers before any
        // per-intent check, so re-ordering the restored score is allowed.
        for intent in intents.iter().filter(|i| i.overturn) {
            if let Some(lane) = self.lane(intent.sport, &intent.league) {
                lane.clear_ticker(&intent.ticker);
            }
        }

        let now = Instant::now();
        let mut approved = Vec::new();
        for intent in intents {
            match self.check(intent, now) {
                Ok(lane) => approved.push((intent.clone(), lane)),
                Err(reason) => {
                    ORDERS_REJECTED.fetch_add(1, Ordering::Relaxed);
                    info!(
                        eid = %intent.eid,
                        ticker = %intent.ticker,
                        reason = reason.as_str(),
                        "intent rejected"
                    );
                }
            }
        }

        if approved.is_empty() {
            return;
        }

        if self.dry_run {
            for (intent, _) in &approved {
                warn!(
                    eid = %intent.eid,
                    ticker = %intent.ticker,
                    limit_cents = intent.limit_cents,
                    "dry run: order not sent"
                );
            }
            return;
        }

        let client = self.client.clone();
        let store = self.store.clone();
        self.placements.spawn(async move {
            place_batch(client, store, approved).await;
        });
    }

    /// All checks and the optimistic record, atomic under the lane lock.
    fn check(&self, intent: &OrderIntent, now: Instant) -> Result<Arc<Lane>, RejectReason> {
        let lane = self
            .lane(intent.sport, &intent.league)
            .ok_or(RejectReason::NoLane)?;
        let guard = self
            .guards
            .get(&intent.sport)
            .ok_or(RejectReason::NoLane)?;

        let mut state = lane.state.lock();

        let game_spent = state.game_spent.get(&intent.eid).copied().unwrap_or(0);
        if game_spent + intent.limit_cents > lane.max_game_cents {
            return Err(RejectReason::GameCap);
        }

        // Reserved now, released only if a later check fails.
        if !guard.try_reserve(intent.limit_cents) {
            return Err(RejectReason::SportCap);
        }

        if let Some(last) = state.last_send {
            if now.duration_since(last) < lane.min_interval {
                guard.spent.fetch_sub(intent.limit_cents, Ordering::AcqRel);
                return Err(RejectReason::Throttle);
            }
        }

        let key = intent.idempotency_key();
        if state.seen.contains(&key) {
            guard.spent.fetch_sub(intent.limit_cents, Ordering::AcqRel);
            return Err(RejectReason::Duplicate);
        }

        state.seen.insert(key);
        *state.game_spent.entry(intent.eid.clone()).or_insert(0) += intent.limit_cents;
        state.last_send = Some(now);
        drop(state);

        Ok(lane)
    }

    /// Wait for in-flight placements (shutdown path, bounded by the caller).
    pub async fn drain(&self) {
        self.placements.close();
        self.placements.wait().await;
    }
}

/// One batched exchange call for one game's approved intents; the response
/// is posted back into the owning actor's mailbox.
async fn place_batch(
    client: Arc<dyn ExchangeApi>,
    store: Arc<GameStore>,
    approved: Vec<(OrderIntent, Arc<Lane>)>,
) {
    let now_ts = Utc::now().timestamp();
    let orders: Vec<OrderRequest> = approved
        .iter()
        .map(|(intent, lane)| {
            let expiration = if intent.slam {
                None
            } else {
                Some(now_ts + lane.order_ttl.as_secs() as i64)
            };
            OrderRequest::limit_buy(&intent.ticker, intent.side, intent.limit_cents, expiration)
        })
        .collect();

    let response = match client
        .place_batch_orders(BatchOrderRequest { orders })
        .await
    {
        Ok(response) => response,
        Err(e) => {
            EXCHANGE_ERRORS.fetch_add(1, Ordering::Relaxed);
            error!(error = %e, "batch placement failed");
            return;
        }
    };

    let (first_intent, first_lane) = &approved[0];
    let mut legs = Vec::with_capacity(approved.len());
    let mut fills = Vec::new();

    for (index, (intent, _)) in approved.iter().enumerate() {
        let slot = response.orders.get(index);
        match slot.and_then(|s| s.order.as_ref()) {
            Some(order) => {
                ORDERS_PLACED.fetch_add(1, Ordering::Relaxed);
                let cost_cents = if order.fill_cost_cents() > 0 {
                    order.fill_cost_cents()
                } else {
                    intent.limit_cents
                };
                legs.push(BatchLeg {
                    ticker: intent.ticker.clone(),
                    side: intent.side,
                    limit_cents: intent.limit_cents,
                    cost_cents,
                    fill_count: order.filled_count(),
                    total_count: 1,
                    order_id: Some(order.order_id.clone()),
                });
                fills.push(PlacedOrder {
                    order_id: order.order_id.clone(),
                    ticker: intent.ticker.clone(),
                    side: intent.side,
                    cost_cents,
                    placed_at: Utc::now(),
                });
            }
            None => {
                EXCHANGE_ERRORS.fetch_add(1, Ordering::Relaxed);
                let error = slot.and_then(|s| s.error.clone()).unwrap_or_default();
                warn!(
                    eid = %intent.eid,
                    ticker = %intent.ticker,
                    error,
                    "per-order rejection in batch"
                );
                legs.push(BatchLeg {
                    ticker: intent.ticker.clone(),
                    side: intent.side,
                    limit_cents: intent.limit_cents,
                    cost_cents: 0,
                    fill_count: 0,
                    total_count: 1,
                    order_id: None,
                });
            }
        }
    }

    let record = Arc::new(BatchRecord {
        batch_id: Uuid::new_v4().to_string(),
        eid: first_intent.eid.clone(),
        sport: first_intent.sport,
        league: first_lane.league.clone(),
        home_team: String::new(),
        away_team: String::new(),
        kind: if first_intent.slam {
            BatchKind::Slam
        } else {
            BatchKind::Regular
        },
        legs,
        home_score: first_intent.home_score,
        away_score: first_intent.away_score,
        period: String::new(),
        time_left_min: 0.0,
        placed_at: Utc::now(),
    });

    let Some(actor) = store.get(first_intent.sport, &first_intent.eid) else {
        warn!(eid = %first_intent.eid, "game gone before batch response");
        return;
    };

    // Fills must never be the dropped mailbox item.
    actor
        .send_critical(move |ctx| {
            let mut record = (*record).clone();
            record.home_team = ctx.home_team.clone();
            record.away_team = ctx.away_team.clone();
            record.period = ctx.state.period.clone();
            record.time_left_min = ctx.state.time_left_min;
            ctx.notify(&GameEvent::BatchPlaced(Arc::new(record)));
            for order in fills {
                ctx.record_fill(order.clone());
                ctx.notify(&GameEvent::OrderFill { order });
            }
        })
        .await;
}
