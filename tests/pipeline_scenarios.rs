//! End-to-end pipeline scenarios: provider frames in, exchange batches out.
//!
//! The pipeline is wired exactly as in production except for a stub
//! exchange and a short score-drop confirmation window so overturn
//! sequences run in test time.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;

use overtime_backend::bus::BusEvent;
use overtime_backend::dispatch::Pipeline;
use overtime_backend::execution::{LaneLimits, LaneRouter, RiskLimits, SportLimits};
use overtime_backend::game::context::GameContext;
use overtime_backend::kalshi::{
    BatchOrderRequest, BatchOrderResponse, BatchOrderSlot, ExchangeApi, Market, Order,
};
use overtime_backend::models::{GameUpdate, MarketData, MatchStatus, Sport};
use overtime_backend::notify::DiscordNotifier;
use overtime_backend::observers::{GameEvent, GameObserver};
use overtime_backend::resolver::TickerResolver;
use overtime_backend::strategy::{StrategyConfig, StrategyEngine};
use overtime_backend::{EventBus, GameStore};

const CONFIRM_WINDOW: Duration = Duration::from_millis(400);

/// Stub exchange: serves a fixed markets list and accepts every order.
struct StubExchange {
    markets: Vec<Market>,
    batches: Mutex<Vec<BatchOrderRequest>>,
}

#[async_trait]
impl ExchangeApi for StubExchange {
    async fn get_markets(&self, _series: &str) -> anyhow::Result<Vec<Market>> {
        Ok(self.markets.clone())
    }

    async fn place_batch_orders(
        &self,
        request: BatchOrderRequest,
    ) -> anyhow::Result<BatchOrderResponse> {
        let slots = request
            .orders
            .iter()
            .enumerate()
            .map(|(i, order)| BatchOrderSlot {
                order: Some(Order {
                    order_id: format!("ord-{}-{}", self.batches.lock().len(), i),
                    ticker: order.ticker.clone(),
                    ..Default::default()
                }),
                error: None,
            })
            .collect();
        self.batches.lock().push(request);
        Ok(BatchOrderResponse { orders: slots })
    }

    async fn get_order(&self, _order_id: &str) -> anyhow::Result<Order> {
        Ok(Order::default())
    }
}

impl StubExchange {
    fn batch_count(&self) -> usize {
        self.batches.lock().len()
    }
}

/// Records every observer event as `(eid, tag, home-away)`.
struct RecordingObserver {
    events: Mutex<Vec<(String, String, (u32, u32))>>,
}

impl GameObserver for RecordingObserver {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn on_event(&self, ctx: &GameContext, event: &GameEvent) {
        self.events
            .lock()
            .push((ctx.eid.clone(), event.tag().to_string(), ctx.state.score()));
    }
}

impl RecordingObserver {
    fn tags_for(&self, eid: &str) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter(|(e, _, _)| e == eid)
            .map(|(_, tag, _)| tag.clone())
            .collect()
    }
}

fn market(event: &str, ticker: &str, subtitle: &str, yes_ask_cents: Option<i64>) -> Market {
    Market {
        ticker: ticker.to_string(),
        event_ticker: event.to_string(),
        title: format!("{subtitle} Winner?"),
        yes_sub_title: subtitle.to_string(),
        yes_ask_dollars: yes_ask_cents.map(|c| format!("{}.{:02}", c / 100, c % 100)),
        yes_bid_dollars: None,
        no_ask_dollars: None,
        no_bid_dollars: None,
        volume: 100,
        expected_expiration_time: Some(Utc.with_ymd_and_hms(2026, 3, 14, 22, 0, 0).unwrap()),
        close_time: None,
    }
}

fn lane_limits(max_sport: i64, max_game: i64) -> RiskLimits {
    let mut limits = HashMap::new();
    for sport in Sport::ALL {
        let mut leagues = HashMap::new();
        leagues.insert(
            "*".to_string(),
            LaneLimits {
                max_game_cents: max_game,
                throttle_ms: 0,
                order_ttl_seconds: 60,
            },
        );
        limits.insert(
            sport,
            SportLimits {
                max_sport_cents: max_sport,
                leagues,
            },
        );
    }
    limits
}

struct Harness {
    bus: Arc<EventBus>,
    store: Arc<GameStore>,
    exchange: Arc<StubExchange>,
    recorder: Arc<RecordingObserver>,
    pipeline: Arc<Pipeline>,
}

fn harness(markets: Vec<Market>, limits: RiskLimits) -> Harness {
    let exchange = Arc::new(StubExchange {
        markets,
        batches: Mutex::new(Vec::new()),
    });
    let exchange_api: Arc<dyn ExchangeApi> = exchange.clone();

    let bus = Arc::new(EventBus::new());
    let store = Arc::new(GameStore::new());
    let resolver = Arc::new(TickerResolver::new(
        exchange_api.clone(),
        overtime_backend::resolver::default_series(),
        Duration::from_secs(600),
    ));
    let engine = Arc::new(StrategyEngine::new(bus.clone(), StrategyConfig::default()));
    let router = Arc::new(LaneRouter::new(
        &limits,
        exchange_api,
        store.clone(),
        false,
    ));
    let recorder = Arc::new(RecordingObserver {
        events: Mutex::new(Vec::new()),
    });

    let pipeline = Arc::new(Pipeline {
        bus: bus.clone(),
        store: store.clone(),
        resolver,
        engine,
        router,
        quotes: None,
        observers: vec![recorder.clone()],
        notifier: DiscordNotifier::new(None),
        confirm_window: CONFIRM_WINDOW,
    });
    pipeline.clone().wire();

    Harness {
        bus,
        store,
        exchange,
        recorder,
        pipeline,
    }
}

fn soccer_update(eid: &str, score: (u32, u32), minute: f64, status: MatchStatus) -> GameUpdate {
    GameUpdate {
        eid: eid.to_string(),
        sport: Sport::Soccer,
        league: "EPL".to_string(),
        home_team: "Arsenal".to_string(),
        away_team: "Chelsea".to_string(),
        home_score: score.0,
        away_score: score.1,
        period: if status == MatchStatus::GameFinish {
            "ft".to_string()
        } else {
            "live".to_string()
        },
        time_left_min: (90.0 - minute).max(0.0),
        start_ts: Utc.with_ymd_and_hms(2026, 3, 14, 21, 30, 0).unwrap().timestamp(),
        home_red_cards: 0,
        away_red_cards: 0,
        power_play: false,
        home_penalties: 0,
        away_penalties: 0,
        status,
        pregame: None,
    }
}

fn hockey_update(eid: &str, score: (u32, u32), time_left: f64) -> GameUpdate {
    GameUpdate {
        eid: eid.to_string(),
        sport: Sport::Hockey,
        league: "NHL".to_string(),
        home_team: "Detroit".to_string(),
        away_team: "Chicago".to_string(),
        home_score: score.0,
        away_score: score.1,
        period: "1st period".to_string(),
        time_left_min: time_left,
        start_ts: Utc.with_ymd_and_hms(2026, 3, 14, 21, 30, 0).unwrap().timestamp(),
        home_red_cards: 0,
        away_red_cards: 0,
        power_play: false,
        home_penalties: 0,
        away_penalties: 0,
        status: MatchStatus::Live,
        pregame: None,
    }
}

/// Publish a frame and wait until its mailbox job has run.
async fn feed(h: &Harness, update: GameUpdate) {
    let sport = update.sport;
    let eid = update.eid.clone();
    let finish = update.status == MatchStatus::GameFinish;
    h.bus.publish(BusEvent::GameUpdate(update));

    if finish {
        // The actor leaves the store; give its queue a beat to drain.
        tokio::time::sleep(Duration::from_millis(50)).await;
        return;
    }

    for _ in 0..100 {
        if let Some(actor) = h.store.get(sport, &eid) {
            if actor.read(|_| ()).await.is_some() {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("actor for {eid} never processed the frame");
}

async fn settle_placements(h: &Harness, expected: usize) {
    for _ in 0..100 {
        if h.exchange.batch_count() >= expected {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tokio::time::sleep(Duration::from_millis(30)).await;
}

fn soccer_markets() -> Vec<Market> {
    vec![
        market("EVS", "EVS-ARS", "Arsenal", Some(20)),
        market("EVS", "EVS-CHE", "Chelsea", Some(95)),
        market("EVS", "EVS-TIE", "Tie", Some(95)),
    ]
}

fn hockey_markets(home_ask: Option<i64>) -> Vec<Market> {
    vec![
        market("EVH", "EVH-DET", "Detroit", home_ask),
        market("EVH", "EVH-CHI", "Chicago", Some(95)),
    ]
}

// A score drop that the provider walks back is rejected and never
// trades.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn overturn_rejected_never_trades_the_drop() {
    let h = harness(soccer_markets(), lane_limits(10_000, 10_000));

    for _ in 0..3 {
        feed(&h, soccer_update("G1", (0, 0), 1.0, MatchStatus::GameStart)).await;
    }
    feed(&h, soccer_update("G1", (1, 0), 23.0, MatchStatus::Live)).await;
    feed(&h, soccer_update("G1", (2, 0), 58.0, MatchStatus::Live)).await;
    // One batch per tradeable evaluation: the opening whistle, 1-0, 2-0.
    settle_placements(&h, 3).await;
    let batches_before_drop = h.exchange.batch_count();

    // The provider briefly reverts to 1-0, four frames inside the window.
    for _ in 0..4 {
        feed(&h, soccer_update("G1", (1, 0), 59.0, MatchStatus::Live)).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    // Then restores 2-0: overturn rejected.
    feed(&h, soccer_update("G1", (2, 0), 61.0, MatchStatus::Live)).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let tags = h.recorder.tags_for("G1");
    assert_eq!(tags.first().map(String::as_str), Some("game_start"));
    assert!(tags.contains(&"score_change".to_string()));
    assert!(tags.contains(&"overturn_pending".to_string()));
    assert!(tags.contains(&"overturn_rejected".to_string()));
    assert!(!tags.contains(&"score_change_overturn".to_string()));

    // No order was caused by the drop frames.
    assert_eq!(h.exchange.batch_count(), batches_before_drop);

    // Stored score stays at the provider's restored reading.
    let score = h
        .store
        .get(Sport::Soccer, "G1")
        .unwrap()
        .read(|ctx| ctx.state.score())
        .await
        .unwrap();
    assert_eq!(score, (2, 0));
}

// A drop that persists across the window commits, clears idempotency,
// and lets the re-scored goal trade again.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn overturn_confirmed_clears_idempotency() {
    let h = harness(hockey_markets(Some(20)), lane_limits(10_000, 10_000));

    feed(&h, hockey_update("G2", (1, 0), 54.2)).await;
    feed(&h, hockey_update("G2", (2, 0), 51.5)).await;
    feed(&h, hockey_update("G2", (3, 0), 46.75)).await;
    settle_placements(&h, 3).await;
    assert_eq!(h.exchange.batch_count(), 3);

    // Sustained 2-0 readings across the confirmation window.
    feed(&h, hockey_update("G2", (2, 0), 46.6)).await;
    for _ in 0..7 {
        tokio::time::sleep(Duration::from_millis(80)).await;
        feed(&h, hockey_update("G2", (2, 0), 46.5)).await;
    }
    settle_placements(&h, 4).await;

    let tags = h.recorder.tags_for("G2");
    assert!(tags.contains(&"overturn_pending".to_string()));
    assert!(tags.contains(&"score_change_overturn".to_string()));

    // The confirmed overturn produced a batch at the restored 2-0 score.
    assert_eq!(h.exchange.batch_count(), 4);

    // The goal is scored again: idempotency for 3-0 was cleared, so the
    // lane approves it a second time.
    feed(&h, hockey_update("G2", (3, 0), 41.3)).await;
    settle_placements(&h, 5).await;
    assert_eq!(h.exchange.batch_count(), 5);
}

// The per-sport spend guard spans games.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sport_cap_rejects_the_second_game() {
    let markets = vec![
        market("EVA", "EVA-DET", "Detroit", Some(60)),
        market("EVA", "EVA-CHI", "Chicago", Some(95)),
        market("EVB", "EVB-RANGERS", "Rangers", Some(60)),
        market("EVB", "EVB-BRUINS", "Bruins", Some(95)),
    ];
    let h = harness(markets, lane_limits(100, 100));

    // Big leads late so both games clear the edge bar at a 60¢ ask.
    feed(&h, hockey_update("GA", (4, 0), 8.0)).await;
    settle_placements(&h, 1).await;

    let mut second = hockey_update("GB", (4, 0), 8.0);
    second.home_team = "Rangers".to_string();
    second.away_team = "Bruins".to_string();
    feed(&h, second).await;
    tokio::time::sleep(Duration::from_millis(80)).await;

    assert_eq!(h.exchange.batch_count(), 1);
    assert_eq!(h.pipeline.router.sport_spent_cents(Sport::Hockey), 60);
}

// A missing quote gates the intent until market data arrives.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn quote_gating_waits_for_market_data() {
    let h = harness(hockey_markets(None), lane_limits(10_000, 10_000));

    feed(&h, hockey_update("G5", (2, 0), 12.0)).await;
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(h.exchange.batch_count(), 0);

    // The quote lands at 35¢ (no_bid 65 → yes_ask 35); the gated
    // evaluation re-runs and emits.
    h.bus.publish(BusEvent::MarketData(MarketData {
        ticker: "EVH-DET".to_string(),
        yes_bid: None,
        no_bid: Some(65),
        volume: Some(10),
        received_at: Utc::now(),
    }));
    settle_placements(&h, 1).await;
    assert_eq!(h.exchange.batch_count(), 1);
}

// Game finish settles observers and tears the actor down; a pending
// overturn at the whistle is discarded.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn game_finish_discards_pending_and_closes_the_actor() {
    // Asks at 95¢ keep this scenario trade-free, so the event order is
    // deterministic.
    let markets = vec![
        market("EVS", "EVS-ARS", "Arsenal", Some(95)),
        market("EVS", "EVS-CHE", "Chelsea", Some(95)),
        market("EVS", "EVS-TIE", "Tie", Some(95)),
    ];
    let h = harness(markets, lane_limits(10_000, 10_000));

    feed(&h, soccer_update("G9", (1, 0), 30.0, MatchStatus::Live)).await;
    // Open a pending drop, then finish at the provider's terminal reading.
    feed(&h, soccer_update("G9", (0, 0), 31.0, MatchStatus::Live)).await;
    feed(&h, soccer_update("G9", (1, 0), 90.0, MatchStatus::GameFinish)).await;

    for _ in 0..100 {
        if h.store.get(Sport::Soccer, "G9").is_none() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(h.store.get(Sport::Soccer, "G9").is_none());

    let tags = h.recorder.tags_for("G9");
    assert_eq!(tags.last().map(String::as_str), Some("game_finish"));
    assert!(tags.contains(&"overturn_pending".to_string()));
    // The pending drop never resolved either way.
    assert!(!tags.contains(&"overturn_rejected".to_string()));
    assert!(!tags.contains(&"score_change_overturn".to_string()));
}
