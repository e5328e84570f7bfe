//! Bus wiring: routes provider updates to game actors (creating them on
//! first sight), fans market data to interested actors, and hands intent
//! batches to the execution router.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::bus::{BusEvent, EventBus, EventKind};
use crate::execution::LaneRouter;
use crate::game::actor::GameActor;
use crate::game::context::GameContext;
use crate::game::overturn::OverturnMachine;
use crate::game::process_update;
use crate::game::store::GameStore;
use crate::kalshi::ws::QuoteFeedHandle;
use crate::models::{GameUpdate, MatchStatus, Sport, WsStatus};
use crate::notify::DiscordNotifier;
use crate::observers::GameObserver;
use crate::resolver::normalize::normalize_team;
use crate::resolver::TickerResolver;
use crate::strategy::StrategyEngine;

pub struct Pipeline {
    pub bus: Arc<EventBus>,
    pub store: Arc<GameStore>,
    pub resolver: Arc<TickerResolver>,
    pub engine: Arc<StrategyEngine>,
    pub router: Arc<LaneRouter>,
    pub quotes: Option<QuoteFeedHandle>,
    pub observers: Vec<Arc<dyn GameObserver>>,
    pub notifier: Arc<DiscordNotifier>,
    /// Score-drop confirmation window for new games.
    pub confirm_window: std::time::Duration,
}

impl Pipeline {
    /// Register all bus subscribers. Handlers run synchronously on the
    /// publisher's task and only enqueue work.
    pub fn wire(self: Arc<Self>) {
        let creating: Arc<Mutex<HashSet<(Sport, String)>>> =
            Arc::new(Mutex::new(HashSet::new()));

        let pipeline = self.clone();
        let creating_updates = creating.clone();
        self.bus.subscribe(EventKind::GameUpdate, move |event| {
            let BusEvent::GameUpdate(update) = event else {
                return Ok(());
            };
            pipeline.clone().on_game_update(update, &creating_updates);
            Ok(())
        });

        let pipeline = self.clone();
        self.bus.subscribe(EventKind::MarketData, move |event| {
            let BusEvent::MarketData(data) = event else {
                return Ok(());
            };
            for actor in pipeline.store.by_ticker(&data.ticker) {
                let data = data.clone();
                let engine = pipeline.engine.clone();
                actor.send(move |ctx| {
                    ctx.quotes.apply(&data);
                    if ctx.awaiting_quotes {
                        engine.evaluate(ctx, false);
                    }
                });
            }
            Ok(())
        });

        let pipeline = self.clone();
        self.bus.subscribe(EventKind::OrderIntents, move |event| {
            let BusEvent::OrderIntents(intents) = event else {
                return Ok(());
            };
            pipeline.router.handle_batch(intents);
            Ok(())
        });

        let pipeline = self.clone();
        self.bus.subscribe(EventKind::WsStatus, move |event| {
            let BusEvent::WsStatus(status) = event else {
                return Ok(());
            };
            match status {
                WsStatus::Connected => info!("market data stream up"),
                WsStatus::Disconnected { reason } => {
                    warn!(reason = %reason, "market data stream down");
                    pipeline
                        .notifier
                        .send(format!("quote stream disconnected: {reason}"));
                }
            }
            Ok(())
        });
    }

    fn on_game_update(
        self: Arc<Self>,
        update: &GameUpdate,
        creating: &Arc<Mutex<HashSet<(Sport, String)>>>,
    ) {
        if let Some(actor) = self.store.get(update.sport, &update.eid) {
            self.deliver(&actor, update.clone());
            if update.status == MatchStatus::GameFinish {
                // The terminal job is already queued; delete closes the
                // actor after it runs and the observers settle.
                self.store.delete(update.sport, &update.eid);
            }
            return;
        }

        // A terminal frame for an unknown game creates nothing.
        if update.status == MatchStatus::GameFinish {
            return;
        }

        let key = (update.sport, update.eid.clone());
        if !creating.lock().insert(key.clone()) {
            return;
        }

        let pipeline = self;
        let update = update.clone();
        let creating = creating.clone();
        tokio::spawn(async move {
            pipeline.create_actor(&update).await;
            creating.lock().remove(&(update.sport, update.eid.clone()));
        });
    }

    async fn create_actor(&self, update: &GameUpdate) {
        let resolution = match self
            .resolver
            .resolve(
                update.sport,
                &update.home_team,
                &update.away_team,
                update.start_ts,
            )
            .await
        {
            Ok(Some(resolution)) => resolution,
            Ok(None) => {
                debug!(
                    eid = %update.eid,
                    sport = %update.sport,
                    home = %update.home_team,
                    away = %update.away_team,
                    "no tickers resolved; game not tracked"
                );
                return;
            }
            Err(e) => {
                warn!(eid = %update.eid, error = %e, "ticker resolution failed");
                return;
            }
        };

        let home_norm = normalize_team(&update.home_team, update.sport);
        let away_norm = normalize_team(&update.away_team, update.sport);
        let mut ctx = GameContext::new(update, home_norm, away_norm, resolution.tickers.clone());
        ctx.overturn = OverturnMachine::new(self.confirm_window);
        for (ticker, quote) in &resolution.quotes {
            ctx.quotes.seed(ticker, *quote);
        }
        ctx.observers = self.observers.clone();

        let actor = GameActor::spawn(ctx);
        let tickers = actor.tickers().to_vec();
        self.store.put(actor.clone());
        if let Some(quotes) = &self.quotes {
            quotes.subscribe(tickers);
        }
        info!(
            eid = %update.eid,
            sport = %update.sport,
            event = %resolution.tickers.event_ticker,
            "game actor created"
        );

        // The creating frame is also the first processed frame.
        self.deliver(&actor, update.clone());
    }

    fn deliver(&self, actor: &Arc<GameActor>, update: GameUpdate) {
        let engine = self.engine.clone();
        actor.send(move |ctx| {
            let now = tokio::time::Instant::now().into_std();
            process_update(ctx, &update, &engine, now);
        });
    }
}
