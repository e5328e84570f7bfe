//! Typed synchronous pub/sub between subsystems.
//!
//! No buffering: `publish` invokes every handler registered for the event's
//! kind, in registration order, on the caller's thread. Handlers that need
//! to do real work enqueue onto an actor mailbox and return.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::warn;

use crate::models::{GameUpdate, MarketData, OrderIntent, WsStatus};

/// Handler failures never stop dispatch; they are counted here.
pub static HANDLER_ERRORS: AtomicU64 = AtomicU64::new(0);

/// Events carried by the bus.
#[derive(Debug, Clone)]
pub enum BusEvent {
    GameUpdate(GameUpdate),
    MarketData(MarketData),
    /// A batch so a strategy emits an atomic group (e.g. both legs of an
    /// arbitrage).
    OrderIntents(Vec<OrderIntent>),
    WsStatus(WsStatus),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    GameUpdate,
    MarketData,
    OrderIntents,
    WsStatus,
}

impl BusEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            BusEvent::GameUpdate(_) => EventKind::GameUpdate,
            BusEvent::MarketData(_) => EventKind::MarketData,
            BusEvent::OrderIntents(_) => EventKind::OrderIntents,
            BusEvent::WsStatus(_) => EventKind::WsStatus,
        }
    }
}

type Handler = Box<dyn Fn(&BusEvent) -> anyhow::Result<()> + Send + Sync>;

#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<HashMap<EventKind, Vec<Handler>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler for one event kind. Handlers for a kind fire in
    /// registration order.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(&BusEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .entry(kind)
            .or_default()
            .push(Box::new(handler));
    }

    /// Dispatch synchronously on the caller's thread. A failing handler is
    /// logged and counted; the remaining handlers still run.
    pub fn publish(&self, event: BusEvent) {
        let handlers = self.handlers.read();
        let Some(registered) = handlers.get(&event.kind()) else {
            return;
        };
        for handler in registered {
            if let Err(e) = handler(&event) {
                HANDLER_ERRORS.fetch_add(1, Ordering::Relaxed);
                warn!(kind = ?event.kind(), error = %e, "bus handler failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Sport;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn market_data(ticker: &str) -> BusEvent {
        BusEvent::MarketData(MarketData {
            ticker: ticker.into(),
            yes_bid: Some(40),
            no_bid: None,
            volume: None,
            received_at: chrono::Utc::now(),
        })
    }

    #[test]
    fn handlers_fire_in_registration_order() {
        let bus = EventBus::new();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let order = order.clone();
            bus.subscribe(EventKind::MarketData, move |_| {
                order.lock().push(tag);
                Ok(())
            });
        }

        bus.publish(market_data("T1"));
        assert_eq!(*order.lock(), vec!["first", "second", "third"]);
    }

    #[test]
    fn failing_handler_does_not_stop_dispatch() {
        let bus = EventBus::new();
        let reached = Arc::new(AtomicUsize::new(0));

        bus.subscribe(EventKind::MarketData, |_| anyhow::bail!("boom"));
        let reached2 = reached.clone();
        bus.subscribe(EventKind::MarketData, move |_| {
            reached2.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let before = HANDLER_ERRORS.load(Ordering::SeqCst);
        bus.publish(market_data("T1"));
        assert_eq!(reached.load(Ordering::SeqCst), 1);
        assert!(HANDLER_ERRORS.load(Ordering::SeqCst) > before);
    }

    #[test]
    fn kinds_are_isolated() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        bus.subscribe(EventKind::WsStatus, move |_| {
            hits2.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.publish(market_data("T1"));
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        bus.publish(BusEvent::WsStatus(WsStatus::Connected));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // An intent batch with no subscriber is a no-op.
        bus.publish(BusEvent::OrderIntents(vec![OrderIntent {
            ticker: "T".into(),
            side: crate::models::Side::Yes,
            outcome: crate::models::Outcome::Home,
            limit_cents: 50,
            home_score: 0,
            away_score: 0,
            sport: Sport::Hockey,
            league: "NHL".into(),
            eid: "E".into(),
            reason: "test".into(),
            overturn: false,
            slam: false,
        }]));
    }
}
