//! Concurrent index of live game actors.
//!
//! The reader/writer lock guards only the index maps; actor state lives
//! behind each actor's mailbox and is never touched here.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::game::actor::GameActor;
use crate::models::Sport;

#[derive(Default)]
struct Indexes {
    by_game: HashMap<(Sport, String), Arc<GameActor>>,
    by_teams: HashMap<(Sport, String, String), Arc<GameActor>>,
    by_ticker: HashMap<String, Vec<Arc<GameActor>>>,
}

#[derive(Default)]
pub struct GameStore {
    inner: RwLock<Indexes>,
}

impl GameStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, sport: Sport, eid: &str) -> Option<Arc<GameActor>> {
        self.inner
            .read()
            .by_game
            .get(&(sport, eid.to_string()))
            .cloned()
    }

    pub fn get_by_teams(
        &self,
        sport: Sport,
        home_norm: &str,
        away_norm: &str,
    ) -> Option<Arc<GameActor>> {
        self.inner
            .read()
            .by_teams
            .get(&(sport, home_norm.to_string(), away_norm.to_string()))
            .cloned()
    }

    /// Index the actor under its game id, team pair, and every resolved
    /// ticker.
    pub fn put(&self, actor: Arc<GameActor>) {
        let mut inner = self.inner.write();
        inner
            .by_game
            .insert((actor.sport, actor.eid.clone()), actor.clone());
        inner.by_teams.insert(
            (actor.sport, actor.home_norm.clone(), actor.away_norm.clone()),
            actor.clone(),
        );
        for ticker in actor.tickers() {
            let actors = inner.by_ticker.entry(ticker.clone()).or_default();
            if !actors.iter().any(|a| Arc::ptr_eq(a, &actor)) {
                actors.push(actor.clone());
            }
        }
        debug!(eid = %actor.eid, sport = %actor.sport, "actor indexed");
    }

    /// Actors holding this outcome ticker; MarketData fans out through this
    /// without scanning.
    pub fn by_ticker(&self, ticker: &str) -> Vec<Arc<GameActor>> {
        self.inner
            .read()
            .by_ticker
            .get(ticker)
            .cloned()
            .unwrap_or_default()
    }

    pub fn by_sport(&self, sport: Sport) -> Vec<Arc<GameActor>> {
        self.inner
            .read()
            .by_game
            .iter()
            .filter(|((s, _), _)| *s == sport)
            .map(|(_, actor)| actor.clone())
            .collect()
    }

    pub fn all(&self) -> Vec<Arc<GameActor>> {
        self.inner.read().by_game.values().cloned().collect()
    }

    /// Union of tickers across all live actors, for stream resubscription.
    pub fn known_tickers(&self) -> Vec<String> {
        self.inner.read().by_ticker.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().by_game.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove the game from every index and close its actor. Queued mailbox
    /// jobs still run before the actor exits.
    pub fn delete(&self, sport: Sport, eid: &str) {
        let removed = {
            let mut inner = self.inner.write();
            let Some(actor) = inner.by_game.remove(&(sport, eid.to_string())) else {
                return;
            };
            inner.by_teams.remove(&(
                actor.sport,
                actor.home_norm.clone(),
                actor.away_norm.clone(),
            ));
            for ticker in actor.tickers() {
                if let Some(actors) = inner.by_ticker.get_mut(ticker) {
                    actors.retain(|a| !Arc::ptr_eq(a, &actor));
                    if actors.is_empty() {
                        inner.by_ticker.remove(ticker);
                    }
                }
            }
            actor
        };
        removed.close();
        debug!(eid, sport = %sport, "actor removed and closed");
    }

    /// Close everything (shutdown path).
    pub fn close_all(&self) {
        let actors: Vec<_> = {
            let mut inner = self.inner.write();
            inner.by_teams.clear();
            inner.by_ticker.clear();
            inner.by_game.drain().map(|(_, a)| a).collect()
        };
        for actor in actors {
            actor.close();
        }
    }
}
