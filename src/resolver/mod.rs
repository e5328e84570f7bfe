//! Ticker resolution: provider team names → exchange event and outcome
//! tickers.
//!
//! Markets are fetched per sport series, cached for ten minutes, and
//! matched with normalized/aliased team names. Doubleheaders disambiguate
//! on market expiration closest to the game start.

pub mod normalize;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::game::context::ResolvedTickers;
use crate::kalshi::{dollars_to_cents, ExchangeApi, Market};
use crate::models::{QuoteSnapshot, Sport};
use normalize::{fuzzy_match, normalize_team};

pub const MARKET_CACHE_TTL: Duration = Duration::from_secs(600);

/// Exchange series scanned per sport.
pub fn default_series() -> HashMap<Sport, Vec<String>> {
    let mut series = HashMap::new();
    series.insert(Sport::Hockey, vec!["KXNHLGAME".to_string()]);
    series.insert(
        Sport::Soccer,
        vec![
            "KXEPLGAME".to_string(),
            "KXUCLGAME".to_string(),
            "KXLALIGAGAME".to_string(),
            "KXBUNDESGAME".to_string(),
            "KXSERIEAGAME".to_string(),
            "KXMLSGAME".to_string(),
        ],
    );
    series.insert(
        Sport::Football,
        vec!["KXNFLGAME".to_string(), "KXNCAAFGAME".to_string()],
    );
    series
}

#[derive(Debug, Clone)]
pub struct Resolution {
    pub tickers: ResolvedTickers,
    /// Seed quotes for the actor's ticker map, from the markets snapshot.
    pub quotes: Vec<(String, QuoteSnapshot)>,
    /// Best match sat outside the sport's match window; returned anyway.
    pub out_of_window: bool,
}

#[derive(Default)]
struct MarketCache {
    markets: Vec<Market>,
    fetched_at: Option<Instant>,
}

pub struct TickerResolver {
    client: Arc<dyn ExchangeApi>,
    series: HashMap<Sport, Vec<String>>,
    ttl: Duration,
    caches: HashMap<Sport, Mutex<MarketCache>>,
}

impl TickerResolver {
    pub fn new(
        client: Arc<dyn ExchangeApi>,
        series: HashMap<Sport, Vec<String>>,
        ttl: Duration,
    ) -> Self {
        let caches = Sport::ALL
            .iter()
            .map(|sport| (*sport, Mutex::new(MarketCache::default())))
            .collect();
        Self {
            client,
            series,
            ttl,
            caches,
        }
    }

    /// Resolve one game. `Ok(None)` means no market matched (including an
    /// empty series list); the caller skips actor creation.
    pub async fn resolve(
        &self,
        sport: Sport,
        home_team: &str,
        away_team: &str,
        game_start_ts: i64,
    ) -> Result<Option<Resolution>> {
        let home_norm = normalize_team(home_team, sport);
        let away_norm = normalize_team(away_team, sport);

        let markets = self.markets(sport).await?;
        if markets.is_empty() {
            return Ok(None);
        }

        let mut groups: HashMap<&str, Vec<&Market>> = HashMap::new();
        for market in &markets {
            groups.entry(market.event_ticker.as_str()).or_default().push(market);
        }

        let game_start = Utc
            .timestamp_opt(game_start_ts, 0)
            .single()
            .unwrap_or_else(Utc::now);

        let mut best: Option<(chrono::Duration, Candidate<'_>)> = None;
        for group in groups.values() {
            let Some(candidate) = match_group(sport, group, &home_norm, &away_norm) else {
                continue;
            };
            let distance = candidate
                .expiration
                .map(|exp| (exp - game_start).abs())
                .unwrap_or_else(|| chrono::Duration::days(36500));
            match &best {
                Some((best_distance, _)) if *best_distance <= distance => {}
                _ => best = Some((distance, candidate)),
            }
        }

        let Some((distance, candidate)) = best else {
            debug!(sport = %sport, home = %home_norm, away = %away_norm, "no market match");
            return Ok(None);
        };

        let out_of_window = distance > sport.match_window();
        if out_of_window {
            warn!(
                sport = %sport,
                home = %home_norm,
                away = %away_norm,
                event = %candidate.home.event_ticker,
                distance_hours = distance.num_hours(),
                "best market match is outside the sport's window"
            );
        }

        let tickers = ResolvedTickers {
            event_ticker: candidate.home.event_ticker.clone(),
            home: candidate.home.ticker.clone(),
            away: candidate.away.ticker.clone(),
            draw: candidate.draw.map(|m| m.ticker.clone()),
        };

        let mut quotes = Vec::new();
        for market in [Some(candidate.home), Some(candidate.away), candidate.draw]
            .into_iter()
            .flatten()
        {
            quotes.push((market.ticker.clone(), seed_quote(market)));
        }

        info!(
            sport = %sport,
            home = %home_norm,
            away = %away_norm,
            event = %tickers.event_ticker,
            "tickers resolved"
        );
        Ok(Some(Resolution {
            tickers,
            quotes,
            out_of_window,
        }))
    }

    /// Cached markets for a sport. The per-sport async mutex single-flights
    /// the refresh: concurrent callers wait and then read the fresh cache.
    async fn markets(&self, sport: Sport) -> Result<Vec<Market>> {
        let cache = self
            .caches
            .get(&sport)
            .expect("cache exists for every sport");
        let mut guard = cache.lock().await;

        let fresh = guard
            .fetched_at
            .map(|at| at.elapsed() < self.ttl)
            .unwrap_or(false);
        if fresh {
            return Ok(guard.markets.clone());
        }

        let series = self.series.get(&sport).cloned().unwrap_or_default();
        let mut all = Vec::new();
        for series_ticker in &series {
            match self.client.get_markets(series_ticker).await {
                Ok(mut markets) => all.append(&mut markets),
                Err(e) => warn!(series = %series_ticker, error = %e, "markets fetch failed"),
            }
        }

        guard.markets = all.clone();
        guard.fetched_at = Some(Instant::now());
        Ok(all)
    }
}

struct Candidate<'a> {
    home: &'a Market,
    away: &'a Market,
    draw: Option<&'a Market>,
    expiration: Option<DateTime<Utc>>,
}

/// Match one event's outcome markets against the normalized team pair.
fn match_group<'a>(
    sport: Sport,
    group: &[&'a Market],
    home_norm: &str,
    away_norm: &str,
) -> Option<Candidate<'a>> {
    let mut draw = None;
    let mut teams: Vec<(&Market, String)> = Vec::new();

    for market in group {
        if is_draw_market(market) {
            draw = Some(*market);
            continue;
        }
        let label = outcome_label(market)?;
        teams.push((market, normalize_team(&label, sport)));
    }

    if sport.has_draw() && draw.is_none() {
        return None;
    }

    let home = teams
        .iter()
        .find(|(_, label)| fuzzy_match(label, home_norm))?;
    let away = teams
        .iter()
        .find(|(market, label)| market.ticker != home.0.ticker && fuzzy_match(label, away_norm))?;

    let expiration = home.0.expiration().or(away.0.expiration());
    Some(Candidate {
        home: home.0,
        away: away.0,
        draw,
        expiration,
    })
}

fn is_draw_market(market: &Market) -> bool {
    let subtitle = market.yes_sub_title.to_lowercase();
    subtitle == "tie" || subtitle == "draw" || market.ticker.ends_with("-TIE")
}

/// The team an outcome market settles on: the yes subtitle, falling back
/// to the subject of an "`A at B Winner?`" / "`A vs B Winner?`" title.
fn outcome_label(market: &Market) -> Option<String> {
    if !market.yes_sub_title.trim().is_empty() {
        return Some(market.yes_sub_title.trim().to_string());
    }
    let title = market.title.trim().trim_end_matches('?');
    let title = title.trim_end_matches("Winner").trim();
    for separator in [" at ", " vs ", " vs. ", " @ "] {
        if let Some((first, _)) = title.split_once(separator) {
            return Some(first.trim().to_string());
        }
    }
    None
}

fn seed_quote(market: &Market) -> QuoteSnapshot {
    QuoteSnapshot {
        yes_bid: market.yes_bid_dollars.as_deref().and_then(dollars_to_cents),
        yes_ask: market.yes_ask_dollars.as_deref().and_then(dollars_to_cents),
        no_bid: market.no_bid_dollars.as_deref().and_then(dollars_to_cents),
        no_ask: market.no_ask_dollars.as_deref().and_then(dollars_to_cents),
        volume: market.volume,
        updated_at: Some(Utc::now()),
    }
}
