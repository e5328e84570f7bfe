//! Environment configuration and the risk-limits file.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::execution::RiskLimits;

#[derive(Debug, Clone)]
pub struct Config {
    pub kalshi_base_url: String,
    pub kalshi_ws_url: String,
    pub kalshi_key_id: String,
    pub kalshi_key_file: String,
    pub rate_divisor: f64,
    pub score_drop_confirm: Duration,
    pub webhook_host: String,
    pub webhook_port: u16,
    pub risk_limits_path: String,
    pub database_path: String,
    pub discord_webhook_url: Option<String>,
    pub mock_games_enabled: bool,
    pub dry_run: bool,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON"))
        .unwrap_or(false)
}

impl Config {
    /// Credentials are required; everything else has a default.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let kalshi_key_id =
            std::env::var("KALSHI_KEYID").context("KALSHI_KEYID is required")?;
        let kalshi_key_file =
            std::env::var("KALSHI_KEYFILE").context("KALSHI_KEYFILE is required")?;

        let rate_divisor = env_or("RATE_DIVISOR", "1")
            .parse::<f64>()
            .unwrap_or(1.0)
            .max(1.0);

        let score_drop_confirm_sec = env_or("SCORE_DROP_CONFIRM_SEC", "15")
            .parse::<u64>()
            .unwrap_or(15);

        let webhook_port = env_or("WEBHOOK_PORT", "8090").parse().unwrap_or(8090);

        Ok(Self {
            kalshi_base_url: env_or("KALSHI_BASE_URL", "https://api.elections.kalshi.com"),
            kalshi_ws_url: env_or(
                "KALSHI_WS_URL",
                "wss://api.elections.kalshi.com/trade-api/ws/v2",
            ),
            kalshi_key_id,
            kalshi_key_file,
            rate_divisor,
            score_drop_confirm: Duration::from_secs(score_drop_confirm_sec),
            webhook_host: env_or("WEBHOOK_HOST", "0.0.0.0"),
            webhook_port,
            risk_limits_path: env_or("RISK_LIMITS_FILE", "./risk_limits.json"),
            database_path: env_or("DATABASE_PATH", "./overtime.db"),
            discord_webhook_url: std::env::var("DISCORD_WEBHOOK_URL").ok(),
            mock_games_enabled: env_flag("MOCK_GAMES_ENABLED"),
            dry_run: env_flag("DRY_RUN"),
        })
    }
}

/// Load the per-sport risk-limits file. JSON by default, TOML when the
/// extension says so. Unreadable limits are fatal at boot.
pub fn load_risk_limits(path: &str) -> Result<RiskLimits> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("risk-limits file {path} unreadable"))?;
    let limits: RiskLimits = if path.ends_with(".toml") {
        toml::from_str(&raw).context("risk-limits TOML invalid")?
    } else {
        serde_json::from_str(&raw).context("risk-limits JSON invalid")?
    };
    if limits.is_empty() {
        anyhow::bail!("risk-limits file {path} defines no sports");
    }
    Ok(limits)
}

/// Compiled-in fallback used by tests and dry runs.
pub fn default_risk_limits() -> RiskLimits {
    serde_json::from_value(serde_json::json!({
        "hockey": {
            "max_sport_cents": 2000,
            "leagues": {
                "NHL": { "max_game_cents": 500, "throttle_ms": 1000, "order_ttl_seconds": 60 },
                "*": { "max_game_cents": 200, "throttle_ms": 2000, "order_ttl_seconds": 60 }
            }
        },
        "soccer": {
            "max_sport_cents": 2000,
            "leagues": {
                "*": { "max_game_cents": 300, "throttle_ms": 2000, "order_ttl_seconds": 60 }
            }
        },
        "football": {
            "max_sport_cents": 1500,
            "leagues": {
                "*": { "max_game_cents": 300, "throttle_ms": 2000, "order_ttl_seconds": 60 }
            }
        }
    }))
    .expect("static limits are valid")
}

/// Per-sport minimum edges from `MIN_EDGE_<SPORT>` overrides (percent).
pub fn min_edges_from_env() -> HashMap<crate::models::Sport, f64> {
    let mut edges = HashMap::new();
    for sport in crate::models::Sport::ALL {
        let key = format!("MIN_EDGE_{}", sport.as_str().to_uppercase());
        if let Ok(raw) = std::env::var(&key) {
            if let Ok(pct) = raw.parse::<f64>() {
                edges.insert(sport, pct / 100.0);
            }
        }
    }
    edges
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Sport;

    #[test]
    fn risk_limits_parse_from_json() {
        let limits = default_risk_limits();
        let hockey = limits.get(&Sport::Hockey).unwrap();
        assert_eq!(hockey.max_sport_cents, 2000);
        assert_eq!(hockey.leagues.get("NHL").unwrap().max_game_cents, 500);
        assert!(hockey.leagues.contains_key("*"));
    }

    #[test]
    fn risk_limits_parse_from_toml() {
        let raw = r#"
            [hockey]
            max_sport_cents = 100

            [hockey.leagues.NHL]
            max_game_cents = 100
            throttle_ms = 0
            order_ttl_seconds = 30
        "#;
        let limits: RiskLimits = toml::from_str(raw).unwrap();
        let lane = limits
            .get(&Sport::Hockey)
            .unwrap()
            .leagues
            .get("NHL")
            .unwrap();
        assert_eq!(lane.order_ttl_seconds, 30);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(load_risk_limits("/definitely/not/here.json").is_err());
    }
}
