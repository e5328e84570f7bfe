//! Wiring and lifecycle: load config and risk limits, build the pipeline,
//! serve the provider webhook, and shut down cleanly on SIGINT.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::Connection;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use overtime_backend::config::{load_risk_limits, min_edges_from_env, Config};
use overtime_backend::dispatch::Pipeline;
use overtime_backend::execution::LaneRouter;
use overtime_backend::feed::webhook::{self, WebhookState};
use overtime_backend::game::store::GameStore;
use overtime_backend::kalshi::http::KalshiHttpClient;
use overtime_backend::kalshi::ws::QuoteFeed;
use overtime_backend::kalshi::ExchangeApi;
use overtime_backend::notify::DiscordNotifier;
use overtime_backend::observers::tracking::TrackingObserver;
use overtime_backend::observers::training::TrainingObserver;
use overtime_backend::observers::{DisplayObserver, GameObserver, OverturnLogObserver};
use overtime_backend::resolver::{default_series, TickerResolver, MARKET_CACHE_TTL};
use overtime_backend::strategy::{StrategyConfig, StrategyEngine};

/// In-flight placements get this long after SIGINT.
const PLACEMENT_DRAIN_DEADLINE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into())))
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{e:#}"), "fatal startup error");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let config = Config::from_env()?;
    let limits = load_risk_limits(&config.risk_limits_path)?;

    let key_pem = std::fs::read_to_string(&config.kalshi_key_file)
        .with_context(|| format!("cannot read key file {}", config.kalshi_key_file))?;
    let client = Arc::new(KalshiHttpClient::new(
        &config.kalshi_base_url,
        &config.kalshi_key_id,
        &key_pem,
        config.rate_divisor,
    )?);
    let exchange: Arc<dyn ExchangeApi> = client.clone();

    let conn = Arc::new(Mutex::new(
        Connection::open(&config.database_path)
            .with_context(|| format!("cannot open database {}", config.database_path))?,
    ));

    let cancel = CancellationToken::new();
    let bus = Arc::new(overtime_backend::EventBus::new());
    let store = Arc::new(GameStore::new());
    let resolver = Arc::new(TickerResolver::new(
        exchange.clone(),
        default_series(),
        MARKET_CACHE_TTL,
    ));
    let engine = Arc::new(StrategyEngine::new(
        bus.clone(),
        StrategyConfig {
            min_edge: min_edges_from_env(),
            mock_enabled: config.mock_games_enabled,
        },
    ));
    let router = Arc::new(LaneRouter::new(
        &limits,
        exchange.clone(),
        store.clone(),
        config.dry_run,
    ));
    let notifier = DiscordNotifier::new(config.discord_webhook_url.clone());

    let observers: Vec<Arc<dyn GameObserver>> = vec![
        Arc::new(DisplayObserver),
        Arc::new(OverturnLogObserver::new(conn.clone())?),
        Arc::new(TrainingObserver::new(conn.clone())?),
        Arc::new(TrackingObserver::new(
            conn.clone(),
            exchange.clone(),
            store.clone(),
            client.read_budget(),
            overtime_backend::execution::DEFAULT_ORDER_TTL,
        )?),
    ];

    let quotes = QuoteFeed::spawn(
        config.kalshi_ws_url.clone(),
        Some(client.clone()),
        store.clone(),
        bus.clone(),
        cancel.clone(),
    );

    let pipeline = Arc::new(Pipeline {
        bus: bus.clone(),
        store: store.clone(),
        resolver,
        engine,
        router: router.clone(),
        quotes: Some(quotes),
        observers,
        notifier: notifier.clone(),
        confirm_window: config.score_drop_confirm,
    });
    pipeline.clone().wire();

    let app = webhook::router(WebhookState {
        bus: bus.clone(),
        store: store.clone(),
        mock_enabled: config.mock_games_enabled,
    });

    let addr = format!("{}:{}", config.webhook_host, config.webhook_port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("cannot bind webhook listener on {addr}"))?;
    info!(addr = %addr, "webhook listening");
    notifier.send("overtime up".to_string());

    let shutdown = cancel.clone();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        shutdown.cancelled().await;
    });

    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            signal_cancel.cancel();
        }
    });

    server.await.context("webhook server error")?;

    // Let in-flight placements land, then close every actor.
    let _ = tokio::time::timeout(PLACEMENT_DRAIN_DEADLINE, router.drain()).await;
    store.close_all();
    info!("shutdown complete");
    Ok(())
}
