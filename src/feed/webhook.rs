//! Inbound provider webhook.
//!
//! The provider expects a fast 200 on every push, so handlers hand the body
//! to a parsing task and acknowledge immediately; malformed payloads are a
//! counter, never an error response.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::bus::{BusEvent, EventBus};
use crate::feed::parser::parse_frame;
use crate::game::store::GameStore;
use crate::models::Sport;

/// Mock-game frames dropped because the escape hatch is disabled.
pub static MOCK_DROPPED: AtomicU64 = AtomicU64::new(0);

#[derive(Clone)]
pub struct WebhookState {
    pub bus: Arc<EventBus>,
    pub store: Arc<GameStore>,
    pub mock_enabled: bool,
}

pub fn router(state: WebhookState) -> Router {
    Router::new()
        .route("/webhook/hockey", post(hockey))
        .route("/webhook/soccer", post(soccer))
        .route("/webhook/football", post(football))
        // Legacy aliases kept for older provider configurations.
        .route("/webhook", post(hockey))
        .route("/webhook/goalserve", post(hockey))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn hockey(State(state): State<WebhookState>, body: Bytes) -> StatusCode {
    accept(state, Sport::Hockey, body)
}

async fn soccer(State(state): State<WebhookState>, body: Bytes) -> StatusCode {
    accept(state, Sport::Soccer, body)
}

async fn football(State(state): State<WebhookState>, body: Bytes) -> StatusCode {
    accept(state, Sport::Football, body)
}

fn accept(state: WebhookState, sport: Sport, body: Bytes) -> StatusCode {
    tokio::spawn(async move {
        match parse_frame(sport, &body) {
            Ok(updates) => {
                for update in updates {
                    if update.is_mock() && !state.mock_enabled {
                        MOCK_DROPPED.fetch_add(1, Ordering::Relaxed);
                        continue;
                    }
                    state.bus.publish(BusEvent::GameUpdate(update));
                }
            }
            Err(e) => warn!(sport = %sport, error = %e, "webhook frame rejected"),
        }
    });
    StatusCode::OK
}

async fn health(State(state): State<WebhookState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "live_games": state.store.len(),
        "ts": chrono::Utc::now().timestamp(),
    }))
}
