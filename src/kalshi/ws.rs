//! Exchange quote stream.
//!
//! One long-lived session subscribes to the ticker channel for the union of
//! tickers known to the store; every snapshot or delta becomes a
//! `MarketData` publish. Reconnects back off exponentially (1 s → 30 s) and
//! resubscribe everything; a 30-second read deadline, reset on every frame,
//! catches dead peers.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::connect_async;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::{BusEvent, EventBus};
use crate::game::store::GameStore;
use crate::kalshi::{dollars_to_cents, http::KalshiHttpClient};
use crate::models::{MarketData, WsStatus};

const READ_DEADLINE: Duration = Duration::from_secs(30);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);
const WS_AUTH_PATH: &str = "/trade-api/ws/v2";

/// Handle for requesting subscriptions to newly resolved tickers.
#[derive(Clone)]
pub struct QuoteFeedHandle {
    cmd_tx: mpsc::Sender<Vec<String>>,
}

impl QuoteFeedHandle {
    /// Non-blocking; tickers are also re-derived from the store on every
    /// reconnect, so a dropped request only delays the subscription.
    pub fn subscribe(&self, tickers: Vec<String>) {
        if tickers.is_empty() {
            return;
        }
        let _ = self.cmd_tx.try_send(tickers);
    }
}

pub struct QuoteFeed {
    url: String,
    signer: Option<Arc<KalshiHttpClient>>,
    store: Arc<GameStore>,
    bus: Arc<EventBus>,
    cancel: CancellationToken,
}

impl QuoteFeed {
    /// Spawn the session worker and return the subscription handle.
    pub fn spawn(
        url: String,
        signer: Option<Arc<KalshiHttpClient>>,
        store: Arc<GameStore>,
        bus: Arc<EventBus>,
        cancel: CancellationToken,
    ) -> QuoteFeedHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel::<Vec<String>>(1024);
        let feed = QuoteFeed {
            url,
            signer,
            store,
            bus,
            cancel,
        };
        tokio::spawn(async move {
            feed.run(cmd_rx).await;
        });
        QuoteFeedHandle { cmd_tx }
    }

    async fn run(self, mut cmd_rx: mpsc::Receiver<Vec<String>>) {
        let mut reconnect_delay = Duration::from_secs(1);
        let mut sub_id: i64 = 0;

        loop {
            if self.cancel.is_cancelled() {
                return;
            }

            // Nothing to stream until at least one actor holds a ticker.
            while self.store.known_tickers().is_empty() {
                tokio::select! {
                    _ = self.cancel.cancelled() => return,
                    cmd = cmd_rx.recv() => {
                        if cmd.is_none() {
                            return;
                        }
                        // Tickers land in the store before the subscribe
                        // request; the union below picks them up.
                    }
                    _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                }
            }

            match self.connect_and_stream(&mut cmd_rx, &mut sub_id).await {
                Ok(()) => return,
                Err(e) => {
                    warn!(error = %e, "quote stream disconnected; reconnecting");
                    self.bus.publish(BusEvent::WsStatus(WsStatus::Disconnected {
                        reason: e.to_string(),
                    }));
                    tokio::select! {
                        _ = self.cancel.cancelled() => return,
                        _ = tokio::time::sleep(reconnect_delay) => {}
                    }
                    reconnect_delay = (reconnect_delay * 2).min(MAX_RECONNECT_DELAY);
                }
            }
        }
    }

    async fn connect_and_stream(
        &self,
        cmd_rx: &mut mpsc::Receiver<Vec<String>>,
        sub_id: &mut i64,
    ) -> Result<()> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .context("bad quote stream url")?;
        if let Some(signer) = &self.signer {
            for (name, value) in signer.auth_headers("GET", WS_AUTH_PATH)? {
                request
                    .headers_mut()
                    .insert(name, value.parse().context("auth header value")?);
            }
        }

        let (ws_stream, _response) = connect_async(request)
            .await
            .context("quote stream connect")?;
        info!("quote stream connected");
        self.bus.publish(BusEvent::WsStatus(WsStatus::Connected));

        let (mut write, mut read) = ws_stream.split();

        // Resubscribe the union atomically on every connect.
        let known = self.store.known_tickers();
        if !known.is_empty() {
            *sub_id += 1;
            write
                .send(Message::Text(subscribe_cmd(*sub_id, &known)))
                .await
                .context("initial subscribe")?;
        }

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                cmd = cmd_rx.recv() => {
                    let Some(tickers) = cmd else {
                        return Ok(());
                    };
                    *sub_id += 1;
                    write
                        .send(Message::Text(subscribe_cmd(*sub_id, &tickers)))
                        .await
                        .context("incremental subscribe")?;
                }
                frame = timeout(READ_DEADLINE, read.next()) => {
                    // The server pings regularly; 30 quiet seconds means a
                    // dead peer.
                    let frame = frame.map_err(|_| anyhow!("read deadline exceeded"))?;
                    let Some(frame) = frame else {
                        return Err(anyhow!("quote stream ended"));
                    };
                    match frame.context("quote stream read")? {
                        Message::Text(text) => self.handle_text(&text),
                        Message::Ping(payload) => {
                            let _ = write.send(Message::Pong(payload)).await;
                        }
                        Message::Close(frame) => {
                            debug!(?frame, "quote stream close frame");
                            return Err(anyhow!("server closed the stream"));
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    fn handle_text(&self, text: &str) {
        let frame: StreamFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(_) => return,
        };
        if frame.frame_type != "ticker" {
            return;
        }
        let Some(body) = frame.msg else {
            return;
        };
        let Some(ticker) = body.market_ticker else {
            return;
        };

        self.bus.publish(BusEvent::MarketData(MarketData {
            ticker,
            yes_bid: body.yes_bid_dollars.as_deref().and_then(dollars_to_cents),
            no_bid: body.no_bid_dollars.as_deref().and_then(dollars_to_cents),
            volume: body.volume,
            received_at: chrono::Utc::now(),
        }));
    }
}

fn subscribe_cmd(id: i64, tickers: &[String]) -> String {
    serde_json::json!({
        "id": id,
        "cmd": "subscribe",
        "params": {
            "channels": ["ticker"],
            "market_tickers": tickers,
            "send_initial_snapshot": true,
        }
    })
    .to_string()
}

#[derive(Debug, Deserialize)]
struct StreamFrame {
    #[serde(rename = "type")]
    frame_type: String,
    #[serde(default)]
    msg: Option<TickerBody>,
    #[serde(default)]
    #[allow(dead_code)]
    sid: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct TickerBody {
    #[serde(default)]
    market_ticker: Option<String>,
    #[serde(default)]
    yes_bid_dollars: Option<String>,
    #[serde(default)]
    no_bid_dollars: Option<String>,
    #[serde(default)]
    volume: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_cmd_shape() {
        let cmd = subscribe_cmd(7, &["T1".to_string(), "T2".to_string()]);
        let value: serde_json::Value = serde_json::from_str(&cmd).unwrap();
        assert_eq!(value["id"], 7);
        assert_eq!(value["cmd"], "subscribe");
        assert_eq!(value["params"]["channels"][0], "ticker");
        assert_eq!(value["params"]["market_tickers"][1], "T2");
        assert_eq!(value["params"]["send_initial_snapshot"], true);
    }

    #[test]
    fn ticker_frame_parses_with_absent_fields() {
        let text = r#"{"type":"ticker","sid":3,"msg":{"market_ticker":"EV-H","yes_bid_dollars":"0.41","volume":250}}"#;
        let frame: StreamFrame = serde_json::from_str(text).unwrap();
        assert_eq!(frame.frame_type, "ticker");
        let body = frame.msg.unwrap();
        assert_eq!(body.market_ticker.as_deref(), Some("EV-H"));
        assert_eq!(body.yes_bid_dollars.as_deref(), Some("0.41"));
        // Absent field stays the sentinel.
        assert!(body.no_bid_dollars.is_none());
        assert_eq!(body.volume, Some(250));
    }

    #[test]
    fn non_ticker_frames_are_ignored_by_shape() {
        let text = r#"{"type":"subscribed","sid":1}"#;
        let frame: StreamFrame = serde_json::from_str(text).unwrap();
        assert_eq!(frame.frame_type, "subscribed");
        assert!(frame.msg.is_none());
    }
}
