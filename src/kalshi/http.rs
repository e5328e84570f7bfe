//! Signed exchange REST client.
//!
//! Every request carries `KALSHI-ACCESS-KEY` / `-SIGNATURE` / `-TIMESTAMP`
//! headers where the signature is RSA-PSS-SHA256 over
//! `timestamp || method || path` (salt length = hash length). Reads retry
//! on transient failures; writes never do.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use parking_lot::Mutex;
use reqwest::StatusCode;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::pss::Pss;
use rsa::RsaPrivateKey;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::{
    BatchOrderRequest, BatchOrderResponse, ExchangeApi, Market, MarketsPage, Order,
};

pub static AUTH_REJECTIONS: AtomicU64 = AtomicU64::new(0);

const MARKETS_PAGE_LIMIT: u32 = 200;
const READ_RETRIES: u32 = 3;

/// Token bucket; one for reads, one for writes, both scaled by the
/// configured divisor.
pub struct Bucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<(f64, Instant)>,
}

impl Bucket {
    pub fn new(capacity: f64, refill_per_sec: f64) -> Self {
        Self {
            capacity,
            refill_per_sec,
            state: Mutex::new((capacity, Instant::now())),
        }
    }

    fn refill(&self, state: &mut (f64, Instant)) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.1).as_secs_f64();
        state.0 = (state.0 + elapsed * self.refill_per_sec).min(self.capacity);
        state.1 = now;
    }

    /// Take one token, waiting as long as needed.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock();
                self.refill(&mut state);
                if state.0 >= 1.0 {
                    state.0 -= 1.0;
                    return;
                }
                Duration::from_secs_f64((1.0 - state.0) / self.refill_per_sec)
            };
            tokio::time::sleep(wait).await;
        }
    }

    /// Take one token only if available now (budget gates).
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();
        self.refill(&mut state);
        if state.0 >= 1.0 {
            state.0 -= 1.0;
            true
        } else {
            false
        }
    }
}

pub struct RateLimiter {
    pub reads: Arc<Bucket>,
    pub writes: Arc<Bucket>,
}

impl RateLimiter {
    /// Exchange defaults divided by `divisor` (shared keys run with a
    /// higher divisor).
    pub fn new(divisor: f64) -> Self {
        let divisor = divisor.max(1.0);
        Self {
            reads: Arc::new(Bucket::new(10.0, 10.0 / divisor)),
            writes: Arc::new(Bucket::new(5.0, 5.0 / divisor)),
        }
    }
}

pub struct KalshiHttpClient {
    base_url: String,
    key_id: String,
    key: RsaPrivateKey,
    http: reqwest::Client,
    limiter: RateLimiter,
}

impl KalshiHttpClient {
    pub fn new(base_url: &str, key_id: &str, key_pem: &str, rate_divisor: f64) -> Result<Self> {
        let key = RsaPrivateKey::from_pkcs8_pem(key_pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(key_pem))
            .context("private key is neither PKCS#8 nor PKCS#1 PEM")?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("http client build")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            key_id: key_id.to_string(),
            key,
            http,
            limiter: RateLimiter::new(rate_divisor),
        })
    }

    /// Read bucket handle for callers gating optional polls.
    pub fn read_budget(&self) -> Arc<Bucket> {
        self.limiter.reads.clone()
    }

    /// Auth headers for a non-REST surface (the WebSocket handshake signs
    /// the upgrade path the same way).
    pub fn auth_headers(&self, method: &str, path: &str) -> Result<[(&'static str, String); 3]> {
        let timestamp_ms = chrono::Utc::now().timestamp_millis();
        let signature = self.sign(timestamp_ms, method, path)?;
        Ok([
            ("KALSHI-ACCESS-KEY", self.key_id.clone()),
            ("KALSHI-ACCESS-SIGNATURE", signature),
            ("KALSHI-ACCESS-TIMESTAMP", timestamp_ms.to_string()),
        ])
    }

    /// base64(RSA-PSS-SHA256(timestamp || method || path)).
    fn sign(&self, timestamp_ms: i64, method: &str, path: &str) -> Result<String> {
        let message = format!("{timestamp_ms}{method}{path}");
        let digest = Sha256::digest(message.as_bytes());
        let signature = self
            .key
            .sign_with_rng(&mut rand::thread_rng(), Pss::new::<Sha256>(), &digest)
            .context("pss signing failed")?;
        Ok(BASE64.encode(signature))
    }

    async fn send(
        &self,
        method: reqwest::Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<serde_json::Value>,
    ) -> Result<reqwest::Response> {
        let timestamp_ms = chrono::Utc::now().timestamp_millis();
        let signature = self.sign(timestamp_ms, method.as_str(), path)?;

        let url = format!("{}{}", self.base_url, path);
        let mut request = self
            .http
            .request(method, url)
            .query(query)
            .header("KALSHI-ACCESS-KEY", &self.key_id)
            .header("KALSHI-ACCESS-SIGNATURE", signature)
            .header("KALSHI-ACCESS-TIMESTAMP", timestamp_ms.to_string());
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.context("exchange request failed")?;
        if response.status() == StatusCode::UNAUTHORIZED
            || response.status() == StatusCode::FORBIDDEN
        {
            AUTH_REJECTIONS.fetch_add(1, Ordering::Relaxed);
            bail!("exchange auth rejection: {}", response.status());
        }
        Ok(response)
    }

    async fn get_with_retry(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<reqwest::Response> {
        let mut backoff = Duration::from_millis(250);
        let mut last_error = None;
        for attempt in 0..READ_RETRIES {
            self.limiter.reads.acquire().await;
            match self.send(reqwest::Method::GET, path, query, None).await {
                Ok(response) if response.status().is_server_error() => {
                    last_error = Some(anyhow::anyhow!("server error {}", response.status()));
                }
                Ok(response) => return Ok(response),
                Err(e) => last_error = Some(e),
            }
            debug!(path, attempt, "read retry");
            tokio::time::sleep(backoff).await;
            backoff *= 2;
        }
        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("read failed")))
    }
}

#[async_trait]
impl ExchangeApi for KalshiHttpClient {
    async fn get_markets(&self, series: &str) -> Result<Vec<Market>> {
        let path = "/trade-api/v2/markets";
        let mut markets = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut query = vec![
                ("series_ticker", series.to_string()),
                ("status", "open".to_string()),
                ("limit", MARKETS_PAGE_LIMIT.to_string()),
            ];
            if let Some(cursor) = &cursor {
                query.push(("cursor", cursor.clone()));
            }

            let response = self.get_with_retry(path, &query).await?;
            if !response.status().is_success() {
                bail!("get_markets {}: {}", series, response.status());
            }
            let page: MarketsPage = response.json().await.context("markets page decode")?;
            markets.extend(page.markets);

            match page.cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        debug!(series, count = markets.len(), "markets fetched");
        Ok(markets)
    }

    async fn place_batch_orders(
        &self,
        request: BatchOrderRequest,
    ) -> Result<BatchOrderResponse> {
        let path = "/trade-api/v2/portfolio/orders/batched";
        self.limiter.writes.acquire().await;
        let body = serde_json::to_value(&request).context("batch encode")?;
        // Writes go out exactly once; a failure surfaces to the caller.
        let response = self.send(reqwest::Method::POST, path, &[], Some(body)).await?;
        let status = response.status();
        if !status.is_success() {
            warn!(status = %status, "batch order rejected");
            bail!("place_batch_orders: {status}");
        }
        response.json().await.context("batch response decode")
    }

    async fn get_order(&self, order_id: &str) -> Result<Order> {
        let path = format!("/trade-api/v2/portfolio/orders/{order_id}");
        let response = self.get_with_retry(&path, &[]).await?;
        if !response.status().is_success() {
            bail!("get_order {}: {}", order_id, response.status());
        }
        #[derive(serde::Deserialize)]
        struct OrderEnvelope {
            order: Order,
        }
        let envelope: OrderEnvelope = response.json().await.context("order decode")?;
        Ok(envelope.order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_exhausts_and_refills() {
        let bucket = Bucket::new(2.0, 1000.0);
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());
        // Refill at 1000/s makes a token available almost immediately.
        std::thread::sleep(Duration::from_millis(5));
        assert!(bucket.try_acquire());
    }

    #[test]
    fn divisor_slows_refill_not_capacity() {
        let limiter = RateLimiter::new(5.0);
        // Capacity unchanged: burst of 10 reads goes through.
        for _ in 0..10 {
            assert!(limiter.reads.try_acquire());
        }
        assert!(!limiter.reads.try_acquire());
    }

    #[test]
    fn signature_message_layout() {
        // The signed message is the exact concatenation the exchange
        // verifies; a drifting layout breaks auth silently.
        let message = format!("{}{}{}", 1_700_000_000_123i64, "GET", "/trade-api/v2/markets");
        assert_eq!(message, "1700000000123GET/trade-api/v2/markets");
    }
}
