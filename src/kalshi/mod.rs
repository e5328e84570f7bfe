//! Exchange adapter: wire types shared by the REST client and the quote
//! stream, plus the trait the core trades through.

pub mod http;
pub mod ws;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::Side;

/// One market row from `GetMarkets`. Prices come as decimal dollar strings;
/// absent quotes stay `None`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Market {
    pub ticker: String,
    pub event_ticker: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub yes_sub_title: String,
    #[serde(default)]
    pub yes_ask_dollars: Option<String>,
    #[serde(default)]
    pub yes_bid_dollars: Option<String>,
    #[serde(default)]
    pub no_ask_dollars: Option<String>,
    #[serde(default)]
    pub no_bid_dollars: Option<String>,
    #[serde(default)]
    pub volume: i64,
    #[serde(default)]
    pub expected_expiration_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub close_time: Option<DateTime<Utc>>,
}

impl Market {
    pub fn expiration(&self) -> Option<DateTime<Utc>> {
        self.expected_expiration_time.or(self.close_time)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarketsPage {
    #[serde(default)]
    pub markets: Vec<Market>,
    #[serde(default)]
    pub cursor: Option<String>,
}

/// One order inside a batched placement request.
#[derive(Debug, Clone, Serialize)]
pub struct OrderRequest {
    pub ticker: String,
    pub action: &'static str,
    pub side: Side,
    #[serde(rename = "type")]
    pub order_type: &'static str,
    pub count_fp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub yes_price_dollars: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_price_dollars: Option<String>,
    pub client_order_id: String,
    pub time_in_force: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration_ts: Option<i64>,
}

impl OrderRequest {
    /// Limit buy of one contract; `expiration_ts` is absent for slams.
    pub fn limit_buy(
        ticker: &str,
        side: Side,
        price_cents: i64,
        expiration_ts: Option<i64>,
    ) -> Self {
        let price = Some(cents_to_dollars(price_cents));
        let (yes_price_dollars, no_price_dollars) = match side {
            Side::Yes => (price, None),
            Side::No => (None, price),
        };
        Self {
            ticker: ticker.to_string(),
            action: "buy",
            side,
            order_type: "limit",
            count_fp: "1.00".to_string(),
            yes_price_dollars,
            no_price_dollars,
            client_order_id: uuid::Uuid::new_v4().to_string(),
            time_in_force: "good_till_canceled",
            expiration_ts,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchOrderRequest {
    pub orders: Vec<OrderRequest>,
}

/// Exchange view of one accepted order.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub ticker: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub yes_price: Option<i64>,
    #[serde(default)]
    pub no_price: Option<i64>,
    #[serde(default)]
    pub taker_fill_count: Option<i64>,
    #[serde(default)]
    pub maker_fill_count: Option<i64>,
    #[serde(default)]
    pub taker_fill_cost: Option<i64>,
    #[serde(default)]
    pub maker_fill_cost: Option<i64>,
    #[serde(default)]
    pub remaining_count: Option<i64>,
}

impl Order {
    pub fn filled_count(&self) -> i64 {
        self.taker_fill_count.unwrap_or(0) + self.maker_fill_count.unwrap_or(0)
    }

    pub fn fill_cost_cents(&self) -> i64 {
        self.taker_fill_cost.unwrap_or(0) + self.maker_fill_cost.unwrap_or(0)
    }

    pub fn price_cents(&self) -> Option<i64> {
        self.yes_price.or(self.no_price)
    }
}

/// Per-order slot in a batch response: either an accepted order or an
/// error message. The rest of the batch is unaffected by one rejection.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BatchOrderSlot {
    #[serde(default)]
    pub order: Option<Order>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BatchOrderResponse {
    #[serde(default)]
    pub orders: Vec<BatchOrderSlot>,
}

/// The three exchange operations the core consumes. The HTTP client
/// implements this; tests substitute a stub.
#[async_trait]
pub trait ExchangeApi: Send + Sync {
    async fn get_markets(&self, series: &str) -> anyhow::Result<Vec<Market>>;
    async fn place_batch_orders(
        &self,
        request: BatchOrderRequest,
    ) -> anyhow::Result<BatchOrderResponse>;
    async fn get_order(&self, order_id: &str) -> anyhow::Result<Order>;
}

/// "0.35" → 35; tolerates a leading `$` and surrounding whitespace.
pub fn dollars_to_cents(dollars: &str) -> Option<i64> {
    let trimmed = dollars.trim().trim_start_matches('$');
    if trimmed.is_empty() {
        return None;
    }
    let value: f64 = trimmed.parse().ok()?;
    Some((value * 100.0).round() as i64)
}

/// 35 → "0.35".
pub fn cents_to_dollars(cents: i64) -> String {
    format!("{}.{:02}", cents / 100, cents % 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dollar_conversions_roundtrip() {
        assert_eq!(dollars_to_cents("0.35"), Some(35));
        assert_eq!(dollars_to_cents("1.00"), Some(100));
        assert_eq!(dollars_to_cents("$0.07 "), Some(7));
        assert_eq!(dollars_to_cents(""), None);
        assert_eq!(dollars_to_cents("n/a"), None);

        assert_eq!(cents_to_dollars(35), "0.35");
        assert_eq!(cents_to_dollars(7), "0.07");
        assert_eq!(cents_to_dollars(100), "1.00");
    }

    #[test]
    fn limit_buy_sets_only_one_price_field() {
        let yes = OrderRequest::limit_buy("T-1", Side::Yes, 70, Some(1_700_000_060));
        assert_eq!(yes.yes_price_dollars.as_deref(), Some("0.70"));
        assert!(yes.no_price_dollars.is_none());
        assert_eq!(yes.expiration_ts, Some(1_700_000_060));

        let no = OrderRequest::limit_buy("T-1", Side::No, 40, None);
        assert_eq!(no.no_price_dollars.as_deref(), Some("0.40"));
        assert!(no.yes_price_dollars.is_none());
        assert!(no.expiration_ts.is_none());

        let json = serde_json::to_value(&yes).unwrap();
        assert_eq!(json["action"], "buy");
        assert_eq!(json["type"], "limit");
        assert_eq!(json["side"], "yes");
        assert_eq!(json["time_in_force"], "good_till_canceled");
        assert!(json.get("no_price_dollars").is_none());
    }

    #[test]
    fn order_fill_accessors_sum_taker_and_maker() {
        let order = Order {
            order_id: "o1".into(),
            ticker: "T".into(),
            taker_fill_count: Some(1),
            maker_fill_count: Some(2),
            taker_fill_cost: Some(70),
            maker_fill_cost: Some(140),
            ..Default::default()
        };
        assert_eq!(order.filled_count(), 3);
        assert_eq!(order.fill_cost_cents(), 210);
    }
}
