// =============================================================================
// Alpaca REST client — limit orders, positions, order-status polling
// =============================================================================
//
// SECURITY: the secret key is sent only as a request header and never logged
// or serialized. Paper vs. live selects the base URL at construction; the
// API surface is identical.
//
// Fill delivery: the client polls the status of every order it submitted and
// pushes typed `OrderUpdate`s over a channel. Polling keeps paper and live
// behaviour identical and tolerates engine restarts (untracked orders are
// simply never polled; see recovery notes in the strategy runtime).
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, instrument, warn};

use super::{
    AccountInfo, Broker, BrokerError, BrokerOrder, BrokerPosition, OrderUpdate, OrderUpdateKind,
    QuoteSnapshot,
};
use crate::types::Side;

const PAPER_BASE_URL: &str = "https://paper-api.alpaca.markets";
const LIVE_BASE_URL: &str = "https://api.alpaca.markets";
const DATA_BASE_URL: &str = "https://data.alpaca.markets";

/// Per-request timeout. Broker calls that exceed this are treated as failed;
/// if the order actually went through, the poll loop resolves it.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// An order we submitted and are polling until it reaches a terminal state.
#[derive(Debug, Clone)]
struct TrackedOrder {
    ticker: String,
    side: Side,
    last_filled: u32,
}

/// Alpaca REST trading client.
pub struct AlpacaBroker {
    client: reqwest::Client,
    base_url: String,
    data_url: String,
    paper: bool,
    tracked: Mutex<HashMap<String, TrackedOrder>>,
}

impl AlpacaBroker {
    /// Create a client from explicit credentials.
    pub fn new(api_key: impl Into<String>, secret: impl Into<String>, paper: bool) -> Self {
        let api_key = api_key.into();
        let secret = secret.into();

        let mut default_headers = HeaderMap::new();
        if let Ok(val) = HeaderValue::from_str(&api_key) {
            default_headers.insert("APCA-API-KEY-ID", val);
        }
        if let Ok(val) = HeaderValue::from_str(&secret) {
            default_headers.insert("APCA-API-SECRET-KEY", val);
        }

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("failed to build reqwest client");

        let base_url = if paper { PAPER_BASE_URL } else { LIVE_BASE_URL };
        debug!(base_url, paper, "AlpacaBroker initialised");

        Self {
            client,
            base_url: base_url.to_string(),
            data_url: DATA_BASE_URL.to_string(),
            paper,
            tracked: Mutex::new(HashMap::new()),
        }
    }

    /// Create a client from `APCA_API_KEY_ID` / `APCA_API_SECRET_KEY`.
    pub fn from_env(paper: bool) -> anyhow::Result<Self> {
        let key = std::env::var("APCA_API_KEY_ID")
            .map_err(|_| anyhow::anyhow!("APCA_API_KEY_ID not set"))?;
        let secret = std::env::var("APCA_API_SECRET_KEY")
            .map_err(|_| anyhow::anyhow!("APCA_API_SECRET_KEY not set"))?;
        Ok(Self::new(key, secret, paper))
    }

    // -------------------------------------------------------------------------
    // HTTP helpers
    // -------------------------------------------------------------------------

    async fn check(resp: reqwest::Response) -> Result<Value, BrokerError> {
        let status = resp.status();
        let body: Value = resp
            .json()
            .await
            .map_err(|e| BrokerError::Transport(format!("failed to parse response: {e}")))?;

        if status.is_success() {
            return Ok(body);
        }

        let message = body["message"].as_str().unwrap_or("").to_string();
        Err(Self::classify_error(status.as_u16(), message))
    }

    /// Map an Alpaca error response onto the engine's error taxonomy.
    fn classify_error(code: u16, message: String) -> BrokerError {
        let lower = message.to_ascii_lowercase();
        if lower.contains("insufficient qty") || lower.contains("insufficient quantity") {
            BrokerError::InsufficientQuantity(message)
        } else if lower.contains("position does not exist") || lower.contains("position not found")
        {
            BrokerError::PositionNotFound(message)
        } else if code == 403 || code == 422 {
            BrokerError::Rejected(message)
        } else {
            BrokerError::Api { code, message }
        }
    }

    fn parse_order(v: &Value) -> Option<BrokerOrder> {
        let side = match v["side"].as_str()? {
            "buy" => Side::Buy,
            "sell" => Side::Sell,
            _ => return None,
        };
        Some(BrokerOrder {
            order_id: v["id"].as_str()?.to_string(),
            ticker: v["symbol"].as_str()?.to_string(),
            side,
            shares: Self::parse_num_u32(&v["qty"]),
            order_type: v["order_type"]
                .as_str()
                .or_else(|| v["type"].as_str())
                .unwrap_or("limit")
                .to_string(),
            status: v["status"].as_str().unwrap_or("unknown").to_string(),
            limit_price: Self::parse_num_f64(&v["limit_price"]),
            filled_shares: Self::parse_num_u32(&v["filled_qty"]),
            filled_avg_price: Self::parse_num_f64(&v["filled_avg_price"]),
        })
    }

    fn parse_position(v: &Value) -> Option<BrokerPosition> {
        Some(BrokerPosition {
            ticker: v["symbol"].as_str()?.to_string(),
            shares: Self::parse_num_u32(&v["qty"]),
            avg_entry_price: Self::parse_num_f64(&v["avg_entry_price"]).unwrap_or(0.0),
            market_value: Self::parse_num_f64(&v["market_value"]).unwrap_or(0.0),
            unrealized_pl: Self::parse_num_f64(&v["unrealized_pl"]).unwrap_or(0.0),
            unrealized_pl_pct: Self::parse_num_f64(&v["unrealized_plpc"]).unwrap_or(0.0) * 100.0,
        })
    }

    /// Alpaca sends numeric values as JSON strings.
    fn parse_num_f64(v: &Value) -> Option<f64> {
        match v {
            Value::String(s) => s.parse().ok(),
            Value::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    fn parse_num_u32(v: &Value) -> u32 {
        Self::parse_num_f64(v).map(|f| f as u32).unwrap_or(0)
    }

    async fn submit_order(
        &self,
        ticker: &str,
        side: Side,
        shares: u32,
        limit_price: f64,
    ) -> Result<BrokerOrder, BrokerError> {
        let body = serde_json::json!({
            "symbol": ticker,
            "qty": shares.to_string(),
            "side": side.to_string(),
            "type": "limit",
            "time_in_force": "day",
            "limit_price": format!("{limit_price:.2}"),
            "extended_hours": true,
        });

        let url = format!("{}/v2/orders", self.base_url);
        let resp = self.client.post(&url).json(&body).send().await?;
        let v = Self::check(resp).await?;

        let order = Self::parse_order(&v)
            .ok_or_else(|| BrokerError::Transport("unparseable order response".into()))?;

        // Track for fill polling.
        self.tracked.lock().insert(
            order.order_id.clone(),
            TrackedOrder {
                ticker: order.ticker.clone(),
                side,
                last_filled: 0,
            },
        );

        info!(
            ticker,
            side = %side,
            shares,
            limit_price,
            order_id = %order.order_id,
            status = %order.status,
            "order submitted"
        );
        Ok(order)
    }

    // -------------------------------------------------------------------------
    // Order-status polling
    // -------------------------------------------------------------------------

    /// Spawn the polling task that watches every submitted order and emits
    /// `OrderUpdate`s for fills, cancels and rejections. Runs until the
    /// channel closes.
    pub fn spawn_order_poller(
        self: &Arc<Self>,
        poll_interval: Duration,
        updates: UnboundedSender<OrderUpdate>,
    ) -> tokio::task::JoinHandle<()> {
        let broker = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            loop {
                ticker.tick().await;
                if updates.is_closed() {
                    debug!("order poller stopping: update channel closed");
                    return;
                }
                broker.poll_tracked_orders(&updates).await;
            }
        })
    }

    async fn poll_tracked_orders(&self, updates: &UnboundedSender<OrderUpdate>) {
        let ids: Vec<String> = self.tracked.lock().keys().cloned().collect();

        for order_id in ids {
            let url = format!("{}/v2/orders/{}", self.base_url, order_id);
            let resp = match self.client.get(&url).send().await {
                Ok(r) => r,
                Err(e) => {
                    warn!(order_id = %order_id, error = %e, "order poll request failed");
                    continue;
                }
            };
            let v = match Self::check(resp).await {
                Ok(v) => v,
                Err(e) => {
                    warn!(order_id = %order_id, error = %e, "order poll returned error");
                    continue;
                }
            };

            let Some(order) = Self::parse_order(&v) else {
                warn!(order_id = %order_id, "order poll: unparseable order payload");
                continue;
            };

            self.dispatch_order_state(&order, &v, updates);
        }
    }

    /// Translate a polled order state into zero or one `OrderUpdate`. The
    /// ticker and side come from what we submitted, not the polled payload.
    fn dispatch_order_state(
        &self,
        order: &BrokerOrder,
        raw: &Value,
        updates: &UnboundedSender<OrderUpdate>,
    ) {
        let update = {
            let mut tracked = self.tracked.lock();
            let Some(entry) = tracked.get(&order.order_id).cloned() else {
                return;
            };

            let now = Utc::now().naive_utc();
            match order.status.as_str() {
                "filled" => {
                    tracked.remove(&order.order_id);
                    Some(OrderUpdate {
                        order_id: order.order_id.clone(),
                        ticker: entry.ticker,
                        side: entry.side,
                        kind: OrderUpdateKind::Fill,
                        filled_shares: order.filled_shares,
                        fill_price: order.filled_avg_price.unwrap_or(0.0),
                        at: now,
                        reason: None,
                        raw: raw.clone(),
                    })
                }
                "partially_filled" if order.filled_shares > entry.last_filled => {
                    if let Some(t) = tracked.get_mut(&order.order_id) {
                        t.last_filled = order.filled_shares;
                    }
                    Some(OrderUpdate {
                        order_id: order.order_id.clone(),
                        ticker: entry.ticker,
                        side: entry.side,
                        kind: OrderUpdateKind::PartialFill,
                        filled_shares: order.filled_shares,
                        fill_price: order.filled_avg_price.unwrap_or(0.0),
                        at: now,
                        reason: None,
                        raw: raw.clone(),
                    })
                }
                "canceled" | "expired" | "done_for_day" => {
                    tracked.remove(&order.order_id);
                    Some(OrderUpdate {
                        order_id: order.order_id.clone(),
                        ticker: entry.ticker,
                        side: entry.side,
                        kind: OrderUpdateKind::Canceled,
                        filled_shares: order.filled_shares,
                        fill_price: order.filled_avg_price.unwrap_or(0.0),
                        at: now,
                        reason: Some(order.status.clone()),
                        raw: raw.clone(),
                    })
                }
                "rejected" => {
                    tracked.remove(&order.order_id);
                    Some(OrderUpdate {
                        order_id: order.order_id.clone(),
                        ticker: entry.ticker,
                        side: entry.side,
                        kind: OrderUpdateKind::Rejected,
                        filled_shares: 0,
                        fill_price: 0.0,
                        at: now,
                        reason: raw["reject_reason"].as_str().map(str::to_string),
                        raw: raw.clone(),
                    })
                }
                _ => None,
            }
        };

        if let Some(u) = update {
            debug!(order_id = %u.order_id, kind = ?u.kind, "order update");
            if updates.send(u).is_err() {
                warn!("order update channel closed; dropping update");
            }
        }
    }
}

#[async_trait]
impl Broker for AlpacaBroker {
    #[instrument(skip(self), name = "alpaca::buy")]
    async fn buy(
        &self,
        ticker: &str,
        shares: u32,
        limit_price: f64,
    ) -> Result<BrokerOrder, BrokerError> {
        self.submit_order(ticker, Side::Buy, shares, limit_price).await
    }

    #[instrument(skip(self), name = "alpaca::sell")]
    async fn sell(
        &self,
        ticker: &str,
        shares: u32,
        limit_price: f64,
    ) -> Result<BrokerOrder, BrokerError> {
        self.submit_order(ticker, Side::Sell, shares, limit_price).await
    }

    #[instrument(skip(self), name = "alpaca::get_position")]
    async fn get_position(&self, ticker: &str) -> Result<Option<BrokerPosition>, BrokerError> {
        let url = format!("{}/v2/positions/{}", self.base_url, ticker);
        let resp = self.client.get(&url).send().await?;

        if resp.status().as_u16() == 404 {
            return Ok(None);
        }
        let v = Self::check(resp).await?;
        Ok(Self::parse_position(&v))
    }

    #[instrument(skip(self), name = "alpaca::get_positions")]
    async fn get_positions(&self) -> Result<Vec<BrokerPosition>, BrokerError> {
        let url = format!("{}/v2/positions", self.base_url);
        let resp = self.client.get(&url).send().await?;
        let v = Self::check(resp).await?;

        let positions = v
            .as_array()
            .map(|arr| arr.iter().filter_map(Self::parse_position).collect())
            .unwrap_or_default();
        Ok(positions)
    }

    #[instrument(skip(self), name = "alpaca::get_open_orders")]
    async fn get_open_orders(&self) -> Result<Vec<BrokerOrder>, BrokerError> {
        let url = format!("{}/v2/orders?status=open&limit=500", self.base_url);
        let resp = self.client.get(&url).send().await?;
        let v = Self::check(resp).await?;

        let orders = v
            .as_array()
            .map(|arr| arr.iter().filter_map(Self::parse_order).collect())
            .unwrap_or_default();
        Ok(orders)
    }

    #[instrument(skip(self), name = "alpaca::cancel_order")]
    async fn cancel_order(&self, order_id: &str) -> Result<(), BrokerError> {
        let url = format!("{}/v2/orders/{}", self.base_url, order_id);
        let resp = self.client.delete(&url).send().await?;
        let status = resp.status();
        if status.is_success() || status.as_u16() == 404 {
            Ok(())
        } else {
            let body: Value = resp.json().await.unwrap_or_default();
            Err(Self::classify_error(
                status.as_u16(),
                body["message"].as_str().unwrap_or("").to_string(),
            ))
        }
    }

    #[instrument(skip(self), name = "alpaca::cancel_all_orders")]
    async fn cancel_all_orders(&self) -> Result<u32, BrokerError> {
        let url = format!("{}/v2/orders", self.base_url);
        let resp = self.client.delete(&url).send().await?;
        let v = Self::check(resp).await?;
        Ok(v.as_array().map(|arr| arr.len() as u32).unwrap_or(0))
    }

    #[instrument(skip(self), name = "alpaca::is_tradeable")]
    async fn is_tradeable(&self, ticker: &str) -> Result<(bool, String), BrokerError> {
        let url = format!("{}/v2/assets/{}", self.base_url, ticker);
        let resp = self.client.get(&url).send().await?;

        if resp.status().as_u16() == 404 {
            return Ok((false, "unknown symbol".to_string()));
        }
        let v = Self::check(resp).await?;

        let tradable = v["tradable"].as_bool().unwrap_or(false);
        let status = v["status"].as_str().unwrap_or("unknown");

        if !tradable {
            return Ok((false, format!("not tradable (status={status})")));
        }
        if status != "active" {
            return Ok((false, format!("asset status {status}")));
        }
        Ok((true, "tradeable".to_string()))
    }

    #[instrument(skip(self), name = "alpaca::get_account")]
    async fn get_account(&self) -> Result<AccountInfo, BrokerError> {
        let url = format!("{}/v2/account", self.base_url);
        let resp = self.client.get(&url).send().await?;
        let v = Self::check(resp).await?;

        Ok(AccountInfo {
            status: v["status"].as_str().unwrap_or("unknown").to_string(),
            equity: Self::parse_num_f64(&v["equity"]).unwrap_or(0.0),
            cash: Self::parse_num_f64(&v["cash"]).unwrap_or(0.0),
            buying_power: Self::parse_num_f64(&v["buying_power"]).unwrap_or(0.0),
        })
    }

    #[instrument(skip(self), name = "alpaca::get_quote")]
    async fn get_quote(&self, ticker: &str) -> Result<QuoteSnapshot, BrokerError> {
        let url = format!("{}/v2/stocks/{}/trades/latest", self.data_url, ticker);
        let resp = self.client.get(&url).send().await?;
        let v = Self::check(resp).await?;

        let trade = &v["trade"];
        let timestamp = trade["t"]
            .as_str()
            .and_then(crate::parser::parse_iso_utc)
            .unwrap_or_else(|| Utc::now().naive_utc());

        Ok(QuoteSnapshot {
            ticker: ticker.to_string(),
            last: Self::parse_num_f64(&trade["p"]).unwrap_or(0.0),
            volume: trade["s"].as_u64().unwrap_or(0),
            timestamp,
        })
    }

    fn is_paper(&self) -> bool {
        self.paper
    }
}

impl std::fmt::Debug for AlpacaBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlpacaBroker")
            .field("base_url", &self.base_url)
            .field("paper", &self.paper)
            .field("tracked_orders", &self.tracked.lock().len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        let e = AlpacaBroker::classify_error(403, "insufficient qty available (0 < 22)".into());
        assert!(matches!(e, BrokerError::InsufficientQuantity(_)));
        assert!(e.implies_no_position());

        let e = AlpacaBroker::classify_error(404, "position does not exist".into());
        assert!(matches!(e, BrokerError::PositionNotFound(_)));
        assert!(e.implies_no_position());

        let e = AlpacaBroker::classify_error(422, "cost basis must be >= 1".into());
        assert!(matches!(e, BrokerError::Rejected(_)));
        assert!(!e.implies_no_position());

        let e = AlpacaBroker::classify_error(500, "internal".into());
        assert!(matches!(e, BrokerError::Api { code: 500, .. }));
    }

    #[test]
    fn parses_order_payload() {
        let v = serde_json::json!({
            "id": "904837e3-3b76-47ec-b432-046db621571b",
            "symbol": "AAPL",
            "side": "buy",
            "qty": "22",
            "type": "limit",
            "status": "filled",
            "limit_price": "5.15",
            "filled_qty": "22",
            "filled_avg_price": "5.16"
        });
        let order = AlpacaBroker::parse_order(&v).unwrap();
        assert_eq!(order.ticker, "AAPL");
        assert_eq!(order.side, Side::Buy);
        assert_eq!(order.shares, 22);
        assert_eq!(order.filled_shares, 22);
        assert_eq!(order.filled_avg_price, Some(5.16));
        assert_eq!(order.limit_price, Some(5.15));
    }

    #[test]
    fn parses_position_payload() {
        let v = serde_json::json!({
            "symbol": "BBBB",
            "qty": "80",
            "avg_entry_price": "10.10",
            "market_value": "808.0",
            "unrealized_pl": "0",
            "unrealized_plpc": "0.05"
        });
        let pos = AlpacaBroker::parse_position(&v).unwrap();
        assert_eq!(pos.ticker, "BBBB");
        assert_eq!(pos.shares, 80);
        assert!((pos.unrealized_pl_pct - 5.0).abs() < 1e-9);
    }
}
