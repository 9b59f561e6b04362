// =============================================================================
// Quote provider — bounded WebSocket subscription multiplexer
// =============================================================================
//
// One process-wide connection to the market-data vendor, delivering
// second-resolution bars for subscribed tickers. The vendor enforces a hard
// cap on concurrent subscriptions; `subscribe` fails fast at the cap (the
// caller must reject the alert), while recovery can queue requests that are
// promoted as slots free up -- active-trade requests drain before
// pending-entry requests, because losing quotes on an open position risks a
// missed stop-loss while a pending entry only risks a missed opportunity.
//
// The connection reconnects with exponential backoff capped at 60 s and
// re-sends the full subscription set on every (re)connect.
// =============================================================================

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

const WS_URL: &str = "wss://realtime.insightsentry.com/live";
const KEY_URL: &str = "https://insightsentry.p.rapidapi.com/v2/websocket-key";

/// Application-level ping cadence required by the vendor (<= 30 s).
const PING_INTERVAL_SECS: u64 = 25;
/// Reconnect backoff ceiling.
const MAX_RECONNECT_DELAY_SECS: u64 = 60;

/// Who is asking for quotes on a ticker. Ordering encodes promotion
/// priority: active trades before pending entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SubscriberClass {
    ActiveTrade,
    PendingEntry,
}

/// A single tick delivered to the engine.
#[derive(Debug, Clone)]
pub struct QuoteTick {
    pub ticker: String,
    pub price: f64,
    pub volume: u64,
    pub at: NaiveDateTime,
}

/// Internal nudge to the stream task to re-send the subscription set.
#[derive(Debug)]
enum WsCommand {
    Resync,
}

#[derive(Default)]
struct ProviderState {
    subscriptions: HashSet<String>,
    /// Requests parked while at the cap, in arrival order per class.
    pending: Vec<(String, SubscriberClass)>,
}

/// Process-wide quote subscription manager.
pub struct QuoteProvider {
    state: Mutex<ProviderState>,
    max_subscriptions: usize,
    exchange: String,
    cmd_tx: UnboundedSender<WsCommand>,
    cmd_rx: Mutex<Option<UnboundedReceiver<WsCommand>>>,
    api_key: Option<String>,
}

impl QuoteProvider {
    /// Create a provider with the given subscription cap and exchange prefix
    /// for subscription codes (e.g. "NASDAQ" -> "NASDAQ:AAPL"). The vendor
    /// key is read from `MARKET_FEED_API_KEY`.
    pub fn new(max_subscriptions: usize, exchange: impl Into<String>) -> Arc<Self> {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            state: Mutex::new(ProviderState::default()),
            max_subscriptions,
            exchange: exchange.into(),
            cmd_tx,
            cmd_rx: Mutex::new(Some(cmd_rx)),
            api_key: std::env::var("MARKET_FEED_API_KEY").ok(),
        })
    }

    // -------------------------------------------------------------------------
    // Subscription management (synchronous, single mutex)
    // -------------------------------------------------------------------------

    /// Try to subscribe. Returns `true` when the ticker is (now) subscribed,
    /// `false` when the cap is reached -- the caller must not accept a new
    /// pending entry for the ticker in that case.
    pub fn subscribe(&self, ticker: &str) -> bool {
        let ticker = ticker.to_uppercase();
        let mut state = self.state.lock();

        if state.subscriptions.contains(&ticker) {
            return true;
        }
        if state.subscriptions.len() >= self.max_subscriptions {
            warn!(
                ticker = %ticker,
                cap = self.max_subscriptions,
                "subscription denied: at vendor cap"
            );
            return false;
        }

        state.subscriptions.insert(ticker.clone());
        drop(state);

        info!(ticker = %ticker, "subscribed to quotes");
        let _ = self.cmd_tx.send(WsCommand::Resync);
        true
    }

    /// Queue a subscription request to be honoured when a slot frees up.
    /// Used by recovery for positions loaded while the cap is saturated.
    pub fn queue_subscription(&self, ticker: &str, class: SubscriberClass) {
        let ticker = ticker.to_uppercase();
        let mut state = self.state.lock();
        if state.subscriptions.contains(&ticker)
            || state.pending.iter().any(|(t, _)| *t == ticker)
        {
            return;
        }
        info!(ticker = %ticker, class = ?class, "subscription queued (at cap)");
        state.pending.push((ticker, class));
    }

    /// Release a subscription. If queued requesters are waiting, the
    /// highest-priority one is promoted into the freed slot.
    pub fn unsubscribe(&self, ticker: &str) {
        let ticker = ticker.to_uppercase();
        let mut state = self.state.lock();

        if !state.subscriptions.remove(&ticker) {
            return;
        }
        info!(ticker = %ticker, "unsubscribed from quotes");

        // Promote: active-trade requests first, FIFO within the class.
        let next = state
            .pending
            .iter()
            .position(|(_, c)| *c == SubscriberClass::ActiveTrade)
            .or_else(|| (!state.pending.is_empty()).then_some(0));
        if let Some(idx) = next {
            let (promoted, class) = state.pending.remove(idx);
            state.subscriptions.insert(promoted.clone());
            info!(ticker = %promoted, class = ?class, "promoted queued subscription");
        }

        drop(state);
        let _ = self.cmd_tx.send(WsCommand::Resync);
    }

    /// Snapshot of currently subscribed tickers.
    pub fn subscribed(&self) -> Vec<String> {
        let mut subs: Vec<String> = self.state.lock().subscriptions.iter().cloned().collect();
        subs.sort();
        subs
    }

    pub fn is_subscribed(&self, ticker: &str) -> bool {
        self.state
            .lock()
            .subscriptions
            .contains(&ticker.to_uppercase())
    }

    pub fn subscription_count(&self) -> usize {
        self.state.lock().subscriptions.len()
    }

    // -------------------------------------------------------------------------
    // Stream task
    // -------------------------------------------------------------------------

    /// Run the WebSocket loop until the quote channel closes. Spawn once at
    /// startup:
    ///
    /// ```ignore
    /// let provider = QuoteProvider::new(5, "NASDAQ");
    /// tokio::spawn(provider.clone().run(quote_tx));
    /// ```
    pub async fn run(self: Arc<Self>, quote_tx: UnboundedSender<QuoteTick>) {
        let mut cmd_rx = self
            .cmd_rx
            .lock()
            .take()
            .expect("quote provider stream started twice");
        let mut reconnect_delay = 1u64;

        loop {
            match self
                .connect_and_stream(&quote_tx, &mut cmd_rx, &mut reconnect_delay)
                .await
            {
                Ok(()) => warn!("quote feed stream ended"),
                Err(e) => error!(error = %e, "quote feed error"),
            }

            if quote_tx.is_closed() {
                info!("quote provider stopping: engine channel closed");
                return;
            }

            info!(delay_secs = reconnect_delay, "reconnecting to quote feed");
            tokio::time::sleep(Duration::from_secs(reconnect_delay)).await;
            reconnect_delay = (reconnect_delay * 2).min(MAX_RECONNECT_DELAY_SECS);
        }
    }

    async fn connect_and_stream(
        &self,
        quote_tx: &UnboundedSender<QuoteTick>,
        cmd_rx: &mut UnboundedReceiver<WsCommand>,
        reconnect_delay: &mut u64,
    ) -> Result<()> {
        let ws_key = self.fetch_ws_key().await?;

        info!(url = WS_URL, "connecting to quote feed");
        let (ws_stream, _response) = connect_async(WS_URL)
            .await
            .context("failed to connect to quote feed")?;
        info!("quote feed connected");
        *reconnect_delay = 1;

        let (mut write, mut read) = ws_stream.split();

        // Re-send the full subscription set on every (re)connect.
        self.send_subscriptions(&mut write, &ws_key).await?;

        let mut ping = tokio::time::interval(Duration::from_secs(PING_INTERVAL_SECS));
        ping.tick().await; // first tick fires immediately

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            for tick in parse_feed_message(&text) {
                                if quote_tx.send(tick).is_err() {
                                    return Ok(());
                                }
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            warn!(frame = ?frame, "quote feed closed by server");
                            return Ok(());
                        }
                        // Ping/Pong/Binary frames are handled by tungstenite.
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            return Err(e).context("quote feed read error");
                        }
                        None => return Ok(()),
                    }
                }
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(WsCommand::Resync) => {
                            self.send_subscriptions(&mut write, &ws_key).await?;
                        }
                        None => return Ok(()),
                    }
                }
                _ = ping.tick() => {
                    write
                        .send(Message::Ping(Vec::new()))
                        .await
                        .context("quote feed ping failed")?;
                    debug!("sent quote feed ping");
                }
            }
        }
    }

    /// Exchange the REST key for a short-lived WebSocket credential.
    async fn fetch_ws_key(&self) -> Result<String> {
        let api_key = self
            .api_key
            .as_deref()
            .context("MARKET_FEED_API_KEY not set")?;

        let resp = reqwest::Client::new()
            .get(KEY_URL)
            .header("x-rapidapi-host", "insightsentry.p.rapidapi.com")
            .header("x-rapidapi-key", api_key)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .context("websocket key request failed")?;

        let body: Value = resp.json().await.context("unparseable key response")?;
        let key = body["key"]
            .as_str()
            .with_context(|| format!("key missing from response: {body}"))?;

        info!(expires = %body["expires"], "obtained quote feed key");
        Ok(key.to_string())
    }

    async fn send_subscriptions<S>(&self, write: &mut S, ws_key: &str) -> Result<()>
    where
        S: SinkExt<Message> + Unpin,
        S::Error: std::error::Error + Send + Sync + 'static,
    {
        let tickers = self.subscribed();
        if tickers.is_empty() {
            debug!("no subscriptions to send");
            return Ok(());
        }

        let message = subscription_message(ws_key, &self.exchange, &tickers);
        write
            .send(Message::Text(message.to_string()))
            .await
            .context("failed to send subscription frame")?;
        info!(count = tickers.len(), tickers = ?tickers, "sent subscription set");
        Ok(())
    }
}

impl std::fmt::Debug for QuoteProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("QuoteProvider")
            .field("subscriptions", &state.subscriptions.len())
            .field("pending", &state.pending.len())
            .field("cap", &self.max_subscriptions)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Wire helpers
// ---------------------------------------------------------------------------

/// Build the vendor subscription frame: a credential plus one second-bar
/// series request per ticker, extended hours included.
fn subscription_message(ws_key: &str, exchange: &str, tickers: &[String]) -> Value {
    let subs: Vec<Value> = tickers
        .iter()
        .map(|t| {
            json!({
                "code": format!("{exchange}:{t}"),
                "type": "series",
                "bar_type": "second",
                "bar_interval": 1,
                "extended": true,
                "recent_bars": false,
            })
        })
        .collect();
    json!({ "api_key": ws_key, "subscriptions": subs })
}

/// Strip the exchange prefix from a vendor code: "NASDAQ:AAPL" -> "AAPL".
fn ticker_from_code(code: &str) -> &str {
    code.rsplit(':').next().unwrap_or(code)
}

/// Parse one feed message into zero or more ticks.
///
/// Series messages carry OHLCV bars (`close` is used as the price); quote
/// messages carry `last_price`. Heartbeats and errors yield nothing.
fn parse_feed_message(text: &str) -> Vec<QuoteTick> {
    let Ok(msg) = serde_json::from_str::<Value>(text) else {
        let preview: String = text.chars().take(100).collect();
        warn!(preview = %preview, "unparseable feed message");
        return Vec::new();
    };

    // Server heartbeat.
    if msg.get("server_time").is_some() {
        return Vec::new();
    }

    // Vendor-side error.
    if let Some(m) = msg.get("message").and_then(Value::as_str) {
        if m.to_ascii_lowercase().contains("error") {
            error!(message = m, "quote feed server error");
            return Vec::new();
        }
    }

    let mut ticks = Vec::new();

    if let (Some(code), Some(series)) = (
        msg.get("code").and_then(Value::as_str),
        msg.get("series").and_then(Value::as_array),
    ) {
        let ticker = ticker_from_code(code).to_uppercase();
        for bar in series {
            let price = bar["close"].as_f64().unwrap_or(0.0);
            if price <= 0.0 {
                continue;
            }
            let volume = bar["volume"].as_f64().unwrap_or(0.0).max(0.0) as u64;
            let at = bar["time"]
                .as_i64()
                .and_then(|secs| DateTime::from_timestamp(secs, 0))
                .map(|dt| dt.naive_utc())
                .unwrap_or_else(|| Utc::now().naive_utc());
            ticks.push(QuoteTick {
                ticker: ticker.clone(),
                price,
                volume,
                at,
            });
        }
        return ticks;
    }

    if let Some(data) = msg.get("data").and_then(Value::as_array) {
        for quote in data {
            let Some(code) = quote.get("code").and_then(Value::as_str) else {
                continue;
            };
            let price = quote["last_price"].as_f64().unwrap_or(0.0);
            if price <= 0.0 {
                continue;
            }
            ticks.push(QuoteTick {
                ticker: ticker_from_code(code).to_uppercase(),
                price,
                volume: quote["volume"].as_f64().unwrap_or(0.0).max(0.0) as u64,
                at: Utc::now().naive_utc(),
            });
        }
    }

    ticks
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn provider(cap: usize) -> Arc<QuoteProvider> {
        QuoteProvider::new(cap, "NASDAQ")
    }

    #[test]
    fn cap_is_never_exceeded() {
        let p = provider(2);
        assert!(p.subscribe("AAA"));
        assert!(p.subscribe("BBB"));
        assert!(!p.subscribe("CCC"));
        assert_eq!(p.subscription_count(), 2);

        // Re-subscribing an existing ticker succeeds without using a slot.
        assert!(p.subscribe("AAA"));
        assert_eq!(p.subscription_count(), 2);
    }

    #[test]
    fn unsubscribe_frees_a_slot() {
        let p = provider(2);
        assert!(p.subscribe("AAA"));
        assert!(p.subscribe("BBB"));
        assert!(!p.subscribe("CCC"));

        p.unsubscribe("AAA");
        assert!(p.subscribe("CCC"));
        assert_eq!(p.subscribed(), vec!["BBB", "CCC"]);
    }

    #[test]
    fn promotion_prefers_active_trades() {
        let p = provider(1);
        assert!(p.subscribe("AAA"));

        p.queue_subscription("PEND", SubscriberClass::PendingEntry);
        p.queue_subscription("TRADE", SubscriberClass::ActiveTrade);

        p.unsubscribe("AAA");
        // The active-trade request jumps the earlier pending-entry request.
        assert!(p.is_subscribed("TRADE"));
        assert!(!p.is_subscribed("PEND"));

        p.unsubscribe("TRADE");
        assert!(p.is_subscribed("PEND"));
    }

    #[test]
    fn queue_deduplicates() {
        let p = provider(1);
        assert!(p.subscribe("AAA"));
        p.queue_subscription("BBB", SubscriberClass::ActiveTrade);
        p.queue_subscription("BBB", SubscriberClass::ActiveTrade);
        p.unsubscribe("AAA");
        assert!(p.is_subscribed("BBB"));
        p.unsubscribe("BBB");
        // Second queued copy must not re-appear.
        assert!(!p.is_subscribed("BBB"));
        assert_eq!(p.subscription_count(), 0);
    }

    #[test]
    fn tickers_are_uppercased() {
        let p = provider(2);
        assert!(p.subscribe("aapl"));
        assert!(p.is_subscribed("AAPL"));
        p.unsubscribe("aapl");
        assert!(!p.is_subscribed("AAPL"));
    }

    #[test]
    fn parses_series_message() {
        let text = r#"{
            "code": "NASDAQ:AAPL",
            "series": [
                {"time": 1766067000, "open": 5.0, "high": 5.1, "low": 5.0, "close": 5.05, "volume": 1200},
                {"time": 1766067001, "open": 5.05, "high": 5.05, "low": 5.0, "close": 5.0, "volume": 300}
            ]
        }"#;
        let ticks = parse_feed_message(text);
        assert_eq!(ticks.len(), 2);
        assert_eq!(ticks[0].ticker, "AAPL");
        assert_eq!(ticks[0].price, 5.05);
        assert_eq!(ticks[0].volume, 1200);
        assert_eq!(ticks[1].price, 5.0);
    }

    #[test]
    fn parses_quote_message() {
        let text = r#"{"data": [{"code": "NASDAQ:BBBB", "last_price": 10.10, "volume": 500}]}"#;
        let ticks = parse_feed_message(text);
        assert_eq!(ticks.len(), 1);
        assert_eq!(ticks[0].ticker, "BBBB");
        assert_eq!(ticks[0].price, 10.10);
    }

    #[test]
    fn heartbeat_and_garbage_yield_nothing() {
        assert!(parse_feed_message(r#"{"server_time": 1766067000}"#).is_empty());
        assert!(parse_feed_message("not json").is_empty());
        assert!(parse_feed_message(r#"{"message": "Error: bad key"}"#).is_empty());
        // Zero-price bars are dropped.
        let text = r#"{"code": "NASDAQ:AAPL", "series": [{"time": 1, "close": 0.0, "volume": 10}]}"#;
        assert!(parse_feed_message(text).is_empty());
    }

    #[test]
    fn subscription_frame_shape() {
        let msg = subscription_message("key-123", "NASDAQ", &["AAPL".to_string()]);
        assert_eq!(msg["api_key"], "key-123");
        let sub = &msg["subscriptions"][0];
        assert_eq!(sub["code"], "NASDAQ:AAPL");
        assert_eq!(sub["type"], "series");
        assert_eq!(sub["bar_type"], "second");
        assert_eq!(sub["bar_interval"], 1);
        assert_eq!(sub["extended"], true);
    }
}
