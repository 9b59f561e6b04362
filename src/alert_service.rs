// =============================================================================
// Alert service — HTTP ingestion endpoint for chat-room alerts
// =============================================================================
//
// POST /alert receives raw alerts from the scraper, dedupes them by
// (ticker, minute), persists the parsed announcement and an audit trace,
// and hands the event to the engine over a channel. The handler never
// performs broker or engine work inline: it must return 200 within a
// bounded time regardless of engine state.
//
// GET /status and GET /health are the operator surface.
// =============================================================================

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{NaiveDateTime, Utc};
use lazy_static::lazy_static;
use parking_lot::Mutex;
use regex::Regex;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::db::announcements::AnnouncementStore;
use crate::db::traces::{event, NewTrace, TraceStore};
use crate::db::Database;
use crate::engine::{AlertEvent, EngineHandle};
use crate::parser;

/// Dedupe window size: the most recent alert keys kept.
const DEDUPE_CAPACITY: usize = 500;

lazy_static! {
    static ref RE_TICKER_SYMBOL: Regex = Regex::new(r"^([A-Z]{2,5})").unwrap();
    static ref RE_PRICE_INFO: Regex = Regex::new(r"\$([0-9.]+)").unwrap();
}

// ---------------------------------------------------------------------------
// Dedupe set
// ---------------------------------------------------------------------------

/// Bounded insert-order set of recently seen alert keys. Guarded by a single
/// mutex held only for the insert/evict.
pub struct DedupeSet {
    seen: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl DedupeSet {
    pub fn new(capacity: usize) -> Self {
        Self {
            seen: HashSet::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    /// Insert a key. Returns `false` when the key was already present.
    pub fn insert(&mut self, key: &str) -> bool {
        if self.seen.contains(key) {
            return false;
        }
        self.seen.insert(key.to_string());
        self.order.push_back(key.to_string());
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Dedupe key: ticker plus the alert timestamp truncated to the minute.
pub fn alert_key(ticker: &str, timestamp: NaiveDateTime) -> String {
    format!("{}:{}", ticker, timestamp.format("%Y-%m-%dT%H:%M"))
}

/// Infer an author label when the upstream payload does not carry one.
fn infer_author(channel: &str, author: Option<&str>) -> Option<String> {
    if let Some(a) = author {
        let trimmed = a.trim();
        if !trimmed.is_empty() {
            return Some(trimmed.to_string());
        }
    }
    let ch = channel.to_ascii_lowercase();
    if ch.contains("pr-spike") || ch.contains("pr spike") {
        return Some("PR - Spike".to_string());
    }
    if ch.contains("select-news") || ch.contains("select news") {
        return Some("Nuntiobot".to_string());
    }
    None
}

// ---------------------------------------------------------------------------
// Service state & router
// ---------------------------------------------------------------------------

/// Shared state for the alert router.
pub struct AlertService {
    engine: EngineHandle,
    announcements: AnnouncementStore,
    traces: TraceStore,
    dedupe: Mutex<DedupeSet>,
    started_at: std::time::Instant,
}

impl AlertService {
    pub fn new(engine: EngineHandle, db: Database) -> Arc<Self> {
        Arc::new(Self {
            engine,
            announcements: AnnouncementStore::new(db.clone()),
            traces: TraceStore::new(db),
            dedupe: Mutex::new(DedupeSet::new(DEDUPE_CAPACITY)),
            started_at: std::time::Instant::now(),
        })
    }
}

/// Build the alert router. CORS is permissive: the scraper posts from a
/// browser extension origin, and preflight OPTIONS must succeed.
pub fn router(service: Arc<AlertService>) -> Router {
    use tower_http::cors::{Any, CorsLayer};

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/alert", post(handle_alert))
        .route("/health", get(handle_health))
        .route("/status", get(handle_status))
        .fallback(handle_not_found)
        .layer(cors)
        .with_state(service)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

fn ok_response() -> Response {
    Json(json!({ "status": "ok" })).into_response()
}

fn error_response(code: StatusCode, message: &str) -> Response {
    (code, Json(json!({ "status": "error", "message": message }))).into_response()
}

async fn handle_not_found() -> Response {
    error_response(StatusCode::NOT_FOUND, "not found")
}

async fn handle_health(State(service): State<Arc<AlertService>>) -> Response {
    Json(json!({
        "status": "ok",
        "uptime_secs": service.started_at.elapsed().as_secs(),
    }))
    .into_response()
}

async fn handle_status(State(service): State<Arc<AlertService>>) -> Response {
    match service.engine.status().await {
        Some(status) => Json(status).into_response(),
        None => error_response(StatusCode::SERVICE_UNAVAILABLE, "engine not running"),
    }
}

/// POST /alert. Always 200 barring malformed JSON; a parse failure means the
/// alert was received but is not tradeable.
async fn handle_alert(
    State(service): State<Arc<AlertService>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Response {
    let Json(data) = match payload {
        Ok(json) => json,
        Err(rejection) => {
            warn!(error = %rejection, "rejecting malformed alert body");
            return error_response(StatusCode::BAD_REQUEST, "Invalid JSON");
        }
    };

    let raw_ticker = data["ticker"].as_str().unwrap_or("UNKNOWN");
    let price_info = data["price_info"].as_str().unwrap_or("");
    let channel = data["channel"].as_str().unwrap_or("");
    let content = data["content"].as_str().unwrap_or("");
    let author = data["author"].as_str();
    let timestamp_str = data["timestamp"].as_str().unwrap_or("");

    let received_at = Utc::now().naive_utc();
    let alert_timestamp = parser::parse_iso_utc(timestamp_str).unwrap_or(received_at);

    // Extract the bare symbol and the advertised price threshold.
    let ticker = RE_TICKER_SYMBOL
        .captures(raw_ticker)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| raw_ticker.to_string());
    let price_threshold: Option<f64> = RE_PRICE_INFO
        .captures(price_info)
        .and_then(|c| c.get(1)?.as_str().parse().ok());

    // Dedupe on (ticker, minute). Duplicates get an event on the original
    // trace and no new trace of their own.
    let key = alert_key(&ticker, alert_timestamp);
    if !service.dedupe.lock().insert(&key) {
        info!(key = %key, "duplicate alert dropped");
        match service.traces.find_by_alert_key(&key) {
            Ok(Some(existing)) => {
                if let Err(e) = service.traces.add_event(
                    &existing.trace_id,
                    event::ALERT_DEDUPLICATED,
                    received_at,
                    None,
                    None,
                    None,
                    None,
                ) {
                    error!(error = %e, "failed to record dedupe event");
                }
            }
            Ok(None) => debug!(key = %key, "duplicate without original trace"),
            Err(e) => error!(error = %e, "dedupe trace lookup failed"),
        }
        return ok_response();
    }

    info!(
        ticker = %ticker,
        price = ?price_threshold,
        channel = %channel,
        "alert received"
    );

    // Parse the chat line into a structured announcement.
    let inferred_author = infer_author(channel, author);
    let announcement = if content.is_empty() {
        None
    } else {
        parser::parse_message_line(content, alert_timestamp).map(|mut ann| {
            if !channel.is_empty() {
                ann.channel = Some(channel.to_string());
            }
            ann.author = inferred_author.clone().or(ann.author);
            ann
        })
    };

    let announcement_id = match &announcement {
        Some(ann) => match service.announcements.save(ann, "live") {
            Ok(id) => Some(id),
            Err(e) => {
                error!(ticker = %ticker, error = %e, "failed to save announcement");
                None
            }
        },
        None => {
            debug!(ticker = %ticker, "alert content did not parse");
            None
        }
    };

    // One trace per alert, created before the engine sees it.
    let trace_id = Uuid::new_v4().to_string();
    if let Err(e) = service.traces.create(&NewTrace {
        trace_id: &trace_id,
        ticker: &ticker,
        alert_timestamp,
        alert_key: Some(&key),
        channel: (!channel.is_empty()).then_some(channel),
        author: inferred_author.as_deref(),
        price_threshold,
        headline: announcement.as_ref().map(|a| a.headline.as_str()),
        raw_content: (!content.is_empty()).then_some(content),
        announcement_id,
    }) {
        error!(ticker = %ticker, error = %e, "failed to create trace");
    }
    if let Err(e) = service.traces.add_event(
        &trace_id,
        event::ALERT_RECEIVED,
        alert_timestamp,
        None,
        None,
        None,
        None,
    ) {
        error!(error = %e, "failed to record alert_received event");
    }

    // Non-blocking hand-off; the engine fans out on its own task.
    service.engine.send_alert(AlertEvent {
        announcement,
        trace_id,
        received_at,
    });

    ok_response()
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::TradingEngine;
    use crate::quote_provider::QuoteProvider;
    use chrono::NaiveDate;

    fn ts(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 12, 18)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn dedupe_set_bounds_and_rejects() {
        let mut set = DedupeSet::new(3);
        assert!(set.insert("a"));
        assert!(!set.insert("a"));
        assert!(set.insert("b"));
        assert!(set.insert("c"));
        assert!(set.insert("d")); // evicts "a"
        assert_eq!(set.len(), 3);
        assert!(set.insert("a")); // "a" was evicted, so it is new again
    }

    #[test]
    fn alert_key_truncates_to_minute() {
        let k1 = alert_key("AAPL", ts(14, 30, 5));
        let k2 = alert_key("AAPL", ts(14, 30, 59));
        let k3 = alert_key("AAPL", ts(14, 31, 0));
        assert_eq!(k1, "AAPL:2025-12-18T14:30");
        assert_eq!(k1, k2);
        assert_ne!(k1, k3);
    }

    #[test]
    fn author_inference() {
        assert_eq!(infer_author("pr-spike", None).as_deref(), Some("PR - Spike"));
        assert_eq!(infer_author("select-news", None).as_deref(), Some("Nuntiobot"));
        assert_eq!(infer_author("other", None), None);
        assert_eq!(infer_author("pr-spike", Some("  Alice ")).as_deref(), Some("Alice"));
        assert_eq!(infer_author("pr-spike", Some("  ")).as_deref(), Some("PR - Spike"));
    }

    struct ServiceHarness {
        service: Arc<AlertService>,
        db: Database,
    }

    fn harness() -> ServiceHarness {
        let db = Database::open_in_memory().unwrap();
        let broker = Arc::new(crate::broker::testing::ScriptedBroker::new());
        let quotes = QuoteProvider::new(5, "NASDAQ");
        let (_engine, handle) = TradingEngine::new(
            broker,
            quotes,
            db.clone(),
            true,
            std::time::Duration::from_secs(30),
        );
        ServiceHarness {
            service: AlertService::new(handle, db.clone()),
            db,
        }
    }

    fn alert_body(ticker: &str, minute: &str) -> Value {
        json!({
            "ticker": ticker,
            "price_info": "< $.50c",
            "channel": "pr-spike",
            "content": format!("{ticker} < $.50c - Provides 2026 Guidance - Link ~ :flag_us:"),
            "timestamp": format!("2025-12-18T{minute}:45.123Z"),
        })
    }

    #[tokio::test]
    async fn alert_creates_trace_and_announcement() {
        let h = harness();
        let resp = handle_alert(
            State(h.service.clone()),
            Ok(Json(alert_body("BNKK", "14:30"))),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);

        let traces = TraceStore::new(h.db.clone());
        assert_eq!(traces.count_with_status("received").unwrap(), 1);

        let store = AnnouncementStore::new(h.db.clone());
        assert!(store
            .find_id("BNKK", ts(14, 30, 45) + chrono::Duration::milliseconds(123))
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn duplicate_minute_produces_one_received_trace() {
        let h = harness();
        let first = handle_alert(
            State(h.service.clone()),
            Ok(Json(alert_body("BNKK", "14:30"))),
        )
        .await;
        assert_eq!(first.status(), StatusCode::OK);

        // Same ticker and minute, different second.
        let mut dup = alert_body("BNKK", "14:30");
        dup["timestamp"] = json!("2025-12-18T14:30:59.000Z");
        let second = handle_alert(State(h.service.clone()), Ok(Json(dup))).await;
        assert_eq!(second.status(), StatusCode::OK);

        let traces = TraceStore::new(h.db.clone());
        assert_eq!(traces.count_with_status("received").unwrap(), 1);

        // The original trace carries the dedupe event.
        let key = alert_key("BNKK", ts(14, 30, 45));
        let original = traces.find_by_alert_key(&key).unwrap().unwrap();
        let events = traces.event_types(&original.trace_id).unwrap();
        assert_eq!(events, vec!["alert_received", "alert_deduplicated"]);
    }

    #[tokio::test]
    async fn next_minute_is_not_a_duplicate() {
        let h = harness();
        handle_alert(State(h.service.clone()), Ok(Json(alert_body("BNKK", "14:30")))).await;
        handle_alert(State(h.service.clone()), Ok(Json(alert_body("BNKK", "14:31")))).await;

        let traces = TraceStore::new(h.db.clone());
        assert_eq!(traces.count_with_status("received").unwrap(), 2);
    }

    #[tokio::test]
    async fn unparseable_content_still_returns_ok() {
        let h = harness();
        let body = json!({
            "ticker": "BNKK",
            "content": "not an alert line at all",
            "timestamp": "2025-12-18T14:30:45Z",
        });
        let resp = handle_alert(State(h.service.clone()), Ok(Json(body))).await;
        assert_eq!(resp.status(), StatusCode::OK);

        // Trace exists; no announcement row.
        let traces = TraceStore::new(h.db.clone());
        assert_eq!(traces.count_with_status("received").unwrap(), 1);
    }

    #[tokio::test]
    async fn bad_timestamp_falls_back_to_receive_time() {
        let h = harness();
        let mut body = alert_body("BNKK", "14:30");
        body["timestamp"] = json!("not-a-timestamp");
        let resp = handle_alert(State(h.service.clone()), Ok(Json(body))).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let traces = TraceStore::new(h.db.clone());
        assert_eq!(traces.count_with_status("received").unwrap(), 1);
    }
}
