// =============================================================================
// Trace store — alert lifecycle audit
// =============================================================================
//
// One trace per accepted-or-rejected alert; typed events append to
// trace_events as the alert moves through filter / pending-entry / order /
// active-trade / completion stages.
// =============================================================================

use anyhow::Result;
use chrono::{NaiveDateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use tracing::{debug, warn};

use super::{ts_from_sql, ts_to_sql, Database};

/// Trace lifecycle status.
pub mod status {
    pub const RECEIVED: &str = "received";
    pub const FILTERED: &str = "filtered";
    pub const PENDING_ENTRY: &str = "pending_entry";
    pub const ENTRY_TIMEOUT: &str = "entry_timeout";
    pub const ACTIVE_TRADE: &str = "active_trade";
    pub const COMPLETED: &str = "completed";
    pub const ERROR: &str = "error";
}

/// Typed trace event kinds.
pub mod event {
    pub const ALERT_RECEIVED: &str = "alert_received";
    pub const ALERT_DEDUPLICATED: &str = "alert_deduplicated";
    pub const FILTER_REJECTED: &str = "filter_rejected";
    pub const PENDING_ENTRY_CREATED: &str = "pending_entry_created";
    pub const ENTRY_TIMEOUT: &str = "entry_timeout";
    pub const BUY_ORDER_SUBMITTED: &str = "buy_order_submitted";
    pub const BUY_ORDER_FILLED: &str = "buy_order_filled";
    pub const ACTIVE_TRADE_CREATED: &str = "active_trade_created";
    pub const SELL_ORDER_SUBMITTED: &str = "sell_order_submitted";
    pub const ORDER_CANCELED: &str = "order_canceled";
    pub const ORDER_REJECTED: &str = "order_rejected";
    pub const TRADE_COMPLETED: &str = "trade_completed";
}

/// A new trace record.
#[derive(Debug, Clone)]
pub struct NewTrace<'a> {
    pub trace_id: &'a str,
    pub ticker: &'a str,
    pub alert_timestamp: NaiveDateTime,
    pub alert_key: Option<&'a str>,
    pub channel: Option<&'a str>,
    pub author: Option<&'a str>,
    pub price_threshold: Option<f64>,
    pub headline: Option<&'a str>,
    pub raw_content: Option<&'a str>,
    pub announcement_id: Option<i64>,
}

/// Fields settable when a trace advances.
#[derive(Debug, Clone, Default)]
pub struct TraceOutcome {
    pub pending_entry_trade_id: Option<String>,
    pub active_trade_id: Option<String>,
    pub completed_trade_id: Option<i64>,
    pub exit_reason: Option<String>,
    pub pnl: Option<f64>,
    pub return_pct: Option<f64>,
    pub completed_at: Option<NaiveDateTime>,
}

/// A stored trace row.
#[derive(Debug, Clone)]
pub struct TraceRow {
    pub trace_id: String,
    pub ticker: String,
    pub status: String,
    pub alert_key: Option<String>,
    pub pending_entry_trade_id: Option<String>,
    pub active_trade_id: Option<String>,
    pub completed_trade_id: Option<i64>,
}

fn row_to_trace(row: &Row<'_>) -> rusqlite::Result<TraceRow> {
    Ok(TraceRow {
        trace_id: row.get("trace_id")?,
        ticker: row.get("ticker")?,
        status: row.get("status")?,
        alert_key: row.get("alert_key")?,
        pending_entry_trade_id: row.get("pending_entry_trade_id")?,
        active_trade_id: row.get("active_trade_id")?,
        completed_trade_id: row.get("completed_trade_id")?,
    })
}

/// CRUD for `traces` and `trace_events`.
#[derive(Clone)]
pub struct TraceStore {
    db: Database,
}

impl TraceStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn create(&self, trace: &NewTrace<'_>) -> Result<i64> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO traces
                   (trace_id, ticker, alert_timestamp, alert_key, channel, author,
                    price_threshold, headline, raw_content, announcement_id, status,
                    created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 'received', ?11)",
                params![
                    trace.trace_id,
                    trace.ticker,
                    ts_to_sql(trace.alert_timestamp),
                    trace.alert_key,
                    trace.channel,
                    trace.author,
                    trace.price_threshold,
                    trace.headline,
                    trace.raw_content,
                    trace.announcement_id,
                    ts_to_sql(Utc::now().naive_utc()),
                ],
            )?;
            debug!(ticker = %trace.ticker, trace_id = %trace.trace_id, "trace created");
            Ok(conn.last_insert_rowid())
        })
    }

    /// Update a trace's status and any outcome links that are set.
    pub fn update_status(
        &self,
        trace_id: &str,
        status: &str,
        outcome: &TraceOutcome,
    ) -> Result<bool> {
        self.db.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE traces SET
                    status = ?2,
                    pending_entry_trade_id = COALESCE(?3, pending_entry_trade_id),
                    active_trade_id = COALESCE(?4, active_trade_id),
                    completed_trade_id = COALESCE(?5, completed_trade_id),
                    exit_reason = COALESCE(?6, exit_reason),
                    pnl = COALESCE(?7, pnl),
                    return_pct = COALESCE(?8, return_pct),
                    completed_at = COALESCE(?9, completed_at)
                 WHERE trace_id = ?1",
                params![
                    trace_id,
                    status,
                    outcome.pending_entry_trade_id,
                    outcome.active_trade_id,
                    outcome.completed_trade_id,
                    outcome.exit_reason,
                    outcome.pnl,
                    outcome.return_pct,
                    outcome.completed_at.map(ts_to_sql),
                ],
            )?;
            if n == 0 {
                warn!(trace_id, status, "trace not found for status update");
            }
            Ok(n > 0)
        })
    }

    /// Append a typed event to a trace.
    pub fn add_event(
        &self,
        trace_id: &str,
        event_type: &str,
        event_timestamp: NaiveDateTime,
        strategy_id: Option<&str>,
        strategy_name: Option<&str>,
        reason: Option<&str>,
        details: Option<&serde_json::Value>,
    ) -> Result<i64> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO trace_events
                   (trace_id, event_type, event_timestamp, strategy_id, strategy_name,
                    reason, details, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    trace_id,
                    event_type,
                    ts_to_sql(event_timestamp),
                    strategy_id,
                    strategy_name,
                    reason,
                    details.map(|v| v.to_string()),
                    ts_to_sql(Utc::now().naive_utc()),
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Mark a trace `filtered`, but only while it is still `received` -- a
    /// rejection by one strategy must not downgrade a trace another strategy
    /// has already advanced.
    pub fn mark_filtered(&self, trace_id: &str) -> Result<()> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE traces SET status = 'filtered'
                 WHERE trace_id = ?1 AND status = 'received'",
                params![trace_id],
            )?;
            Ok(())
        })
    }

    pub fn get(&self, trace_id: &str) -> Result<Option<TraceRow>> {
        self.db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT * FROM traces WHERE trace_id = ?1",
                    params![trace_id],
                    row_to_trace,
                )
                .optional()?)
        })
    }

    /// Dedupe lookup: find an existing trace for an alert key.
    pub fn find_by_alert_key(&self, alert_key: &str) -> Result<Option<TraceRow>> {
        self.db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT * FROM traces WHERE alert_key = ?1 ORDER BY id DESC LIMIT 1",
                    params![alert_key],
                    row_to_trace,
                )
                .optional()?)
        })
    }

    /// Event types recorded for a trace, oldest first.
    pub fn event_types(&self, trace_id: &str) -> Result<Vec<String>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT event_type FROM trace_events WHERE trace_id = ?1 ORDER BY id ASC",
            )?;
            let rows = stmt
                .query_map(params![trace_id], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(rows)
        })
    }

    /// Number of traces in status `received` (dedupe property checks).
    pub fn count_with_status(&self, status: &str) -> Result<i64> {
        self.db.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM traces WHERE status = ?1",
                params![status],
                |row| row.get(0),
            )?)
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 12, 18)
            .unwrap()
            .and_hms_opt(14, 30, 0)
            .unwrap()
    }

    fn store() -> TraceStore {
        TraceStore::new(Database::open_in_memory().unwrap())
    }

    #[test]
    fn create_and_advance_trace() {
        let s = store();
        s.create(&NewTrace {
            trace_id: "tr-1",
            ticker: "AAPL",
            alert_timestamp: now(),
            alert_key: Some("AAPL:2025-12-18T14:30"),
            channel: Some("pr-spike"),
            author: None,
            price_threshold: Some(5.0),
            headline: Some("Something Happened"),
            raw_content: None,
            announcement_id: None,
        })
        .unwrap();

        s.add_event("tr-1", event::ALERT_RECEIVED, now(), None, None, None, None)
            .unwrap();
        s.update_status(
            "tr-1",
            status::PENDING_ENTRY,
            &TraceOutcome {
                pending_entry_trade_id: Some("t-1".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

        let row = s.get("tr-1").unwrap().unwrap();
        assert_eq!(row.status, "pending_entry");
        assert_eq!(row.pending_entry_trade_id.as_deref(), Some("t-1"));
        assert_eq!(s.event_types("tr-1").unwrap(), vec!["alert_received"]);
    }

    #[test]
    fn alert_key_lookup_for_dedupe() {
        let s = store();
        s.create(&NewTrace {
            trace_id: "tr-1",
            ticker: "AAPL",
            alert_timestamp: now(),
            alert_key: Some("AAPL:2025-12-18T14:30"),
            channel: None,
            author: None,
            price_threshold: None,
            headline: None,
            raw_content: None,
            announcement_id: None,
        })
        .unwrap();

        let found = s.find_by_alert_key("AAPL:2025-12-18T14:30").unwrap();
        assert_eq!(found.unwrap().trace_id, "tr-1");
        assert!(s.find_by_alert_key("MSFT:2025-12-18T14:30").unwrap().is_none());
    }

    #[test]
    fn update_unknown_trace_returns_false() {
        let s = store();
        assert!(!s
            .update_status("missing", status::ERROR, &TraceOutcome::default())
            .unwrap());
    }
}
