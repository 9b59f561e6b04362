// =============================================================================
// Pending-entry store
// =============================================================================
//
// One row per accepted-but-not-yet-filled alert, keyed by trade_id. The row
// is created when a strategy accepts an alert and removed when the entry
// order is submitted, the entry window elapses, or the strategy is disabled.
// =============================================================================

use anyhow::Result;
use chrono::{NaiveDateTime, Utc};
use rusqlite::{params, Connection, Row};
use tracing::debug;

use super::{ts_from_sql, ts_to_sql, Database};

/// Durable form of a pending entry.
#[derive(Debug, Clone)]
pub struct PendingEntryRow {
    pub trade_id: String,
    pub ticker: String,
    pub strategy_id: Option<String>,
    pub strategy_name: Option<String>,
    pub alert_time: NaiveDateTime,
    pub first_price: Option<f64>,
    pub announcement_ticker: Option<String>,
    pub announcement_timestamp: Option<NaiveDateTime>,
    pub trace_id: Option<String>,
}

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<PendingEntryRow> {
    let alert_time: String = row.get("alert_time")?;
    let ann_ts: Option<String> = row.get("announcement_timestamp")?;
    Ok(PendingEntryRow {
        trade_id: row.get("trade_id")?,
        ticker: row.get("ticker")?,
        strategy_id: row.get("strategy_id")?,
        strategy_name: row.get("strategy_name")?,
        alert_time: ts_from_sql(&alert_time).unwrap_or_default(),
        first_price: row.get("first_price")?,
        announcement_ticker: row.get("announcement_ticker")?,
        announcement_timestamp: ann_ts.and_then(|s| ts_from_sql(&s).ok()),
        trace_id: row.get("trace_id")?,
    })
}

/// Insert or update a pending entry inside an existing transaction.
pub(crate) fn save_tx(conn: &Connection, entry: &PendingEntryRow) -> Result<()> {
    conn.execute(
        "INSERT INTO pending_entries
           (trade_id, ticker, strategy_id, strategy_name, alert_time, first_price,
            announcement_ticker, announcement_timestamp, trace_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT (trade_id) DO UPDATE SET first_price = excluded.first_price",
        params![
            entry.trade_id,
            entry.ticker,
            entry.strategy_id,
            entry.strategy_name,
            ts_to_sql(entry.alert_time),
            entry.first_price,
            entry.announcement_ticker,
            entry.announcement_timestamp.map(ts_to_sql),
            entry.trace_id,
            ts_to_sql(Utc::now().naive_utc()),
        ],
    )?;
    Ok(())
}

/// Delete a pending entry inside an existing transaction.
pub(crate) fn delete_tx(conn: &Connection, trade_id: &str) -> Result<bool> {
    let n = conn.execute(
        "DELETE FROM pending_entries WHERE trade_id = ?1",
        params![trade_id],
    )?;
    Ok(n > 0)
}

/// CRUD for the `pending_entries` table.
#[derive(Clone)]
pub struct PendingEntryStore {
    db: Database,
}

impl PendingEntryStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn save(&self, entry: &PendingEntryRow) -> Result<()> {
        self.db.with_conn(|conn| {
            save_tx(conn, entry)?;
            debug!(ticker = %entry.ticker, trade_id = %entry.trade_id, "pending entry saved");
            Ok(())
        })
    }

    pub fn update_first_price(&self, trade_id: &str, first_price: f64) -> Result<()> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE pending_entries SET first_price = ?2 WHERE trade_id = ?1",
                params![trade_id, first_price],
            )?;
            Ok(())
        })
    }

    pub fn delete(&self, trade_id: &str) -> Result<bool> {
        self.db.with_conn(|conn| delete_tx(conn, trade_id))
    }

    pub fn for_strategy(&self, strategy_id: &str) -> Result<Vec<PendingEntryRow>> {
        self.db.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT * FROM pending_entries WHERE strategy_id = ?1")?;
            let rows = stmt
                .query_map(params![strategy_id], row_to_entry)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    /// Delete every pending entry owned by a strategy. Returns the count.
    pub fn clear_strategy(&self, strategy_id: &str) -> Result<usize> {
        self.db.with_conn(|conn| {
            let n = conn.execute(
                "DELETE FROM pending_entries WHERE strategy_id = ?1",
                params![strategy_id],
            )?;
            Ok(n)
        })
    }
}
