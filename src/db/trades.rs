// =============================================================================
// Completed-trade history store
// =============================================================================

use anyhow::Result;
use chrono::{NaiveDateTime, Utc};
use rusqlite::{params, Connection, Row};

use crate::types::ExitReason;

use super::{ts_from_sql, ts_to_sql, Database};

/// An immutable historical trade record.
#[derive(Debug, Clone)]
pub struct CompletedTrade {
    pub trade_id: Option<String>,
    pub ticker: String,
    pub entry_price: f64,
    pub exit_price: f64,
    pub entry_time: NaiveDateTime,
    pub exit_time: NaiveDateTime,
    pub shares: u32,
    pub exit_reason: ExitReason,
    pub return_pct: f64,
    pub pnl: f64,
    pub strategy_id: Option<String>,
    pub strategy_name: Option<String>,
    /// Snapshot of the strategy config at exit time, JSON.
    pub strategy_params: Option<serde_json::Value>,
    pub paper: bool,
}

fn row_to_trade(row: &Row<'_>) -> rusqlite::Result<(i64, CompletedTrade)> {
    let entry_time: String = row.get("entry_time")?;
    let exit_time: String = row.get("exit_time")?;
    let reason: String = row.get("exit_reason")?;
    let params: Option<String> = row.get("strategy_params")?;
    Ok((
        row.get("id")?,
        CompletedTrade {
            trade_id: row.get("trade_id")?,
            ticker: row.get("ticker")?,
            entry_price: row.get("entry_price")?,
            exit_price: row.get("exit_price")?,
            entry_time: ts_from_sql(&entry_time).unwrap_or_default(),
            exit_time: ts_from_sql(&exit_time).unwrap_or_default(),
            shares: row.get::<_, i64>("shares")? as u32,
            exit_reason: serde_json::from_value(serde_json::Value::String(reason))
                .unwrap_or(ExitReason::Timeout),
            return_pct: row.get("return_pct")?,
            pnl: row.get("pnl")?,
            strategy_id: row.get("strategy_id")?,
            strategy_name: row.get("strategy_name")?,
            strategy_params: params.and_then(|p| serde_json::from_str(&p).ok()),
            paper: row.get("paper")?,
        },
    ))
}

/// Insert a completed trade inside an existing transaction. Returns the row
/// id.
pub(crate) fn save_tx(conn: &Connection, trade: &CompletedTrade) -> Result<i64> {
    conn.execute(
        "INSERT INTO trades
           (trade_id, ticker, entry_price, exit_price, entry_time, exit_time,
            shares, exit_reason, return_pct, pnl, strategy_id, strategy_name,
            strategy_params, paper, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        params![
            trade.trade_id,
            trade.ticker,
            trade.entry_price,
            trade.exit_price,
            ts_to_sql(trade.entry_time),
            ts_to_sql(trade.exit_time),
            trade.shares as i64,
            trade.exit_reason.to_string(),
            trade.return_pct,
            trade.pnl,
            trade.strategy_id,
            trade.strategy_name,
            trade.strategy_params.as_ref().map(|v| v.to_string()),
            trade.paper,
            ts_to_sql(Utc::now().naive_utc()),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// CRUD for the `trades` (completed) table.
#[derive(Clone)]
pub struct CompletedTradeStore {
    db: Database,
}

impl CompletedTradeStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn save(&self, trade: &CompletedTrade) -> Result<i64> {
        self.db.with_conn(|conn| save_tx(conn, trade))
    }

    /// Most recent trades, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<CompletedTrade>> {
        self.db.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT * FROM trades ORDER BY id DESC LIMIT ?1")?;
            let rows = stmt
                .query_map(params![limit as i64], row_to_trade)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows.into_iter().map(|(_, t)| t).collect())
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

    #[test]
    fn save_and_read_back() {
        let db = Database::open_in_memory().unwrap();
        let store = CompletedTradeStore::new(db);

        let entry_time = NaiveDate::from_ymd_opt(2025, 12, 18)
            .unwrap()
            .and_hms_opt(15, 1, 0)
            .unwrap();
        let trade = CompletedTrade {
            trade_id: Some("t-1".to_string()),
            ticker: "AAPL".to_string(),
            entry_price: 5.16,
            exit_price: 5.68,
            entry_time,
            exit_time: entry_time + chrono::Duration::minutes(4),
            shares: 22,
            exit_reason: ExitReason::TakeProfit,
            return_pct: 10.08,
            pnl: 11.44,
            strategy_id: Some("s-1".to_string()),
            strategy_name: Some("test".to_string()),
            strategy_params: Some(serde_json::json!({"take_profit_pct": 10.0})),
            paper: true,
        };
        let id = store.save(&trade).unwrap();
        assert!(id > 0);

        let recent = store.recent(10).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].ticker, "AAPL");
        assert_eq!(recent[0].exit_reason, ExitReason::TakeProfit);
        assert!((recent[0].return_pct - 10.08).abs() < 1e-9);
        assert_eq!(recent[0].trade_id.as_deref(), Some("t-1"));
    }
}
