// =============================================================================
// Active-trade store
// =============================================================================
//
// One durable row per filled position. Unique on trade_id and on
// (ticker, strategy_id) -- a strategy holds at most one active trade per
// ticker. Rows survive restarts and feed recovery.
// =============================================================================

use anyhow::Result;
use chrono::{NaiveDateTime, Utc};
use rusqlite::{params, Connection, Row};
use tracing::{debug, info};

use super::{ts_from_sql, ts_to_sql, Database};

/// Durable form of an active trade.
#[derive(Debug, Clone)]
pub struct ActiveTradeRow {
    pub trade_id: String,
    pub ticker: String,
    pub strategy_id: Option<String>,
    pub strategy_name: Option<String>,
    pub entry_price: f64,
    pub entry_time: NaiveDateTime,
    pub first_candle_open: f64,
    pub shares: u32,
    pub stop_loss_price: f64,
    pub take_profit_price: f64,
    pub highest_since_entry: f64,
    pub last_price: Option<f64>,
    pub last_quote_time: Option<NaiveDateTime>,
    pub paper: bool,
    pub trace_id: Option<String>,
}

fn row_to_trade(row: &Row<'_>) -> rusqlite::Result<ActiveTradeRow> {
    let entry_time: String = row.get("entry_time")?;
    let last_quote_time: Option<String> = row.get("last_quote_time")?;
    Ok(ActiveTradeRow {
        trade_id: row.get("trade_id")?,
        ticker: row.get("ticker")?,
        strategy_id: row.get("strategy_id")?,
        strategy_name: row.get("strategy_name")?,
        entry_price: row.get("entry_price")?,
        entry_time: ts_from_sql(&entry_time).unwrap_or_default(),
        first_candle_open: row.get("first_candle_open")?,
        shares: row.get::<_, i64>("shares")? as u32,
        stop_loss_price: row.get("stop_loss_price")?,
        take_profit_price: row.get("take_profit_price")?,
        highest_since_entry: row.get("highest_since_entry")?,
        last_price: row.get("last_price")?,
        last_quote_time: last_quote_time.and_then(|s| ts_from_sql(&s).ok()),
        paper: row.get("paper")?,
        trace_id: row.get("trace_id")?,
    })
}

/// Upsert an active trade inside an existing transaction. The conflict key is
/// `(ticker, strategy_id)` -- re-saving the same position updates it.
pub(crate) fn save_tx(conn: &Connection, trade: &ActiveTradeRow) -> Result<()> {
    let now = ts_to_sql(Utc::now().naive_utc());
    conn.execute(
        "INSERT INTO active_trades
           (trade_id, ticker, strategy_id, strategy_name, entry_price, entry_time,
            first_candle_open, shares, stop_loss_price, take_profit_price,
            highest_since_entry, last_price, last_quote_time, paper, trace_id,
            created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                 ?16, ?16)
         ON CONFLICT (ticker, strategy_id) DO UPDATE SET
            trade_id = excluded.trade_id,
            entry_price = excluded.entry_price,
            entry_time = excluded.entry_time,
            first_candle_open = excluded.first_candle_open,
            shares = excluded.shares,
            stop_loss_price = excluded.stop_loss_price,
            take_profit_price = excluded.take_profit_price,
            highest_since_entry = excluded.highest_since_entry,
            paper = excluded.paper,
            trace_id = excluded.trace_id,
            updated_at = excluded.updated_at",
        params![
            trade.trade_id,
            trade.ticker,
            trade.strategy_id,
            trade.strategy_name,
            trade.entry_price,
            ts_to_sql(trade.entry_time),
            trade.first_candle_open,
            trade.shares as i64,
            trade.stop_loss_price,
            trade.take_profit_price,
            trade.highest_since_entry,
            trade.last_price,
            trade.last_quote_time.map(ts_to_sql),
            trade.paper,
            trade.trace_id,
            now,
        ],
    )?;
    Ok(())
}

/// Delete by trade_id inside an existing transaction.
pub(crate) fn delete_tx(conn: &Connection, trade_id: &str) -> Result<bool> {
    let n = conn.execute(
        "DELETE FROM active_trades WHERE trade_id = ?1",
        params![trade_id],
    )?;
    Ok(n > 0)
}

/// CRUD for the `active_trades` table.
#[derive(Clone)]
pub struct ActiveTradeStore {
    db: Database,
}

impl ActiveTradeStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn save(&self, trade: &ActiveTradeRow) -> Result<()> {
        self.db.with_conn(|conn| {
            save_tx(conn, trade)?;
            info!(ticker = %trade.ticker, trade_id = %trade.trade_id, "active trade saved");
            Ok(())
        })
    }

    /// Update the price-tracking columns on quote delivery.
    pub fn update_price(
        &self,
        trade_id: &str,
        last_price: f64,
        highest_since_entry: f64,
        last_quote_time: NaiveDateTime,
    ) -> Result<()> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE active_trades
                 SET last_price = ?2, highest_since_entry = ?3, last_quote_time = ?4,
                     updated_at = ?5
                 WHERE trade_id = ?1",
                params![
                    trade_id,
                    last_price,
                    highest_since_entry,
                    ts_to_sql(last_quote_time),
                    ts_to_sql(Utc::now().naive_utc()),
                ],
            )?;
            Ok(())
        })
    }

    pub fn delete(&self, trade_id: &str) -> Result<bool> {
        self.db.with_conn(|conn| {
            let deleted = delete_tx(conn, trade_id)?;
            if deleted {
                debug!(trade_id, "active trade deleted");
            }
            Ok(deleted)
        })
    }

    pub fn for_strategy(&self, strategy_id: &str) -> Result<Vec<ActiveTradeRow>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM active_trades WHERE strategy_id = ?1")?;
            let rows = stmt
                .query_map(params![strategy_id], row_to_trade)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    pub fn all(&self) -> Result<Vec<ActiveTradeRow>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM active_trades")?;
            let rows = stmt
                .query_map([], row_to_trade)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
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

    fn trade(trade_id: &str, ticker: &str, strategy_id: &str) -> ActiveTradeRow {
        ActiveTradeRow {
            trade_id: trade_id.to_string(),
            ticker: ticker.to_string(),
            strategy_id: Some(strategy_id.to_string()),
            strategy_name: Some("test".to_string()),
            entry_price: 5.16,
            entry_time: NaiveDate::from_ymd_opt(2025, 12, 18)
                .unwrap()
                .and_hms_opt(15, 1, 0)
                .unwrap(),
            first_candle_open: 5.00,
            shares: 22,
            stop_loss_price: 4.90,
            take_profit_price: 5.68,
            highest_since_entry: 5.16,
            last_price: None,
            last_quote_time: None,
            paper: true,
            trace_id: None,
        }
    }

    #[test]
    fn save_and_recover() {
        let db = Database::open_in_memory().unwrap();
        let store = ActiveTradeStore::new(db);

        store.save(&trade("t-1", "AAPL", "s-1")).unwrap();
        store.save(&trade("t-2", "BBBB", "s-1")).unwrap();

        let rows = store.for_strategy("s-1").unwrap();
        assert_eq!(rows.len(), 2);
        let aapl = rows.iter().find(|r| r.ticker == "AAPL").unwrap();
        assert_eq!(aapl.shares, 22);
        assert_eq!(aapl.entry_price, 5.16);
    }

    #[test]
    fn ticker_strategy_pair_is_unique() {
        let db = Database::open_in_memory().unwrap();
        let store = ActiveTradeStore::new(db);

        store.save(&trade("t-1", "AAPL", "s-1")).unwrap();
        // Same (ticker, strategy) with a new trade_id replaces the row.
        let mut second = trade("t-9", "AAPL", "s-1");
        second.shares = 40;
        store.save(&second).unwrap();

        let rows = store.for_strategy("s-1").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].trade_id, "t-9");
        assert_eq!(rows[0].shares, 40);

        // A different strategy may hold the same ticker.
        store.save(&trade("t-2", "AAPL", "s-2")).unwrap();
        assert_eq!(store.all().unwrap().len(), 2);
    }

    #[test]
    fn price_update_persists() {
        let db = Database::open_in_memory().unwrap();
        let store = ActiveTradeStore::new(db);
        store.save(&trade("t-1", "AAPL", "s-1")).unwrap();

        let t = NaiveDate::from_ymd_opt(2025, 12, 18)
            .unwrap()
            .and_hms_opt(15, 5, 0)
            .unwrap();
        store.update_price("t-1", 5.40, 5.45, t).unwrap();

        let rows = store.for_strategy("s-1").unwrap();
        assert_eq!(rows[0].last_price, Some(5.40));
        assert_eq!(rows[0].highest_since_entry, 5.45);
        assert_eq!(rows[0].last_quote_time, Some(t));
    }

    #[test]
    fn delete_by_trade_id() {
        let db = Database::open_in_memory().unwrap();
        let store = ActiveTradeStore::new(db);
        store.save(&trade("t-1", "AAPL", "s-1")).unwrap();
        assert!(store.delete("t-1").unwrap());
        assert!(!store.delete("t-1").unwrap());
        assert!(store.all().unwrap().is_empty());
    }
}
