// =============================================================================
// Persistence layer — SQLite via rusqlite
// =============================================================================
//
// One database file per environment; paper and live rows share tables and are
// discriminated by a boolean column. Every logical state transition that
// touches more than one table runs inside a single transaction via
// `Database::with_tx`.
//
// All timestamps are stored naive UTC as TEXT. Display layers convert to
// America/New_York.
// =============================================================================

pub mod active_trades;
pub mod announcements;
pub mod orders;
pub mod pending_entries;
pub mod strategies;
pub mod traces;
pub mod trades;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use parking_lot::Mutex;
use rusqlite::Connection;
use tracing::info;

const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Format a naive-UTC timestamp for storage.
pub(crate) fn ts_to_sql(ts: NaiveDateTime) -> String {
    ts.format(TS_FORMAT).to_string()
}

/// Parse a stored timestamp back into naive UTC.
pub(crate) fn ts_from_sql(s: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, TS_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
        .with_context(|| format!("unparseable stored timestamp: {s}"))
}

/// Shared handle to the engine database. Cheap to clone; all access is
/// serialized through a single connection mutex, held only for synchronous
/// statements (never across an await).
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the database at `path` and apply the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {}", path.display()))?;
        // journal_mode returns the new mode as a row, so query_row it.
        let _: String = conn
            .query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))
            .context("failed to enable WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .context("failed to enable foreign keys")?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema()?;
        info!(path = %path.display(), "database opened");
        Ok(db)
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .context("failed to enable foreign keys")?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Run `f` with the connection lock held.
    pub(crate) fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Run `f` inside a transaction; commit on success, roll back on error.
    pub fn with_tx<T>(&self, f: impl FnOnce(&rusqlite::Transaction) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().context("failed to begin transaction")?;
        let out = f(&tx)?;
        tx.commit().context("failed to commit transaction")?;
        Ok(out)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS announcements (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ticker TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                price_threshold REAL NOT NULL,
                headline TEXT NOT NULL DEFAULT '',
                country TEXT NOT NULL DEFAULT 'UNKNOWN',
                channel TEXT,
                author TEXT,
                direction TEXT,
                float_shares REAL,
                io_percent REAL,
                market_cap REAL,
                short_interest REAL,
                reg_sho INTEGER NOT NULL DEFAULT 0,
                high_ctb INTEGER NOT NULL DEFAULT 0,
                mention_count INTEGER,
                headline_is_financing INTEGER NOT NULL DEFAULT 0,
                headline_financing_type TEXT,
                source_message TEXT,
                source TEXT NOT NULL DEFAULT 'live',
                created_at TEXT NOT NULL,
                UNIQUE (ticker, timestamp)
            );

            CREATE TABLE IF NOT EXISTS pending_entries (
                trade_id TEXT PRIMARY KEY,
                ticker TEXT NOT NULL,
                strategy_id TEXT,
                strategy_name TEXT,
                alert_time TEXT NOT NULL,
                first_price REAL,
                announcement_ticker TEXT,
                announcement_timestamp TEXT,
                trace_id TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS active_trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                trade_id TEXT NOT NULL UNIQUE,
                ticker TEXT NOT NULL,
                strategy_id TEXT,
                strategy_name TEXT,
                entry_price REAL NOT NULL,
                entry_time TEXT NOT NULL,
                first_candle_open REAL NOT NULL,
                shares INTEGER NOT NULL,
                stop_loss_price REAL NOT NULL,
                take_profit_price REAL NOT NULL,
                highest_since_entry REAL NOT NULL,
                last_price REAL,
                last_quote_time TEXT,
                paper INTEGER NOT NULL DEFAULT 1,
                trace_id TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (ticker, strategy_id)
            );

            CREATE TABLE IF NOT EXISTS orders (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                broker_order_id TEXT,
                ticker TEXT NOT NULL,
                side TEXT NOT NULL,
                order_type TEXT NOT NULL DEFAULT 'limit',
                requested_shares INTEGER NOT NULL,
                filled_shares INTEGER,
                limit_price REAL,
                avg_fill_price REAL,
                status TEXT NOT NULL DEFAULT 'pending',
                strategy_id TEXT,
                strategy_name TEXT,
                trade_id TEXT,
                paper INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_orders_broker_order_id
                ON orders (broker_order_id);

            CREATE TABLE IF NOT EXISTS order_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                order_id INTEGER NOT NULL REFERENCES orders (id),
                event_type TEXT NOT NULL,
                event_timestamp TEXT NOT NULL,
                broker_order_id TEXT,
                filled_shares INTEGER,
                fill_price REAL,
                cumulative_filled INTEGER,
                raw_data TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_order_events_order_id
                ON order_events (order_id);

            CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                trade_id TEXT,
                ticker TEXT NOT NULL,
                entry_price REAL NOT NULL,
                exit_price REAL NOT NULL,
                entry_time TEXT NOT NULL,
                exit_time TEXT NOT NULL,
                shares INTEGER NOT NULL,
                exit_reason TEXT NOT NULL,
                return_pct REAL NOT NULL,
                pnl REAL NOT NULL,
                strategy_id TEXT,
                strategy_name TEXT,
                strategy_params TEXT,
                paper INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS strategies (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                config TEXT NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1,
                priority INTEGER NOT NULL UNIQUE,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS traces (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                trace_id TEXT NOT NULL UNIQUE,
                ticker TEXT NOT NULL,
                alert_timestamp TEXT NOT NULL,
                alert_key TEXT,
                channel TEXT,
                author TEXT,
                price_threshold REAL,
                headline TEXT,
                raw_content TEXT,
                announcement_id INTEGER,
                status TEXT NOT NULL DEFAULT 'received',
                pending_entry_trade_id TEXT,
                active_trade_id TEXT,
                completed_trade_id INTEGER,
                exit_reason TEXT,
                pnl REAL,
                return_pct REAL,
                completed_at TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_traces_alert_key ON traces (alert_key);

            CREATE TABLE IF NOT EXISTS trace_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                trace_id TEXT NOT NULL,
                event_type TEXT NOT NULL,
                event_timestamp TEXT NOT NULL,
                strategy_id TEXT,
                strategy_name TEXT,
                reason TEXT,
                details TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_trace_events_trace_id
                ON trace_events (trace_id);
            "#,
        )
        .context("failed to initialise database schema")?;
        Ok(())
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish()
    }
}
