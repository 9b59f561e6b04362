// =============================================================================
// Order + order-event audit store
// =============================================================================
//
// Every broker order gets a row carrying both our internal id and the broker
// order id. Each transition (submitted, fill, partial_fill, canceled,
// rejected) appends an immutable order_events row with the raw broker
// payload.
// =============================================================================

use anyhow::Result;
use chrono::{NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::types::{OrderStatus, Side};

use super::{ts_to_sql, Database};

/// Parameters for a new order row.
#[derive(Debug, Clone)]
pub struct NewOrder<'a> {
    pub ticker: &'a str,
    pub side: Side,
    pub requested_shares: u32,
    pub limit_price: Option<f64>,
    pub strategy_id: Option<&'a str>,
    pub strategy_name: Option<&'a str>,
    pub trade_id: Option<&'a str>,
    pub paper: bool,
}

/// An order-event row to append.
#[derive(Debug, Clone)]
pub struct OrderEvent<'a> {
    pub event_type: &'a str,
    pub event_timestamp: NaiveDateTime,
    pub broker_order_id: Option<&'a str>,
    pub filled_shares: Option<u32>,
    pub fill_price: Option<f64>,
    pub cumulative_filled: Option<u32>,
    pub raw_data: Option<&'a serde_json::Value>,
}

/// Insert an order row (status `pending`) inside an existing transaction.
/// Returns the internal order id.
pub(crate) fn insert_order_tx(conn: &Connection, order: &NewOrder<'_>) -> Result<i64> {
    let now = ts_to_sql(Utc::now().naive_utc());
    conn.execute(
        "INSERT INTO orders
           (ticker, side, order_type, requested_shares, limit_price, status,
            strategy_id, strategy_name, trade_id, paper, created_at, updated_at)
         VALUES (?1, ?2, 'limit', ?3, ?4, 'pending', ?5, ?6, ?7, ?8, ?9, ?9)",
        params![
            order.ticker,
            order.side.to_string(),
            order.requested_shares as i64,
            order.limit_price,
            order.strategy_id,
            order.strategy_name,
            order.trade_id,
            order.paper,
            now,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Record the broker-assigned order id inside an existing transaction.
pub(crate) fn set_broker_order_id_tx(
    conn: &Connection,
    order_id: i64,
    broker_order_id: &str,
) -> Result<()> {
    conn.execute(
        "UPDATE orders SET broker_order_id = ?2, status = 'submitted', updated_at = ?3
         WHERE id = ?1",
        params![order_id, broker_order_id, ts_to_sql(Utc::now().naive_utc())],
    )?;
    Ok(())
}

/// Update the order status (and fill columns) inside an existing transaction.
pub(crate) fn set_status_tx(
    conn: &Connection,
    order_id: i64,
    status: OrderStatus,
    filled_shares: Option<u32>,
    avg_fill_price: Option<f64>,
) -> Result<()> {
    conn.execute(
        "UPDATE orders
         SET status = ?2,
             filled_shares = COALESCE(?3, filled_shares),
             avg_fill_price = COALESCE(?4, avg_fill_price),
             updated_at = ?5
         WHERE id = ?1",
        params![
            order_id,
            status.to_string(),
            filled_shares.map(|v| v as i64),
            avg_fill_price,
            ts_to_sql(Utc::now().naive_utc()),
        ],
    )?;
    Ok(())
}

/// Append an order event inside an existing transaction.
pub(crate) fn insert_event_tx(
    conn: &Connection,
    order_id: i64,
    event: &OrderEvent<'_>,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO order_events
           (order_id, event_type, event_timestamp, broker_order_id, filled_shares,
            fill_price, cumulative_filled, raw_data, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            order_id,
            event.event_type,
            ts_to_sql(event.event_timestamp),
            event.broker_order_id,
            event.filled_shares.map(|v| v as i64),
            event.fill_price,
            event.cumulative_filled.map(|v| v as i64),
            event.raw_data.map(|v| v.to_string()),
            ts_to_sql(Utc::now().naive_utc()),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// CRUD for the `orders` and `order_events` tables.
#[derive(Clone)]
pub struct OrderStore {
    db: Database,
}

impl OrderStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create an order row with status `pending`, returning the internal id.
    pub fn create(&self, order: &NewOrder<'_>) -> Result<i64> {
        self.db.with_conn(|conn| {
            let id = insert_order_tx(conn, order)?;
            debug!(ticker = %order.ticker, side = %order.side, order_id = id, "order row created");
            Ok(id)
        })
    }

    pub fn set_broker_order_id(&self, order_id: i64, broker_order_id: &str) -> Result<()> {
        self.db
            .with_conn(|conn| set_broker_order_id_tx(conn, order_id, broker_order_id))
    }

    pub fn set_status(
        &self,
        order_id: i64,
        status: OrderStatus,
        filled_shares: Option<u32>,
        avg_fill_price: Option<f64>,
    ) -> Result<()> {
        self.db
            .with_conn(|conn| set_status_tx(conn, order_id, status, filled_shares, avg_fill_price))
    }

    pub fn record_event(&self, order_id: i64, event: &OrderEvent<'_>) -> Result<i64> {
        self.db
            .with_conn(|conn| insert_event_tx(conn, order_id, event))
    }

    /// Find the internal order id for a broker order id.
    pub fn find_by_broker_id(&self, broker_order_id: &str) -> Result<Option<i64>> {
        self.db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT id FROM orders WHERE broker_order_id = ?1",
                    params![broker_order_id],
                    |row| row.get(0),
                )
                .optional()?)
        })
    }

    /// Status string of an order row, for tests and the status surface.
    pub fn status(&self, order_id: i64) -> Result<Option<String>> {
        self.db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT status FROM orders WHERE id = ?1",
                    params![order_id],
                    |row| row.get(0),
                )
                .optional()?)
        })
    }

    /// Event types recorded for an order, oldest first.
    pub fn event_types(&self, order_id: i64) -> Result<Vec<String>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT event_type FROM order_events WHERE order_id = ?1 ORDER BY id ASC",
            )?;
            let rows = stmt
                .query_map(params![order_id], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
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

    fn new_order<'a>() -> NewOrder<'a> {
        NewOrder {
            ticker: "AAPL",
            side: Side::Buy,
            requested_shares: 22,
            limit_price: Some(5.15),
            strategy_id: Some("s-1"),
            strategy_name: Some("test"),
            trade_id: Some("t-1"),
            paper: true,
        }
    }

    #[test]
    fn order_lifecycle_events() {
        let db = Database::open_in_memory().unwrap();
        let store = OrderStore::new(db);

        let id = store.create(&new_order()).unwrap();
        assert_eq!(store.status(id).unwrap().as_deref(), Some("pending"));

        store.set_broker_order_id(id, "brk-1").unwrap();
        assert_eq!(store.status(id).unwrap().as_deref(), Some("submitted"));
        assert_eq!(store.find_by_broker_id("brk-1").unwrap(), Some(id));

        let now = Utc::now().naive_utc();
        store
            .record_event(
                id,
                &OrderEvent {
                    event_type: "submitted",
                    event_timestamp: now,
                    broker_order_id: Some("brk-1"),
                    filled_shares: None,
                    fill_price: None,
                    cumulative_filled: None,
                    raw_data: None,
                },
            )
            .unwrap();
        store
            .record_event(
                id,
                &OrderEvent {
                    event_type: "fill",
                    event_timestamp: now,
                    broker_order_id: Some("brk-1"),
                    filled_shares: Some(22),
                    fill_price: Some(5.16),
                    cumulative_filled: Some(22),
                    raw_data: None,
                },
            )
            .unwrap();
        store
            .set_status(id, OrderStatus::Filled, Some(22), Some(5.16))
            .unwrap();

        assert_eq!(store.status(id).unwrap().as_deref(), Some("filled"));
        assert_eq!(store.event_types(id).unwrap(), vec!["submitted", "fill"]);
    }

    #[test]
    fn unknown_broker_id_is_none() {
        let db = Database::open_in_memory().unwrap();
        let store = OrderStore::new(db);
        assert_eq!(store.find_by_broker_id("nope").unwrap(), None);
    }
}
