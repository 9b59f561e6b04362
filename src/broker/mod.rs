// =============================================================================
// Broker capability layer
// =============================================================================
//
// The engine consumes brokers through the `Broker` trait so that the live
// Alpaca client and the scripted broker used in tests are interchangeable.
// Paper vs. live is a construction-time concern of the implementation; the
// rest of the engine is identical.
// =============================================================================

pub mod alpaca;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Side;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// An order as the broker reports it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerOrder {
    /// Broker-assigned order id.
    pub order_id: String,
    pub ticker: String,
    pub side: Side,
    pub shares: u32,
    pub order_type: String,
    pub status: String,
    pub limit_price: Option<f64>,
    pub filled_shares: u32,
    pub filled_avg_price: Option<f64>,
}

/// An open position as the broker reports it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerPosition {
    pub ticker: String,
    pub shares: u32,
    pub avg_entry_price: f64,
    pub market_value: f64,
    pub unrealized_pl: f64,
    pub unrealized_pl_pct: f64,
}

/// Account summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountInfo {
    pub status: String,
    pub equity: f64,
    pub cash: f64,
    pub buying_power: f64,
}

/// A last-trade quote snapshot (CLI convenience).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteSnapshot {
    pub ticker: String,
    pub last: f64,
    pub volume: u64,
    pub timestamp: NaiveDateTime,
}

/// What happened to an in-flight order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderUpdateKind {
    Fill,
    PartialFill,
    Canceled,
    Rejected,
}

/// Asynchronous order notification pushed from the broker client to the
/// engine, identified by broker order id.
#[derive(Debug, Clone)]
pub struct OrderUpdate {
    pub order_id: String,
    pub ticker: String,
    pub side: Side,
    pub kind: OrderUpdateKind,
    pub filled_shares: u32,
    pub fill_price: f64,
    pub at: NaiveDateTime,
    pub reason: Option<String>,
    /// Raw broker payload, persisted with the order event for audit.
    pub raw: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Broker failures the engine distinguishes. `PositionNotFound` and
/// `InsufficientQuantity` drive the ghost-position path: a sell that fails
/// this way triggers a position check and, if confirmed, a zero-P&L
/// completed trade.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("position not found: {0}")]
    PositionNotFound(String),

    #[error("insufficient quantity: {0}")]
    InsufficientQuantity(String),

    #[error("order rejected: {0}")]
    Rejected(String),

    #[error("broker request timed out")]
    Timeout,

    #[error("broker transport error: {0}")]
    Transport(String),

    #[error("broker API error {code}: {message}")]
    Api { code: u16, message: String },
}

impl BrokerError {
    /// Whether this error implies the broker holds no position to sell.
    pub fn implies_no_position(&self) -> bool {
        matches!(
            self,
            Self::PositionNotFound(_) | Self::InsufficientQuantity(_)
        )
    }
}

impl From<reqwest::Error> for BrokerError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else {
            Self::Transport(e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// The capability surface the engine requires from a broker.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Submit a limit buy (day, extended hours).
    async fn buy(&self, ticker: &str, shares: u32, limit_price: f64)
        -> Result<BrokerOrder, BrokerError>;

    /// Submit a limit sell (day, extended hours).
    async fn sell(&self, ticker: &str, shares: u32, limit_price: f64)
        -> Result<BrokerOrder, BrokerError>;

    /// Position for a single ticker, `None` if flat.
    async fn get_position(&self, ticker: &str) -> Result<Option<BrokerPosition>, BrokerError>;

    /// All open positions.
    async fn get_positions(&self) -> Result<Vec<BrokerPosition>, BrokerError>;

    /// All open/pending orders.
    async fn get_open_orders(&self) -> Result<Vec<BrokerOrder>, BrokerError>;

    /// Cancel one order by broker order id.
    async fn cancel_order(&self, order_id: &str) -> Result<(), BrokerError>;

    /// Cancel every open order. Returns the number canceled.
    async fn cancel_all_orders(&self) -> Result<u32, BrokerError>;

    /// Whether the symbol is currently tradeable, with a reason when not.
    async fn is_tradeable(&self, ticker: &str) -> Result<(bool, String), BrokerError>;

    /// Account summary.
    async fn get_account(&self) -> Result<AccountInfo, BrokerError>;

    /// Last-trade snapshot for a ticker.
    async fn get_quote(&self, ticker: &str) -> Result<QuoteSnapshot, BrokerError>;

    /// Whether this client trades simulated funds.
    fn is_paper(&self) -> bool;
}

// ---------------------------------------------------------------------------
// Scripted broker for tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub mod testing {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// What the scripted broker should do with the next sell.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum SellBehavior {
        Accept,
        RejectNoPosition,
        RejectGeneric,
    }

    /// An in-memory broker with scriptable behavior for strategy and engine
    /// tests. Records every submitted order.
    pub struct ScriptedBroker {
        next_id: AtomicU64,
        pub submitted: Mutex<Vec<BrokerOrder>>,
        pub open_orders: Mutex<Vec<BrokerOrder>>,
        pub positions: Mutex<HashMap<String, BrokerPosition>>,
        pub tradeable: Mutex<bool>,
        pub sell_behavior: Mutex<SellBehavior>,
        pub fail_buys: Mutex<bool>,
    }

    impl ScriptedBroker {
        pub fn new() -> Self {
            Self {
                next_id: AtomicU64::new(1),
                submitted: Mutex::new(Vec::new()),
                open_orders: Mutex::new(Vec::new()),
                positions: Mutex::new(HashMap::new()),
                tradeable: Mutex::new(true),
                sell_behavior: Mutex::new(SellBehavior::Accept),
                fail_buys: Mutex::new(false),
            }
        }

        pub fn set_position(&self, ticker: &str, shares: u32, avg_entry_price: f64) {
            self.positions.lock().insert(
                ticker.to_string(),
                BrokerPosition {
                    ticker: ticker.to_string(),
                    shares,
                    avg_entry_price,
                    market_value: shares as f64 * avg_entry_price,
                    unrealized_pl: 0.0,
                    unrealized_pl_pct: 0.0,
                },
            );
        }

        pub fn submitted_orders(&self) -> Vec<BrokerOrder> {
            self.submitted.lock().clone()
        }

        fn make_order(&self, ticker: &str, side: Side, shares: u32, limit: f64) -> BrokerOrder {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            BrokerOrder {
                order_id: format!("ord-{id}"),
                ticker: ticker.to_string(),
                side,
                shares,
                order_type: "limit".to_string(),
                status: "accepted".to_string(),
                limit_price: Some(limit),
                filled_shares: 0,
                filled_avg_price: None,
            }
        }
    }

    #[async_trait]
    impl Broker for ScriptedBroker {
        async fn buy(
            &self,
            ticker: &str,
            shares: u32,
            limit_price: f64,
        ) -> Result<BrokerOrder, BrokerError> {
            if *self.fail_buys.lock() {
                return Err(BrokerError::Rejected("scripted buy failure".into()));
            }
            let order = self.make_order(ticker, Side::Buy, shares, limit_price);
            self.submitted.lock().push(order.clone());
            Ok(order)
        }

        async fn sell(
            &self,
            ticker: &str,
            shares: u32,
            limit_price: f64,
        ) -> Result<BrokerOrder, BrokerError> {
            match *self.sell_behavior.lock() {
                SellBehavior::Accept => {
                    let order = self.make_order(ticker, Side::Sell, shares, limit_price);
                    self.submitted.lock().push(order.clone());
                    Ok(order)
                }
                SellBehavior::RejectNoPosition => {
                    Err(BrokerError::InsufficientQuantity(ticker.to_string()))
                }
                SellBehavior::RejectGeneric => {
                    Err(BrokerError::Rejected("scripted sell failure".into()))
                }
            }
        }

        async fn get_position(
            &self,
            ticker: &str,
        ) -> Result<Option<BrokerPosition>, BrokerError> {
            Ok(self.positions.lock().get(ticker).cloned())
        }

        async fn get_positions(&self) -> Result<Vec<BrokerPosition>, BrokerError> {
            Ok(self.positions.lock().values().cloned().collect())
        }

        async fn get_open_orders(&self) -> Result<Vec<BrokerOrder>, BrokerError> {
            Ok(self.open_orders.lock().clone())
        }

        async fn cancel_order(&self, _order_id: &str) -> Result<(), BrokerError> {
            Ok(())
        }

        async fn cancel_all_orders(&self) -> Result<u32, BrokerError> {
            let mut orders = self.open_orders.lock();
            let n = orders.len() as u32;
            orders.clear();
            Ok(n)
        }

        async fn is_tradeable(&self, _ticker: &str) -> Result<(bool, String), BrokerError> {
            if *self.tradeable.lock() {
                Ok((true, "tradeable".to_string()))
            } else {
                Ok((false, "halted".to_string()))
            }
        }

        async fn get_account(&self) -> Result<AccountInfo, BrokerError> {
            Ok(AccountInfo {
                status: "ACTIVE".to_string(),
                equity: 100_000.0,
                cash: 100_000.0,
                buying_power: 200_000.0,
            })
        }

        async fn get_quote(&self, ticker: &str) -> Result<QuoteSnapshot, BrokerError> {
            Ok(QuoteSnapshot {
                ticker: ticker.to_string(),
                last: 1.0,
                volume: 0,
                timestamp: chrono::Utc::now().naive_utc(),
            })
        }

        fn is_paper(&self) -> bool {
            true
        }
    }
}
