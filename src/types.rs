// =============================================================================
// Shared types used across the pressbot trading engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// Order side. The engine only ever opens long positions, so every trade is
/// one buy followed by one sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

/// Lifecycle status of an order row in the audit store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Submitted,
    Filled,
    PartialFill,
    Canceled,
    Rejected,
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Submitted => "submitted",
            Self::Filled => "filled",
            Self::PartialFill => "partial_fill",
            Self::Canceled => "canceled",
            Self::Rejected => "rejected",
        };
        write!(f, "{s}")
    }
}

impl OrderStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "submitted" => Some(Self::Submitted),
            "filled" => Some(Self::Filled),
            "partial_fill" => Some(Self::PartialFill),
            "canceled" => Some(Self::Canceled),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// Why a position was (or is being) closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    TrailingStop,
    Timeout,
    StrategyDisabled,
    PositionNotFound,
    ExitAll,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::TakeProfit => "take_profit",
            Self::StopLoss => "stop_loss",
            Self::TrailingStop => "trailing_stop",
            Self::Timeout => "timeout",
            Self::StrategyDisabled => "strategy_disabled",
            Self::PositionNotFound => "position_not_found",
            Self::ExitAll => "exit_all",
        };
        write!(f, "{s}")
    }
}

/// What satisfied a strategy's entry condition. The counts carry the green
/// streak length at trigger time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryTrigger {
    /// No consecutive-candle requirement; entered on the first quote.
    NoCandleRequired,
    /// The trailing streak of completed qualifying candles sufficed.
    Completed(u32),
    /// The building candle already qualified and finished the streak.
    Early(u32),
}

impl std::fmt::Display for EntryTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoCandleRequired => write!(f, "no_candle_req"),
            Self::Completed(n) => write!(f, "completed_{n}_green"),
            Self::Early(n) => write!(f, "early_entry_{n}_green"),
        }
    }
}

/// US equity market session, computed from the alert timestamp in
/// America/New_York.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketSession {
    Premarket,
    Market,
    Postmarket,
    Closed,
}

impl std::fmt::Display for MarketSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Premarket => "premarket",
            Self::Market => "market",
            Self::Postmarket => "postmarket",
            Self::Closed => "closed",
        };
        write!(f, "{s}")
    }
}

impl MarketSession {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "premarket" => Some(Self::Premarket),
            "market" => Some(Self::Market),
            "postmarket" => Some(Self::Postmarket),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}
