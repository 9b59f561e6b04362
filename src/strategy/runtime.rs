// =============================================================================
// Strategy runtime — per-strategy position lifecycle state machine
// =============================================================================
//
// Flow:
//   on_alert()    — filters, tradeability, subscription admission, then a
//                   durable PendingEntry keyed by a fresh trade_id.
//   on_quote()    — builds candles, evaluates entry conditions per pending
//                   entry and exit conditions per active trade.
//   on_buy_fill() — PendingOrder(buy) becomes an ActiveTrade.
//   on_sell_fill()— PendingOrder(sell) becomes a CompletedTrade row.
//
// The trade_id is preserved across the whole chain:
//   PendingEntry -> PendingOrder(buy) -> ActiveTrade -> PendingOrder(sell)
//   -> CompletedTrade.
//
// All maps are owned by the engine task; nothing here is shared across
// threads. Broker calls and database writes are the only suspension points.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::broker::{Broker, BrokerPosition};
use crate::candles::CandleSeries;
use crate::db::active_trades::{ActiveTradeRow, ActiveTradeStore};
use crate::db::orders::{NewOrder, OrderEvent, OrderStore};
use crate::db::pending_entries::{PendingEntryRow, PendingEntryStore};
use crate::db::traces::{event, status, TraceOutcome, TraceStore};
use crate::db::trades::CompletedTrade;
use crate::db::{self, Database};
use crate::models::Announcement;
use crate::quote_provider::{QuoteProvider, SubscriberClass};
use crate::strategy::StrategyConfig;
use crate::types::{EntryTrigger, ExitReason, OrderStatus, Side};

/// Failed sell attempts before the trade is flagged for manual exit.
const MAX_SELL_ATTEMPTS: u32 = 3;

// ---------------------------------------------------------------------------
// In-memory lifecycle records
// ---------------------------------------------------------------------------

/// An accepted alert waiting for entry conditions.
#[derive(Debug, Clone)]
pub struct PendingEntry {
    pub trade_id: String,
    pub ticker: String,
    pub announcement: Option<Announcement>,
    pub alert_time: NaiveDateTime,
    pub first_price: Option<f64>,
    pub trace_id: Option<String>,
}

/// An open long position being monitored for exit.
#[derive(Debug, Clone)]
pub struct ActiveTrade {
    pub trade_id: String,
    pub ticker: String,
    pub entry_price: f64,
    pub entry_time: NaiveDateTime,
    pub first_candle_open: f64,
    pub shares: u32,
    pub stop_loss_price: f64,
    pub take_profit_price: f64,
    pub highest_since_entry: f64,
    pub last_price: f64,
    pub last_quote_time: Option<NaiveDateTime>,
    pub sell_attempts: u32,
    pub needs_manual_exit: bool,
    pub trace_id: Option<String>,
}

/// A broker order in flight, with enough context to resolve its fill.
#[derive(Debug, Clone)]
pub struct PendingOrder {
    pub order_id: String,
    pub trade_id: String,
    pub ticker: String,
    pub side: Side,
    pub shares: u32,
    pub limit_price: f64,
    pub submitted_at: NaiveDateTime,
    pub db_order_id: i64,
    pub trace_id: Option<String>,

    // Buy context: everything needed to construct the ActiveTrade.
    pub first_candle_open: Option<f64>,
    pub stop_loss_price: Option<f64>,
    pub take_profit_price: Option<f64>,
    /// Whether the stop was derived from the first observed post-alert price
    /// (kept as-is on fill) rather than the entry price (recomputed on fill).
    pub stop_from_first_price: bool,
    pub entry_trigger: Option<EntryTrigger>,

    // Sell context: everything needed to record the CompletedTrade.
    pub entry_price: Option<f64>,
    pub entry_time: Option<NaiveDateTime>,
    pub exit_reason: Option<ExitReason>,
}

/// Serializable status summary for the operator surface.
#[derive(Debug, Clone, Serialize)]
pub struct StrategyStatus {
    pub strategy_id: String,
    pub name: String,
    pub pending_entries: Vec<PendingEntrySummary>,
    pub active_trades: Vec<ActiveTradeSummary>,
    pub pending_orders: usize,
    pub completed_trades: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PendingEntrySummary {
    pub trade_id: String,
    pub ticker: String,
    pub alert_time: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActiveTradeSummary {
    pub trade_id: String,
    pub ticker: String,
    pub entry_price: f64,
    pub entry_time: NaiveDateTime,
    pub shares: u32,
    pub current_price: f64,
    pub pnl_pct: f64,
    pub pnl_dollars: f64,
    pub highest: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub needs_manual_exit: bool,
    pub sell_attempts: u32,
}

// ---------------------------------------------------------------------------
// Runtime
// ---------------------------------------------------------------------------

/// One runtime per enabled strategy.
pub struct StrategyRuntime {
    pub id: String,
    pub name: String,
    pub config: StrategyConfig,
    paper: bool,

    broker: Arc<dyn Broker>,
    quotes: Arc<QuoteProvider>,

    pending_store: PendingEntryStore,
    trade_store: ActiveTradeStore,
    order_store: OrderStore,
    traces: TraceStore,
    db: Database,

    pending_entries: HashMap<String, PendingEntry>,
    active_trades: HashMap<String, ActiveTrade>,
    pending_orders: HashMap<String, PendingOrder>,

    /// Shared per-ticker candle state, written only from the quote path.
    candles: HashMap<String, CandleSeries>,

    completed_trades: usize,
}

impl StrategyRuntime {
    pub fn new(
        id: String,
        name: String,
        config: StrategyConfig,
        broker: Arc<dyn Broker>,
        quotes: Arc<QuoteProvider>,
        db: Database,
        paper: bool,
    ) -> Self {
        Self {
            id,
            name,
            config,
            paper,
            broker,
            quotes,
            pending_store: PendingEntryStore::new(db.clone()),
            trade_store: ActiveTradeStore::new(db.clone()),
            order_store: OrderStore::new(db.clone()),
            traces: TraceStore::new(db.clone()),
            db,
            pending_entries: HashMap::new(),
            active_trades: HashMap::new(),
            pending_orders: HashMap::new(),
            candles: HashMap::new(),
            completed_trades: 0,
        }
    }

    // -------------------------------------------------------------------------
    // Recovery
    // -------------------------------------------------------------------------

    /// Load durable state on startup and verify it against one broker
    /// snapshot. Ghosts are logged here, never deleted -- the reconciliation
    /// loop handles confirmed ghosts.
    pub async fn recover(&mut self) {
        match self.trade_store.for_strategy(&self.id) {
            Ok(rows) => {
                info!(strategy = %self.name, count = rows.len(), "loading active trades from store");
                for row in rows {
                    let subscribed = self.quotes.subscribe(&row.ticker);
                    if !subscribed {
                        warn!(
                            ticker = %row.ticker,
                            "could not subscribe for recovered position (at cap) — queued, no live updates until a slot frees"
                        );
                        self.quotes
                            .queue_subscription(&row.ticker, SubscriberClass::ActiveTrade);
                    }
                    info!(
                        ticker = %row.ticker,
                        trade_id = %row.trade_id,
                        shares = row.shares,
                        entry_price = row.entry_price,
                        stop_loss = row.stop_loss_price,
                        take_profit = row.take_profit_price,
                        "recovered active trade"
                    );
                    self.active_trades.insert(
                        row.trade_id.clone(),
                        ActiveTrade {
                            trade_id: row.trade_id,
                            ticker: row.ticker,
                            entry_price: row.entry_price,
                            entry_time: row.entry_time,
                            first_candle_open: row.first_candle_open,
                            shares: row.shares,
                            stop_loss_price: row.stop_loss_price,
                            take_profit_price: row.take_profit_price,
                            highest_since_entry: row.highest_since_entry,
                            last_price: row.last_price.unwrap_or(0.0),
                            last_quote_time: row.last_quote_time,
                            sell_attempts: 0,
                            needs_manual_exit: false,
                            trace_id: row.trace_id,
                        },
                    );
                }
            }
            Err(e) => error!(strategy = %self.name, error = %e, "failed to load active trades"),
        }

        // Pending-entry rows cannot survive a restart usefully: their entry
        // windows have elapsed and their tickers are no longer subscribed.
        match self.pending_store.clear_strategy(&self.id) {
            Ok(0) => {}
            Ok(n) => info!(strategy = %self.name, count = n, "purged stale pending entries"),
            Err(e) => error!(strategy = %self.name, error = %e, "failed to purge pending entries"),
        }

        // Verify positions still exist at the broker. A position without a
        // matching active trade belongs to no strategy and is left alone.
        match self.broker.get_positions().await {
            Ok(positions) => {
                let broker_tickers: std::collections::HashSet<&str> =
                    positions.iter().map(|p| p.ticker.as_str()).collect();
                for trade in self.active_trades.values() {
                    if !broker_tickers.contains(trade.ticker.as_str()) {
                        warn!(
                            ticker = %trade.ticker,
                            trade_id = %trade.trade_id,
                            "position not found at broker — may have been manually closed"
                        );
                    }
                }
            }
            Err(e) => error!(strategy = %self.name, error = %e, "failed to verify broker positions"),
        }

        // Open broker orders are shown for manual review only; PendingOrders
        // are not durable by design.
        match self.broker.get_open_orders().await {
            Ok(orders) if !orders.is_empty() => {
                info!(count = orders.len(), "broker has open orders (not tracked)");
                for order in orders {
                    info!(
                        ticker = %order.ticker,
                        side = %order.side,
                        shares = order.shares,
                        status = %order.status,
                        "open broker order"
                    );
                }
            }
            Ok(_) => {}
            Err(e) => error!(error = %e, "failed to list open broker orders"),
        }
    }

    // -------------------------------------------------------------------------
    // Interest tracking
    // -------------------------------------------------------------------------

    fn pending_for_ticker(&self, ticker: &str) -> Vec<String> {
        self.pending_entries
            .values()
            .filter(|p| p.ticker == ticker)
            .map(|p| p.trade_id.clone())
            .collect()
    }

    fn trades_for_ticker(&self, ticker: &str) -> Vec<String> {
        self.active_trades
            .values()
            .filter(|t| t.ticker == ticker)
            .map(|t| t.trade_id.clone())
            .collect()
    }

    /// Whether any pending entry or active trade references the ticker.
    pub fn has_interest(&self, ticker: &str) -> bool {
        self.pending_entries.values().any(|p| p.ticker == ticker)
            || self.active_trades.values().any(|t| t.ticker == ticker)
    }

    /// Drop candle state and release the subscription when nothing on this
    /// strategy references the ticker any more.
    fn release_interest_if_idle(&mut self, ticker: &str) {
        if !self.has_interest(ticker) {
            self.candles.remove(ticker);
            self.quotes.unsubscribe(ticker);
        }
    }

    // -------------------------------------------------------------------------
    // Alert handling
    // -------------------------------------------------------------------------

    /// Evaluate an alert. Returns `true` when a pending entry was created.
    pub async fn on_alert(
        &mut self,
        announcement: &Announcement,
        trace_id: Option<&str>,
        now: NaiveDateTime,
    ) -> bool {
        let ticker = announcement.ticker.clone();

        if let Err(reason) = self.config.passes_filters(announcement) {
            info!(ticker = %ticker, strategy = %self.name, reason = %reason, "alert filtered");
            self.record_filter_rejection(trace_id, &reason, now);
            return false;
        }

        match self.broker.is_tradeable(&ticker).await {
            Ok((true, _)) => {}
            Ok((false, reason)) => {
                warn!(ticker = %ticker, reason = %reason, "not tradeable");
                self.record_filter_rejection(trace_id, &format!("not tradeable: {reason}"), now);
                return false;
            }
            Err(e) => {
                error!(ticker = %ticker, error = %e, "tradeability check failed");
                self.record_filter_rejection(trace_id, "tradeability check failed", now);
                return false;
            }
        }

        // Request a subscription unless this strategy already gets quotes for
        // the ticker through an existing pending entry or active trade.
        if !self.has_interest(&ticker) && !self.quotes.subscribe(&ticker) {
            warn!(ticker = %ticker, strategy = %self.name, "rejecting alert: subscription cap reached");
            self.record_filter_rejection(trace_id, "subscription_limit", now);
            return false;
        }

        let trade_id = Uuid::new_v4().to_string();
        let existing = self.pending_for_ticker(&ticker).len() + self.trades_for_ticker(&ticker).len();
        info!(
            ticker = %ticker,
            strategy = %self.name,
            trade_id = %trade_id,
            existing_positions = existing,
            "tracking alert for entry"
        );

        let entry = PendingEntry {
            trade_id: trade_id.clone(),
            ticker: ticker.clone(),
            announcement: Some(announcement.clone()),
            alert_time: now,
            first_price: None,
            trace_id: trace_id.map(str::to_string),
        };

        if let Err(e) = self.pending_store.save(&PendingEntryRow {
            trade_id: trade_id.clone(),
            ticker: ticker.clone(),
            strategy_id: Some(self.id.clone()),
            strategy_name: Some(self.name.clone()),
            alert_time: now,
            first_price: None,
            announcement_ticker: Some(announcement.ticker.clone()),
            announcement_timestamp: Some(announcement.timestamp),
            trace_id: trace_id.map(str::to_string),
        }) {
            error!(ticker = %ticker, error = %e, "failed to persist pending entry");
        }

        if let Some(tid) = trace_id {
            self.trace_event(tid, event::PENDING_ENTRY_CREATED, now, None);
            let _ = self.traces.update_status(
                tid,
                status::PENDING_ENTRY,
                &TraceOutcome {
                    pending_entry_trade_id: Some(trade_id.clone()),
                    ..Default::default()
                },
            );
        }

        self.pending_entries.insert(trade_id, entry);
        true
    }

    fn record_filter_rejection(&self, trace_id: Option<&str>, reason: &str, now: NaiveDateTime) {
        if let Some(tid) = trace_id {
            self.trace_event(tid, event::FILTER_REJECTED, now, Some(reason));
            if let Err(e) = self.traces.mark_filtered(tid) {
                error!(error = %e, "failed to mark trace filtered");
            }
        }
    }

    fn trace_event(
        &self,
        trace_id: &str,
        event_type: &str,
        at: NaiveDateTime,
        reason: Option<&str>,
    ) {
        if let Err(e) = self.traces.add_event(
            trace_id,
            event_type,
            at,
            Some(&self.id),
            Some(&self.name),
            reason,
            None,
        ) {
            error!(trace_id, event_type, error = %e, "failed to record trace event");
        }
    }

    // -------------------------------------------------------------------------
    // Quote handling
    // -------------------------------------------------------------------------

    pub async fn on_quote(
        &mut self,
        ticker: &str,
        price: f64,
        volume: u64,
        quote_time: NaiveDateTime,
    ) {
        let has_pending = self.pending_entries.values().any(|p| p.ticker == ticker);
        let has_trades = self.active_trades.values().any(|t| t.ticker == ticker);
        if !has_pending && !has_trades {
            return;
        }

        if has_pending {
            self.check_entry(ticker, price, volume, quote_time).await;
        }

        for trade_id in self.trades_for_ticker(ticker) {
            if let Some(trade) = self.active_trades.get_mut(&trade_id) {
                trade.last_price = price;
                trade.last_quote_time = Some(quote_time);
                if price > trade.highest_since_entry {
                    trade.highest_since_entry = price;
                }
                let highest = trade.highest_since_entry;
                let pnl_pct = (price - trade.entry_price) / trade.entry_price * 100.0;
                debug!(
                    ticker,
                    price,
                    pnl_pct,
                    stop_loss = trade.stop_loss_price,
                    take_profit = trade.take_profit_price,
                    trade_id = %trade_id,
                    "position quote"
                );
                if let Err(e) =
                    self.trade_store
                        .update_price(&trade_id, price, highest, quote_time)
                {
                    error!(ticker, error = %e, "failed to persist price update");
                }
            }
            self.check_exit(&trade_id, price, quote_time).await;
        }
    }

    async fn check_entry(&mut self, ticker: &str, price: f64, volume: u64, quote_time: NaiveDateTime) {
        let cfg = self.config.clone();

        // Price gate at the actual quote. Out-of-range quotes skip candle and
        // entry evaluation but still age out pending entries.
        if price <= cfg.price_min || price > cfg.price_max {
            debug!(ticker, price, "quote outside strategy price range");
            self.expire_pending(ticker, quote_time).await;
            return;
        }

        // Build the shared candle series for this ticker.
        let series = self.candles.entry(ticker.to_string()).or_default();
        if let Some(closed) = series.apply_tick(price, volume, quote_time) {
            debug!(
                ticker,
                open = closed.open,
                close = closed.close,
                volume = closed.volume,
                green = closed.is_green(),
                qualifies = closed.qualifies(cfg.min_candle_volume),
                "candle closed"
            );
        }

        let completed_green = series.green_streak(cfg.min_candle_volume);
        let building_qualifies = series
            .building()
            .map(|bar| bar.qualifies(cfg.min_candle_volume))
            .unwrap_or(false);

        for trade_id in self.pending_for_ticker(ticker) {
            let Some(pending) = self.pending_entries.get_mut(&trade_id) else {
                continue;
            };

            // Entry window: strictly greater than N minutes abandons; at
            // exactly N the entry is still eligible.
            let elapsed_secs = (quote_time - pending.alert_time).num_seconds();
            if elapsed_secs > cfg.entry_window_minutes * 60 {
                info!(
                    ticker,
                    trade_id = %trade_id,
                    elapsed_secs,
                    window_minutes = cfg.entry_window_minutes,
                    "entry window elapsed"
                );
                self.abandon_pending(&trade_id, quote_time);
                continue;
            }

            if pending.first_price.is_none() {
                pending.first_price = Some(price);
                info!(ticker, trade_id = %trade_id, first_price = price, "first post-alert price");
                if let Err(e) = self.pending_store.update_first_price(&trade_id, price) {
                    error!(ticker, error = %e, "failed to persist first price");
                }
            }

            if cfg.consec_green_candles == 0 {
                self.execute_entry(&trade_id, price, quote_time, EntryTrigger::NoCandleRequired)
                    .await;
                continue;
            }

            if completed_green >= cfg.consec_green_candles {
                info!(
                    ticker,
                    trade_id = %trade_id,
                    streak = completed_green,
                    "entry condition met on completed candles"
                );
                self.execute_entry(
                    &trade_id,
                    price,
                    quote_time,
                    EntryTrigger::Completed(completed_green),
                )
                .await;
                continue;
            }

            // Early entry: the building candle already qualifies, so count it
            // toward the streak instead of waiting for the minute to close.
            if building_qualifies && completed_green + 1 >= cfg.consec_green_candles {
                let streak = completed_green + 1;
                info!(
                    ticker,
                    trade_id = %trade_id,
                    streak,
                    "early entry: building candle qualifies"
                );
                self.execute_entry(&trade_id, price, quote_time, EntryTrigger::Early(streak))
                    .await;
            }
        }
    }

    /// Abandon any pending entries whose window has elapsed.
    async fn expire_pending(&mut self, ticker: &str, quote_time: NaiveDateTime) {
        for trade_id in self.pending_for_ticker(ticker) {
            let Some(pending) = self.pending_entries.get(&trade_id) else {
                continue;
            };
            let elapsed_secs = (quote_time - pending.alert_time).num_seconds();
            if elapsed_secs > self.config.entry_window_minutes * 60 {
                info!(ticker, trade_id = %trade_id, "entry window elapsed");
                self.abandon_pending(&trade_id, quote_time);
            }
        }
    }

    fn abandon_pending(&mut self, trade_id: &str, at: NaiveDateTime) {
        let Some(pending) = self.pending_entries.remove(trade_id) else {
            return;
        };
        if let Err(e) = self.pending_store.delete(trade_id) {
            error!(trade_id, error = %e, "failed to delete pending entry");
        }
        if let Some(tid) = pending.trace_id.as_deref() {
            self.trace_event(tid, event::ENTRY_TIMEOUT, at, None);
            let _ = self
                .traces
                .update_status(tid, status::ENTRY_TIMEOUT, &TraceOutcome::default());
        }
        info!(ticker = %pending.ticker, trade_id, "pending entry abandoned");
        self.release_interest_if_idle(&pending.ticker);
    }

    // -------------------------------------------------------------------------
    // Entry execution
    // -------------------------------------------------------------------------

    async fn execute_entry(
        &mut self,
        trade_id: &str,
        price: f64,
        quote_time: NaiveDateTime,
        trigger: EntryTrigger,
    ) {
        let Some(pending) = self.pending_entries.remove(trade_id) else {
            return;
        };
        let ticker = pending.ticker.clone();
        let cfg = self.config.clone();

        // Stop-loss: from the first observed price when configured, clamped so
        // the stop never sits above the entry.
        let mut stop_from_first_price = false;
        let stop_loss_price = match (cfg.stop_loss_from_open, pending.first_price) {
            (true, Some(first)) => {
                let stop = first * (1.0 - cfg.stop_loss_pct / 100.0);
                if stop > price {
                    price * (1.0 - cfg.stop_loss_pct / 100.0)
                } else {
                    stop_from_first_price = true;
                    stop
                }
            }
            _ => price * (1.0 - cfg.stop_loss_pct / 100.0),
        };
        let take_profit_price = price * (1.0 + cfg.take_profit_pct / 100.0);

        // Reference volume for sizing: the last completed candle, or the
        // building candle extrapolated to a full minute on an early entry.
        let series = self.candles.get(&ticker);
        let reference_volume = match series {
            Some(s) => s.last_completed_volume().or_else(|| {
                s.building().map(|bar| {
                    let elapsed = s.building_elapsed_secs(quote_time).unwrap_or(0);
                    if elapsed > 0 {
                        (bar.volume as f64 * (60.0 / elapsed as f64)) as u64
                    } else {
                        bar.volume
                    }
                })
            }),
            None => None,
        };

        let shares = cfg.shares(price, reference_volume);
        if shares == 0 {
            error!(ticker = %ticker, price, trade_id, "cannot size position; abandoning entry");
            if let Err(e) = self.pending_store.delete(trade_id) {
                error!(trade_id, error = %e, "failed to delete pending entry");
            }
            self.release_interest_if_idle(&ticker);
            return;
        }

        info!(
            ticker = %ticker,
            trade_id,
            price,
            shares,
            stop_loss = stop_loss_price,
            take_profit = take_profit_price,
            trigger = %trigger,
            reference_volume,
            "executing buy order"
        );

        let db_order_id = match self.order_store.create(&NewOrder {
            ticker: &ticker,
            side: Side::Buy,
            requested_shares: shares,
            limit_price: Some(price),
            strategy_id: Some(&self.id),
            strategy_name: Some(&self.name),
            trade_id: Some(trade_id),
            paper: self.paper,
        }) {
            Ok(id) => id,
            Err(e) => {
                error!(ticker = %ticker, error = %e, "failed to create order row");
                self.release_interest_if_idle(&ticker);
                return;
            }
        };

        // Limit buy at the current quote: a price-bounded market order.
        match self.broker.buy(&ticker, shares, price).await {
            Ok(order) => {
                info!(ticker = %ticker, order_id = %order.order_id, status = %order.status, "buy order submitted");

                // One transaction: record the broker id + submitted event and
                // retire the pending entry.
                let tx_result = self.db.with_tx(|tx| {
                    db::orders::set_broker_order_id_tx(tx, db_order_id, &order.order_id)?;
                    db::orders::insert_event_tx(
                        tx,
                        db_order_id,
                        &OrderEvent {
                            event_type: "submitted",
                            event_timestamp: quote_time,
                            broker_order_id: Some(&order.order_id),
                            filled_shares: None,
                            fill_price: None,
                            cumulative_filled: None,
                            raw_data: None,
                        },
                    )?;
                    db::pending_entries::delete_tx(tx, trade_id)?;
                    Ok(())
                });
                if let Err(e) = tx_result {
                    error!(ticker = %ticker, error = %e, "failed to persist order submission");
                }

                if let Some(tid) = pending.trace_id.as_deref() {
                    self.trace_event(
                        tid,
                        event::BUY_ORDER_SUBMITTED,
                        quote_time,
                        Some(&trigger.to_string()),
                    );
                }

                self.pending_orders.insert(
                    order.order_id.clone(),
                    PendingOrder {
                        order_id: order.order_id.clone(),
                        trade_id: trade_id.to_string(),
                        ticker: ticker.clone(),
                        side: Side::Buy,
                        shares,
                        limit_price: price,
                        submitted_at: quote_time,
                        db_order_id,
                        trace_id: pending.trace_id.clone(),
                        first_candle_open: pending.first_price.or(Some(price)),
                        stop_loss_price: Some(stop_loss_price),
                        take_profit_price: Some(take_profit_price),
                        stop_from_first_price,
                        entry_trigger: Some(trigger),
                        entry_price: None,
                        entry_time: None,
                        exit_reason: None,
                    },
                );
            }
            Err(e) => {
                error!(ticker = %ticker, error = %e, "buy order failed");
                let tx_result = self.db.with_tx(|tx| {
                    db::orders::set_status_tx(tx, db_order_id, OrderStatus::Rejected, None, None)?;
                    db::orders::insert_event_tx(
                        tx,
                        db_order_id,
                        &OrderEvent {
                            event_type: "rejected",
                            event_timestamp: quote_time,
                            broker_order_id: None,
                            filled_shares: None,
                            fill_price: None,
                            cumulative_filled: None,
                            raw_data: Some(&serde_json::json!({ "error": e.to_string() })),
                        },
                    )?;
                    db::pending_entries::delete_tx(tx, trade_id)?;
                    Ok(())
                });
                if let Err(e) = tx_result {
                    error!(ticker = %ticker, error = %e, "failed to persist order rejection");
                }
                self.release_interest_if_idle(&ticker);
            }
        }
    }

    // -------------------------------------------------------------------------
    // Fill handling
    // -------------------------------------------------------------------------

    /// A buy fill creates the ActiveTrade under the order's trade_id.
    pub async fn on_buy_fill(
        &mut self,
        order_id: &str,
        filled_shares: u32,
        filled_price: f64,
        fill_time: NaiveDateTime,
        raw: &serde_json::Value,
    ) {
        let Some(pending) = self.pending_orders.remove(order_id) else {
            warn!(order_id, "buy fill for unknown order");
            return;
        };
        let ticker = pending.ticker.clone();
        let cfg = self.config.clone();

        info!(
            ticker = %ticker,
            order_id,
            filled_shares,
            filled_price,
            trigger = %pending.entry_trigger.map(|t| t.to_string()).unwrap_or_default(),
            "buy filled"
        );

        let tx_result = self.db.with_tx(|tx| {
            db::orders::insert_event_tx(
                tx,
                pending.db_order_id,
                &OrderEvent {
                    event_type: "fill",
                    event_timestamp: fill_time,
                    broker_order_id: Some(order_id),
                    filled_shares: Some(filled_shares),
                    fill_price: Some(filled_price),
                    cumulative_filled: Some(filled_shares),
                    raw_data: Some(raw),
                },
            )?;
            db::orders::set_status_tx(
                tx,
                pending.db_order_id,
                OrderStatus::Filled,
                Some(filled_shares),
                Some(filled_price),
            )?;
            Ok(())
        });
        if let Err(e) = tx_result {
            error!(ticker = %ticker, error = %e, "failed to persist buy fill");
        }

        // The take-profit always tracks the actual fill; the stop keeps its
        // first-price derivation when it has one.
        let stop_loss_price = if pending.stop_from_first_price {
            pending
                .stop_loss_price
                .unwrap_or_else(|| filled_price * (1.0 - cfg.stop_loss_pct / 100.0))
        } else {
            filled_price * (1.0 - cfg.stop_loss_pct / 100.0)
        };
        let take_profit_price = filled_price * (1.0 + cfg.take_profit_pct / 100.0);

        let trade = ActiveTrade {
            trade_id: pending.trade_id.clone(),
            ticker: ticker.clone(),
            entry_price: filled_price,
            entry_time: fill_time,
            first_candle_open: pending.first_candle_open.unwrap_or(filled_price),
            shares: filled_shares,
            stop_loss_price,
            take_profit_price,
            highest_since_entry: filled_price,
            last_price: filled_price,
            last_quote_time: None,
            sell_attempts: 0,
            needs_manual_exit: false,
            trace_id: pending.trace_id.clone(),
        };

        if let Err(e) = self.trade_store.save(&ActiveTradeRow {
            trade_id: trade.trade_id.clone(),
            ticker: ticker.clone(),
            strategy_id: Some(self.id.clone()),
            strategy_name: Some(self.name.clone()),
            entry_price: filled_price,
            entry_time: fill_time,
            first_candle_open: trade.first_candle_open,
            shares: filled_shares,
            stop_loss_price,
            take_profit_price,
            highest_since_entry: filled_price,
            last_price: None,
            last_quote_time: None,
            paper: self.paper,
            trace_id: trade.trace_id.clone(),
        }) {
            error!(ticker = %ticker, error = %e, "failed to persist active trade");
        }

        if let Some(tid) = trade.trace_id.as_deref() {
            self.trace_event(tid, event::BUY_ORDER_FILLED, fill_time, None);
            self.trace_event(tid, event::ACTIVE_TRADE_CREATED, fill_time, None);
            let _ = self.traces.update_status(
                tid,
                status::ACTIVE_TRADE,
                &TraceOutcome {
                    active_trade_id: Some(trade.trade_id.clone()),
                    ..Default::default()
                },
            );
        }

        info!(ticker = %ticker, trade_id = %trade.trade_id, "active trade created");
        self.active_trades.insert(trade.trade_id.clone(), trade);
    }

    /// A sell fill completes the trade.
    pub async fn on_sell_fill(
        &mut self,
        order_id: &str,
        filled_shares: u32,
        filled_price: f64,
        fill_time: NaiveDateTime,
        raw: &serde_json::Value,
    ) {
        let Some(pending) = self.pending_orders.remove(order_id) else {
            warn!(order_id, "sell fill for unknown order");
            return;
        };
        let ticker = pending.ticker.clone();
        let entry_price = pending.entry_price.unwrap_or(filled_price);
        let entry_time = pending.entry_time.unwrap_or(fill_time);
        let exit_reason = pending.exit_reason.unwrap_or(ExitReason::Timeout);

        let return_pct = if entry_price > 0.0 {
            (filled_price - entry_price) / entry_price * 100.0
        } else {
            0.0
        };
        let pnl = (filled_price - entry_price) * filled_shares as f64;

        info!(
            ticker = %ticker,
            order_id,
            filled_shares,
            filled_price,
            pnl,
            return_pct,
            exit_reason = %exit_reason,
            "sell filled"
        );

        let completed = CompletedTrade {
            trade_id: Some(pending.trade_id.clone()),
            ticker: ticker.clone(),
            entry_price,
            exit_price: filled_price,
            entry_time,
            exit_time: fill_time,
            shares: filled_shares,
            exit_reason,
            return_pct,
            pnl,
            strategy_id: Some(self.id.clone()),
            strategy_name: Some(self.name.clone()),
            strategy_params: serde_json::to_value(&self.config).ok(),
            paper: self.paper,
        };

        // One transaction: fill event + order status + history row + active
        // trade removal.
        let trade_id = pending.trade_id.clone();
        let completed_row_id = self.db.with_tx(|tx| {
            db::orders::insert_event_tx(
                tx,
                pending.db_order_id,
                &OrderEvent {
                    event_type: "fill",
                    event_timestamp: fill_time,
                    broker_order_id: Some(order_id),
                    filled_shares: Some(filled_shares),
                    fill_price: Some(filled_price),
                    cumulative_filled: Some(filled_shares),
                    raw_data: Some(raw),
                },
            )?;
            db::orders::set_status_tx(
                tx,
                pending.db_order_id,
                OrderStatus::Filled,
                Some(filled_shares),
                Some(filled_price),
            )?;
            let row_id = db::trades::save_tx(tx, &completed)?;
            db::active_trades::delete_tx(tx, &trade_id)?;
            Ok(row_id)
        });

        let completed_row_id = match completed_row_id {
            Ok(id) => Some(id),
            Err(e) => {
                error!(ticker = %ticker, error = %e, "failed to persist completed trade");
                None
            }
        };

        if let Some(tid) = pending.trace_id.as_deref() {
            self.trace_event(tid, event::TRADE_COMPLETED, fill_time, None);
            let _ = self.traces.update_status(
                tid,
                status::COMPLETED,
                &TraceOutcome {
                    completed_trade_id: completed_row_id,
                    exit_reason: Some(exit_reason.to_string()),
                    pnl: Some(pnl),
                    return_pct: Some(return_pct),
                    completed_at: Some(fill_time),
                    ..Default::default()
                },
            );
        }

        self.completed_trades += 1;
        self.release_interest_if_idle(&ticker);
    }

    /// Order canceled at the broker.
    pub async fn on_order_canceled(
        &mut self,
        order_id: &str,
        at: NaiveDateTime,
        raw: &serde_json::Value,
    ) {
        let Some(pending) = self.pending_orders.remove(order_id) else {
            return;
        };
        warn!(ticker = %pending.ticker, order_id, side = %pending.side, "order canceled");

        let tx_result = self.db.with_tx(|tx| {
            db::orders::insert_event_tx(
                tx,
                pending.db_order_id,
                &OrderEvent {
                    event_type: "canceled",
                    event_timestamp: at,
                    broker_order_id: Some(order_id),
                    filled_shares: None,
                    fill_price: None,
                    cumulative_filled: None,
                    raw_data: Some(raw),
                },
            )?;
            db::orders::set_status_tx(tx, pending.db_order_id, OrderStatus::Canceled, None, None)?;
            Ok(())
        });
        if let Err(e) = tx_result {
            error!(error = %e, "failed to persist order cancel");
        }

        if let Some(tid) = pending.trace_id.as_deref() {
            self.trace_event(tid, event::ORDER_CANCELED, at, None);
        }

        match pending.side {
            Side::Buy => self.release_interest_if_idle(&pending.ticker),
            Side::Sell => {
                // The durable active-trade row still exists; the position is
                // re-managed after the next restart or reconciliation.
                warn!(ticker = %pending.ticker, "sell order canceled — position still open");
            }
        }
    }

    /// Order rejected at the broker.
    pub async fn on_order_rejected(
        &mut self,
        order_id: &str,
        reason: Option<&str>,
        at: NaiveDateTime,
        raw: &serde_json::Value,
    ) {
        let Some(pending) = self.pending_orders.remove(order_id) else {
            return;
        };
        error!(
            ticker = %pending.ticker,
            order_id,
            side = %pending.side,
            reason = reason.unwrap_or(""),
            "order rejected"
        );

        let tx_result = self.db.with_tx(|tx| {
            db::orders::insert_event_tx(
                tx,
                pending.db_order_id,
                &OrderEvent {
                    event_type: "rejected",
                    event_timestamp: at,
                    broker_order_id: Some(order_id),
                    filled_shares: None,
                    fill_price: None,
                    cumulative_filled: None,
                    raw_data: Some(raw),
                },
            )?;
            db::orders::set_status_tx(tx, pending.db_order_id, OrderStatus::Rejected, None, None)?;
            Ok(())
        });
        if let Err(e) = tx_result {
            error!(error = %e, "failed to persist order rejection");
        }

        if let Some(tid) = pending.trace_id.as_deref() {
            self.trace_event(tid, event::ORDER_REJECTED, at, reason);
        }

        match pending.side {
            Side::Buy => self.release_interest_if_idle(&pending.ticker),
            Side::Sell => {
                error!(ticker = %pending.ticker, "sell order rejected — position still open");
            }
        }
    }

    // -------------------------------------------------------------------------
    // Exit evaluation
    // -------------------------------------------------------------------------

    async fn check_exit(&mut self, trade_id: &str, price: f64, quote_time: NaiveDateTime) {
        let Some(trade) = self.active_trades.get(trade_id) else {
            return;
        };
        let cfg = &self.config;

        // Strict priority: take-profit, fixed stop, trailing stop, timeout.
        let decision: Option<(ExitReason, f64)> = if price >= trade.take_profit_price {
            Some((ExitReason::TakeProfit, trade.take_profit_price))
        } else if price <= trade.stop_loss_price {
            Some((ExitReason::StopLoss, trade.stop_loss_price))
        } else if cfg.trailing_stop_pct > 0.0 {
            let trail = trade.highest_since_entry * (1.0 - cfg.trailing_stop_pct / 100.0);
            if price <= trail {
                Some((ExitReason::TrailingStop, trail))
            } else {
                None
            }
        } else {
            None
        };

        let decision = decision.or_else(|| {
            let held_secs = (quote_time - trade.entry_time).num_seconds();
            (held_secs >= cfg.timeout_minutes * 60).then_some((ExitReason::Timeout, price))
        });

        if let Some((reason, exit_price)) = decision {
            self.execute_exit(trade_id, exit_price, reason, quote_time).await;
        }
    }

    // -------------------------------------------------------------------------
    // Exit execution
    // -------------------------------------------------------------------------

    pub async fn execute_exit(
        &mut self,
        trade_id: &str,
        exit_price: f64,
        reason: ExitReason,
        now: NaiveDateTime,
    ) {
        let Some(trade) = self.active_trades.get(trade_id) else {
            return;
        };
        if trade.needs_manual_exit {
            return;
        }
        let ticker = trade.ticker.clone();
        let shares = trade.shares;
        let entry_price = trade.entry_price;
        let entry_time = trade.entry_time;
        let trace_id = trade.trace_id.clone();
        let sell_attempts = trade.sell_attempts;

        // Idempotence: one in-flight sell per trade_id.
        if self
            .pending_orders
            .values()
            .any(|o| o.trade_id == trade_id && o.side == Side::Sell)
        {
            debug!(ticker = %ticker, trade_id, "sell already pending; skipping");
            return;
        }

        // On retry, a sell may already exist at the broker (e.g. submitted
        // before a restart). The broker does not know trade_ids, so match by
        // ticker.
        if sell_attempts > 0 {
            match self.broker.get_open_orders().await {
                Ok(orders) => {
                    if orders
                        .iter()
                        .any(|o| o.ticker == ticker && o.side == Side::Sell)
                    {
                        info!(ticker = %ticker, trade_id, "existing broker sell found; dropping local trade");
                        self.active_trades.remove(trade_id);
                        self.release_interest_if_idle(&ticker);
                        return;
                    }
                }
                Err(e) => warn!(ticker = %ticker, error = %e, "could not check broker orders"),
            }
        }

        let return_pct = (exit_price - entry_price) / entry_price * 100.0;
        info!(
            ticker = %ticker,
            trade_id,
            exit_price,
            reason = %reason,
            return_pct,
            "submitting exit"
        );

        let db_order_id = match self.order_store.create(&NewOrder {
            ticker: &ticker,
            side: Side::Sell,
            requested_shares: shares,
            limit_price: Some(exit_price),
            strategy_id: Some(&self.id),
            strategy_name: Some(&self.name),
            trade_id: Some(trade_id),
            paper: self.paper,
        }) {
            Ok(id) => id,
            Err(e) => {
                error!(ticker = %ticker, error = %e, "failed to create sell order row");
                return;
            }
        };

        match self.broker.sell(&ticker, shares, exit_price).await {
            Ok(order) => {
                info!(ticker = %ticker, order_id = %order.order_id, "sell order submitted");

                let tx_result = self.db.with_tx(|tx| {
                    db::orders::set_broker_order_id_tx(tx, db_order_id, &order.order_id)?;
                    db::orders::insert_event_tx(
                        tx,
                        db_order_id,
                        &OrderEvent {
                            event_type: "submitted",
                            event_timestamp: now,
                            broker_order_id: Some(&order.order_id),
                            filled_shares: None,
                            fill_price: None,
                            cumulative_filled: None,
                            raw_data: None,
                        },
                    )?;
                    Ok(())
                });
                if let Err(e) = tx_result {
                    error!(ticker = %ticker, error = %e, "failed to persist sell submission");
                }

                if let Some(tid) = trace_id.as_deref() {
                    self.trace_event(tid, event::SELL_ORDER_SUBMITTED, now, Some(&reason.to_string()));
                }

                self.pending_orders.insert(
                    order.order_id.clone(),
                    PendingOrder {
                        order_id: order.order_id.clone(),
                        trade_id: trade_id.to_string(),
                        ticker: ticker.clone(),
                        side: Side::Sell,
                        shares,
                        limit_price: exit_price,
                        submitted_at: now,
                        db_order_id,
                        trace_id,
                        first_candle_open: None,
                        stop_loss_price: None,
                        take_profit_price: None,
                        stop_from_first_price: false,
                        entry_trigger: None,
                        entry_price: Some(entry_price),
                        entry_time: Some(entry_time),
                        exit_reason: Some(reason),
                    },
                );

                // The in-memory trade moves into the pending order; the
                // durable row stays until the sell fills.
                self.active_trades.remove(trade_id);
            }
            Err(e) => {
                error!(ticker = %ticker, trade_id, error = %e, "sell order failed");

                let tx_result = self.db.with_tx(|tx| {
                    db::orders::set_status_tx(tx, db_order_id, OrderStatus::Rejected, None, None)?;
                    db::orders::insert_event_tx(
                        tx,
                        db_order_id,
                        &OrderEvent {
                            event_type: "rejected",
                            event_timestamp: now,
                            broker_order_id: None,
                            filled_shares: None,
                            fill_price: None,
                            cumulative_filled: None,
                            raw_data: Some(&serde_json::json!({ "error": e.to_string() })),
                        },
                    )?;
                    Ok(())
                });
                if let Err(e) = tx_result {
                    error!(ticker = %ticker, error = %e, "failed to persist sell rejection");
                }

                if e.implies_no_position() {
                    match self.broker.get_position(&ticker).await {
                        Ok(None) => {
                            self.remove_orphaned_trade(trade_id, now).await;
                            return;
                        }
                        Ok(Some(pos)) if pos.shares == 0 => {
                            self.remove_orphaned_trade(trade_id, now).await;
                            return;
                        }
                        Ok(Some(pos)) => {
                            if let Some(trade) = self.active_trades.get_mut(trade_id) {
                                if pos.shares != trade.shares {
                                    warn!(
                                        ticker = %ticker,
                                        broker_shares = pos.shares,
                                        tracked_shares = trade.shares,
                                        "share count drift — adopting broker count"
                                    );
                                    trade.shares = pos.shares;
                                }
                            }
                        }
                        Err(e) => warn!(ticker = %ticker, error = %e, "position check failed"),
                    }
                }

                if let Some(trade) = self.active_trades.get_mut(trade_id) {
                    trade.sell_attempts += 1;
                    if trade.sell_attempts >= MAX_SELL_ATTEMPTS {
                        trade.needs_manual_exit = true;
                        error!(
                            ticker = %ticker,
                            trade_id,
                            shares = trade.shares,
                            entry_price = trade.entry_price,
                            "sell failed {MAX_SELL_ATTEMPTS} times — needs manual exit"
                        );
                    } else {
                        warn!(
                            ticker = %ticker,
                            attempt = trade.sell_attempts,
                            "sell attempt failed — will retry on next exit signal"
                        );
                    }
                }
            }
        }
    }

    /// The broker confirmed no position exists: record a zero-P&L completed
    /// trade and drop the trade everywhere.
    async fn remove_orphaned_trade(&mut self, trade_id: &str, now: NaiveDateTime) {
        let Some(trade) = self.active_trades.remove(trade_id) else {
            return;
        };
        let ticker = trade.ticker.clone();
        warn!(
            ticker = %ticker,
            trade_id,
            shares = trade.shares,
            entry_price = trade.entry_price,
            "removing orphaned trade: position not found at broker"
        );

        let completed = CompletedTrade {
            trade_id: Some(trade.trade_id.clone()),
            ticker: ticker.clone(),
            entry_price: trade.entry_price,
            exit_price: trade.entry_price,
            entry_time: trade.entry_time,
            exit_time: now,
            shares: trade.shares,
            exit_reason: ExitReason::PositionNotFound,
            return_pct: 0.0,
            pnl: 0.0,
            strategy_id: Some(self.id.clone()),
            strategy_name: Some(self.name.clone()),
            strategy_params: serde_json::to_value(&self.config).ok(),
            paper: self.paper,
        };

        let result = self.db.with_tx(|tx| {
            let row_id = db::trades::save_tx(tx, &completed)?;
            db::active_trades::delete_tx(tx, trade_id)?;
            Ok(row_id)
        });

        match result {
            Ok(row_id) => {
                if let Some(tid) = trade.trace_id.as_deref() {
                    let _ = self.traces.update_status(
                        tid,
                        status::COMPLETED,
                        &TraceOutcome {
                            completed_trade_id: Some(row_id),
                            exit_reason: Some(ExitReason::PositionNotFound.to_string()),
                            pnl: Some(0.0),
                            return_pct: Some(0.0),
                            completed_at: Some(now),
                            ..Default::default()
                        },
                    );
                }
            }
            Err(e) => error!(ticker = %ticker, error = %e, "failed to record orphaned trade"),
        }

        self.completed_trades += 1;
        self.release_interest_if_idle(&ticker);
    }

    // -------------------------------------------------------------------------
    // Reconciliation & admin
    // -------------------------------------------------------------------------

    /// Compare tracked trades against a broker position snapshot. Tracked
    /// trades whose ticker the broker does not hold are ghosts: completed
    /// with `position_not_found` and removed.
    pub async fn reconcile(&mut self, broker_positions: &HashMap<String, BrokerPosition>, now: NaiveDateTime) {
        let stale: Vec<String> = self
            .active_trades
            .values()
            .filter(|t| !broker_positions.contains_key(&t.ticker))
            .map(|t| t.trade_id.clone())
            .collect();

        for trade_id in &stale {
            warn!(trade_id = %trade_id, "reconciliation: position no longer at broker");
            self.remove_orphaned_trade(trade_id, now).await;
        }

        if !stale.is_empty() {
            info!(strategy = %self.name, count = stale.len(), "reconciliation removed stale positions");
        }
    }

    /// Disable this strategy: drop pending entries, submit an exit for every
    /// active trade, release subscriptions held solely by this strategy.
    pub async fn disable(&mut self, now: NaiveDateTime) {
        let pending_ids: Vec<String> = self.pending_entries.keys().cloned().collect();
        for trade_id in pending_ids {
            self.abandon_pending(&trade_id, now);
        }

        let trade_ids: Vec<String> = self.active_trades.keys().cloned().collect();
        for trade_id in trade_ids {
            let price = self
                .active_trades
                .get(&trade_id)
                .map(|t| if t.last_price > 0.0 { t.last_price } else { t.entry_price })
                .unwrap_or(0.0);
            if price > 0.0 {
                self.execute_exit(&trade_id, price, ExitReason::StrategyDisabled, now)
                    .await;
            }
        }

        info!(strategy = %self.name, "strategy disabled");
    }

    /// Submit an exit for every active trade at its last known price.
    pub async fn exit_all(&mut self, now: NaiveDateTime) {
        let trade_ids: Vec<String> = self.active_trades.keys().cloned().collect();
        for trade_id in trade_ids {
            let price = self
                .active_trades
                .get(&trade_id)
                .map(|t| if t.last_price > 0.0 { t.last_price } else { t.entry_price })
                .unwrap_or(0.0);
            if price > 0.0 {
                self.execute_exit(&trade_id, price, ExitReason::ExitAll, now).await;
            }
        }
    }

    /// Operator-facing status summary.
    pub fn status(&self) -> StrategyStatus {
        let pending_entries = self
            .pending_entries
            .values()
            .map(|p| PendingEntrySummary {
                trade_id: p.trade_id.clone(),
                ticker: p.ticker.clone(),
                alert_time: p.alert_time,
            })
            .collect();

        let active_trades = self
            .active_trades
            .values()
            .map(|t| {
                let current = if t.last_price > 0.0 { t.last_price } else { t.entry_price };
                let pnl_pct = if t.entry_price > 0.0 {
                    (current - t.entry_price) / t.entry_price * 100.0
                } else {
                    0.0
                };
                ActiveTradeSummary {
                    trade_id: t.trade_id.clone(),
                    ticker: t.ticker.clone(),
                    entry_price: t.entry_price,
                    entry_time: t.entry_time,
                    shares: t.shares,
                    current_price: current,
                    pnl_pct,
                    pnl_dollars: (current - t.entry_price) * t.shares as f64,
                    highest: t.highest_since_entry,
                    stop_loss: t.stop_loss_price,
                    take_profit: t.take_profit_price,
                    needs_manual_exit: t.needs_manual_exit,
                    sell_attempts: t.sell_attempts,
                }
            })
            .collect();

        StrategyStatus {
            strategy_id: self.id.clone(),
            name: self.name.clone(),
            pending_entries,
            active_trades,
            pending_orders: self.pending_orders.len(),
            completed_trades: self.completed_trades,
        }
    }

    // Accessors used by the engine's fill router and tests.

    pub fn owns_order(&self, order_id: &str) -> bool {
        self.pending_orders.contains_key(order_id)
    }

    pub fn order_side(&self, order_id: &str) -> Option<Side> {
        self.pending_orders.get(order_id).map(|o| o.side)
    }

    #[cfg(test)]
    pub(crate) fn active_trade(&self, trade_id: &str) -> Option<&ActiveTrade> {
        self.active_trades.get(trade_id)
    }

    #[cfg(test)]
    pub(crate) fn active_trade_ids(&self) -> Vec<String> {
        self.active_trades.keys().cloned().collect()
    }

    #[cfg(test)]
    pub(crate) fn pending_entry_ids(&self) -> Vec<String> {
        self.pending_entries.keys().cloned().collect()
    }

    #[cfg(test)]
    pub(crate) fn pending_order_ids(&self) -> Vec<String> {
        self.pending_orders.keys().cloned().collect()
    }
}

impl std::fmt::Debug for StrategyRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyRuntime")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("pending_entries", &self.pending_entries.len())
            .field("active_trades", &self.active_trades.len())
            .field("pending_orders", &self.pending_orders.len())
            .finish()
    }
}
