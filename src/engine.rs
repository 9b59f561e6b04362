// =============================================================================
// Trading engine — fanout router and owner of all strategy runtimes
// =============================================================================
//
// The engine is a single task that owns every StrategyRuntime and consumes
// four sources in one select loop: alerts from the HTTP service, ticks from
// the quote provider, order updates from the broker client, and admin
// commands. This serializes all strategy-state mutation: alerts are fully
// fanned out (in priority order) before the next alert, and quotes for a
// ticker reach every interested strategy in feed order.
//
// No hidden globals: the engine is constructed with its stores and
// collaborators and handed out only as a typed `EngineHandle`.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::broker::{Broker, BrokerPosition, OrderUpdate, OrderUpdateKind};
use crate::db::strategies::StrategyStore;
use crate::db::Database;
use crate::models::Announcement;
use crate::quote_provider::{QuoteProvider, QuoteTick};
use crate::strategy::{StrategyRuntime, StrategyStatus};
use crate::types::Side;

/// A parsed alert handed from the alert service to the engine. The HTTP
/// handler must never block on the engine, so this crosses an unbounded
/// channel.
#[derive(Debug, Clone)]
pub struct AlertEvent {
    /// Parsed announcement; `None` when the content did not match the
    /// grammar (received but not tradeable).
    pub announcement: Option<Announcement>,
    pub trace_id: String,
    pub received_at: NaiveDateTime,
}

/// Administrative operations, each replying over a oneshot.
pub enum EngineCommand {
    Status(oneshot::Sender<EngineStatus>),
    EnableStrategy {
        id: String,
        reply: oneshot::Sender<bool>,
    },
    DisableStrategy {
        id: String,
        reply: oneshot::Sender<bool>,
    },
    MovePriority {
        id: String,
        up: bool,
        reply: oneshot::Sender<bool>,
    },
    ExitAllPositions {
        reply: oneshot::Sender<usize>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Engine snapshot for the operator surface.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub running: bool,
    pub paper: bool,
    pub subscriptions: Vec<String>,
    pub strategies: Vec<StrategyStatus>,
}

/// Cheap, cloneable handle for the HTTP layer and CLI.
#[derive(Clone)]
pub struct EngineHandle {
    alerts: UnboundedSender<AlertEvent>,
    commands: UnboundedSender<EngineCommand>,
}

impl EngineHandle {
    /// Enqueue an alert; never blocks.
    pub fn send_alert(&self, event: AlertEvent) {
        if self.alerts.send(event).is_err() {
            warn!("alert dropped: engine stopped");
        }
    }

    pub async fn status(&self) -> Option<EngineStatus> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(EngineCommand::Status(tx)).ok()?;
        rx.await.ok()
    }

    pub async fn enable_strategy(&self, id: &str) -> bool {
        let (tx, rx) = oneshot::channel();
        if self
            .commands
            .send(EngineCommand::EnableStrategy { id: id.to_string(), reply: tx })
            .is_err()
        {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    pub async fn disable_strategy(&self, id: &str) -> bool {
        let (tx, rx) = oneshot::channel();
        if self
            .commands
            .send(EngineCommand::DisableStrategy { id: id.to_string(), reply: tx })
            .is_err()
        {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    pub async fn move_priority(&self, id: &str, up: bool) -> bool {
        let (tx, rx) = oneshot::channel();
        if self
            .commands
            .send(EngineCommand::MovePriority { id: id.to_string(), up, reply: tx })
            .is_err()
        {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    pub async fn exit_all_positions(&self) -> usize {
        let (tx, rx) = oneshot::channel();
        if self
            .commands
            .send(EngineCommand::ExitAllPositions { reply: tx })
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(EngineCommand::Shutdown { reply: tx }).is_ok() {
            let _ = rx.await;
        }
    }
}

/// The engine proper. Construct with `new`, load strategies with `recover`,
/// then `run` it as a task.
pub struct TradingEngine {
    strategies: Vec<StrategyRuntime>,
    broker: Arc<dyn Broker>,
    quotes: Arc<QuoteProvider>,
    db: Database,
    strategy_store: StrategyStore,
    paper: bool,
    reconcile_interval: Duration,

    alert_rx: UnboundedReceiver<AlertEvent>,
    command_rx: UnboundedReceiver<EngineCommand>,
    quote_tx: UnboundedSender<QuoteTick>,
    quote_rx: UnboundedReceiver<QuoteTick>,
    update_tx: UnboundedSender<OrderUpdate>,
    update_rx: UnboundedReceiver<OrderUpdate>,
}

impl TradingEngine {
    pub fn new(
        broker: Arc<dyn Broker>,
        quotes: Arc<QuoteProvider>,
        db: Database,
        paper: bool,
        reconcile_interval: Duration,
    ) -> (Self, EngineHandle) {
        let (alert_tx, alert_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (quote_tx, quote_rx) = mpsc::unbounded_channel();
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        let engine = Self {
            strategies: Vec::new(),
            broker,
            quotes,
            strategy_store: StrategyStore::new(db.clone()),
            db,
            paper,
            reconcile_interval,
            alert_rx,
            command_rx,
            quote_tx,
            quote_rx,
            update_tx,
            update_rx,
        };
        let handle = EngineHandle {
            alerts: alert_tx,
            commands: command_tx,
        };
        (engine, handle)
    }

    /// Sender the quote provider delivers ticks into.
    pub fn quote_sender(&self) -> UnboundedSender<QuoteTick> {
        self.quote_tx.clone()
    }

    /// Sender the broker client pushes order updates into.
    pub fn order_update_sender(&self) -> UnboundedSender<OrderUpdate> {
        self.update_tx.clone()
    }

    // -------------------------------------------------------------------------
    // Startup
    // -------------------------------------------------------------------------

    /// Instantiate a runtime for every enabled strategy (priority order) and
    /// let each recover its durable state.
    pub async fn recover(&mut self) {
        let specs = match self.strategy_store.load_enabled() {
            Ok(specs) => specs,
            Err(e) => {
                error!(error = %e, "failed to load strategies");
                return;
            }
        };
        info!(count = specs.len(), "loading enabled strategies");

        for spec in specs {
            let mut runtime = StrategyRuntime::new(
                spec.id.clone(),
                spec.name.clone(),
                spec.config,
                self.broker.clone(),
                self.quotes.clone(),
                self.db.clone(),
                self.paper,
            );
            runtime.recover().await;
            self.strategies.push(runtime);
        }
    }

    // -------------------------------------------------------------------------
    // Main loop
    // -------------------------------------------------------------------------

    pub async fn run(mut self) {
        info!(
            strategies = self.strategies.len(),
            paper = self.paper,
            "trading engine running"
        );

        let mut reconcile = tokio::time::interval(self.reconcile_interval);
        reconcile.tick().await; // skip the immediate first tick

        loop {
            tokio::select! {
                Some(event) = self.alert_rx.recv() => {
                    self.handle_alert(event).await;
                }
                Some(tick) = self.quote_rx.recv() => {
                    self.handle_quote(tick).await;
                }
                Some(update) = self.update_rx.recv() => {
                    self.handle_order_update(update).await;
                }
                Some(command) = self.command_rx.recv() => {
                    if self.handle_command(command).await {
                        break;
                    }
                }
                _ = reconcile.tick() => {
                    self.reconcile_once().await;
                }
                else => break,
            }
        }

        info!("trading engine stopped");
    }

    // -------------------------------------------------------------------------
    // Routing
    // -------------------------------------------------------------------------

    /// Fan an alert out to every strategy in priority order. Every strategy
    /// sees every alert; acceptance is independent per strategy.
    pub async fn handle_alert(&mut self, event: AlertEvent) {
        let Some(announcement) = event.announcement else {
            debug!(trace_id = %event.trace_id, "alert without parseable announcement");
            return;
        };
        info!(
            ticker = %announcement.ticker,
            price_threshold = announcement.price_threshold,
            trace_id = %event.trace_id,
            "routing alert"
        );

        let mut accepted = 0usize;
        for strategy in self.strategies.iter_mut() {
            if strategy
                .on_alert(&announcement, Some(&event.trace_id), event.received_at)
                .await
            {
                accepted += 1;
            }
        }
        info!(ticker = %announcement.ticker, accepted, "alert routed");
    }

    /// Deliver a tick to every strategy holding interest in the ticker.
    pub async fn handle_quote(&mut self, tick: QuoteTick) {
        for strategy in self.strategies.iter_mut() {
            strategy
                .on_quote(&tick.ticker, tick.price, tick.volume, tick.at)
                .await;
        }
    }

    /// Route an order update to the strategy that owns the order.
    pub async fn handle_order_update(&mut self, update: OrderUpdate) {
        let Some(strategy) = self
            .strategies
            .iter_mut()
            .find(|s| s.owns_order(&update.order_id))
        else {
            debug!(order_id = %update.order_id, "order update for untracked order");
            return;
        };

        match (update.kind, update.side) {
            (OrderUpdateKind::Fill, Side::Buy) => {
                strategy
                    .on_buy_fill(
                        &update.order_id,
                        update.filled_shares,
                        update.fill_price,
                        update.at,
                        &update.raw,
                    )
                    .await;
            }
            (OrderUpdateKind::Fill, Side::Sell) => {
                strategy
                    .on_sell_fill(
                        &update.order_id,
                        update.filled_shares,
                        update.fill_price,
                        update.at,
                        &update.raw,
                    )
                    .await;
            }
            (OrderUpdateKind::PartialFill, _) => {
                // The order stays pending until its terminal fill.
                debug!(
                    order_id = %update.order_id,
                    filled = update.filled_shares,
                    "partial fill"
                );
            }
            (OrderUpdateKind::Canceled, _) => {
                strategy
                    .on_order_canceled(&update.order_id, update.at, &update.raw)
                    .await;
            }
            (OrderUpdateKind::Rejected, _) => {
                strategy
                    .on_order_rejected(
                        &update.order_id,
                        update.reason.as_deref(),
                        update.at,
                        &update.raw,
                    )
                    .await;
            }
        }
    }

    // -------------------------------------------------------------------------
    // Reconciliation
    // -------------------------------------------------------------------------

    /// Fetch one broker snapshot and hand it to every strategy. Tracked
    /// trades the broker does not confirm are removed as ghosts.
    pub async fn reconcile_once(&mut self) {
        let positions = match self.broker.get_positions().await {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "reconciliation skipped: position fetch failed");
                return;
            }
        };
        let snapshot: HashMap<String, BrokerPosition> = positions
            .into_iter()
            .map(|p| (p.ticker.clone(), p))
            .collect();

        match self.broker.get_open_orders().await {
            Ok(orders) if !orders.is_empty() => {
                debug!(count = orders.len(), "broker open orders at reconcile");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "open-order fetch failed during reconcile"),
        }

        let now = Utc::now().naive_utc();
        for strategy in self.strategies.iter_mut() {
            strategy.reconcile(&snapshot, now).await;
        }
    }

    // -------------------------------------------------------------------------
    // Admin commands
    // -------------------------------------------------------------------------

    /// Returns `true` when the engine should stop.
    async fn handle_command(&mut self, command: EngineCommand) -> bool {
        match command {
            EngineCommand::Status(reply) => {
                let _ = reply.send(self.status());
            }
            EngineCommand::EnableStrategy { id, reply } => {
                let _ = reply.send(self.enable_strategy(&id).await);
            }
            EngineCommand::DisableStrategy { id, reply } => {
                let _ = reply.send(self.disable_strategy(&id).await);
            }
            EngineCommand::MovePriority { id, up, reply } => {
                let moved = self.strategy_store.move_priority(&id, up).unwrap_or(false);
                if moved {
                    self.resort_strategies();
                }
                let _ = reply.send(moved);
            }
            EngineCommand::ExitAllPositions { reply } => {
                let now = Utc::now().naive_utc();
                let mut count = 0usize;
                for strategy in self.strategies.iter_mut() {
                    let before = strategy.status().active_trades.len();
                    strategy.exit_all(now).await;
                    count += before;
                }
                info!(count, "exit-all submitted");
                let _ = reply.send(count);
            }
            EngineCommand::Shutdown { reply } => {
                let _ = reply.send(());
                return true;
            }
        }
        false
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            running: true,
            paper: self.paper,
            subscriptions: self.quotes.subscribed(),
            strategies: self.strategies.iter().map(|s| s.status()).collect(),
        }
    }

    async fn enable_strategy(&mut self, id: &str) -> bool {
        if self.strategies.iter().any(|s| s.id == id) {
            return true;
        }
        let Ok(Some(spec)) = self.strategy_store.get(id) else {
            warn!(strategy_id = id, "cannot enable: unknown strategy");
            return false;
        };
        if let Err(e) = self.strategy_store.set_enabled(id, true) {
            error!(strategy_id = id, error = %e, "failed to persist enable");
            return false;
        }

        let mut runtime = StrategyRuntime::new(
            spec.id,
            spec.name.clone(),
            spec.config,
            self.broker.clone(),
            self.quotes.clone(),
            self.db.clone(),
            self.paper,
        );
        runtime.recover().await;
        self.strategies.push(runtime);
        self.resort_strategies();
        info!(strategy = %spec.name, "strategy enabled");
        true
    }

    async fn disable_strategy(&mut self, id: &str) -> bool {
        let Some(idx) = self.strategies.iter().position(|s| s.id == id) else {
            return false;
        };
        let now = Utc::now().naive_utc();
        let mut runtime = self.strategies.remove(idx);
        runtime.disable(now).await;
        if let Err(e) = self.strategy_store.set_enabled(id, false) {
            error!(strategy_id = id, error = %e, "failed to persist disable");
        }
        true
    }

    /// Re-order runtimes to match the store's priority order.
    fn resort_strategies(&mut self) {
        let order: HashMap<String, i64> = match self.strategy_store.all() {
            Ok(specs) => specs.into_iter().map(|s| (s.id, s.priority)).collect(),
            Err(e) => {
                error!(error = %e, "failed to reload strategy priorities");
                return;
            }
        };
        self.strategies
            .sort_by_key(|s| order.get(&s.id).copied().unwrap_or(i64::MAX));
    }
}

impl std::fmt::Debug for TradingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TradingEngine")
            .field("strategies", &self.strategies.len())
            .field("paper", &self.paper)
            .finish()
    }
}
