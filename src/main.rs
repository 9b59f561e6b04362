// =============================================================================
// pressbot — engine entry point
// =============================================================================
//
// Wires the database, broker client, quote provider, trading engine and
// alert service together, then waits for Ctrl+C. The engine defaults to the
// paper account; set PRESSBOT_LIVE=1 to trade real funds.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use pressbot::alert_service::{self, AlertService};
use pressbot::broker::alpaca::AlpacaBroker;
use pressbot::config::EngineSettings;
use pressbot::db::Database;
use pressbot::engine::TradingEngine;
use pressbot::quote_provider::QuoteProvider;

const SETTINGS_PATH: &str = "engine_settings.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── 1. Settings ──────────────────────────────────────────────────────
    let mut settings = EngineSettings::load(SETTINGS_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load settings, using defaults");
        EngineSettings::default()
    });

    // Live trading requires an explicit opt-in every start.
    if std::env::var("PRESSBOT_LIVE").as_deref() == Ok("1") {
        settings.paper = false;
    } else {
        settings.paper = true;
    }
    if let Ok(port) = std::env::var("PRESSBOT_ALERT_PORT") {
        if let Ok(port) = port.parse() {
            settings.alert_port = port;
        }
    }

    info!(
        paper = settings.paper,
        alert_port = settings.alert_port,
        max_subscriptions = settings.max_subscriptions,
        db = %settings.db_path,
        "pressbot starting"
    );

    // ── 2. Database ──────────────────────────────────────────────────────
    let db = Database::open(&settings.db_path).context("failed to open database")?;

    // ── 3. Broker client ─────────────────────────────────────────────────
    let broker = Arc::new(AlpacaBroker::from_env(settings.paper)?);

    // ── 4. Quote provider ────────────────────────────────────────────────
    let quotes = QuoteProvider::new(settings.max_subscriptions, settings.quote_exchange.clone());

    // ── 5. Engine ────────────────────────────────────────────────────────
    let (mut engine, handle) = TradingEngine::new(
        broker.clone(),
        quotes.clone(),
        db.clone(),
        settings.paper,
        Duration::from_secs(settings.reconcile_secs),
    );
    engine.recover().await;

    // Broker fill notifications flow into the engine.
    broker.spawn_order_poller(
        Duration::from_secs(settings.order_poll_secs),
        engine.order_update_sender(),
    );

    // Quote ticks flow into the engine.
    tokio::spawn(quotes.clone().run(engine.quote_sender()));

    let engine_task = tokio::spawn(engine.run());

    // ── 6. Alert service ─────────────────────────────────────────────────
    let service = AlertService::new(handle.clone(), db.clone());
    let app = alert_service::router(service);
    let bind_addr = format!("0.0.0.0:{}", settings.alert_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind alert service on {bind_addr}"))?;
    info!(addr = %bind_addr, "alert service listening");

    let server_task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "alert service failed");
        }
    });

    info!("all subsystems running — press Ctrl+C to stop");

    // ── 7. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received — stopping");

    handle.shutdown().await;
    server_task.abort();
    let _ = engine_task.await;

    if let Err(e) = settings.save(SETTINGS_PATH) {
        error!(error = %e, "failed to save settings on shutdown");
    }

    info!("pressbot shut down complete");
    Ok(())
}
