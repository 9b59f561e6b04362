// =============================================================================
// pressbot — news-alert momentum trading engine for US equities
// =============================================================================
//
// Alerts scraped from chat rooms arrive over HTTP; enabled strategies filter
// them, watch a second-resolution quote feed, build one-minute candles,
// enter long positions through the broker, and manage exits. State is
// durable in SQLite and reconciled against the broker on an interval.
// =============================================================================

pub mod alert_service;
pub mod broker;
pub mod candles;
pub mod config;
pub mod db;
pub mod engine;
pub mod models;
pub mod parser;
pub mod quote_provider;
pub mod strategy;
pub mod types;
