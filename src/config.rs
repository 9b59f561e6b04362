// =============================================================================
// Engine settings — JSON-backed configuration with atomic save
// =============================================================================
//
// Operational knobs for the engine process. Strategy definitions live in the
// database (see db::strategies); this file only carries process-level
// settings. Persistence uses an atomic tmp + rename pattern to prevent
// corruption on crash. All fields carry serde defaults so that adding new
// fields never breaks loading an older settings file.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

fn default_alert_port() -> u16 {
    8765
}

fn default_max_subscriptions() -> usize {
    5
}

fn default_db_path() -> String {
    "pressbot.db".to_string()
}

fn default_reconcile_secs() -> u64 {
    30
}

fn default_order_poll_secs() -> u64 {
    2
}

fn default_quote_exchange() -> String {
    "NASDAQ".to_string()
}

fn default_true() -> bool {
    true
}

/// Process-level engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// TCP port the alert service listens on.
    #[serde(default = "default_alert_port")]
    pub alert_port: u16,

    /// Hard cap on concurrent quote-feed subscriptions (vendor limit).
    #[serde(default = "default_max_subscriptions")]
    pub max_subscriptions: usize,

    /// SQLite database path. One database per environment.
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Paper account (true) or real funds (false).
    #[serde(default = "default_true")]
    pub paper: bool,

    /// Seconds between broker reconciliation passes.
    #[serde(default = "default_reconcile_secs")]
    pub reconcile_secs: u64,

    /// Seconds between broker order-status polls.
    #[serde(default = "default_order_poll_secs")]
    pub order_poll_secs: u64,

    /// Exchange prefix used when building quote-feed subscription codes,
    /// e.g. "NASDAQ" -> "NASDAQ:AAPL".
    #[serde(default = "default_quote_exchange")]
    pub quote_exchange: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            alert_port: default_alert_port(),
            max_subscriptions: default_max_subscriptions(),
            db_path: default_db_path(),
            paper: true,
            reconcile_secs: default_reconcile_secs(),
            order_poll_secs: default_order_poll_secs(),
            quote_exchange: default_quote_exchange(),
        }
    }
}

impl EngineSettings {
    /// Load settings from a JSON file at `path`.
    ///
    /// Returns an error if the file does not exist so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read settings from {}", path.display()))?;

        let settings: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse settings from {}", path.display()))?;

        info!(
            path = %path.display(),
            alert_port = settings.alert_port,
            max_subscriptions = settings.max_subscriptions,
            paper = settings.paper,
            "engine settings loaded"
        );

        Ok(settings)
    }

    /// Persist the settings to `path` using an atomic write (write to
    /// `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content =
            serde_json::to_string_pretty(self).context("failed to serialise settings to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp settings to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp settings to {}", path.display()))?;

        info!(path = %path.display(), "engine settings saved (atomic)");
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_have_expected_values() {
        let s = EngineSettings::default();
        assert_eq!(s.alert_port, 8765);
        assert_eq!(s.max_subscriptions, 5);
        assert!(s.paper);
        assert_eq!(s.reconcile_secs, 30);
        assert_eq!(s.quote_exchange, "NASDAQ");
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let s: EngineSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(s.alert_port, 8765);
        assert_eq!(s.db_path, "pressbot.db");
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let s: EngineSettings =
            serde_json::from_str(r#"{ "alert_port": 9000, "max_subscriptions": 12 }"#).unwrap();
        assert_eq!(s.alert_port, 9000);
        assert_eq!(s.max_subscriptions, 12);
        assert_eq!(s.reconcile_secs, 30);
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let mut s = EngineSettings::default();
        s.alert_port = 8777;
        s.paper = false;
        s.save(&path).unwrap();

        let loaded = EngineSettings::load(&path).unwrap();
        assert_eq!(loaded.alert_port, 8777);
        assert!(!loaded.paper);
    }
}
