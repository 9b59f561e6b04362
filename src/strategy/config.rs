// =============================================================================
// Strategy configuration — filters, entry/exit rules, position sizing
// =============================================================================
//
// User-editable per-strategy settings, persisted as JSON in the strategies
// table. Every field carries a serde default so older stored configs keep
// loading as fields are added.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::models::Announcement;
use crate::types::MarketSession;

fn default_channels() -> Vec<String> {
    vec!["select-news".to_string()]
}

fn default_directions() -> Vec<String> {
    vec!["up_right".to_string()]
}

fn default_sessions() -> Vec<MarketSession> {
    vec![MarketSession::Premarket, MarketSession::Market]
}

fn default_price_min() -> f64 {
    1.0
}

fn default_price_max() -> f64 {
    10.0
}

fn default_consec_green_candles() -> u32 {
    1
}

fn default_min_candle_volume() -> u64 {
    5000
}

fn default_entry_window_minutes() -> i64 {
    5
}

fn default_take_profit_pct() -> f64 {
    10.0
}

fn default_stop_loss_pct() -> f64 {
    11.0
}

fn default_true() -> bool {
    true
}

fn default_trailing_stop_pct() -> f64 {
    7.0
}

fn default_timeout_minutes() -> i64 {
    15
}

fn default_stake_amount() -> f64 {
    50.0
}

fn default_volume_pct() -> f64 {
    1.0
}

fn default_max_stake() -> f64 {
    10_000.0
}

/// How position size is computed at entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StakeMode {
    #[default]
    Fixed,
    VolumePct,
}

/// Configuration for one trading strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    // --- Filters (which alerts to trade) -------------------------------------
    /// Accepted source channels; empty accepts any.
    #[serde(default = "default_channels")]
    pub channels: Vec<String>,

    /// Accepted direction tags; empty accepts any.
    #[serde(default = "default_directions")]
    pub directions: Vec<String>,

    /// Accepted market sessions; empty accepts any.
    #[serde(default = "default_sessions")]
    pub sessions: Vec<MarketSession>,

    #[serde(default = "default_price_min")]
    pub price_min: f64,

    #[serde(default = "default_price_max")]
    pub price_max: f64,

    /// Country codes to reject, e.g. ["CN", "IL"].
    #[serde(default)]
    pub country_blacklist: Vec<String>,

    /// Reject when the scanner already mentioned the ticker this many times.
    #[serde(default)]
    pub max_intraday_mentions: Option<u32>,

    /// Reject offerings, reverse splits and similar financing headlines.
    #[serde(default)]
    pub exclude_financing_headlines: bool,

    // --- Entry rules ---------------------------------------------------------
    /// Consecutive green qualifying candles required before entry. Zero means
    /// enter on the first quote.
    #[serde(default = "default_consec_green_candles")]
    pub consec_green_candles: u32,

    /// Minimum per-candle volume for a candle to qualify.
    #[serde(default = "default_min_candle_volume")]
    pub min_candle_volume: u64,

    /// How long after the alert entry conditions may still trigger.
    #[serde(default = "default_entry_window_minutes")]
    pub entry_window_minutes: i64,

    // --- Exit rules ----------------------------------------------------------
    #[serde(default = "default_take_profit_pct")]
    pub take_profit_pct: f64,

    #[serde(default = "default_stop_loss_pct")]
    pub stop_loss_pct: f64,

    /// Compute the stop from the first observed post-alert price rather than
    /// the entry price.
    #[serde(default = "default_true")]
    pub stop_loss_from_open: bool,

    /// Trailing stop distance from the post-entry high; zero disables.
    #[serde(default = "default_trailing_stop_pct")]
    pub trailing_stop_pct: f64,

    /// Hold timeout before a forced exit.
    #[serde(default = "default_timeout_minutes")]
    pub timeout_minutes: i64,

    // --- Position sizing -----------------------------------------------------
    #[serde(default)]
    pub stake_mode: StakeMode,

    /// Dollar amount for fixed-stake mode.
    #[serde(default = "default_stake_amount")]
    pub stake_amount: f64,

    /// Percentage of the reference candle volume to buy.
    #[serde(default = "default_volume_pct")]
    pub volume_pct: f64,

    /// Dollar cap for volume-based sizing.
    #[serde(default = "default_max_stake")]
    pub max_stake: f64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("defaults deserialise")
    }
}

impl StrategyConfig {
    /// Number of shares to buy at `price`.
    ///
    /// Volume mode buys `volume_pct` percent of `reference_volume`, capped by
    /// `max_stake`; a non-positive result means the entry is abandoned.
    /// Fixed mode always buys at least one share.
    pub fn shares(&self, price: f64, reference_volume: Option<u64>) -> u32 {
        if price <= 0.0 {
            return 0;
        }

        match (self.stake_mode, reference_volume) {
            (StakeMode::VolumePct, Some(vol)) => {
                let shares_from_volume = (vol as f64 * self.volume_pct / 100.0).floor();
                let max_shares = (self.max_stake / price).floor();
                let shares = shares_from_volume.min(max_shares);
                if shares <= 0.0 {
                    0
                } else {
                    shares as u32
                }
            }
            _ => ((self.stake_amount / price).floor() as u32).max(1),
        }
    }

    /// Evaluate all alert filters in order. `Err` carries the rejection
    /// reason recorded on the trace.
    pub fn passes_filters(&self, ann: &Announcement) -> Result<(), String> {
        if !self.channels.is_empty() {
            let channel = ann.channel.as_deref().unwrap_or("");
            if !self.channels.iter().any(|c| c == channel) {
                return Err(format!("channel '{channel}' not in {:?}", self.channels));
            }
        }

        if !self.directions.is_empty() {
            let direction = ann.direction.as_deref().unwrap_or("");
            if !self.directions.iter().any(|d| d == direction) {
                return Err(format!(
                    "direction '{direction}' not in {:?}",
                    self.directions
                ));
            }
        }

        if !self.sessions.is_empty() {
            let session = ann.market_session();
            if !self.sessions.contains(&session) {
                return Err(format!("session '{session}' not traded"));
            }
        }

        // Price filter uses the alert's threshold as a proxy; the real price
        // check happens again at entry time.
        if ann.price_threshold > 0.0
            && (ann.price_threshold <= self.price_min || ann.price_threshold > self.price_max)
        {
            return Err(format!(
                "price ${:.2} outside ${:.2}-${:.2}",
                ann.price_threshold, self.price_min, self.price_max
            ));
        }

        if self.country_blacklist.iter().any(|c| *c == ann.country) {
            return Err(format!("country '{}' blacklisted", ann.country));
        }

        if let (Some(cap), Some(mentions)) = (self.max_intraday_mentions, ann.mention_count) {
            if mentions >= cap {
                return Err(format!("{mentions} mentions >= cap {cap}"));
            }
        }

        if self.exclude_financing_headlines && ann.headline_is_financing {
            let kind = ann.headline_financing_type.as_deref().unwrap_or("financing");
            return Err(format!("financing headline ({kind})"));
        }

        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime};

    fn market_hours_ts() -> NaiveDateTime {
        // 15:00 UTC in December = 10:00 ET, regular session.
        NaiveDate::from_ymd_opt(2025, 12, 18)
            .unwrap()
            .and_hms_opt(15, 0, 0)
            .unwrap()
    }

    fn announcement() -> Announcement {
        Announcement {
            ticker: "BNKK".to_string(),
            timestamp: market_hours_ts(),
            price_threshold: 5.0,
            headline: "Provides Guidance".to_string(),
            country: "US".to_string(),
            channel: Some("select-news".to_string()),
            author: None,
            direction: Some("up_right".to_string()),
            float_shares: None,
            io_percent: None,
            market_cap: None,
            short_interest: None,
            reg_sho: false,
            high_ctb: false,
            mention_count: None,
            headline_is_financing: false,
            headline_financing_type: None,
            source_message: None,
        }
    }

    #[test]
    fn default_config_accepts_default_announcement() {
        let cfg = StrategyConfig::default();
        assert!(cfg.passes_filters(&announcement()).is_ok());
    }

    #[test]
    fn filter_rejections_carry_reasons() {
        let cfg = StrategyConfig::default();

        let mut ann = announcement();
        ann.channel = Some("other".to_string());
        assert!(cfg.passes_filters(&ann).unwrap_err().contains("channel"));

        let mut ann = announcement();
        ann.direction = Some("up".to_string());
        assert!(cfg.passes_filters(&ann).unwrap_err().contains("direction"));

        let mut ann = announcement();
        // 02:00 UTC = 21:00 ET previous day, closed.
        ann.timestamp = NaiveDate::from_ymd_opt(2025, 12, 18)
            .unwrap()
            .and_hms_opt(2, 0, 0)
            .unwrap();
        assert!(cfg.passes_filters(&ann).unwrap_err().contains("session"));

        let mut ann = announcement();
        ann.price_threshold = 0.50;
        assert!(cfg.passes_filters(&ann).unwrap_err().contains("price"));

        let mut cfg2 = StrategyConfig::default();
        cfg2.country_blacklist = vec!["CN".to_string()];
        let mut ann = announcement();
        ann.country = "CN".to_string();
        assert!(cfg2.passes_filters(&ann).unwrap_err().contains("blacklisted"));

        let mut cfg3 = StrategyConfig::default();
        cfg3.max_intraday_mentions = Some(2);
        let mut ann = announcement();
        ann.mention_count = Some(2);
        assert!(cfg3.passes_filters(&ann).unwrap_err().contains("mentions"));

        let mut cfg4 = StrategyConfig::default();
        cfg4.exclude_financing_headlines = true;
        let mut ann = announcement();
        ann.headline_is_financing = true;
        ann.headline_financing_type = Some("offering".to_string());
        assert!(cfg4.passes_filters(&ann).unwrap_err().contains("offering"));
    }

    #[test]
    fn price_boundaries_proxy_filter() {
        let cfg = StrategyConfig::default(); // 1.0 - 10.0

        let mut ann = announcement();
        ann.price_threshold = 1.0; // <= min rejects
        assert!(cfg.passes_filters(&ann).is_err());

        ann.price_threshold = 10.0; // == max accepted
        assert!(cfg.passes_filters(&ann).is_ok());

        ann.price_threshold = 10.01; // > max rejects
        assert!(cfg.passes_filters(&ann).is_err());
    }

    #[test]
    fn fixed_sizing_buys_at_least_one_share() {
        let mut cfg = StrategyConfig::default();
        cfg.stake_mode = StakeMode::Fixed;
        cfg.stake_amount = 50.0;

        assert_eq!(cfg.shares(5.0, None), 10);
        // Price above the stake still buys one share.
        assert_eq!(cfg.shares(80.0, None), 1);
        assert_eq!(cfg.shares(0.0, None), 0);
    }

    #[test]
    fn volume_sizing_with_cap() {
        let mut cfg = StrategyConfig::default();
        cfg.stake_mode = StakeMode::VolumePct;
        cfg.volume_pct = 2.0;
        cfg.max_stake = 10_000.0;

        // 2% of 1100 = 22 shares; cap allows floor(10000/5.15) = 1941.
        assert_eq!(cfg.shares(5.15, Some(1100)), 22);

        // Extrapolated first-minute volume: 2% of 4000 = 80 shares.
        assert_eq!(cfg.shares(10.10, Some(4000)), 80);

        // Cap binds when the candle volume is huge.
        assert_eq!(cfg.shares(100.0, Some(1_000_000)), 100);

        // Thin volume produces zero shares — entry abandoned.
        assert_eq!(cfg.shares(5.0, Some(10)), 0);
    }

    #[test]
    fn config_round_trips_through_json() {
        let cfg = StrategyConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: StrategyConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.channels, cfg.channels);
        assert_eq!(back.consec_green_candles, cfg.consec_green_candles);
        assert_eq!(back.stake_mode, cfg.stake_mode);
        assert_eq!(back.sessions, cfg.sessions);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: StrategyConfig =
            serde_json::from_str(r#"{"take_profit_pct": 12.5, "consec_green_candles": 2}"#)
                .unwrap();
        assert_eq!(cfg.take_profit_pct, 12.5);
        assert_eq!(cfg.consec_green_candles, 2);
        assert_eq!(cfg.min_candle_volume, 5000);
        assert_eq!(cfg.stake_mode, StakeMode::Fixed);
    }
}
