// =============================================================================
// Core domain model — announcements and market sessions
// =============================================================================

use chrono::{NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::America::New_York;
use serde::{Deserialize, Serialize};

use crate::types::MarketSession;

/// Premarket opens 04:00 ET.
const PREMARKET_START: (u32, u32) = (4, 0);
/// Regular session opens 09:30 ET.
const MARKET_OPEN: (u32, u32) = (9, 30);
/// Regular session closes 16:00 ET.
const MARKET_CLOSE: (u32, u32) = (16, 0);
/// Extended hours end 20:00 ET.
const POSTMARKET_END: (u32, u32) = (20, 0);

/// Determine the market session for a naive-UTC timestamp.
///
/// Database timestamps are stored naive in UTC; the session boundaries are
/// defined in Eastern time, so the conversion goes through America/New_York
/// (DST-aware).
pub fn market_session(timestamp: NaiveDateTime) -> MarketSession {
    let utc = Utc.from_utc_datetime(&timestamp);
    let et = utc.with_timezone(&New_York).time();

    let t = |(h, m): (u32, u32)| NaiveTime::from_hms_opt(h, m, 0).unwrap();

    if et >= t(PREMARKET_START) && et < t(MARKET_OPEN) {
        MarketSession::Premarket
    } else if et >= t(MARKET_OPEN) && et < t(MARKET_CLOSE) {
        MarketSession::Market
    } else if et >= t(MARKET_CLOSE) && et < t(POSTMARKET_END) {
        MarketSession::Postmarket
    } else {
        MarketSession::Closed
    }
}

/// A parsed press-release announcement, content-addressed by
/// `(ticker, timestamp)`. Created by the alert service, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Announcement {
    /// Uppercase ticker symbol, 2-5 letters.
    pub ticker: String,
    /// Announcement time, naive UTC.
    pub timestamp: NaiveDateTime,
    /// Price threshold from the alert line, e.g. 0.50 from "< $.50c".
    pub price_threshold: f64,
    pub headline: String,
    /// ISO country code from the flag emoji, or "UNKNOWN".
    pub country: String,

    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    /// Arrow direction tag: "up" for ↑, "up_right" for ↗.
    #[serde(default)]
    pub direction: Option<String>,

    // Fundamentals scraped from the alert line.
    #[serde(default)]
    pub float_shares: Option<f64>,
    #[serde(default)]
    pub io_percent: Option<f64>,
    #[serde(default)]
    pub market_cap: Option<f64>,
    #[serde(default)]
    pub short_interest: Option<f64>,
    #[serde(default)]
    pub reg_sho: bool,
    #[serde(default)]
    pub high_ctb: bool,
    /// Number of times the scanner has already mentioned the ticker today.
    #[serde(default)]
    pub mention_count: Option<u32>,

    // Headline financing flags, set by the offline enrichment pass over
    // stored announcements. Always unset on a freshly scraped alert.
    #[serde(default)]
    pub headline_is_financing: bool,
    #[serde(default)]
    pub headline_financing_type: Option<String>,

    /// Clean text of the source chat message.
    #[serde(default)]
    pub source_message: Option<String>,
}

impl Announcement {
    /// Market session the announcement landed in.
    pub fn market_session(&self) -> MarketSession {
        market_session(self.timestamp)
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, 0)
            .unwrap()
    }

    #[test]
    fn session_boundaries_in_summer() {
        // July: ET = UTC-4. 08:00 UTC = 04:00 ET (premarket open).
        assert_eq!(market_session(ts(2025, 7, 10, 8, 0)), MarketSession::Premarket);
        assert_eq!(market_session(ts(2025, 7, 10, 13, 29)), MarketSession::Premarket);
        // 13:30 UTC = 09:30 ET.
        assert_eq!(market_session(ts(2025, 7, 10, 13, 30)), MarketSession::Market);
        assert_eq!(market_session(ts(2025, 7, 10, 19, 59)), MarketSession::Market);
        // 20:00 UTC = 16:00 ET.
        assert_eq!(market_session(ts(2025, 7, 10, 20, 0)), MarketSession::Postmarket);
        assert_eq!(market_session(ts(2025, 7, 10, 23, 59)), MarketSession::Postmarket);
        // 00:00 UTC = 20:00 ET.
        assert_eq!(market_session(ts(2025, 7, 11, 0, 0)), MarketSession::Closed);
        assert_eq!(market_session(ts(2025, 7, 10, 7, 59)), MarketSession::Closed);
    }

    #[test]
    fn session_boundaries_in_winter() {
        // January: ET = UTC-5. 14:30 UTC = 09:30 ET.
        assert_eq!(market_session(ts(2025, 1, 15, 14, 29)), MarketSession::Premarket);
        assert_eq!(market_session(ts(2025, 1, 15, 14, 30)), MarketSession::Market);
        assert_eq!(market_session(ts(2025, 1, 15, 21, 0)), MarketSession::Postmarket);
    }
}
