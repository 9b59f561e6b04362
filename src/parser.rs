// =============================================================================
// Chat-message grammar parser
// =============================================================================
//
// A parseable alert line looks like:
//
//   BNKK  < $.50c  - Bonk, Inc. Provides 2026 Guidance - Link  ~  :flag_us:
//        |  Float: 139 M  |  IO: 6.04%  |  MC: 26.8 M  |  SI: 23.9%
//
// Unrecognized lines are dropped, not errors. Variants with a leading ↑ / ↗
// arrow carry a direction tag.
// =============================================================================

use chrono::NaiveDateTime;
use lazy_static::lazy_static;
use regex::Regex;

use crate::models::Announcement;

lazy_static! {
    static ref RE_TICKER: Regex = Regex::new(r"^([A-Z]+)").unwrap();
    static ref RE_PRICE: Regex = Regex::new(r"<\s*(\$[\d.]+c?)").unwrap();
    static ref RE_HEADLINE: Regex = Regex::new(r"-\s*(.+?)\s*-\s*Link").unwrap();
    static ref RE_FLAG: Regex = Regex::new(r":flag_(\w+):").unwrap();
    static ref RE_FLOAT: Regex = Regex::new(r"Float:\s*([\d.]+\s*[kKmMbB]?)").unwrap();
    static ref RE_IO: Regex = Regex::new(r"IO:\s*([\d.]+)%").unwrap();
    static ref RE_MC: Regex = Regex::new(r"MC:\s*([\d.]+\s*[kKmMbB]?)").unwrap();
    static ref RE_SI: Regex = Regex::new(r"SI:\s*([\d.]+)%").unwrap();
    static ref RE_MENTIONS: Regex = Regex::new(r"•\s*(\d+)").unwrap();
    static ref RE_SUFFIXED: Regex = Regex::new(r"([\d.]+)\s*([kKmMbB])?").unwrap();
}

/// Parse a value like "139 M", "490 k", "7.7 B" into a float.
pub fn parse_value_with_suffix(value_str: &str) -> Option<f64> {
    let caps = RE_SUFFIXED.captures(value_str.trim())?;
    let number: f64 = caps.get(1)?.as_str().parse().ok()?;
    let multiplier = match caps.get(2).map(|m| m.as_str().to_ascii_uppercase()) {
        Some(s) if s == "K" => 1_000.0,
        Some(s) if s == "M" => 1_000_000.0,
        Some(s) if s == "B" => 1_000_000_000.0,
        _ => 1.0,
    };
    Some(number * multiplier)
}

/// Parse a price like "$.50c", "$4", "$0.50" into a float.
pub fn parse_price(price_str: &str) -> Option<f64> {
    let cleaned: String = price_str
        .trim()
        .chars()
        .filter(|c| *c != '$' && *c != 'c')
        .collect();
    cleaned.trim().parse().ok()
}

/// Extract a country code from a flag emoji like ":flag_us:" -> "US".
pub fn parse_country_from_flag(text: &str) -> String {
    RE_FLAG
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_ascii_uppercase())
        .unwrap_or_else(|| "UNKNOWN".to_string())
}

/// Classify a headline as a financing event (offerings, dilution, reverse
/// splits, listing compliance). Returns the matched category, if any.
///
/// This runs in the offline enrichment pass over stored announcements, not
/// at alert time: live-scraped announcements carry unset financing flags
/// until enrichment has visited them.
pub fn classify_financing_headline(headline: &str) -> Option<&'static str> {
    let h = headline.to_ascii_lowercase();
    if h.contains("reverse split") || h.contains("reverse stock split") {
        return Some("reverse_split");
    }
    if h.contains("at-the-market") || h.contains("atm program") {
        return Some("atm");
    }
    if h.contains("warrant") {
        return Some("warrants");
    }
    if h.contains("convertible") {
        return Some("convertible");
    }
    if h.contains("shelf registration") || h.contains("s-3") {
        return Some("shelf");
    }
    if h.contains("offering") || h.contains("private placement") || h.contains("pipe financing") {
        return Some("offering");
    }
    if h.contains("compliance") || h.contains("listing requirement") || h.contains("deficiency") {
        return Some("compliance");
    }
    None
}

/// Detect the leading direction arrow and return (direction, rest-of-line).
fn split_direction(line: &str) -> (Option<&'static str>, &str) {
    let trimmed = line.trim_start();
    if let Some(rest) = trimmed.strip_prefix('↗') {
        (Some("up_right"), rest.trim_start())
    } else if let Some(rest) = trimmed.strip_prefix('↑') {
        (Some("up"), rest.trim_start())
    } else {
        (None, trimmed)
    }
}

/// Parse one announcement line into an [`Announcement`].
///
/// Returns `None` when the line does not match the grammar (no leading
/// ticker, or no price threshold — the price is required).
pub fn parse_message_line(line: &str, timestamp: NaiveDateTime) -> Option<Announcement> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let (direction, line) = split_direction(line);

    let ticker = RE_TICKER.captures(line)?.get(1)?.as_str().to_string();

    let price_threshold = RE_PRICE
        .captures(line)
        .and_then(|c| parse_price(c.get(1)?.as_str()))?;

    let headline = RE_HEADLINE
        .captures(line)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default();

    let country = parse_country_from_flag(line);

    let float_shares = RE_FLOAT
        .captures(line)
        .and_then(|c| parse_value_with_suffix(c.get(1)?.as_str()));
    let io_percent = RE_IO
        .captures(line)
        .and_then(|c| c.get(1)?.as_str().parse().ok());
    let market_cap = RE_MC
        .captures(line)
        .and_then(|c| parse_value_with_suffix(c.get(1)?.as_str()));
    let short_interest = RE_SI
        .captures(line)
        .and_then(|c| c.get(1)?.as_str().parse().ok());
    let mention_count = RE_MENTIONS
        .captures(line)
        .and_then(|c| c.get(1)?.as_str().parse().ok());

    Some(Announcement {
        ticker,
        timestamp,
        price_threshold,
        headline,
        country,
        channel: None,
        author: None,
        direction: direction.map(str::to_string),
        float_shares,
        io_percent,
        market_cap,
        short_interest,
        reg_sho: line.contains("Reg SHO"),
        high_ctb: line.contains("High CTB"),
        mention_count,
        // Filled by the offline enrichment pass, never at alert time.
        headline_is_financing: false,
        headline_financing_type: None,
        source_message: Some(line.to_string()),
    })
}

/// Parse an ISO-8601 timestamp like "2025-12-18T14:30:45.123Z" into a naive
/// UTC datetime. Returns `None` on failure so the caller can substitute
/// receive time.
pub fn parse_iso_utc(iso: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(iso) {
        return Some(dt.naive_utc());
    }
    // Fallback: bare datetime without an offset.
    NaiveDateTime::parse_from_str(iso, "%Y-%m-%dT%H:%M:%S%.f").ok()
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 12, 18)
            .unwrap()
            .and_hms_opt(14, 30, 45)
            .unwrap()
    }

    #[test]
    fn parses_full_line() {
        let line = "BNKK  < $.50c  - Bonk, Inc. Provides 2026 Guidance - Link  ~  :flag_us:  |  Float: 139 M  |  IO: 6.04%  |  MC: 26.8 M  |  SI: 23.9%  |  High CTB";
        let ann = parse_message_line(line, ts()).expect("should parse");
        assert_eq!(ann.ticker, "BNKK");
        assert!((ann.price_threshold - 0.50).abs() < 1e-9);
        assert_eq!(ann.headline, "Bonk, Inc. Provides 2026 Guidance");
        assert_eq!(ann.country, "US");
        assert_eq!(ann.float_shares, Some(139_000_000.0));
        assert_eq!(ann.io_percent, Some(6.04));
        assert_eq!(ann.market_cap, Some(26_800_000.0));
        assert_eq!(ann.short_interest, Some(23.9));
        assert!(ann.high_ctb);
        assert!(!ann.reg_sho);
        assert_eq!(ann.timestamp, ts());
    }

    #[test]
    fn live_parse_leaves_financing_flags_unset() {
        // Financing classification is an offline enrichment concern; a
        // freshly scraped alert always carries unset flags, even when the
        // headline would classify.
        let line = "ABCD < $3 - Announces Pricing of $10M Public Offering - Link ~ :flag_us:";
        let ann = parse_message_line(line, ts()).unwrap();
        assert!(!ann.headline_is_financing);
        assert_eq!(ann.headline_financing_type, None);
    }

    #[test]
    fn price_variants() {
        assert_eq!(parse_price("$.50c"), Some(0.50));
        assert_eq!(parse_price("$4"), Some(4.0));
        assert_eq!(parse_price("$0.50"), Some(0.50));
        assert_eq!(parse_price("$13"), Some(13.0));
        assert_eq!(parse_price("garbage"), None);
    }

    #[test]
    fn value_suffixes() {
        assert_eq!(parse_value_with_suffix("490 k"), Some(490_000.0));
        assert_eq!(parse_value_with_suffix("3.9 M"), Some(3_900_000.0));
        assert_eq!(parse_value_with_suffix("7.7 B"), Some(7_700_000_000.0));
        assert_eq!(parse_value_with_suffix("42"), Some(42.0));
    }

    #[test]
    fn missing_price_drops_line() {
        assert!(parse_message_line("AAPL - Some headline - Link", ts()).is_none());
        assert!(parse_message_line("", ts()).is_none());
        assert!(parse_message_line("lowercase ticker < $2 - x - Link", ts()).is_none());
    }

    #[test]
    fn direction_arrows() {
        let up = parse_message_line("↑ FGNX < $4 - FG Nexus Announces - Link ~ :flag_us:", ts())
            .unwrap();
        assert_eq!(up.direction.as_deref(), Some("up"));

        let up_right =
            parse_message_line("↗ FGNX < $4 - FG Nexus Announces - Link ~ :flag_us:", ts())
                .unwrap();
        assert_eq!(up_right.direction.as_deref(), Some("up_right"));

        let none = parse_message_line("FGNX < $4 - FG Nexus Announces - Link ~ :flag_us:", ts())
            .unwrap();
        assert_eq!(none.direction, None);
    }

    #[test]
    fn country_from_flag() {
        assert_eq!(parse_country_from_flag("~ :flag_cn: |"), "CN");
        assert_eq!(parse_country_from_flag("no flag here"), "UNKNOWN");
    }

    #[test]
    fn financing_classifier() {
        assert_eq!(
            classify_financing_headline("Announces Pricing of $10M Public Offering"),
            Some("offering")
        );
        assert_eq!(
            classify_financing_headline("Announces 1-for-10 Reverse Split"),
            Some("reverse_split")
        );
        assert_eq!(
            classify_financing_headline("Receives Nasdaq Listing Compliance Notice"),
            Some("compliance")
        );
        assert_eq!(classify_financing_headline("Wins Defense Contract"), None);
    }

    #[test]
    fn mention_count_marker() {
        let ann =
            parse_message_line("ABCD < $3 - Something Moved - Link ~ :flag_us: • 3", ts()).unwrap();
        assert_eq!(ann.mention_count, Some(3));
    }

    #[test]
    fn iso_timestamp_parsing() {
        let dt = parse_iso_utc("2025-12-18T14:30:45.123Z").unwrap();
        assert_eq!(dt.format("%Y-%m-%d %H:%M:%S%.3f").to_string(), "2025-12-18 14:30:45.123");
        // Offset timestamps normalize to UTC.
        let dt = parse_iso_utc("2025-12-18T09:30:45-05:00").unwrap();
        assert_eq!(dt.format("%H:%M").to_string(), "14:30");
        assert!(parse_iso_utc("not a timestamp").is_none());
    }

    #[test]
    fn round_trip_semantic_fields() {
        let line = "↗ FGNX  < $4  - FG Nexus Announces Expansion - Link  ~  :flag_us:  |  Float: 35.1 M  |  IO: 29.49%  |  MC: 116 M";
        let ann = parse_message_line(line, ts()).unwrap();
        let json = serde_json::to_string(&ann).unwrap();
        let back: Announcement = serde_json::from_str(&json).unwrap();
        assert_eq!(back.ticker, ann.ticker);
        assert_eq!(back.price_threshold, ann.price_threshold);
        assert_eq!(back.headline, ann.headline);
        assert_eq!(back.country, ann.country);
        assert_eq!(back.direction, ann.direction);
        assert_eq!(back.float_shares, ann.float_shares);
        assert_eq!(back.market_cap, ann.market_cap);
        assert_eq!(back.timestamp, ann.timestamp);
    }
}
