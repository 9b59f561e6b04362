// =============================================================================
// Minute-candle construction from second-resolution ticks
// =============================================================================
//
// Every subscribed ticker gets one candle series: a list of completed
// one-minute bars plus at most one bar still being built. All ticks count
// toward the building bar's volume -- the quote path must never coalesce
// ticks before they reach this module.
// =============================================================================

use chrono::{NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

/// One wall-clock minute's OHLCV summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandleBar {
    /// Start of the minute this bar covers (naive UTC, seconds zeroed).
    pub minute_start: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

impl CandleBar {
    /// A candle is green iff it closed above its open.
    pub fn is_green(&self) -> bool {
        self.close > self.open
    }

    /// Whether the candle meets the volume threshold. Exact equality counts.
    pub fn meets_volume(&self, min_volume: u64) -> bool {
        self.volume >= min_volume
    }

    /// Green AND meets the volume threshold.
    pub fn qualifies(&self, min_volume: u64) -> bool {
        self.is_green() && self.meets_volume(min_volume)
    }
}

/// Truncate a timestamp to the start of its minute.
pub fn minute_of(ts: NaiveDateTime) -> NaiveDateTime {
    ts.with_second(0).unwrap().with_nanosecond(0).unwrap()
}

/// Candle series for a single ticker: completed bars plus the bar being
/// built. Mutated only from the quote-delivery path.
#[derive(Debug, Clone, Default)]
pub struct CandleSeries {
    completed: Vec<CandleBar>,
    building: Option<CandleBar>,
}

impl CandleSeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one tick into the series.
    ///
    /// When the tick starts a new minute, the previous building bar is
    /// finalized (appended to the completed list) and returned; otherwise
    /// the building bar is updated in place and `None` is returned.
    pub fn apply_tick(
        &mut self,
        price: f64,
        volume: u64,
        quote_time: NaiveDateTime,
    ) -> Option<CandleBar> {
        let minute = minute_of(quote_time);

        match &mut self.building {
            Some(bar) if bar.minute_start == minute => {
                bar.high = bar.high.max(price);
                bar.low = bar.low.min(price);
                bar.close = price;
                bar.volume += volume;
                None
            }
            _ => {
                let finalized = self.building.take();
                if let Some(ref bar) = finalized {
                    self.completed.push(bar.clone());
                }
                self.building = Some(CandleBar {
                    minute_start: minute,
                    open: price,
                    high: price,
                    low: price,
                    close: price,
                    volume,
                });
                finalized
            }
        }
    }

    /// Completed bars, oldest first.
    pub fn completed(&self) -> &[CandleBar] {
        &self.completed
    }

    /// The bar currently being built, if any.
    pub fn building(&self) -> Option<&CandleBar> {
        self.building.as_ref()
    }

    /// Volume of the most recent completed bar.
    pub fn last_completed_volume(&self) -> Option<u64> {
        self.completed.last().map(|c| c.volume)
    }

    /// Trailing streak of completed bars that are green and meet the volume
    /// threshold, counted from the newest bar backwards.
    pub fn green_streak(&self, min_volume: u64) -> u32 {
        let mut count = 0;
        for bar in self.completed.iter().rev() {
            if bar.qualifies(min_volume) {
                count += 1;
            } else {
                break;
            }
        }
        count
    }

    /// Seconds elapsed inside the building bar at `quote_time`. Used for
    /// first-minute volume extrapolation when sizing an early entry.
    pub fn building_elapsed_secs(&self, quote_time: NaiveDateTime) -> Option<i64> {
        self.building
            .as_ref()
            .map(|bar| (quote_time - bar.minute_start).num_seconds())
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 12, 18)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn builds_single_minute() {
        let mut series = CandleSeries::new();
        assert!(series.apply_tick(5.00, 500, ts(10, 0, 10)).is_none());
        assert!(series.apply_tick(5.10, 600, ts(10, 0, 30)).is_none());

        let bar = series.building().unwrap();
        assert_eq!(bar.open, 5.00);
        assert_eq!(bar.high, 5.10);
        assert_eq!(bar.low, 5.00);
        assert_eq!(bar.close, 5.10);
        assert_eq!(bar.volume, 1100);
        assert!(series.completed().is_empty());
    }

    #[test]
    fn minute_roll_finalizes_previous() {
        let mut series = CandleSeries::new();
        series.apply_tick(5.00, 500, ts(10, 0, 10));
        series.apply_tick(5.10, 600, ts(10, 0, 30));

        let finalized = series.apply_tick(5.15, 100, ts(10, 1, 0)).unwrap();
        assert_eq!(finalized.minute_start, ts(10, 0, 0));
        assert_eq!(finalized.volume, 1100);
        assert!(finalized.is_green());

        assert_eq!(series.completed().len(), 1);
        let building = series.building().unwrap();
        assert_eq!(building.minute_start, ts(10, 1, 0));
        assert_eq!(building.volume, 100);
    }

    #[test]
    fn volume_threshold_equality_counts() {
        let bar = CandleBar {
            minute_start: ts(10, 0, 0),
            open: 1.0,
            high: 2.0,
            low: 1.0,
            close: 2.0,
            volume: 1000,
        };
        assert!(bar.meets_volume(1000));
        assert!(bar.qualifies(1000));
        assert!(!bar.meets_volume(1001));
    }

    #[test]
    fn red_candle_never_qualifies() {
        let bar = CandleBar {
            minute_start: ts(10, 0, 0),
            open: 2.0,
            high: 2.0,
            low: 1.0,
            close: 1.5,
            volume: 10_000,
        };
        assert!(!bar.qualifies(1));
    }

    #[test]
    fn green_streak_counts_from_newest() {
        let mut series = CandleSeries::new();
        // Red minute.
        series.apply_tick(5.00, 2000, ts(10, 0, 0));
        series.apply_tick(4.90, 0, ts(10, 0, 30));
        // Green qualifying minute.
        series.apply_tick(4.90, 2000, ts(10, 1, 0));
        series.apply_tick(5.00, 0, ts(10, 1, 30));
        // Green but thin minute.
        series.apply_tick(5.00, 10, ts(10, 2, 0));
        series.apply_tick(5.05, 10, ts(10, 2, 30));
        // Green qualifying minute; rolls the thin one into completed.
        series.apply_tick(5.05, 2000, ts(10, 3, 0));
        series.apply_tick(5.20, 100, ts(10, 3, 30));
        // Roll everything completed.
        series.apply_tick(5.20, 1, ts(10, 4, 0));

        assert_eq!(series.completed().len(), 4);
        // Newest completed bar qualifies, bar before it is thin: streak = 1.
        assert_eq!(series.green_streak(1000), 1);
        // Without a volume floor all three trailing green bars count.
        assert_eq!(series.green_streak(0), 3);
    }

    #[test]
    fn elapsed_secs_inside_building_bar() {
        let mut series = CandleSeries::new();
        series.apply_tick(10.00, 500, ts(10, 0, 0));
        series.apply_tick(10.10, 500, ts(10, 0, 15));
        assert_eq!(series.building_elapsed_secs(ts(10, 0, 15)), Some(15));
    }
}
