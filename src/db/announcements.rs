// =============================================================================
// Announcement store
// =============================================================================

use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use tracing::debug;

use crate::models::Announcement;

use super::{ts_to_sql, Database};

/// CRUD for the `announcements` table. Rows are content-addressed by
/// `(ticker, timestamp)`; duplicate inserts are ignored.
#[derive(Clone)]
pub struct AnnouncementStore {
    db: Database,
}

impl AnnouncementStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert an announcement, returning its row id. When a row for
    /// `(ticker, timestamp)` already exists, the existing id is returned.
    pub fn save(&self, ann: &Announcement, source: &str) -> Result<i64> {
        self.db.with_conn(|conn| {
            let now = ts_to_sql(Utc::now().naive_utc());
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO announcements
                   (ticker, timestamp, price_threshold, headline, country, channel,
                    author, direction, float_shares, io_percent, market_cap,
                    short_interest, reg_sho, high_ctb, mention_count,
                    headline_is_financing, headline_financing_type, source_message,
                    source, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13,
                         ?14, ?15, ?16, ?17, ?18, ?19, ?20)",
                params![
                    ann.ticker,
                    ts_to_sql(ann.timestamp),
                    ann.price_threshold,
                    ann.headline,
                    ann.country,
                    ann.channel,
                    ann.author,
                    ann.direction,
                    ann.float_shares,
                    ann.io_percent,
                    ann.market_cap,
                    ann.short_interest,
                    ann.reg_sho,
                    ann.high_ctb,
                    ann.mention_count,
                    ann.headline_is_financing,
                    ann.headline_financing_type,
                    ann.source_message,
                    source,
                    now,
                ],
            )?;

            let id: i64 = conn.query_row(
                "SELECT id FROM announcements WHERE ticker = ?1 AND timestamp = ?2",
                params![ann.ticker, ts_to_sql(ann.timestamp)],
                |row| row.get(0),
            )?;

            if inserted > 0 {
                debug!(ticker = %ann.ticker, id, "announcement saved");
            }
            Ok(id)
        })
    }

    /// Look up an announcement id by its content address.
    pub fn find_id(&self, ticker: &str, timestamp: chrono::NaiveDateTime) -> Result<Option<i64>> {
        self.db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT id FROM announcements WHERE ticker = ?1 AND timestamp = ?2",
                    params![ticker, ts_to_sql(timestamp)],
                    |row| row.get(0),
                )
                .optional()?)
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn sample(ticker: &str) -> Announcement {
        Announcement {
            ticker: ticker.to_string(),
            timestamp: NaiveDate::from_ymd_opt(2025, 12, 18)
                .unwrap()
                .and_hms_opt(14, 30, 45)
                .unwrap(),
            price_threshold: 0.5,
            headline: "Provides 2026 Guidance".to_string(),
            country: "US".to_string(),
            channel: Some("pr-spike".to_string()),
            author: Some("PR - Spike".to_string()),
            direction: None,
            float_shares: Some(139_000_000.0),
            io_percent: Some(6.04),
            market_cap: Some(26_800_000.0),
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
    fn duplicate_save_returns_same_id() {
        let db = Database::open_in_memory().unwrap();
        let store = AnnouncementStore::new(db);

        let id1 = store.save(&sample("BNKK"), "live").unwrap();
        let id2 = store.save(&sample("BNKK"), "live").unwrap();
        assert_eq!(id1, id2);

        let id3 = store.save(&sample("OTHR"), "live").unwrap();
        assert_ne!(id1, id3);
    }

    #[test]
    fn find_id_by_content_address() {
        let db = Database::open_in_memory().unwrap();
        let store = AnnouncementStore::new(db);
        let ann = sample("BNKK");

        assert_eq!(store.find_id(&ann.ticker, ann.timestamp).unwrap(), None);
        let id = store.save(&ann, "live").unwrap();
        assert_eq!(store.find_id(&ann.ticker, ann.timestamp).unwrap(), Some(id));
    }
}
