// =============================================================================
// Strategy store — persisted strategy definitions with a priority total order
// =============================================================================

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};
use tracing::info;

use crate::strategy::StrategyConfig;

use super::{ts_to_sql, Database};

/// A stored strategy definition. `priority` is a unique integer; lower runs
/// earlier in alert fanout.
#[derive(Debug, Clone)]
pub struct StrategySpec {
    pub id: String,
    pub name: String,
    pub config: StrategyConfig,
    pub enabled: bool,
    pub priority: i64,
}

fn row_to_spec(row: &Row<'_>) -> rusqlite::Result<StrategySpec> {
    let config_json: String = row.get("config")?;
    let config = serde_json::from_str(&config_json).unwrap_or_default();
    Ok(StrategySpec {
        id: row.get("id")?,
        name: row.get("name")?,
        config,
        enabled: row.get("enabled")?,
        priority: row.get("priority")?,
    })
}

/// CRUD for the `strategies` table.
#[derive(Clone)]
pub struct StrategyStore {
    db: Database,
}

impl StrategyStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert or update a strategy definition.
    pub fn upsert(&self, spec: &StrategySpec) -> Result<()> {
        let config_json =
            serde_json::to_string(&spec.config).context("failed to serialise strategy config")?;
        self.db.with_conn(|conn| {
            let now = ts_to_sql(Utc::now().naive_utc());
            conn.execute(
                "INSERT INTO strategies (id, name, config, enabled, priority, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
                 ON CONFLICT (id) DO UPDATE SET
                    name = excluded.name,
                    config = excluded.config,
                    enabled = excluded.enabled,
                    priority = excluded.priority,
                    updated_at = excluded.updated_at",
                params![spec.id, spec.name, config_json, spec.enabled, spec.priority, now],
            )?;
            info!(strategy = %spec.name, priority = spec.priority, enabled = spec.enabled, "strategy saved");
            Ok(())
        })
    }

    /// All strategies ordered by priority.
    pub fn all(&self) -> Result<Vec<StrategySpec>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM strategies ORDER BY priority ASC")?;
            let rows = stmt
                .query_map([], row_to_spec)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    /// Enabled strategies ordered by priority.
    pub fn load_enabled(&self) -> Result<Vec<StrategySpec>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT * FROM strategies WHERE enabled = 1 ORDER BY priority ASC")?;
            let rows = stmt
                .query_map([], row_to_spec)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    pub fn get(&self, id: &str) -> Result<Option<StrategySpec>> {
        self.db.with_conn(|conn| {
            Ok(conn
                .query_row("SELECT * FROM strategies WHERE id = ?1", params![id], row_to_spec)
                .optional()?)
        })
    }

    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<bool> {
        self.db.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE strategies SET enabled = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, enabled, ts_to_sql(Utc::now().naive_utc())],
            )?;
            Ok(n > 0)
        })
    }

    /// Swap the strategy's priority with its neighbour above (`up = true`) or
    /// below. Priorities stay unique; the swap happens inside one
    /// transaction using a sentinel value.
    pub fn move_priority(&self, id: &str, up: bool) -> Result<bool> {
        self.db.with_tx(|tx| {
            let current: Option<i64> = tx
                .query_row(
                    "SELECT priority FROM strategies WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(current) = current else {
                return Ok(false);
            };

            let neighbour: Option<(String, i64)> = if up {
                tx.query_row(
                    "SELECT id, priority FROM strategies WHERE priority < ?1
                     ORDER BY priority DESC LIMIT 1",
                    params![current],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?
            } else {
                tx.query_row(
                    "SELECT id, priority FROM strategies WHERE priority > ?1
                     ORDER BY priority ASC LIMIT 1",
                    params![current],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?
            };
            let Some((other_id, other_priority)) = neighbour else {
                return Ok(false);
            };

            // Three-step swap keeps the UNIQUE(priority) constraint satisfied.
            tx.execute("UPDATE strategies SET priority = -1 WHERE id = ?1", params![id])?;
            tx.execute(
                "UPDATE strategies SET priority = ?2 WHERE id = ?1",
                params![other_id, current],
            )?;
            tx.execute(
                "UPDATE strategies SET priority = ?2 WHERE id = ?1",
                params![id, other_priority],
            )?;
            Ok(true)
        })
    }

    /// Next free priority slot (max + 1).
    pub fn next_priority(&self) -> Result<i64> {
        self.db.with_conn(|conn| {
            let max: Option<i64> =
                conn.query_row("SELECT MAX(priority) FROM strategies", [], |row| row.get(0))?;
            Ok(max.map_or(0, |m| m + 1))
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn spec(id: &str, name: &str, priority: i64) -> StrategySpec {
        StrategySpec {
            id: id.to_string(),
            name: name.to_string(),
            config: StrategyConfig::default(),
            enabled: true,
            priority,
        }
    }

    fn store() -> StrategyStore {
        StrategyStore::new(Database::open_in_memory().unwrap())
    }

    #[test]
    fn load_enabled_orders_by_priority() {
        let s = store();
        s.upsert(&spec("b", "second", 1)).unwrap();
        s.upsert(&spec("a", "first", 0)).unwrap();
        let mut disabled = spec("c", "off", 2);
        disabled.enabled = false;
        s.upsert(&disabled).unwrap();

        let enabled = s.load_enabled().unwrap();
        assert_eq!(enabled.len(), 2);
        assert_eq!(enabled[0].id, "a");
        assert_eq!(enabled[1].id, "b");
        assert_eq!(s.all().unwrap().len(), 3);
    }

    #[test]
    fn move_priority_swaps_neighbours() {
        let s = store();
        s.upsert(&spec("a", "first", 0)).unwrap();
        s.upsert(&spec("b", "second", 1)).unwrap();

        assert!(s.move_priority("b", true).unwrap());
        let all = s.all().unwrap();
        assert_eq!(all[0].id, "b");
        assert_eq!(all[1].id, "a");

        // Already at the top: no-op.
        assert!(!s.move_priority("b", true).unwrap());
    }

    #[test]
    fn enable_disable_round_trip() {
        let s = store();
        s.upsert(&spec("a", "first", 0)).unwrap();
        assert!(s.set_enabled("a", false).unwrap());
        assert!(s.load_enabled().unwrap().is_empty());
        assert!(!s.set_enabled("missing", false).unwrap());
    }

    #[test]
    fn next_priority_increments() {
        let s = store();
        assert_eq!(s.next_priority().unwrap(), 0);
        s.upsert(&spec("a", "first", 0)).unwrap();
        s.upsert(&spec("b", "second", 1)).unwrap();
        assert_eq!(s.next_priority().unwrap(), 2);
    }
}
