use std::collections::BTreeSet;

use log::warn;
use postgres::{Client, NoTls};

use crate::error::Result;

/// A persistent ordered set of OSM IDs driving the second pass. `pop_mark`
/// hands IDs back smallest-first, which is what lets the pass-two cursor
/// merge the pending stream with the importer's own ascending stream.
pub trait IdTracker {
    fn mark(&mut self, id: i64) -> Result<()>;

    /// Stable across a pass.
    fn is_marked(&mut self, id: i64) -> Result<bool>;

    /// Remove and return the smallest marked ID, or `i64::MAX` when empty.
    fn pop_mark(&mut self) -> Result<i64>;

    fn commit(&mut self) -> Result<()>;
}

/// Tracker state kept in an auxiliary database table named
/// `<prefix>_<role>`. The table lives for the duration of the import and is
/// dropped on teardown.
pub struct PgIdTracker {
    conn: Client,
    table: String,
}

impl PgIdTracker {
    pub fn new(conninfo: &str, prefix: &str, role: &str) -> Result<Self> {
        let mut conn = Client::connect(conninfo, NoTls)?;
        let table = format!("{}_{}", prefix, role);
        conn.batch_execute(&format!(
            "SET client_min_messages = warning;\n\
             DROP TABLE IF EXISTS {table};\n\
             CREATE TABLE {table} (osm_id int8 PRIMARY KEY);\n\
             BEGIN",
            table = table
        ))?;
        Ok(Self { conn, table })
    }
}

impl IdTracker for PgIdTracker {
    fn mark(&mut self, id: i64) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} (osm_id) VALUES ($1) ON CONFLICT DO NOTHING",
            self.table
        );
        self.conn.execute(sql.as_str(), &[&id])?;
        Ok(())
    }

    fn is_marked(&mut self, id: i64) -> Result<bool> {
        let sql = format!("SELECT 1 FROM {} WHERE osm_id = $1", self.table);
        let rows = self.conn.query(sql.as_str(), &[&id])?;
        Ok(!rows.is_empty())
    }

    fn pop_mark(&mut self) -> Result<i64> {
        let sql = format!(
            "DELETE FROM {table} WHERE osm_id = \
             (SELECT osm_id FROM {table} ORDER BY osm_id LIMIT 1) \
             RETURNING osm_id",
            table = self.table
        );
        let rows = self.conn.query(sql.as_str(), &[])?;
        Ok(rows.first().map(|row| row.get(0)).unwrap_or(i64::MAX))
    }

    fn commit(&mut self) -> Result<()> {
        self.conn.batch_execute("COMMIT; BEGIN")?;
        Ok(())
    }
}

impl Drop for PgIdTracker {
    fn drop(&mut self) {
        let teardown = format!("COMMIT; DROP TABLE IF EXISTS {}", self.table);
        if let Err(err) = self.conn.batch_execute(&teardown) {
            warn!("failed to drop tracker table {}: {}", self.table, err);
        }
    }
}

/// In-memory tracker with the same ordering contract.
#[derive(Debug, Default)]
pub struct RamIdTracker {
    ids: BTreeSet<i64>,
}

impl RamIdTracker {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdTracker for RamIdTracker {
    fn mark(&mut self, id: i64) -> Result<()> {
        self.ids.insert(id);
        Ok(())
    }

    fn is_marked(&mut self, id: i64) -> Result<bool> {
        Ok(self.ids.contains(&id))
    }

    fn pop_mark(&mut self) -> Result<i64> {
        match self.ids.iter().next().copied() {
            Some(id) => {
                self.ids.remove(&id);
                Ok(id)
            }
            None => Ok(i64::MAX),
        }
    }

    fn commit(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pop_mark_returns_ids_ascending() {
        let mut tracker = RamIdTracker::new();
        for id in [9, 3, 5, 3] {
            tracker.mark(id).unwrap();
        }
        assert!(tracker.is_marked(5).unwrap());
        assert_eq!(tracker.pop_mark().unwrap(), 3);
        assert_eq!(tracker.pop_mark().unwrap(), 5);
        assert_eq!(tracker.pop_mark().unwrap(), 9);
        assert_eq!(tracker.pop_mark().unwrap(), i64::MAX);
        assert!(!tracker.is_marked(3).unwrap());
    }
}
