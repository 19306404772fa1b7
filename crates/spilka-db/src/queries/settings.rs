use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::params;

use crate::Database;

impl Database {
    /// Raw key/value pairs under a prefix; parsing and defaulting belong to
    /// the settings resolver, not the storage layer.
    pub fn settings_with_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT key, value FROM settings WHERE key LIKE ?1 || '%'")?;
            let rows = stmt
                .query_map(params![prefix], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn upsert_setting(&self, key: &str, value: &str, at: DateTime<Utc>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value,
                                               updated_at = excluded.updated_at",
                params![key, value, at],
            )?;
            Ok(())
        })
    }
}
