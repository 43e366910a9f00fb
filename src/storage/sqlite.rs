//! SQLite cache store
//!
//! This module provides a SQLite-based implementation of the CacheStore trait.

use crate::cache::CacheEntry;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{CacheStore, StorageError, StorageResult};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// SQLite storage backend
pub struct SqliteStore {
    conn: Connection,
    path: PathBuf,
}

impl SqliteStore {
    /// Opens or creates the database at `path`
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStore)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database or create the schema
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn,
            path: PathBuf::from(":memory:"),
        })
    }
}

impl CacheStore for SqliteStore {
    fn load(&self) -> StorageResult<HashMap<String, CacheEntry>> {
        let mut stmt = self
            .conn
            .prepare("SELECT key, payload, stored_at, item_count FROM cache_entries")?;

        let rows = stmt.query_map([], |row| {
            let key: String = row.get(0)?;
            let payload: String = row.get(1)?;
            let stored_at: String = row.get(2)?;
            let item_count: i64 = row.get(3)?;
            Ok((key, payload, stored_at, item_count))
        })?;

        let mut entries = HashMap::new();
        for row in rows {
            let (key, payload, stored_at, item_count) = row?;

            let payload = serde_json::from_str(&payload)?;
            let stored_at = stored_at.parse::<DateTime<Utc>>().map_err(|e| {
                StorageError::InvalidRecord {
                    key: key.clone(),
                    reason: format!("bad stored_at '{}': {}", stored_at, e),
                }
            })?;
            let item_count =
                usize::try_from(item_count).map_err(|_| StorageError::InvalidRecord {
                    key: key.clone(),
                    reason: format!("negative item_count {}", item_count),
                })?;

            entries.insert(
                key,
                CacheEntry {
                    payload,
                    stored_at,
                    item_count,
                },
            );
        }

        Ok(entries)
    }

    fn save(&mut self, entries: &HashMap<String, CacheEntry>) -> StorageResult<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM cache_entries", [])?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO cache_entries (key, payload, stored_at, item_count)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for (key, entry) in entries {
                let payload = serde_json::to_string(&entry.payload)?;
                stmt.execute(params![
                    key,
                    payload,
                    entry.stored_at.to_rfc3339(),
                    entry.item_count as i64,
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("sqlite:{}", self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn entry(payload: serde_json::Value) -> CacheEntry {
        CacheEntry::new(payload, Utc::now())
    }

    #[test]
    fn test_empty_database_loads_empty() {
        let store = SqliteStore::new_in_memory().unwrap();
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let mut store = SqliteStore::new_in_memory().unwrap();
        let mut entries = HashMap::new();
        entries.insert("a::https://example.com/a".to_string(), entry(json!([1, 2])));
        entries.insert("b::https://example.com/b".to_string(), entry(json!({"k": "v"})));

        store.save(&entries).unwrap();
        let loaded = store.load().unwrap();

        assert_eq!(loaded.len(), 2);
        let a = &loaded["a::https://example.com/a"];
        assert_eq!(a.payload, json!([1, 2]));
        assert_eq!(a.item_count, 2);
        assert_eq!(a.stored_at, entries["a::https://example.com/a"].stored_at);
    }

    #[test]
    fn test_save_replaces_all_rows() {
        let mut store = SqliteStore::new_in_memory().unwrap();
        let mut entries = HashMap::new();
        entries.insert("a".to_string(), entry(json!(1)));
        entries.insert("b".to_string(), entry(json!(2)));
        store.save(&entries).unwrap();

        entries.remove("a");
        store.save(&entries).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded.contains_key("b"));
    }

    #[test]
    fn test_persists_on_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.db");

        {
            let mut store = SqliteStore::new(&path).unwrap();
            let mut entries = HashMap::new();
            entries.insert("k".to_string(), entry(json!("v")));
            store.save(&entries).unwrap();
        }

        let store = SqliteStore::new(&path).unwrap();
        assert_eq!(store.load().unwrap()["k"].payload, json!("v"));
        assert!(store.describe().starts_with("sqlite:"));
    }

    #[test]
    fn test_bad_timestamp_is_reported() {
        let store = SqliteStore::new_in_memory().unwrap();
        store
            .conn
            .execute(
                "INSERT INTO cache_entries (key, payload, stored_at, item_count) VALUES ('k', '1', 'yesterday', 1)",
                [],
            )
            .unwrap();

        assert!(matches!(
            store.load(),
            Err(StorageError::InvalidRecord { .. })
        ));
    }
}
