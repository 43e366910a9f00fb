//! Storage module for persisting the result cache
//!
//! Two backends implement [`CacheStore`]:
//! - a JSON file written atomically (temp file plus rename)
//! - a SQLite database rewritten in a single transaction
//!
//! The backend is chosen from the file extension of the configured path.

mod json;
mod schema;
mod sqlite;
mod traits;

pub use json::JsonFileStore;
pub use sqlite::SqliteStore;
pub use traits::{CacheStore, StorageError, StorageResult};

use std::path::Path;

/// Which backend a path selects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Json,
    Sqlite,
}

impl StoreKind {
    /// `.db` and `.sqlite` select SQLite; anything else is JSON
    pub fn for_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("db") | Some("sqlite") | Some("sqlite3") => Self::Sqlite,
            _ => Self::Json,
        }
    }
}

/// Opens the cache store for the given path
///
/// # Arguments
///
/// * `path` - Location of the cache file
///
/// # Returns
///
/// * `Ok(Box<dyn CacheStore>)` - A ready backend; a missing JSON file is not an error
/// * `Err(StorageError)` - The SQLite database could not be opened
pub fn open_store(path: &Path) -> StorageResult<Box<dyn CacheStore>> {
    match StoreKind::for_path(path) {
        StoreKind::Json => Ok(Box::new(JsonFileStore::new(path))),
        StoreKind::Sqlite => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            Ok(Box::new(SqliteStore::new(path)?))
        }
    }
}
