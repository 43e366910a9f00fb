//! Storage traits and error types
//!
//! This module defines the persistence surface the result cache is written
//! through, and the errors its backends can report.

use crate::cache::CacheEntry;
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Invalid stored value for {key}: {reason}")]
    InvalidRecord { key: String, reason: String },
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Durable key-value persistence for cache entries
///
/// Backends store the whole map at once: `save` replaces everything that was
/// there before, so a crash between saves loses only the unsaved changes and
/// never leaves a half-written map behind.
pub trait CacheStore: Send {
    /// Reads every persisted entry
    ///
    /// A store that has never been written loads as an empty map.
    fn load(&self) -> StorageResult<HashMap<String, CacheEntry>>;

    /// Replaces the persisted map with `entries`
    fn save(&mut self, entries: &HashMap<String, CacheEntry>) -> StorageResult<()>;

    /// Human-readable location, used in log messages
    fn describe(&self) -> String;
}
