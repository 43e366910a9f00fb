//! Result cache
//!
//! Memoizes successful harvest results keyed by [`CacheKey`]. Entries expire
//! after a TTL and the map is bounded: inserting a new key at capacity evicts
//! the single entry with the oldest `stored_at`. The map is loaded from a
//! [`CacheStore`] at startup and written back whole on every flush.
//!
//! Persistence problems never abort a run. If loading fails the cache turns
//! degraded: every lookup misses and nothing is written back.

mod entry;
mod key;

pub use entry::{item_count, CacheEntry};
pub use key::CacheKey;

use crate::config::CacheConfig;
use crate::storage::{open_store, CacheStore, StorageError};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Operating mode of the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
    Active,

    /// Turned off in the configuration
    Disabled,

    /// The store could not be opened or read; always misses
    Degraded,
}

/// Counters reported in the run summary
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub mode: CacheMode,
    pub backend: Option<String>,
    pub entries: usize,
    pub fresh_entries: usize,
    pub hits: u64,
    pub misses: u64,
}

struct CacheInner {
    entries: HashMap<CacheKey, CacheEntry>,
    store: Option<Box<dyn CacheStore>>,
    mode: CacheMode,
    dirty: bool,
    hits: u64,
    misses: u64,
}

/// Bounded, TTL-expiring, persistent result cache
pub struct ResultCache {
    ttl: Duration,
    max_entries: usize,
    inner: Mutex<CacheInner>,
}

impl ResultCache {
    /// Opens the cache described by `config`, loading persisted entries
    pub fn open(config: &CacheConfig) -> Self {
        Self::open_with(config, false)
    }

    /// Opens the cache but ignores persisted entries; the next flush overwrites them
    pub fn open_fresh(config: &CacheConfig) -> Self {
        Self::open_with(config, true)
    }

    fn open_with(config: &CacheConfig, fresh: bool) -> Self {
        if !config.enabled {
            return Self::disabled();
        }

        match open_store(Path::new(&config.path)) {
            Ok(store) => Self::with_store(store, config.ttl(), config.max_entries, fresh),
            Err(e) => {
                tracing::warn!(
                    "Cannot open cache store {}: {}; continuing without cache",
                    config.path,
                    e
                );
                Self::build(
                    HashMap::new(),
                    None,
                    CacheMode::Degraded,
                    config.ttl(),
                    config.max_entries,
                )
            }
        }
    }

    /// A cache that never hits and never persists
    pub fn disabled() -> Self {
        Self::build(HashMap::new(), None, CacheMode::Disabled, Duration::zero(), 1)
    }

    /// Builds a cache on top of an already opened store
    ///
    /// # Arguments
    ///
    /// * `store` - Persistence backend
    /// * `ttl` - Age at which entries become misses
    /// * `max_entries` - Capacity of the in-memory map
    /// * `fresh` - Skip loading; the first flush replaces whatever the store holds
    pub fn with_store(
        store: Box<dyn CacheStore>,
        ttl: Duration,
        max_entries: usize,
        fresh: bool,
    ) -> Self {
        let description = store.describe();

        if fresh {
            tracing::info!("Ignoring persisted cache at {}", description);
            let cache = Self::build(
                HashMap::new(),
                Some(store),
                CacheMode::Active,
                ttl,
                max_entries,
            );
            cache.lock().dirty = true;
            return cache;
        }

        match store.load() {
            Ok(raw) => {
                let entries: HashMap<CacheKey, CacheEntry> = raw
                    .into_iter()
                    .map(|(k, v)| (CacheKey::from_stored(k), v))
                    .collect();
                tracing::info!("Loaded {} cache entries from {}", entries.len(), description);
                let cache = Self::build(entries, Some(store), CacheMode::Active, ttl, max_entries);
                {
                    let mut inner = cache.lock();
                    let evicted = evict_oldest(&mut inner.entries, cache.max_entries);
                    if evicted > 0 {
                        tracing::info!(
                            "Trimmed {} cache entries over capacity {}",
                            evicted,
                            cache.max_entries
                        );
                        inner.dirty = true;
                    }
                }
                cache
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to load cache from {}: {}; continuing without cache",
                    description,
                    e
                );
                Self::build(HashMap::new(), None, CacheMode::Degraded, ttl, max_entries)
            }
        }
    }

    fn build(
        entries: HashMap<CacheKey, CacheEntry>,
        store: Option<Box<dyn CacheStore>>,
        mode: CacheMode,
        ttl: Duration,
        max_entries: usize,
    ) -> Self {
        Self {
            ttl,
            max_entries: max_entries.max(1),
            inner: Mutex::new(CacheInner {
                entries,
                store,
                mode,
                dirty: false,
                hits: 0,
                misses: 0,
            }),
        }
    }

    /// Looks up a fresh entry, returning its payload unchanged
    pub fn get(&self, key: &CacheKey) -> Option<Value> {
        self.get_at(key, Utc::now())
    }

    fn get_at(&self, key: &CacheKey, now: DateTime<Utc>) -> Option<Value> {
        let mut inner = self.lock();
        if inner.mode != CacheMode::Active {
            return None;
        }

        let payload = match inner.entries.get(key) {
            Some(entry) if !entry.is_expired(self.ttl, now) => Some(entry.payload.clone()),
            Some(_) => {
                tracing::debug!("Cache entry {} expired", key);
                None
            }
            None => None,
        };

        if payload.is_some() {
            inner.hits += 1;
            tracing::debug!("Cache hit for {}", key);
        } else {
            inner.misses += 1;
        }
        payload
    }

    /// Inserts or overwrites an entry stamped with the current time
    pub fn put(&self, key: CacheKey, payload: Value) {
        self.put_at(key, payload, Utc::now());
    }

    fn put_at(&self, key: CacheKey, payload: Value, stored_at: DateTime<Utc>) {
        let mut inner = self.lock();
        if inner.mode != CacheMode::Active {
            return;
        }

        if !inner.entries.contains_key(&key) {
            evict_oldest(&mut inner.entries, self.max_entries - 1);
        }

        inner.entries.insert(key, CacheEntry::new(payload, stored_at));
        inner.dirty = true;
    }

    /// Writes the whole map to the store if anything changed since the last flush
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - The store was rewritten
    /// * `Ok(false)` - Nothing to write (clean, disabled, or degraded)
    /// * `Err(StorageError)` - The write failed; the entries stay dirty
    pub fn flush(&self) -> Result<bool, StorageError> {
        let mut guard = self.lock();
        let inner = &mut *guard;

        if !inner.dirty || inner.mode != CacheMode::Active {
            return Ok(false);
        }
        let Some(store) = inner.store.as_mut() else {
            return Ok(false);
        };

        let snapshot: HashMap<String, CacheEntry> = inner
            .entries
            .iter()
            .map(|(k, v)| (k.as_str().to_string(), v.clone()))
            .collect();
        store.save(&snapshot)?;
        inner.dirty = false;
        tracing::debug!("Flushed {} cache entries", snapshot.len());
        Ok(true)
    }

    pub fn mode(&self) -> CacheMode {
        self.lock().mode
    }

    /// Number of stored entries, expired ones included
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// All entries, newest first
    pub fn entries(&self) -> Vec<(CacheKey, CacheEntry)> {
        let inner = self.lock();
        let mut entries: Vec<_> = inner
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        entries.sort_by(|a, b| b.1.stored_at.cmp(&a.1.stored_at));
        entries
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        let now = Utc::now();
        CacheStats {
            mode: inner.mode,
            backend: inner.store.as_ref().map(|s| s.describe()),
            entries: inner.entries.len(),
            fresh_entries: inner
                .entries
                .values()
                .filter(|e| !e.is_expired(self.ttl, now))
                .count(),
            hits: inner.hits,
            misses: inner.misses,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Removes the oldest entries by `stored_at` until at most `keep` remain
///
/// # Returns
///
/// The number of entries removed
fn evict_oldest(entries: &mut HashMap<CacheKey, CacheEntry>, keep: usize) -> usize {
    let mut evicted = 0;
    while entries.len() > keep {
        let oldest = entries
            .iter()
            .min_by_key(|(_, entry)| entry.stored_at)
            .map(|(k, _)| k.clone());
        let Some(oldest) = oldest else {
            break;
        };
        tracing::debug!("Evicting oldest cache entry {}", oldest);
        entries.remove(&oldest);
        evicted += 1;
    }
    evicted
}
