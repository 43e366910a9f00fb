//! JSON file cache store
//!
//! The whole map is written to `<path>.tmp` and renamed over `<path>`, so the
//! file on disk is always either the previous map or the new one.

use crate::cache::CacheEntry;
use crate::storage::traits::{CacheStore, StorageResult};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Cache store backed by a single pretty-printed JSON object
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    fn tmp_path(&self) -> PathBuf {
        let mut tmp = self.path.as_os_str().to_owned();
        tmp.push(".tmp");
        PathBuf::from(tmp)
    }
}

impl CacheStore for JsonFileStore {
    fn load(&self) -> StorageResult<HashMap<String, CacheEntry>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => return Err(e.into()),
        };

        if content.trim().is_empty() {
            return Ok(HashMap::new());
        }

        Ok(serde_json::from_str(&content)?)
    }

    fn save(&mut self, entries: &HashMap<String, CacheEntry>) -> StorageResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        // Sorted keys keep the file diffable between runs
        let ordered: BTreeMap<&String, &CacheEntry> = entries.iter().collect();
        let bytes = serde_json::to_vec_pretty(&ordered)?;

        let tmp = self.tmp_path();
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("json:{}", self.path.display())
    }
}
