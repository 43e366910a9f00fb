use crate::url::canonicalize_url;
use crate::UrlError;
use serde::Serialize;
use std::fmt;

/// Stable identity of a harvest operation
///
/// Built from the category name and the canonical form of the source URL, so
/// the same logical page maps to the same key across runs and spellings. The
/// key is stored verbatim; no hashing is involved.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Builds a key from a category and a source URL
    ///
    /// # Returns
    ///
    /// * `Ok(CacheKey)` - `<category>::<canonical url>`
    /// * `Err(UrlError)` - The URL could not be canonicalized
    pub fn new(category: &str, url: &str) -> Result<Self, UrlError> {
        let canonical = canonicalize_url(url)?;
        Ok(Self(format!(
            "{}::{}",
            category.trim().to_lowercase(),
            canonical
        )))
    }

    /// Wraps a key read back from a cache store
    pub(crate) fn from_stored(raw: String) -> Self {
        Self(raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
