//! URL handling module for Prompt-Harvest
//!
//! Source URLs are part of each cached result's identity, so they are
//! canonicalized before use: two spellings of the same page must map to the
//! same cache entry across runs.

mod normalize;

pub use normalize::canonicalize_url;
