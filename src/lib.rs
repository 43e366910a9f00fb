//! Prompt-Harvest: an adaptive, polite harvester for categorized prompt pages
//!
//! This crate fetches a fixed list of category pages from one target site while
//! an adaptive control loop decides how hard it may push: delays back off after
//! failures, a circuit breaker fails fast when the site keeps refusing, a health
//! monitor classifies the run and raises alerts, and a persistent result cache
//! avoids refetching pages that were harvested recently.

pub mod cache;
pub mod config;
pub mod control;
pub mod harvest;
pub mod output;
pub mod storage;
pub mod url;

use thiserror::Error;

/// Main error type for Prompt-Harvest operations
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("URL error: {0}")]
    UrlError(#[from] UrlError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing domain in URL")]
    MissingDomain,

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// Result type alias for Prompt-Harvest operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use cache::{CacheKey, ResultCache};
pub use config::Config;
pub use control::{AdaptiveController, AttemptError, BreakerState, HealthStatus};
pub use harvest::Harvester;
pub use output::RunSummary;
pub use url::canonicalize_url;
