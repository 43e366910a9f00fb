use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for Prompt-Harvest
///
/// Every section is optional; a missing section takes the defaults below,
/// which mirror the conservative values the harvester was tuned with.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub delay: DelayConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default, rename = "target")]
    pub targets: Vec<TargetEntry>,
}

/// Worker pool and retry behavior
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RunConfig {
    /// Number of concurrent worker tasks
    pub workers: u32,

    /// Attempts per target before it is reported as failed
    pub max_retries: u32,

    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,

    /// How long a worker waits when the policy asks it to pause
    pub pause_secs: f64,

    /// Path to the markdown summary written at the end of a run
    pub summary_path: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            max_retries: 3,
            request_timeout_secs: 30,
            pause_secs: 60.0,
            summary_path: "./harvest_summary.md".to_string(),
        }
    }
}

impl RunConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn pause(&self) -> Duration {
        Duration::from_secs_f64(self.pause_secs)
    }
}

/// Inter-request delay bounds (seconds)
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct DelayConfig {
    pub min_delay_secs: f64,
    pub max_delay_secs: f64,
    pub error_backoff_base_secs: f64,
}

impl Default for DelayConfig {
    fn default() -> Self {
        Self {
            min_delay_secs: 2.0,
            max_delay_secs: 8.0,
            error_backoff_base_secs: 5.0,
        }
    }
}

impl DelayConfig {
    pub fn min_delay(&self) -> Duration {
        Duration::from_secs_f64(self.min_delay_secs)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_secs_f64(self.max_delay_secs)
    }
}

/// Health classification thresholds and monitor cadence
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct HealthConfig {
    /// Failure rate above which the run is Critical
    pub max_error_rate: f64,

    /// Average latency (seconds) above which the run is in Warning
    pub max_response_time_secs: f64,

    /// Resident memory ceiling in megabytes
    pub max_memory_mb: u64,

    /// CPU load ceiling in percent
    pub max_cpu_percent: f64,

    /// Consecutive failures that classify the run as Blocked
    pub consecutive_errors_threshold: u32,

    /// Seconds between background monitoring ticks
    pub monitor_interval_secs: f64,

    /// Capacity of the latency window
    pub latency_window: usize,

    /// Capacity of the memory and CPU sample windows
    pub resource_window: usize,

    /// Number of alerts kept in the history
    pub alert_history: usize,

    /// Error-text fragments that indicate the site is blocking us
    pub block_keywords: Vec<String>,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            max_error_rate: 0.3,
            max_response_time_secs: 30.0,
            max_memory_mb: 1024,
            max_cpu_percent: 85.0,
            consecutive_errors_threshold: 5,
            monitor_interval_secs: 10.0,
            latency_window: 100,
            resource_window: 100,
            alert_history: 100,
            block_keywords: default_block_keywords(),
        }
    }
}

impl HealthConfig {
    pub fn max_response_time(&self) -> Duration {
        Duration::from_secs_f64(self.max_response_time_secs)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs_f64(self.monitor_interval_secs)
    }
}

fn default_block_keywords() -> Vec<String> {
    [
        "blocked",
        "captcha",
        "rate limit",
        "forbidden",
        "access denied",
        "too many requests",
        "bot detection",
    ]
    .iter()
    .map(|k| k.to_string())
    .collect()
}

/// Circuit breaker thresholds
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout_secs: f64,

    /// Decrement the failure counter on each success while Closed
    pub decay_on_success: bool,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_secs: 300.0,
            decay_on_success: false,
        }
    }
}

impl BreakerConfig {
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.recovery_timeout_secs)
    }
}

/// Reactions to alerts
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct PolicyConfig {
    /// Upper bound of the delay multiplier
    pub max_multiplier: f64,

    /// Consecutive failures after which cooperative workers pause
    pub pause_threshold: u32,

    /// Consecutive failures after which a different user agent is suggested
    pub rotation_threshold: u32,

    /// Alternate identities handed out when rotation kicks in
    pub user_agents: Vec<String>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            max_multiplier: 8.0,
            pause_threshold: 10,
            rotation_threshold: 5,
            user_agents: vec![
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36".to_string(),
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15".to_string(),
                "Mozilla/5.0 (X11; Linux x86_64; rv:121.0) Gecko/20100101 Firefox/121.0".to_string(),
            ],
        }
    }
}

/// Result cache settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct CacheConfig {
    pub enabled: bool,

    /// Store location; `.db`/`.sqlite` selects SQLite, anything else JSON
    pub path: String,

    pub ttl_hours: f64,
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "./harvest_cache.json".to_string(),
            ttl_hours: 24.0,
            max_entries: 50,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::milliseconds((self.ttl_hours * 3_600_000.0) as i64)
    }
}

/// A category page to harvest
#[derive(Debug, Clone, Deserialize)]
pub struct TargetEntry {
    /// Category name, used as part of the cache identity
    pub category: String,

    /// Source URL of the category page
    pub url: String,
}
