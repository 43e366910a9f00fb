use crate::config::types::{
    BreakerConfig, CacheConfig, Config, DelayConfig, HealthConfig, PolicyConfig, RunConfig,
    TargetEntry,
};
use crate::ConfigError;
use url::Url;

/// Shortest monitor tick; a zero period would stall the timer
const MIN_MONITOR_INTERVAL_SECS: f64 = 0.001;

/// Longest pause, delay or timeout accepted anywhere (30 days)
const MAX_DURATION_SECS: f64 = 30.0 * 24.0 * 3600.0;

/// Longest cache TTL (10 years)
const MAX_TTL_HOURS: f64 = 10.0 * 365.0 * 24.0;

const MAX_DELAY_MULTIPLIER: f64 = 1000.0;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_run_config(&config.run)?;
    validate_delay_config(&config.delay)?;
    validate_health_config(&config.health)?;
    validate_breaker_config(&config.breaker)?;
    validate_policy_config(&config.policy)?;
    validate_cache_config(&config.cache)?;
    validate_targets(&config.targets)?;
    Ok(())
}

/// Validates worker pool configuration
fn validate_run_config(config: &RunConfig) -> Result<(), ConfigError> {
    if config.workers < 1 || config.workers > 16 {
        return Err(ConfigError::Validation(format!(
            "workers must be between 1 and 16, got {}",
            config.workers
        )));
    }

    if config.max_retries < 1 {
        return Err(ConfigError::Validation(
            "max_retries must be >= 1".to_string(),
        ));
    }

    if config.request_timeout_secs < 1 {
        return Err(ConfigError::Validation(
            "request_timeout_secs must be >= 1".to_string(),
        ));
    }

    ensure_duration("pause_secs", config.pause_secs, 0.0)?;

    if config.summary_path.is_empty() {
        return Err(ConfigError::Validation(
            "summary_path cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates delay bounds
fn validate_delay_config(config: &DelayConfig) -> Result<(), ConfigError> {
    ensure_positive("min_delay_secs", config.min_delay_secs)?;
    ensure_positive("max_delay_secs", config.max_delay_secs)?;
    ensure_duration("max_delay_secs", config.max_delay_secs, 0.0)?;
    ensure_duration("error_backoff_base_secs", config.error_backoff_base_secs, 0.0)?;

    if config.min_delay_secs > config.max_delay_secs {
        return Err(ConfigError::Validation(format!(
            "min_delay_secs ({}) must not exceed max_delay_secs ({})",
            config.min_delay_secs, config.max_delay_secs
        )));
    }

    Ok(())
}

/// Validates health thresholds
fn validate_health_config(config: &HealthConfig) -> Result<(), ConfigError> {
    ensure_rate("max_error_rate", config.max_error_rate)?;
    ensure_positive("max_response_time_secs", config.max_response_time_secs)?;
    ensure_duration("max_response_time_secs", config.max_response_time_secs, 0.0)?;
    ensure_positive("max_cpu_percent", config.max_cpu_percent)?;
    ensure_duration(
        "monitor_interval_secs",
        config.monitor_interval_secs,
        MIN_MONITOR_INTERVAL_SECS,
    )?;

    if config.consecutive_errors_threshold < 1 {
        return Err(ConfigError::Validation(
            "consecutive_errors_threshold must be >= 1".to_string(),
        ));
    }

    for (name, value) in [
        ("latency_window", config.latency_window),
        ("resource_window", config.resource_window),
        ("alert_history", config.alert_history),
    ] {
        if value < 1 {
            return Err(ConfigError::Validation(format!("{} must be >= 1", name)));
        }
    }

    if config.block_keywords.iter().any(|k| k.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "block_keywords cannot contain empty entries".to_string(),
        ));
    }

    Ok(())
}

/// Validates circuit breaker thresholds
fn validate_breaker_config(config: &BreakerConfig) -> Result<(), ConfigError> {
    if config.failure_threshold < 1 {
        return Err(ConfigError::Validation(
            "failure_threshold must be >= 1".to_string(),
        ));
    }

    ensure_duration("recovery_timeout_secs", config.recovery_timeout_secs, 0.0)
}

/// Validates adaptive policy settings
fn validate_policy_config(config: &PolicyConfig) -> Result<(), ConfigError> {
    if !(1.0..=MAX_DELAY_MULTIPLIER).contains(&config.max_multiplier) {
        return Err(ConfigError::Validation(format!(
            "max_multiplier must be between 1 and {}, got {}",
            MAX_DELAY_MULTIPLIER, config.max_multiplier
        )));
    }

    if config.pause_threshold < 1 || config.rotation_threshold < 1 {
        return Err(ConfigError::Validation(
            "pause_threshold and rotation_threshold must be >= 1".to_string(),
        ));
    }

    if config.user_agents.is_empty() {
        return Err(ConfigError::Validation(
            "user_agents must contain at least one identity".to_string(),
        ));
    }

    if config.user_agents.iter().any(|ua| ua.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "user_agents cannot contain empty entries".to_string(),
        ));
    }

    Ok(())
}

/// Validates result cache settings
fn validate_cache_config(config: &CacheConfig) -> Result<(), ConfigError> {
    if config.enabled && config.path.is_empty() {
        return Err(ConfigError::Validation(
            "cache path cannot be empty when the cache is enabled".to_string(),
        ));
    }

    ensure_positive("ttl_hours", config.ttl_hours)?;
    if config.ttl_hours > MAX_TTL_HOURS {
        return Err(ConfigError::Validation(format!(
            "ttl_hours must be <= {}, got {}",
            MAX_TTL_HOURS, config.ttl_hours
        )));
    }

    if config.max_entries < 1 {
        return Err(ConfigError::Validation(
            "max_entries must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates harvest targets
fn validate_targets(targets: &[TargetEntry]) -> Result<(), ConfigError> {
    for target in targets {
        if target.category.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "Target '{}' must have a non-empty category",
                target.url
            )));
        }

        let url = Url::parse(&target.url).map_err(|e| {
            ConfigError::InvalidUrl(format!("Invalid target URL '{}': {}", target.url, e))
        })?;

        if url.scheme() != "https" && url.scheme() != "http" {
            return Err(ConfigError::InvalidUrl(format!(
                "Target URL '{}' must use HTTP or HTTPS",
                target.url
            )));
        }
    }

    Ok(())
}

fn ensure_positive(name: &str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(ConfigError::Validation(format!(
            "{} must be > 0, got {}",
            name, value
        )));
    }
    Ok(())
}

/// Checks a value that becomes a `Duration`, in seconds
fn ensure_duration(name: &str, value: f64, min: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value < min || value > MAX_DURATION_SECS {
        return Err(ConfigError::Validation(format!(
            "{} must be between {} and {} seconds, got {}",
            name, min, MAX_DURATION_SECS, value
        )));
    }
    Ok(())
}

fn ensure_rate(name: &str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value <= 0.0 || value > 1.0 {
        return Err(ConfigError::Validation(format!(
            "{} must be in (0, 1], got {}",
            name, value
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(category: &str, url: &str) -> TargetEntry {
        TargetEntry {
            category: category.to_string(),
            url: url.to_string(),
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate(&Config::default()).is_ok());
    }

    #[test]
    fn test_validate_targets() {
        assert!(validate_targets(&[target("Marketing", "https://example.com/m")]).is_ok());
        assert!(validate_targets(&[target("Local", "http://127.0.0.1:8080/")]).is_ok());

        assert!(validate_targets(&[target("", "https://example.com/m")]).is_err());
        assert!(validate_targets(&[target("  ", "https://example.com/m")]).is_err());
        assert!(validate_targets(&[target("Bad", "not a url")]).is_err());
        assert!(matches!(
            validate_targets(&[target("Ftp", "ftp://example.com/")]),
            Err(ConfigError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_validate_workers_bounds() {
        let mut run = RunConfig::default();
        run.workers = 0;
        assert!(validate_run_config(&run).is_err());
        run.workers = 17;
        assert!(validate_run_config(&run).is_err());
        run.workers = 16;
        assert!(validate_run_config(&run).is_ok());
    }

    #[test]
    fn test_validate_monitor_interval_floor() {
        let mut health = HealthConfig::default();
        health.monitor_interval_secs = 1e-12;
        assert!(validate_health_config(&health).is_err());
        health.monitor_interval_secs = 0.0005;
        assert!(validate_health_config(&health).is_err());
        health.monitor_interval_secs = 0.001;
        assert!(validate_health_config(&health).is_ok());
        assert!(health.monitor_interval() > std::time::Duration::ZERO);
    }

    #[test]
    fn test_validate_rejects_oversized_durations() {
        let mut run = RunConfig::default();
        run.pause_secs = 1e300;
        assert!(validate_run_config(&run).is_err());
        run.pause_secs = f64::INFINITY;
        assert!(validate_run_config(&run).is_err());
        run.pause_secs = MAX_DURATION_SECS;
        assert!(validate_run_config(&run).is_ok());
        let _ = run.pause();

        let mut breaker = BreakerConfig::default();
        breaker.recovery_timeout_secs = 1e20;
        assert!(validate_breaker_config(&breaker).is_err());
        breaker.recovery_timeout_secs = 0.0;
        assert!(validate_breaker_config(&breaker).is_ok());

        let mut delay = DelayConfig::default();
        delay.max_delay_secs = 1e20;
        assert!(validate_delay_config(&delay).is_err());
        let mut delay = DelayConfig::default();
        delay.error_backoff_base_secs = -1.0;
        assert!(validate_delay_config(&delay).is_err());

        let mut cache = CacheConfig::default();
        cache.ttl_hours = 1e15;
        assert!(validate_cache_config(&cache).is_err());

        let mut policy = PolicyConfig::default();
        policy.max_multiplier = 1e9;
        assert!(validate_policy_config(&policy).is_err());
    }

    #[test]
    fn test_validate_error_rate() {
        let mut health = HealthConfig::default();
        health.max_error_rate = 0.0;
        assert!(validate_health_config(&health).is_err());
        health.max_error_rate = 1.5;
        assert!(validate_health_config(&health).is_err());
        health.max_error_rate = 1.0;
        assert!(validate_health_config(&health).is_ok());
    }

    #[test]
    fn test_validate_policy_requires_identities() {
        let mut policy = PolicyConfig::default();
        policy.user_agents.clear();
        assert!(validate_policy_config(&policy).is_err());

        policy.user_agents.push(" ".to_string());
        assert!(validate_policy_config(&policy).is_err());
    }

    #[test]
    fn test_validate_cache() {
        let mut cache = CacheConfig::default();
        cache.max_entries = 0;
        assert!(validate_cache_config(&cache).is_err());

        let mut cache = CacheConfig::default();
        cache.enabled = false;
        cache.path.clear();
        assert!(validate_cache_config(&cache).is_ok());
    }
}
