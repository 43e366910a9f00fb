//! Run statistics
//!
//! This module holds the per-target outcomes and the end-of-run summary, and
//! prints them to stdout.

use crate::config::HealthConfig;
use crate::control::{ControlSummary, HealthStatus, MetricsSnapshot};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Consecutive failures above which a pause is suggested
const CONSECUTIVE_FAILURE_HINT: u64 = 3;

/// Share of the memory ceiling above which a cleanup is suggested
const MEMORY_HINT_RATIO: f64 = 0.8;

/// How a target ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetStatus {
    /// Served from the result cache without a request
    Cached,
    Harvested,
    Failed,

    /// Never attempted because the run was interrupted
    Skipped,
}

impl TargetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cached => "cached",
            Self::Harvested => "harvested",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of processing one configured target
#[derive(Debug, Clone, Serialize)]
pub struct TargetOutcome {
    /// Position in the configuration file
    pub index: usize,
    pub category: String,
    pub url: String,
    pub status: TargetStatus,

    /// Requests actually sent (circuit-open rejections are not counted)
    pub attempts: u32,

    /// Items in the harvested or cached payload
    pub items: usize,

    /// Last error seen, for failed targets
    pub error: Option<String>,

    pub elapsed_secs: f64,
}

impl TargetOutcome {
    pub fn skipped(index: usize, category: &str, url: &str) -> Self {
        Self {
            index,
            category: category.to_string(),
            url: url.to_string(),
            status: TargetStatus::Skipped,
            attempts: 0,
            items: 0,
            error: None,
            elapsed_secs: 0.0,
        }
    }
}

/// Everything reported at the end of a run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub duration_secs: f64,

    /// Set when Ctrl-C stopped the run early
    pub interrupted: bool,

    pub config_hash: Option<String>,

    /// Outcomes sorted by target index
    pub targets: Vec<TargetOutcome>,

    pub control: ControlSummary,

    pub recommendations: Vec<String>,
}

impl RunSummary {
    pub fn count(&self, status: TargetStatus) -> usize {
        self.targets.iter().filter(|t| t.status == status).count()
    }

    /// Total items across harvested and cached targets
    pub fn total_items(&self) -> usize {
        self.targets.iter().map(|t| t.items).sum()
    }
}

/// Suggestions for the operator derived from the final metrics
///
/// # Arguments
///
/// * `metrics` - Final metrics snapshot
/// * `health` - Thresholds the run was monitored with
///
/// # Returns
///
/// Human-readable suggestions, most severe first; empty for a healthy run
pub fn recommendations(metrics: &MetricsSnapshot, health: &HealthConfig) -> Vec<String> {
    let mut out = Vec::new();

    match metrics.status {
        HealthStatus::Blocked => {
            out.push(
                "The site is probably blocking us: switch IP or proxy before the next run"
                    .to_string(),
            );
            out.push("Increase the delays between requests".to_string());
            out.push("Check whether the request headers are being fingerprinted".to_string());
        }
        HealthStatus::Critical => {
            out.push("High error rate: lower the request rate".to_string());
            out.push("Look through the logs for recurring error patterns".to_string());
            out.push("Consider a wider pool of user agents".to_string());
        }
        HealthStatus::Warning => {
            out.push("Watch the next run closely: problems may be emerging".to_string());
        }
        HealthStatus::Healthy => {}
    }

    if let Some(memory) = metrics.memory_mb {
        if memory > health.max_memory_mb as f64 * MEMORY_HINT_RATIO {
            out.push(format!("Memory use is high ({:.0} MB): free resources", memory));
        }
    }

    if metrics.consecutive_failures > CONSECUTIVE_FAILURE_HINT {
        out.push(format!(
            "{} consecutive failures at the end of the run: consider pausing before retrying",
            metrics.consecutive_failures
        ));
    }

    out
}

/// Prints the run summary to stdout
///
/// # Arguments
///
/// * `summary` - The summary to display
pub fn print_summary(summary: &RunSummary) {
    let metrics = &summary.control.metrics;

    println!("=== Harvest Summary ===\n");

    println!("Run:");
    println!("  Started: {}", summary.started_at.to_rfc3339());
    println!("  Duration: {:.1}s", summary.duration_secs);
    if summary.interrupted {
        println!("  Interrupted: yes");
    }
    if let Some(hash) = &summary.config_hash {
        println!("  Config hash: {}", hash);
    }
    println!();

    println!("Targets ({}):", summary.targets.len());
    for status in [
        TargetStatus::Harvested,
        TargetStatus::Cached,
        TargetStatus::Failed,
        TargetStatus::Skipped,
    ] {
        let count = summary.count(status);
        if count > 0 {
            println!("  {}: {}", status, count);
        }
    }
    println!("  Items: {}", summary.total_items());
    println!();

    println!("Requests:");
    println!("  Total: {}", metrics.total_requests);
    println!("  Successful: {}", metrics.successful_requests);
    println!("  Failed: {}", metrics.failed_requests);
    println!("  Success rate: {:.1}%", metrics.success_rate * 100.0);
    if let Some(avg) = metrics.avg_response_time_secs {
        println!("  Average response time: {:.2}s", avg);
    }
    println!();

    println!("Control:");
    println!("  Health: {}", metrics.status);
    println!(
        "  Breaker: {} ({} failures)",
        summary.control.breaker_state, summary.control.breaker_failures
    );
    println!("  Delay multiplier: {:.2}", summary.control.delay_multiplier);
    println!("  Status factor: {:.1}x", summary.control.status_factor);
    println!("  Current delay: {:.2}s", summary.control.current_delay_secs);
    println!("  Alerts raised: {}", summary.control.alert_count);
    for (kind, count) in &summary.control.alerts_by_kind {
        println!("    {}: {}", kind, count);
    }
    if !summary.control.blocked_periods.is_empty() {
        let now = Utc::now();
        println!("  Blocked periods: {}", summary.control.blocked_periods.len());
        for period in &summary.control.blocked_periods {
            println!(
                "    from {} for {}s",
                period.started_at.to_rfc3339(),
                period.duration(now).num_seconds()
            );
        }
    }
    println!();

    let cache = &summary.control.cache;
    println!("Cache:");
    println!("  Mode: {:?}", cache.mode);
    if let Some(backend) = &cache.backend {
        println!("  Backend: {}", backend);
    }
    println!(
        "  Entries: {} ({} fresh), {} hits, {} misses",
        cache.entries, cache.fresh_entries, cache.hits, cache.misses
    );
    println!();

    let failed: Vec<_> = summary
        .targets
        .iter()
        .filter(|t| t.status == TargetStatus::Failed)
        .collect();
    if !failed.is_empty() {
        println!("Failed Targets:");
        for target in failed {
            println!(
                "  - [{}] {}: {}",
                target.category,
                target.url,
                target.error.as_deref().unwrap_or("unknown error")
            );
        }
        println!();
    }

    if !summary.recommendations.is_empty() {
        println!("Recommendations:");
        for rec in &summary.recommendations {
            println!("  - {}", rec);
        }
    }
}
