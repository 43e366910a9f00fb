//! Health monitor
//!
//! Aggregates request outcomes and resource samples into a [`HealthStatus`],
//! keeps a bounded alert history and fans alerts out to registered observers.
//! All counters live behind one mutex so concurrent workers never lose an
//! update; alerts are always dispatched after that lock is released.

use crate::config::HealthConfig;
use crate::control::alert::{details, Alert, AlertKind, AlertObserver};
use crate::control::window::RollingWindow;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

/// Number of recent latencies the slow-response alert averages over
const SLOW_RESPONSE_SAMPLE: usize = 10;

/// Minimum request count before the failure rate is considered meaningful
const RATE_MIN_REQUESTS: u64 = 10;

/// Failure rate above which the run is at least in Warning
const WARNING_ERROR_RATE: f64 = 0.1;

const HIGH_FAILURE_MIN_REQUESTS: u64 = 20;
const HIGH_FAILURE_RATE: f64 = 0.5;

/// Coarse classification of current operational risk, ordered by severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
    Blocked,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Warning => "warning",
            Self::Critical => "critical",
            Self::Blocked => "blocked",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The outcome counters the delay controller works from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutcomeStats {
    pub total: u64,
    pub success: u64,
    pub failure: u64,
    pub consecutive_failures: u64,
}

impl OutcomeStats {
    pub fn success_ratio(&self) -> f64 {
        self.success as f64 / self.total.max(1) as f64
    }

    pub fn failure_rate(&self) -> f64 {
        self.failure as f64 / self.total.max(1) as f64
    }
}

/// Point-in-time copy of the aggregated metrics
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub status: HealthStatus,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub consecutive_failures: u64,
    pub success_rate: f64,
    pub avg_response_time_secs: Option<f64>,
    pub memory_mb: Option<f64>,
    pub cpu_percent: Option<f64>,
    pub last_failure_at: Option<DateTime<Utc>>,
}

impl MetricsSnapshot {
    pub fn outcome_stats(&self) -> OutcomeStats {
        OutcomeStats {
            total: self.total_requests,
            success: self.successful_requests,
            failure: self.failed_requests,
            consecutive_failures: self.consecutive_failures,
        }
    }
}

/// A stretch of the run spent in [`HealthStatus::Blocked`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockedPeriod {
    pub started_at: DateTime<Utc>,

    /// `None` while the run is still blocked
    pub ended_at: Option<DateTime<Utc>>,
}

impl BlockedPeriod {
    /// Length of the period, measured up to `now` if it has not ended
    pub fn duration(&self, now: DateTime<Utc>) -> chrono::Duration {
        self.ended_at.unwrap_or(now) - self.started_at
    }
}

#[derive(Debug)]
struct Metrics {
    total: u64,
    success: u64,
    failure: u64,
    consecutive_failures: u64,
    latencies: RollingWindow<f64>,
    memory_mb: RollingWindow<f64>,
    cpu_percent: RollingWindow<f64>,
    last_failure_at: Option<DateTime<Utc>>,
    status: HealthStatus,
    blocked_periods: Vec<BlockedPeriod>,
}

impl Metrics {
    fn new(config: &HealthConfig) -> Self {
        Self {
            total: 0,
            success: 0,
            failure: 0,
            consecutive_failures: 0,
            latencies: RollingWindow::new(config.latency_window),
            memory_mb: RollingWindow::new(config.resource_window),
            cpu_percent: RollingWindow::new(config.resource_window),
            last_failure_at: None,
            status: HealthStatus::Healthy,
            blocked_periods: Vec::new(),
        }
    }

    fn failure_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.failure as f64 / self.total as f64
        }
    }
}

#[derive(Debug)]
struct AlertLog {
    history: VecDeque<Alert>,
    capacity: usize,
    emitted: u64,
}

/// Aggregates outcomes into a health status and raises alerts
pub struct HealthMonitor {
    config: HealthConfig,
    block_keywords: Vec<String>,
    metrics: Mutex<Metrics>,
    alerts: Mutex<AlertLog>,
    observers: RwLock<Vec<Arc<dyn AlertObserver>>>,
}

impl HealthMonitor {
    pub fn new(config: HealthConfig) -> Self {
        let block_keywords = config
            .block_keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();

        Self {
            metrics: Mutex::new(Metrics::new(&config)),
            alerts: Mutex::new(AlertLog {
                history: VecDeque::new(),
                capacity: config.alert_history.max(1),
                emitted: 0,
            }),
            observers: RwLock::new(Vec::new()),
            block_keywords,
            config,
        }
    }

    /// Registers an observer; observers are notified in registration order
    pub fn add_observer(&self, observer: Arc<dyn AlertObserver>) {
        tracing::debug!("Registered alert observer '{}'", observer.name());
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    /// Records the outcome of one operation
    ///
    /// # Arguments
    ///
    /// * `success` - Whether the operation succeeded
    /// * `latency` - Response time; only successful latencies enter the window
    /// * `error` - Error text of a failed operation, checked against the block keywords
    pub fn record_outcome(&self, success: bool, latency: Option<Duration>, error: Option<&str>) {
        let consecutive = {
            let mut m = self.lock_metrics();
            m.total += 1;
            if success {
                m.success += 1;
                m.consecutive_failures = 0;
                if let Some(latency) = latency {
                    m.latencies.push(latency.as_secs_f64());
                }
            } else {
                m.failure += 1;
                m.consecutive_failures += 1;
                m.last_failure_at = Some(Utc::now());
            }
            m.consecutive_failures
        };

        if !success {
            if let Some(text) = error {
                if let Some(keyword) = self.match_block_keyword(text) {
                    self.emit(
                        AlertKind::BlockingSuspected,
                        details([
                            ("keyword", json!(keyword)),
                            ("error", json!(text)),
                            ("consecutive_failures", json!(consecutive)),
                        ]),
                    );
                }
            }
        }

        self.refresh_status();
    }

    /// Adds one memory/CPU sample to the resource windows
    pub fn record_resources(&self, memory_mb: Option<f64>, cpu_percent: Option<f64>) {
        let mut m = self.lock_metrics();
        if let Some(memory) = memory_mb {
            m.memory_mb.push(memory);
        }
        if let Some(cpu) = cpu_percent {
            m.cpu_percent.push(cpu);
        }
    }

    /// Derives the status from the current metrics
    pub fn current_status(&self) -> HealthStatus {
        let m = self.lock_metrics();
        self.evaluate(&m)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let m = self.lock_metrics();
        self.snapshot_of(&m)
    }

    pub fn outcome_stats(&self) -> OutcomeStats {
        let m = self.lock_metrics();
        OutcomeStats {
            total: m.total,
            success: m.success,
            failure: m.failure,
            consecutive_failures: m.consecutive_failures,
        }
    }

    /// One monitoring pass: refresh the status, then check each alert condition
    pub fn tick(&self) {
        self.refresh_status();

        let pending = {
            let m = self.lock_metrics();
            self.tick_conditions(&m)
        };

        for (kind, details) in pending {
            self.emit(kind, details);
        }
    }

    /// Alert history, oldest first
    pub fn alerts(&self) -> Vec<Alert> {
        self.lock_alerts().history.iter().cloned().collect()
    }

    /// Total alerts emitted, including those evicted from the history
    pub fn alert_count(&self) -> u64 {
        self.lock_alerts().emitted
    }

    pub fn blocked_periods(&self) -> Vec<BlockedPeriod> {
        self.lock_metrics().blocked_periods.clone()
    }

    fn evaluate(&self, m: &Metrics) -> HealthStatus {
        let cfg = &self.config;

        if m.consecutive_failures >= u64::from(cfg.consecutive_errors_threshold) {
            return HealthStatus::Blocked;
        }

        if m.total > RATE_MIN_REQUESTS {
            let rate = m.failure_rate();
            if rate > cfg.max_error_rate {
                return HealthStatus::Critical;
            }
            if rate > WARNING_ERROR_RATE {
                return HealthStatus::Warning;
            }
        }

        if let Some(avg) = m.latencies.mean() {
            if avg > cfg.max_response_time_secs {
                return HealthStatus::Warning;
            }
        }

        let memory_high = m
            .memory_mb
            .latest()
            .is_some_and(|mb| mb > cfg.max_memory_mb as f64);
        let cpu_high = m
            .cpu_percent
            .latest()
            .is_some_and(|pct| pct > cfg.max_cpu_percent);
        if memory_high || cpu_high {
            return HealthStatus::Warning;
        }

        HealthStatus::Healthy
    }

    /// Re-evaluates the status and emits a status-change alert on transition
    fn refresh_status(&self) -> HealthStatus {
        let transition = {
            let mut m = self.lock_metrics();
            let new = self.evaluate(&m);
            let old = m.status;
            if new != old {
                m.status = new;
                let now = Utc::now();
                if new == HealthStatus::Blocked {
                    m.blocked_periods.push(BlockedPeriod {
                        started_at: now,
                        ended_at: None,
                    });
                } else if old == HealthStatus::Blocked {
                    if let Some(period) = m.blocked_periods.last_mut() {
                        period.ended_at = Some(now);
                    }
                }
                Some((old, new))
            } else {
                None
            }
        };

        match transition {
            Some((old, new)) => {
                self.emit(
                    AlertKind::StatusChange,
                    details([
                        ("old_status", json!(old.as_str())),
                        ("new_status", json!(new.as_str())),
                    ]),
                );
                new
            }
            None => self.lock_metrics().status,
        }
    }

    fn tick_conditions(&self, m: &Metrics) -> Vec<(AlertKind, BTreeMap<String, Value>)> {
        let cfg = &self.config;
        let mut pending = Vec::new();

        let rate = m.failure_rate();
        if m.total > HIGH_FAILURE_MIN_REQUESTS && rate > HIGH_FAILURE_RATE {
            pending.push((
                AlertKind::HighFailureRate,
                details([
                    ("failure_rate", json!(rate)),
                    ("total_requests", json!(m.total)),
                ]),
            ));
        }

        if let Some(avg) = m.latencies.recent_mean(SLOW_RESPONSE_SAMPLE) {
            if avg > cfg.max_response_time_secs {
                pending.push((
                    AlertKind::SlowResponse,
                    details([
                        ("avg_response_time_secs", json!(avg)),
                        ("threshold_secs", json!(cfg.max_response_time_secs)),
                    ]),
                ));
            }
        }

        if let Some(mb) = m.memory_mb.latest() {
            if mb > cfg.max_memory_mb as f64 {
                pending.push((
                    AlertKind::HighMemory,
                    details([
                        ("memory_mb", json!(mb)),
                        ("threshold_mb", json!(cfg.max_memory_mb)),
                    ]),
                ));
            }
        }

        if let Some(pct) = m.cpu_percent.latest() {
            if pct > cfg.max_cpu_percent {
                pending.push((
                    AlertKind::HighCpu,
                    details([
                        ("cpu_percent", json!(pct)),
                        ("threshold_percent", json!(cfg.max_cpu_percent)),
                    ]),
                ));
            }
        }

        pending
    }

    fn match_block_keyword(&self, text: &str) -> Option<&str> {
        let lowered = text.to_lowercase();
        self.block_keywords
            .iter()
            .find(|k| lowered.contains(k.as_str()))
            .map(String::as_str)
    }

    fn snapshot_of(&self, m: &Metrics) -> MetricsSnapshot {
        MetricsSnapshot {
            status: self.evaluate(m),
            total_requests: m.total,
            successful_requests: m.success,
            failed_requests: m.failure,
            consecutive_failures: m.consecutive_failures,
            success_rate: if m.total == 0 {
                1.0
            } else {
                m.success as f64 / m.total as f64
            },
            avg_response_time_secs: m.latencies.mean(),
            memory_mb: m.memory_mb.latest(),
            cpu_percent: m.cpu_percent.latest(),
            last_failure_at: m.last_failure_at,
        }
    }

    /// Records an alert and notifies every observer
    ///
    /// Must be called without the metrics lock held.
    fn emit(&self, kind: AlertKind, details: BTreeMap<String, Value>) {
        let alert = Alert {
            kind,
            timestamp: Utc::now(),
            details,
            metrics: self.snapshot(),
        };

        tracing::warn!("Alert [{}]: {}", alert.kind, format_details(&alert.details));

        {
            let mut log = self.lock_alerts();
            if log.history.len() == log.capacity {
                log.history.pop_front();
            }
            log.history.push_back(alert.clone());
            log.emitted += 1;
        }

        let observers: Vec<Arc<dyn AlertObserver>> = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for observer in observers {
            match panic::catch_unwind(AssertUnwindSafe(|| observer.on_alert(&alert))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!("Alert observer '{}' failed: {}", observer.name(), e);
                }
                Err(_) => {
                    tracing::error!("Alert observer '{}' panicked", observer.name());
                }
            }
        }
    }

    fn lock_metrics(&self) -> std::sync::MutexGuard<'_, Metrics> {
        self.metrics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_alerts(&self) -> std::sync::MutexGuard<'_, AlertLog> {
        self.alerts.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn format_details(details: &BTreeMap<String, Value>) -> String {
    details
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(", ")
}
