//! The adaptive controller facade
//!
//! One [`AdaptiveController`] is shared by every worker through an `Arc`. It
//! owns the health monitor, delay controller, circuit breaker, adaptive policy
//! and result cache, and wires the policy to the monitor as an alert observer.

use crate::cache::{CacheKey, CacheStats, ResultCache};
use crate::config::Config;
use crate::control::alert::AlertObserver;
use crate::control::breaker::{BreakerError, BreakerState, CircuitBreaker};
use crate::control::delay::DelayController;
use crate::control::health::{BlockedPeriod, HealthMonitor, HealthStatus, MetricsSnapshot};
use crate::control::monitor::MonitorTask;
use crate::control::policy::AdaptivePolicy;
use crate::control::resources::{ProcSampler, ResourceSampler};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Error returned by [`AdaptiveController::attempt`]
#[derive(Debug)]
pub enum AttemptError<E> {
    /// The breaker is open; the operation was not attempted and nothing was recorded
    CircuitOpen { retry_in: Duration, failures: u32 },

    /// The operation ran and failed; the failure has been recorded
    Operation(E),
}

impl<E: fmt::Display> fmt::Display for AttemptError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CircuitOpen { retry_in, failures } => write!(
                f,
                "circuit open after {} failures, retry in {:.1}s",
                failures,
                retry_in.as_secs_f64()
            ),
            Self::Operation(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for AttemptError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::CircuitOpen { .. } => None,
            Self::Operation(e) => Some(e),
        }
    }
}

impl<E> AttemptError<E> {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }
}

/// End-of-run view of the control loop
#[derive(Debug, Clone, Serialize)]
pub struct ControlSummary {
    pub metrics: MetricsSnapshot,
    pub blocked_periods: Vec<BlockedPeriod>,
    pub breaker_state: BreakerState,
    pub breaker_failures: u32,
    pub delay_multiplier: f64,

    /// Slowdown for the final health status
    pub status_factor: f64,

    pub current_delay_secs: f64,
    pub adaptations: usize,
    pub alert_count: u64,

    /// Alerts still in the history, counted per kind
    pub alerts_by_kind: BTreeMap<String, usize>,

    pub cache: CacheStats,
}

/// Shared rate-control and failure-recovery core
pub struct AdaptiveController {
    monitor: Arc<HealthMonitor>,
    delay: DelayController,
    breaker: CircuitBreaker,
    policy: Arc<AdaptivePolicy>,
    cache: ResultCache,
    sampler: Arc<dyn ResourceSampler>,
    monitor_interval: Duration,
    monitor_task: Mutex<Option<MonitorTask>>,
}

impl AdaptiveController {
    /// Builds the controller and registers the adaptive policy with the monitor
    ///
    /// # Arguments
    ///
    /// * `config` - Validated configuration
    /// * `cache` - Result cache, already loaded from its store
    pub fn new(config: &Config, cache: ResultCache) -> Self {
        let monitor = Arc::new(HealthMonitor::new(config.health.clone()));
        let policy = Arc::new(AdaptivePolicy::new(config.policy.clone()));
        monitor.add_observer(policy.clone());

        Self {
            monitor,
            delay: DelayController::new(config.delay.clone()),
            breaker: CircuitBreaker::new(config.breaker.clone()),
            policy,
            cache,
            sampler: Arc::new(ProcSampler::default()),
            monitor_interval: config.health.monitor_interval(),
            monitor_task: Mutex::new(None),
        }
    }

    /// Replaces the resource sampler polled by the monitor task
    pub fn with_sampler(mut self, sampler: Arc<dyn ResourceSampler>) -> Self {
        self.sampler = sampler;
        self
    }

    /// Registers an additional alert observer after the policy
    pub fn add_observer(&self, observer: Arc<dyn AlertObserver>) {
        self.monitor.add_observer(observer);
    }

    /// Starts the background monitor task; must be called inside a Tokio runtime
    pub fn start_monitor(&self) {
        let mut slot = self
            .monitor_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(MonitorTask::spawn(
                self.monitor.clone(),
                self.sampler.clone(),
                self.monitor_interval,
            ));
        }
    }

    /// Signals the monitor task to stop and waits briefly for it
    pub async fn stop_monitor(&self) {
        let task = self
            .monitor_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.stop().await;
        }
    }

    /// Runs one operation through the breaker, records its outcome and sleeps
    ///
    /// The outcome is recorded before the next delay is computed, so backoff
    /// reacts to this very operation. A circuit-open rejection returns
    /// immediately: it is neither recorded nor followed by a sleep.
    pub async fn attempt<F, Fut, T, E>(&self, operation: F) -> Result<T, AttemptError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let started = Instant::now();
        let result = self.breaker.execute(operation).await;
        let latency = started.elapsed();

        let outcome = match result {
            Ok(value) => {
                self.monitor.record_outcome(true, Some(latency), None);
                Ok(value)
            }
            Err(BreakerError::Inner(e)) => {
                let text = e.to_string();
                self.monitor.record_outcome(false, Some(latency), Some(&text));
                Err(AttemptError::Operation(e))
            }
            Err(BreakerError::Open { retry_in, failures }) => {
                return Err(AttemptError::CircuitOpen { retry_in, failures });
            }
        };

        let delay = self.next_delay();
        tracing::debug!("Waiting {:.2}s before the next request", delay.as_secs_f64());
        tokio::time::sleep(delay).await;

        outcome
    }

    /// Feeds an outcome measured by the caller into the control loop
    pub fn record(&self, success: bool, latency: Option<Duration>, error: Option<&str>) {
        self.monitor.record_outcome(success, latency, error);
    }

    /// Computes the next delay: controller output scaled by the policy multiplier
    /// and the factor for the current health status
    pub fn next_delay(&self) -> Duration {
        let stats = self.monitor.outcome_stats();
        self.delay.next_delay(&stats).mul_f64(self.delay_scale())
    }

    /// The most recently computed delay, scaled the same way as `next_delay`
    pub fn current_delay(&self) -> Duration {
        self.delay.current_delay().mul_f64(self.delay_scale())
    }

    fn delay_scale(&self) -> f64 {
        let status = self.monitor.current_status();
        self.policy.multiplier() * self.policy.status_factor(status)
    }

    pub fn should_pause(&self) -> bool {
        self.policy.should_pause(&self.monitor.snapshot())
    }

    pub fn health(&self) -> HealthStatus {
        self.monitor.current_status()
    }

    /// Alternate user agent to switch to, once failures have piled up
    pub fn rotate_identity_hint(&self) -> Option<String> {
        let consecutive = self.monitor.outcome_stats().consecutive_failures;
        self.policy
            .recommended_identity(consecutive)
            .map(str::to_string)
    }

    pub fn cached(&self, key: &CacheKey) -> Option<Value> {
        self.cache.get(key)
    }

    pub fn cache_put(&self, key: CacheKey, payload: Value) {
        self.cache.put(key, payload);
    }

    /// Persists the cache; failures are logged and the run continues
    pub fn flush_cache(&self) -> bool {
        match self.cache.flush() {
            Ok(written) => written,
            Err(e) => {
                tracing::warn!("Failed to persist cache: {}", e);
                false
            }
        }
    }

    pub fn monitor(&self) -> &HealthMonitor {
        &self.monitor
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn policy(&self) -> &AdaptivePolicy {
        &self.policy
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn summary(&self) -> ControlSummary {
        let mut alerts_by_kind = BTreeMap::new();
        for alert in self.monitor.alerts() {
            *alerts_by_kind
                .entry(alert.kind.as_str().to_string())
                .or_insert(0) += 1;
        }

        ControlSummary {
            metrics: self.monitor.snapshot(),
            blocked_periods: self.monitor.blocked_periods(),
            breaker_state: self.breaker.state(),
            breaker_failures: self.breaker.failure_count(),
            delay_multiplier: self.policy.multiplier(),
            status_factor: self.policy.status_factor(self.monitor.current_status()),
            current_delay_secs: self.current_delay().as_secs_f64(),
            adaptations: self.policy.adaptations().len(),
            alert_count: self.monitor.alert_count(),
            alerts_by_kind,
            cache: self.cache.stats(),
        }
    }
}
