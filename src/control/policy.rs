use crate::config::PolicyConfig;
use crate::control::alert::{Alert, AlertKind, AlertObserver, ObserverError};
use crate::control::health::{HealthStatus, MetricsSnapshot};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Factor applied to the multiplier on each high-failure-rate alert
const FAILURE_RATE_STEP: f64 = 1.5;

const ADAPTATION_LOG_CAPACITY: usize = 100;

const BLOCKED_FACTOR: f64 = 4.0;
const CRITICAL_FACTOR: f64 = 2.0;
const WARNING_FACTOR: f64 = 1.5;

/// One multiplier change, kept for the run summary
#[derive(Debug, Clone, Serialize)]
pub struct Adaptation {
    pub timestamp: DateTime<Utc>,
    pub trigger: AlertKind,
    pub old_multiplier: f64,
    pub new_multiplier: f64,
}

#[derive(Debug)]
struct PolicyState {
    multiplier: f64,
    log: VecDeque<Adaptation>,
}

/// Turns alerts into a delay multiplier, a pause gate and identity hints
///
/// The policy is registered as an alert observer; it only reads the metrics it
/// is handed and never calls back into the monitor.
#[derive(Debug)]
pub struct AdaptivePolicy {
    config: PolicyConfig,
    state: Mutex<PolicyState>,
}

impl AdaptivePolicy {
    pub fn new(config: PolicyConfig) -> Self {
        Self {
            config,
            state: Mutex::new(PolicyState {
                multiplier: 1.0,
                log: VecDeque::new(),
            }),
        }
    }

    /// Current delay multiplier, in `[1.0, max_multiplier]`
    pub fn multiplier(&self) -> f64 {
        self.lock().multiplier
    }

    /// Extra slowdown for the current health status, on top of the multiplier
    ///
    /// The alert-driven multiplier only moves when the monitor ticks; this
    /// factor follows the status on every delay computation.
    pub fn status_factor(&self, status: HealthStatus) -> f64 {
        match status {
            HealthStatus::Blocked => BLOCKED_FACTOR,
            HealthStatus::Critical => CRITICAL_FACTOR,
            HealthStatus::Warning => WARNING_FACTOR,
            HealthStatus::Healthy => 1.0,
        }
    }

    /// Whether cooperative callers should hold off before the next operation
    pub fn should_pause(&self, snapshot: &MetricsSnapshot) -> bool {
        snapshot.status == HealthStatus::Blocked
            || snapshot.consecutive_failures >= u64::from(self.config.pause_threshold)
    }

    /// Alternate identity to use after repeated failures
    ///
    /// The pick is `user_agents[consecutive_failures % len]`, so it is
    /// reproducible for a given failure count.
    pub fn recommended_identity(&self, consecutive_failures: u64) -> Option<&str> {
        if consecutive_failures < u64::from(self.config.rotation_threshold) {
            return None;
        }
        let pool = &self.config.user_agents;
        if pool.is_empty() {
            return None;
        }
        let index = (consecutive_failures % pool.len() as u64) as usize;
        pool.get(index).map(String::as_str)
    }

    /// Multiplier changes so far, oldest first
    pub fn adaptations(&self) -> Vec<Adaptation> {
        self.lock().log.iter().cloned().collect()
    }

    fn adjust(&self, trigger: AlertKind, update: impl FnOnce(f64) -> f64) {
        let mut state = self.lock();
        let old = state.multiplier;
        let new = update(old).clamp(1.0, self.config.max_multiplier);
        if new == old {
            return;
        }

        state.multiplier = new;
        if state.log.len() == ADAPTATION_LOG_CAPACITY {
            state.log.pop_front();
        }
        state.log.push_back(Adaptation {
            timestamp: Utc::now(),
            trigger,
            old_multiplier: old,
            new_multiplier: new,
        });
        tracing::info!(
            "Delay multiplier {:.2} -> {:.2} after {}",
            old,
            new,
            trigger
        );
    }

    fn lock(&self) -> MutexGuard<'_, PolicyState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl AlertObserver for AdaptivePolicy {
    fn name(&self) -> &str {
        "adaptive-policy"
    }

    fn on_alert(&self, alert: &Alert) -> Result<(), ObserverError> {
        let max = self.config.max_multiplier;
        match alert.kind {
            AlertKind::HighFailureRate => self.adjust(alert.kind, |m| m * FAILURE_RATE_STEP),
            AlertKind::BlockingSuspected => self.adjust(alert.kind, |_| max),
            AlertKind::SlowResponse => {
                tracing::info!("Slow responses observed, keeping current pace");
            }
            AlertKind::StatusChange | AlertKind::HighMemory | AlertKind::HighCpu => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn create_test_config() -> PolicyConfig {
        PolicyConfig {
            max_multiplier: 8.0,
            pause_threshold: 10,
            rotation_threshold: 5,
            user_agents: vec!["ua-0".into(), "ua-1".into(), "ua-2".into()],
        }
    }

    fn snapshot(status: HealthStatus, consecutive: u64) -> MetricsSnapshot {
        MetricsSnapshot {
            status,
            total_requests: consecutive,
            successful_requests: 0,
            failed_requests: consecutive,
            consecutive_failures: consecutive,
            success_rate: 0.0,
            avg_response_time_secs: None,
            memory_mb: None,
            cpu_percent: None,
            last_failure_at: None,
        }
    }

    fn alert(kind: AlertKind) -> Alert {
        Alert {
            kind,
            timestamp: Utc::now(),
            details: BTreeMap::new(),
            metrics: snapshot(HealthStatus::Healthy, 0),
        }
    }

    #[test]
    fn test_high_failure_rate_compounds_and_caps() {
        let policy = AdaptivePolicy::new(create_test_config());

        policy.on_alert(&alert(AlertKind::HighFailureRate)).unwrap();
        assert_eq!(policy.multiplier(), 1.5);
        policy.on_alert(&alert(AlertKind::HighFailureRate)).unwrap();
        assert_eq!(policy.multiplier(), 2.25);

        for _ in 0..10 {
            policy.on_alert(&alert(AlertKind::HighFailureRate)).unwrap();
        }
        assert_eq!(policy.multiplier(), 8.0);
    }

    #[test]
    fn test_blocking_jumps_to_max() {
        let policy = AdaptivePolicy::new(create_test_config());
        policy.on_alert(&alert(AlertKind::BlockingSuspected)).unwrap();
        assert_eq!(policy.multiplier(), 8.0);

        let log = policy.adaptations();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].trigger, AlertKind::BlockingSuspected);
        assert_eq!(log[0].old_multiplier, 1.0);
    }

    #[test]
    fn test_informational_alerts_leave_multiplier() {
        let policy = AdaptivePolicy::new(create_test_config());
        for kind in [
            AlertKind::SlowResponse,
            AlertKind::StatusChange,
            AlertKind::HighMemory,
            AlertKind::HighCpu,
        ] {
            policy.on_alert(&alert(kind)).unwrap();
        }
        assert_eq!(policy.multiplier(), 1.0);
        assert!(policy.adaptations().is_empty());
    }

    #[test]
    fn test_status_factor_per_status() {
        let policy = AdaptivePolicy::new(create_test_config());
        assert_eq!(policy.status_factor(HealthStatus::Healthy), 1.0);
        assert_eq!(policy.status_factor(HealthStatus::Warning), 1.5);
        assert_eq!(policy.status_factor(HealthStatus::Critical), 2.0);
        assert_eq!(policy.status_factor(HealthStatus::Blocked), 4.0);
    }

    #[test]
    fn test_status_factor_ignores_multiplier() {
        let policy = AdaptivePolicy::new(create_test_config());
        policy.on_alert(&alert(AlertKind::BlockingSuspected)).unwrap();
        assert_eq!(policy.multiplier(), 8.0);
        assert_eq!(policy.status_factor(HealthStatus::Critical), 2.0);
    }

    #[test]
    fn test_should_pause() {
        let policy = AdaptivePolicy::new(create_test_config());
        assert!(!policy.should_pause(&snapshot(HealthStatus::Critical, 9)));
        assert!(policy.should_pause(&snapshot(HealthStatus::Critical, 10)));
        assert!(policy.should_pause(&snapshot(HealthStatus::Blocked, 0)));
        assert!(!policy.should_pause(&snapshot(HealthStatus::Healthy, 0)));
    }

    #[test]
    fn test_identity_rotation_is_deterministic() {
        let policy = AdaptivePolicy::new(create_test_config());
        assert_eq!(policy.recommended_identity(0), None);
        assert_eq!(policy.recommended_identity(4), None);
        assert_eq!(policy.recommended_identity(5), Some("ua-2"));
        assert_eq!(policy.recommended_identity(6), Some("ua-0"));
        assert_eq!(policy.recommended_identity(7), Some("ua-1"));
        assert_eq!(policy.recommended_identity(6), policy.recommended_identity(6));
    }
}
