use crate::config::DelayConfig;
use crate::control::health::OutcomeStats;
use rand::Rng;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Success ratio above which the delay collapses to the minimum
const FAST_PATH_SUCCESS_RATIO: f64 = 0.9;

/// Cap on the exponential backoff factor
const MAX_BACKOFF_FACTOR: f64 = 8.0;

const JITTER_LOW: f64 = 0.5;
const JITTER_HIGH: f64 = 1.5;

/// Computes the sleep between consecutive requests
///
/// The controller is stateful: the last computed delay is kept so that a run
/// with a middling success ratio holds its pace instead of oscillating.
#[derive(Debug)]
pub struct DelayController {
    config: DelayConfig,
    current: Mutex<f64>,
}

impl DelayController {
    pub fn new(config: DelayConfig) -> Self {
        let initial = config.min_delay_secs;
        Self {
            config,
            current: Mutex::new(initial),
        }
    }

    /// Computes and stores the next delay from the given outcome counters
    ///
    /// Outcomes must be recorded before calling this, otherwise the backoff
    /// lags one operation behind.
    pub fn next_delay(&self, stats: &OutcomeStats) -> Duration {
        let jitter = rand::thread_rng().gen_range(JITTER_LOW..=JITTER_HIGH);
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        let next = compute_delay(&self.config, stats, *current, jitter);
        *current = next;
        Duration::from_secs_f64(next)
    }

    /// The most recently computed delay
    pub fn current_delay(&self) -> Duration {
        let current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        Duration::from_secs_f64(*current)
    }
}

/// Pure delay computation in seconds
///
/// # Arguments
///
/// * `config` - Delay bounds and backoff base
/// * `stats` - Outcome counters at the time of the call
/// * `last` - Previously computed delay, held when the run is neither failing nor healthy
/// * `jitter` - Multiplicative jitter, expected in `[0.5, 1.5]`
pub fn compute_delay(config: &DelayConfig, stats: &OutcomeStats, last: f64, jitter: f64) -> f64 {
    let min = config.min_delay_secs;
    let max = config.max_delay_secs;

    let base = if stats.consecutive_failures > 0 {
        let exponent = stats.consecutive_failures.min(16) as i32;
        config.error_backoff_base_secs * 2f64.powi(exponent).min(MAX_BACKOFF_FACTOR)
    } else if stats.success_ratio() > FAST_PATH_SUCCESS_RATIO {
        min
    } else {
        last
    };

    let clamped = base.clamp(min, max);
    (clamped * jitter).clamp(min, max)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_config() -> DelayConfig {
        DelayConfig {
            min_delay_secs: 2.0,
            max_delay_secs: 8.0,
            error_backoff_base_secs: 5.0,
        }
    }

    fn stats(total: u64, failure: u64, consecutive: u64) -> OutcomeStats {
        OutcomeStats {
            total,
            success: total - failure,
            failure,
            consecutive_failures: consecutive,
        }
    }

    #[test]
    fn test_three_failures_stay_in_bounds() {
        let config = create_test_config();
        let s = stats(3, 3, 3);

        // 5.0 * 8 = 40, clamped to 8, jittered into [4, 12], clamped again
        assert_eq!(compute_delay(&config, &s, 2.0, 0.5), 4.0);
        assert_eq!(compute_delay(&config, &s, 2.0, 1.0), 8.0);
        assert_eq!(compute_delay(&config, &s, 2.0, 1.5), 8.0);

        let controller = DelayController::new(config);
        for _ in 0..50 {
            let delay = controller.next_delay(&s).as_secs_f64();
            assert!((2.0..=8.0).contains(&delay), "delay {} out of bounds", delay);
        }
    }

    #[test]
    fn test_backoff_factor_is_capped() {
        let mut config = create_test_config();
        config.max_delay_secs = 1000.0;
        config.error_backoff_base_secs = 1.0;

        assert_eq!(compute_delay(&config, &stats(1, 1, 1), 2.0, 1.0), 2.0);
        assert_eq!(compute_delay(&config, &stats(2, 2, 2), 2.0, 1.0), 4.0);
        assert_eq!(compute_delay(&config, &stats(3, 3, 3), 2.0, 1.0), 8.0);
        assert_eq!(compute_delay(&config, &stats(60, 60, 60), 2.0, 1.0), 8.0);
    }

    #[test]
    fn test_healthy_streak_collapses_to_min() {
        let config = create_test_config();
        let s = stats(20, 1, 0);
        assert_eq!(compute_delay(&config, &s, 7.0, 1.0), 2.0);
        // Jitter below 1 cannot push below the floor
        assert_eq!(compute_delay(&config, &s, 7.0, 0.5), 2.0);
    }

    #[test]
    fn test_middling_ratio_holds_last_delay() {
        let config = create_test_config();
        let s = stats(10, 3, 0);
        assert_eq!(compute_delay(&config, &s, 6.0, 1.0), 6.0);
        assert_eq!(compute_delay(&config, &s, 6.0, 1.5), 8.0);
    }

    #[test]
    fn test_bounds_hold_for_any_history() {
        let config = create_test_config();
        let mut last = config.min_delay_secs;
        for total in 0..40u64 {
            for failure in 0..=total.min(12) {
                for consecutive in 0..=failure.min(6) {
                    for jitter in [0.5, 0.9, 1.0, 1.3, 1.5] {
                        let d = compute_delay(
                            &config,
                            &stats(total, failure, consecutive),
                            last,
                            jitter,
                        );
                        assert!((2.0..=8.0).contains(&d));
                        last = d;
                    }
                }
            }
        }
    }

    #[test]
    fn test_controller_stores_current_delay() {
        let controller = DelayController::new(create_test_config());
        assert_eq!(controller.current_delay(), Duration::from_secs(2));

        let next = controller.next_delay(&stats(4, 4, 4));
        assert_eq!(controller.current_delay(), next);
    }
}
