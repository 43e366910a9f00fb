//! Circuit breaker
//!
//! Stops calling a failing site for a cooldown period. The Open to HalfOpen
//! transition is evaluated lazily when a call arrives; there is no timer. While
//! HalfOpen exactly one probe call is let through and every other caller is
//! rejected until the probe settles.

use crate::config::BreakerConfig;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// Calls flow normally
    Closed,

    /// Calls are rejected until the recovery timeout elapses
    Open,

    /// A single probe call decides between Closed and Open
    HalfOpen,
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Error returned by [`CircuitBreaker::execute`]
#[derive(Debug)]
pub enum BreakerError<E> {
    /// The call was rejected without invoking the operation
    Open { retry_in: Duration, failures: u32 },

    /// The operation ran and failed
    Inner(E),
}

impl<E: fmt::Display> fmt::Display for BreakerError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open { retry_in, failures } => write!(
                f,
                "circuit breaker open after {} failures, retry in {:.1}s",
                failures,
                retry_in.as_secs_f64()
            ),
            Self::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for BreakerError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Open { .. } => None,
            Self::Inner(e) => Some(e),
        }
    }
}

impl<E> BreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open { .. })
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    failure_count: u32,
    last_failure: Option<Instant>,
    probe_in_flight: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Probe,
}

/// Hard stop/resume gate around the site operation
#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failure_count: 0,
                last_failure: None,
                probe_in_flight: false,
            }),
        }
    }

    /// Runs `operation` unless the breaker is open
    ///
    /// Errors from the operation are passed through after bookkeeping; the
    /// breaker only decides whether the call is attempted.
    ///
    /// # Returns
    ///
    /// * `Ok(T)` - The operation succeeded
    /// * `Err(BreakerError::Open)` - Rejected; the operation was never invoked
    /// * `Err(BreakerError::Inner(e))` - The operation ran and failed
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let admission = self.admit::<E>()?;
        let mut guard = ProbeGuard {
            breaker: self,
            armed: admission == Admission::Probe,
        };

        let result = operation().await;
        guard.armed = false;
        let probe = admission == Admission::Probe;

        match result {
            Ok(value) => {
                self.on_success(probe);
                Ok(value)
            }
            Err(e) => {
                self.on_failure(probe);
                Err(BreakerError::Inner(e))
            }
        }
    }

    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    /// Time until an open breaker will admit a probe, if it is open
    pub fn retry_in(&self) -> Option<Duration> {
        let inner = self.lock();
        match inner.state {
            BreakerState::Open => Some(self.remaining(&inner)),
            BreakerState::Closed | BreakerState::HalfOpen => None,
        }
    }

    fn admit<E>(&self) -> Result<Admission, BreakerError<E>> {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed => Ok(Admission::Normal),
            BreakerState::Open => {
                let elapsed = inner.last_failure.map(|t| t.elapsed());
                if elapsed.map_or(true, |e| e > self.config.recovery_timeout()) {
                    tracing::info!("Circuit breaker half-open, sending probe");
                    inner.state = BreakerState::HalfOpen;
                    inner.probe_in_flight = true;
                    Ok(Admission::Probe)
                } else {
                    Err(BreakerError::Open {
                        retry_in: self.remaining(&inner),
                        failures: inner.failure_count,
                    })
                }
            }
            BreakerState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(BreakerError::Open {
                        retry_in: Duration::ZERO,
                        failures: inner.failure_count,
                    })
                } else {
                    inner.probe_in_flight = true;
                    Ok(Admission::Probe)
                }
            }
        }
    }

    fn on_success(&self, probe: bool) {
        let mut inner = self.lock();
        if probe {
            inner.probe_in_flight = false;
        }
        match inner.state {
            BreakerState::HalfOpen if probe => {
                tracing::info!("Circuit breaker closed after successful probe");
                inner.state = BreakerState::Closed;
                inner.failure_count = 0;
            }
            BreakerState::Closed => {
                if self.config.decay_on_success {
                    inner.failure_count = inner.failure_count.saturating_sub(1);
                }
            }
            // Straggler admitted while Closed; only the probe decides
            BreakerState::HalfOpen | BreakerState::Open => {}
        }
    }

    fn on_failure(&self, probe: bool) {
        let mut inner = self.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure = Some(Instant::now());
        if probe {
            inner.probe_in_flight = false;
        }

        match inner.state {
            BreakerState::HalfOpen => {
                tracing::warn!("Circuit breaker probe failed, reopening");
                inner.state = BreakerState::Open;
            }
            BreakerState::Closed => {
                if inner.failure_count >= self.config.failure_threshold {
                    tracing::error!(
                        "Circuit breaker opened after {} failures",
                        inner.failure_count
                    );
                    inner.state = BreakerState::Open;
                }
            }
            BreakerState::Open => {}
        }
    }

    fn remaining(&self, inner: &BreakerInner) -> Duration {
        let elapsed = inner
            .last_failure
            .map(|t| t.elapsed())
            .unwrap_or(Duration::MAX);
        self.config.recovery_timeout().saturating_sub(elapsed)
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Releases the probe slot if a probe future is dropped before it settles
struct ProbeGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.lock().probe_in_flight = false;
        }
    }
}
