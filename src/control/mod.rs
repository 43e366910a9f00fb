//! Adaptive rate control and failure recovery
//!
//! This module contains the feedback loop that decides how hard the harvester
//! may push the target site:
//! - a delay controller with exponential backoff, hysteresis and jitter
//! - a health monitor that classifies the run and raises alerts
//! - a circuit breaker that fails fast while the site keeps refusing
//! - an adaptive policy that reacts to alerts
//! - a background task that samples resources and ticks the monitor

mod alert;
mod breaker;
mod controller;
mod delay;
mod health;
mod monitor;
mod policy;
mod resources;
mod window;

pub use alert::{Alert, AlertKind, AlertObserver, ObserverError};
pub use breaker::{BreakerError, BreakerState, CircuitBreaker};
pub use controller::{AdaptiveController, AttemptError, ControlSummary};
pub use delay::{compute_delay, DelayController};
pub use health::{BlockedPeriod, HealthMonitor, HealthStatus, MetricsSnapshot, OutcomeStats};
pub use monitor::MonitorTask;
pub use policy::{Adaptation, AdaptivePolicy};
pub use resources::{ProcSampler, ResourceSample, ResourceSampler, SampleError};
pub use window::RollingWindow;
