//! Run progress shared by the workers
//!
//! Every finished target is handed to [`RunProgress::record`], which keeps the
//! outcome and logs a `[n/total]` line with an estimate of the time left.
//! Outcomes are stored as they complete, so a worker that dies later cannot
//! take earlier results with it.

use crate::output::TargetOutcome;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct ProgressState {
    outcomes: Vec<TargetOutcome>,
    elapsed_secs: f64,
}

#[derive(Debug)]
pub struct RunProgress {
    total: usize,
    workers: usize,
    state: Mutex<ProgressState>,
}

impl RunProgress {
    /// # Arguments
    ///
    /// * `total` - Number of targets in the run
    /// * `workers` - Targets processed in parallel, used to scale the estimate
    pub fn new(total: usize, workers: usize) -> Self {
        Self {
            total,
            workers: workers.max(1),
            state: Mutex::new(ProgressState::default()),
        }
    }

    /// Stores a finished target and logs progress
    pub fn record(&self, outcome: TargetOutcome) {
        let (completed, eta) = {
            let mut state = self.lock();
            state.elapsed_secs += outcome.elapsed_secs;
            state.outcomes.push(outcome.clone());
            (state.outcomes.len(), self.eta_of(&state))
        };

        tracing::info!(
            "[{}/{}] {}: {} in {:.1}s | ETA: {}",
            completed,
            self.total,
            outcome.category,
            outcome.status,
            outcome.elapsed_secs,
            eta.map(format_eta).unwrap_or_else(|| "calculating".to_string())
        );
    }

    pub fn completed(&self) -> usize {
        self.lock().outcomes.len()
    }

    /// Estimated seconds left, from the average time per finished target
    ///
    /// Remaining targets are processed `workers` at a time. `None` until the
    /// first target finishes.
    pub fn eta_secs(&self) -> Option<f64> {
        self.eta_of(&self.lock())
    }

    /// Takes the recorded outcomes, leaving the tracker empty
    pub fn take_outcomes(&self) -> Vec<TargetOutcome> {
        std::mem::take(&mut self.lock().outcomes)
    }

    fn eta_of(&self, state: &ProgressState) -> Option<f64> {
        let completed = state.outcomes.len();
        if completed == 0 {
            return None;
        }
        let average = state.elapsed_secs / completed as f64;
        let remaining = self.total.saturating_sub(completed);
        let rounds = (remaining as f64 / self.workers as f64).ceil();
        Some(rounds * average)
    }

    fn lock(&self) -> MutexGuard<'_, ProgressState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Renders an estimate as seconds, minutes or hours
pub fn format_eta(secs: f64) -> String {
    if secs < 60.0 {
        format!("{:.0}s", secs)
    } else if secs < 3600.0 {
        format!("{:.1}min", secs / 60.0)
    } else {
        format!("{:.1}h", secs / 3600.0)
    }
}
