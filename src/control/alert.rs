//! Alert records and the observer interface
//!
//! Alerts are notifications raised by the health monitor. They carry a copy of
//! the metrics at emission time and never change monitor state themselves;
//! observers such as the adaptive policy decide how to react.

use crate::control::health::MetricsSnapshot;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Kinds of alerts the health monitor can raise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// The derived health status changed
    StatusChange,

    /// A failure carried error text matching a block keyword
    BlockingSuspected,

    /// Sustained failure rate above 50% over more than 20 requests
    HighFailureRate,

    /// Recent average latency above the configured ceiling
    SlowResponse,

    /// Latest memory sample above the configured ceiling
    HighMemory,

    /// Latest CPU sample above the configured ceiling
    HighCpu,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StatusChange => "status_change",
            Self::BlockingSuspected => "blocking_suspected",
            Self::HighFailureRate => "high_failure_rate",
            Self::SlowResponse => "slow_response",
            Self::HighMemory => "high_memory",
            Self::HighCpu => "high_cpu",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable alert record
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub timestamp: DateTime<Utc>,
    pub details: BTreeMap<String, Value>,
    pub metrics: MetricsSnapshot,
}

impl Alert {
    /// Returns a detail value by key
    pub fn detail(&self, key: &str) -> Option<&Value> {
        self.details.get(key)
    }
}

/// Error returned by an observer; logged and otherwise ignored
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ObserverError(pub String);

/// Receives alerts synchronously, in registration order
pub trait AlertObserver: Send + Sync {
    /// Name used when logging observer failures
    fn name(&self) -> &str;

    fn on_alert(&self, alert: &Alert) -> Result<(), ObserverError>;
}

/// Builds a details map from key/value pairs
pub(crate) fn details<const N: usize>(pairs: [(&str, Value); N]) -> BTreeMap<String, Value> {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_labels_are_distinct() {
        let kinds = [
            AlertKind::StatusChange,
            AlertKind::BlockingSuspected,
            AlertKind::HighFailureRate,
            AlertKind::SlowResponse,
            AlertKind::HighMemory,
            AlertKind::HighCpu,
        ];
        let labels: std::collections::HashSet<_> = kinds.iter().map(|k| k.as_str()).collect();
        assert_eq!(labels.len(), kinds.len());
        assert_eq!(AlertKind::HighFailureRate.to_string(), "high_failure_rate");
    }

    #[test]
    fn test_details_builder() {
        let map = details([("keyword", json!("captcha")), ("count", json!(3))]);
        assert_eq!(map.get("keyword"), Some(&json!("captcha")));
        assert_eq!(map.len(), 2);
    }
}
