use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Number of items a payload holds: array length, otherwise 1
pub fn item_count(payload: &Value) -> usize {
    match payload {
        Value::Array(items) => items.len(),
        _ => 1,
    }
}

/// A memoized operation result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The operation's result, returned unchanged on a hit
    pub payload: Value,

    /// When the entry was stored; drives both expiry and eviction
    pub stored_at: DateTime<Utc>,

    /// Number of items in the payload (array length, otherwise 1)
    pub item_count: usize,
}

impl CacheEntry {
    pub fn new(payload: Value, stored_at: DateTime<Utc>) -> Self {
        let item_count = item_count(&payload);
        Self {
            payload,
            stored_at,
            item_count,
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.stored_at
    }

    /// An entry is stale once its age reaches the TTL
    pub fn is_expired(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        self.age(now) >= ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_item_count() {
        let now = Utc::now();
        assert_eq!(CacheEntry::new(json!([1, 2, 3]), now).item_count, 3);
        assert_eq!(CacheEntry::new(json!({"body": "x"}), now).item_count, 1);
        assert_eq!(CacheEntry::new(json!([]), now).item_count, 0);
    }

    #[test]
    fn test_expiry_boundary() {
        let now = Utc::now();
        let ttl = Duration::hours(24);
        let entry = CacheEntry::new(json!("x"), now - ttl);
        assert!(entry.is_expired(ttl, now));

        let fresh = CacheEntry::new(json!("x"), now - Duration::hours(23));
        assert!(!fresh.is_expired(ttl, now));
    }
}
