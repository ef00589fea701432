//! Cache entry record and usage statistics.

use keel_core::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single cached value with its access bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Caller-visible key (without the namespace prefix).
    pub key: String,
    pub namespace: String,
    pub value: Value,
    pub created_at: Timestamp,
    pub accessed_at: Timestamp,
    pub access_count: u64,
    /// `None` means the entry never expires.
    pub ttl_seconds: Option<u64>,
    pub expires_at: Option<Timestamp>,
    /// Length of the value's JSON encoding.
    pub size_bytes: usize,
}

impl CacheEntry {
    pub(crate) fn new(
        key: &str,
        namespace: &str,
        value: Value,
        ttl_seconds: Option<u64>,
        now: Timestamp,
    ) -> Self {
        let size_bytes = value.to_string().len();
        Self {
            key: key.to_string(),
            namespace: namespace.to_string(),
            value,
            created_at: now,
            accessed_at: now,
            access_count: 0,
            ttl_seconds,
            expires_at: expiry(ttl_seconds, now),
            size_bytes,
        }
    }

    /// Replace the value in place, keeping `created_at` and the access history.
    pub(crate) fn update(&mut self, value: Value, ttl_seconds: Option<u64>, now: Timestamp) {
        self.size_bytes = value.to_string().len();
        self.value = value;
        self.ttl_seconds = ttl_seconds;
        self.expires_at = expiry(ttl_seconds, now);
        self.accessed_at = now;
    }

    /// Record a read.
    pub(crate) fn touch(&mut self, now: Timestamp) {
        self.accessed_at = now;
        self.access_count += 1;
    }

    /// An entry is logically absent once `now` passes `expires_at`.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        matches!(self.expires_at, Some(expires_at) if now > expires_at)
    }
}

/// TTLs past the representable date range never expire.
fn expiry(ttl_seconds: Option<u64>, now: Timestamp) -> Option<Timestamp> {
    let secs = i64::try_from(ttl_seconds?).ok()?;
    now.checked_add_signed(chrono::Duration::try_seconds(secs)?)
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Entries physically stored (expired ones included until swept).
    pub total_items: usize,
    pub total_size_bytes: usize,
    pub hit_count: u64,
    pub miss_count: u64,
    /// hits / (hits + misses), 0.0 before any lookup.
    pub hit_rate: f64,
    /// Number of evictions due to capacity.
    pub eviction_count: u64,
    pub memory_usage_mb: f64,
}

impl CacheStats {
    pub(crate) fn compute_hit_rate(hits: u64, misses: u64) -> f64 {
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    #[test]
    fn test_hit_rate() {
        assert!((CacheStats::compute_hit_rate(80, 20) - 0.8).abs() < 0.001);
        assert_eq!(CacheStats::compute_hit_rate(0, 0), 0.0);
    }

    #[test]
    fn test_entry_expiry_is_strict() {
        let now = Utc::now();
        let entry = CacheEntry::new("k", "default", json!("v"), Some(1), now);
        let expires_at = entry.expires_at.unwrap();

        assert!(!entry.is_expired(expires_at));
        assert!(entry.is_expired(expires_at + chrono::Duration::milliseconds(1)));
    }

    #[test]
    fn test_entry_without_ttl_never_expires() {
        let now = Utc::now();
        let entry = CacheEntry::new("k", "default", json!({"a": 1}), None, now);
        assert!(!entry.is_expired(now + chrono::Duration::days(3650)));
        assert_eq!(entry.size_bytes, r#"{"a":1}"#.len());
    }

    #[test]
    fn test_out_of_range_ttl_never_expires() {
        let now = Utc::now();
        for ttl in [u64::MAX, i64::MAX as u64, 20_000_000_000_000] {
            let entry = CacheEntry::new("k", "default", json!(1), Some(ttl), now);
            assert_eq!(entry.expires_at, None);
            assert!(!entry.is_expired(now + chrono::Duration::days(3650)));
        }
    }

    #[test]
    fn test_update_keeps_creation_time() {
        let now = Utc::now();
        let mut entry = CacheEntry::new("k", "default", json!(1), Some(10), now);
        entry.touch(now);
        let later = now + chrono::Duration::seconds(5);
        entry.update(json!("longer value"), Some(10), later);

        assert_eq!(entry.created_at, now);
        assert_eq!(entry.access_count, 1);
        assert_eq!(entry.expires_at, Some(later + chrono::Duration::seconds(10)));
    }
}
