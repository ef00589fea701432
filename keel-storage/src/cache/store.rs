//! LRU + TTL cache store.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use indexmap::IndexMap;
use keel_core::{
    content_fingerprint, CacheConfig, Clock, ContentFingerprint, KeelError, KeelResult,
    StorageError, DEFAULT_NAMESPACE,
};
use serde_json::Value;

use super::entry::{CacheEntry, CacheStats};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Mutable cache state guarded by a single mutex.
///
/// `entries` is ordered least-recently-used first.
#[derive(Debug, Default)]
struct CacheInner {
    entries: IndexMap<String, CacheEntry>,
    total_size_bytes: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl CacheInner {
    fn remove_index(&mut self, idx: usize) -> Option<CacheEntry> {
        let (_, entry) = self.entries.shift_remove_index(idx)?;
        self.total_size_bytes = self.total_size_bytes.saturating_sub(entry.size_bytes);
        Some(entry)
    }

    fn remove_key(&mut self, full_key: &str) -> Option<CacheEntry> {
        let idx = self.entries.get_index_of(full_key)?;
        self.remove_index(idx)
    }

    fn mark_most_recent(&mut self, idx: usize) {
        let last = self.entries.len() - 1;
        if idx != last {
            self.entries.move_index(idx, last);
        }
    }
}

/// Namespaced key/value cache with TTL expiry and LRU eviction.
///
/// Every read-modify-write sequence (lookup + touch, insert + evict) runs
/// under one lock acquisition, so concurrent callers never observe a
/// half-applied operation.
#[derive(Debug)]
pub struct CacheStore {
    inner: Mutex<CacheInner>,
    config: CacheConfig,
    clock: Arc<dyn Clock>,
}

impl CacheStore {
    /// Create a cache store.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::CapacityInvalid` if `config.max_size` is 0.
    pub fn new(config: CacheConfig, clock: Arc<dyn Clock>) -> KeelResult<Self> {
        if config.max_size == 0 {
            return Err(StorageError::CapacityInvalid { store: "cache" }.into());
        }
        Ok(Self {
            inner: Mutex::new(CacheInner::default()),
            config,
            clock,
        })
    }

    /// Get the cache configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Build the physical key `"{namespace}:{key}"`.
    pub fn namespaced_key(key: &str, namespace: Option<&str>) -> String {
        format!("{}:{}", namespace.unwrap_or(DEFAULT_NAMESPACE), key)
    }

    /// Content fingerprint suitable for use as a memoization key.
    pub fn fingerprint<I, P>(parts: I) -> ContentFingerprint
    where
        I: IntoIterator<Item = P>,
        P: AsRef<[u8]>,
    {
        content_fingerprint(parts)
    }

    fn lock(&self) -> KeelResult<MutexGuard<'_, CacheInner>> {
        self.inner.lock().map_err(|_| KeelError::poisoned("cache"))
    }

    fn resolve_ttl(&self, ttl: Option<u64>) -> Option<u64> {
        match ttl.unwrap_or(self.config.default_ttl_secs) {
            0 => None,
            secs => Some(secs),
        }
    }

    /// Look up a value.
    ///
    /// A hit bumps the entry's access bookkeeping and moves it to the
    /// most-recently-used position. An expired entry is removed and counted
    /// as a miss.
    pub async fn get(&self, key: &str, namespace: Option<&str>) -> KeelResult<Option<Value>> {
        let full_key = Self::namespaced_key(key, namespace);
        let now = self.clock.now();
        let mut inner = self.lock()?;

        let Some(idx) = inner.entries.get_index_of(&full_key) else {
            inner.misses += 1;
            tracing::trace!(key = %full_key, "cache miss");
            return Ok(None);
        };

        let expired = inner
            .entries
            .get_index(idx)
            .map(|(_, entry)| entry.is_expired(now))
            .unwrap_or(true);
        if expired {
            inner.remove_index(idx);
            inner.misses += 1;
            tracing::debug!(key = %full_key, "cache entry expired on read");
            return Ok(None);
        }

        let value = match inner.entries.get_index_mut(idx) {
            Some((_, entry)) => {
                entry.touch(now);
                entry.value.clone()
            }
            None => return Ok(None),
        };
        inner.mark_most_recent(idx);
        inner.hits += 1;
        tracing::trace!(key = %full_key, "cache hit");
        Ok(Some(value))
    }

    /// Store a value.
    ///
    /// `ttl` of `None` applies the configured default; `Some(0)` never
    /// expires. Inserting a new key into a full store evicts exactly one
    /// least-recently-used entry first. Updating an existing key replaces
    /// it in place and never evicts.
    pub async fn set(
        &self,
        key: &str,
        value: Value,
        ttl: Option<u64>,
        namespace: Option<&str>,
    ) -> KeelResult<()> {
        let namespace = namespace.unwrap_or(DEFAULT_NAMESPACE);
        let full_key = Self::namespaced_key(key, Some(namespace));
        let ttl_seconds = self.resolve_ttl(ttl);
        let now = self.clock.now();
        let mut inner = self.lock()?;

        if let Some(idx) = inner.entries.get_index_of(&full_key) {
            let mut size_delta: (usize, usize) = (0, 0);
            if let Some((_, entry)) = inner.entries.get_index_mut(idx) {
                let old_size = entry.size_bytes;
                entry.update(value, ttl_seconds, now);
                size_delta = (old_size, entry.size_bytes);
            }
            inner.total_size_bytes = inner.total_size_bytes.saturating_sub(size_delta.0) + size_delta.1;
            inner.mark_most_recent(idx);
            return Ok(());
        }

        if inner.entries.len() >= self.config.max_size {
            if let Some(evicted) = inner.remove_index(0) {
                inner.evictions += 1;
                tracing::debug!(
                    evicted = %format!("{}:{}", evicted.namespace, evicted.key),
                    "cache capacity reached, evicted least recently used entry"
                );
            }
        }

        let entry = CacheEntry::new(key, namespace, value, ttl_seconds, now);
        inner.total_size_bytes += entry.size_bytes;
        inner.entries.insert(full_key, entry);
        Ok(())
    }

    /// Remove a key. Returns whether anything was removed.
    pub async fn delete(&self, key: &str, namespace: Option<&str>) -> KeelResult<bool> {
        let full_key = Self::namespaced_key(key, namespace);
        let mut inner = self.lock()?;
        Ok(inner.remove_key(&full_key).is_some())
    }

    /// Whether a live entry exists. Does not count as an access.
    pub async fn exists(&self, key: &str, namespace: Option<&str>) -> KeelResult<bool> {
        let full_key = Self::namespaced_key(key, namespace);
        let now = self.clock.now();
        let mut inner = self.lock()?;

        match inner.entries.get(&full_key).map(|e| e.is_expired(now)) {
            None => Ok(false),
            Some(false) => Ok(true),
            Some(true) => {
                inner.remove_key(&full_key);
                Ok(false)
            }
        }
    }

    /// Remove every entry in `namespace`, or everything when `None`.
    /// Returns the number of entries removed. Hit/miss counters are kept.
    pub async fn clear(&self, namespace: Option<&str>) -> KeelResult<usize> {
        let mut inner = self.lock()?;
        let removed = match namespace {
            None => {
                let count = inner.entries.len();
                inner.entries.clear();
                inner.total_size_bytes = 0;
                count
            }
            Some(ns) => {
                let before = inner.entries.len();
                let mut freed = 0usize;
                inner.entries.retain(|_, entry| {
                    if entry.namespace == ns {
                        freed += entry.size_bytes;
                        false
                    } else {
                        true
                    }
                });
                inner.total_size_bytes = inner.total_size_bytes.saturating_sub(freed);
                before - inner.entries.len()
            }
        };
        tracing::debug!(namespace = ?namespace, removed, "cache cleared");
        Ok(removed)
    }

    /// Eagerly remove every expired entry. Returns the number removed.
    pub async fn cleanup_expired(&self) -> KeelResult<usize> {
        let now = self.clock.now();
        let mut inner = self.lock()?;
        let before = inner.entries.len();
        let mut freed = 0usize;
        inner.entries.retain(|_, entry| {
            if entry.is_expired(now) {
                freed += entry.size_bytes;
                false
            } else {
                true
            }
        });
        inner.total_size_bytes = inner.total_size_bytes.saturating_sub(freed);
        let removed = before - inner.entries.len();
        if removed > 0 {
            tracing::debug!(removed, "swept expired cache entries");
        }
        Ok(removed)
    }

    /// Live keys in `namespace`, least recently used first.
    pub async fn keys(&self, namespace: Option<&str>) -> KeelResult<Vec<String>> {
        let namespace = namespace.unwrap_or(DEFAULT_NAMESPACE);
        let now = self.clock.now();
        let inner = self.lock()?;
        Ok(inner
            .entries
            .values()
            .filter(|e| e.namespace == namespace && !e.is_expired(now))
            .map(|e| e.key.clone())
            .collect())
    }

    /// Inspect an entry without recording an access.
    pub async fn peek(&self, key: &str, namespace: Option<&str>) -> KeelResult<Option<CacheEntry>> {
        let full_key = Self::namespaced_key(key, namespace);
        let now = self.clock.now();
        let inner = self.lock()?;
        Ok(inner
            .entries
            .get(&full_key)
            .filter(|e| !e.is_expired(now))
            .cloned())
    }

    /// Return the cached value, or run `producer` and cache its output.
    ///
    /// The lock is not held while the producer runs, so two concurrent
    /// callers with the same key may both compute; the last write wins.
    pub async fn get_or_insert_with<F, Fut>(
        &self,
        key: &str,
        namespace: Option<&str>,
        ttl: Option<u64>,
        producer: F,
    ) -> KeelResult<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = KeelResult<Value>>,
    {
        if let Some(value) = self.get(key, namespace).await? {
            return Ok(value);
        }
        let value = producer().await?;
        self.set(key, value.clone(), ttl, namespace).await?;
        Ok(value)
    }

    /// Get cache statistics.
    pub async fn get_stats(&self) -> KeelResult<CacheStats> {
        let inner = self.lock()?;
        Ok(CacheStats {
            total_items: inner.entries.len(),
            total_size_bytes: inner.total_size_bytes,
            hit_count: inner.hits,
            miss_count: inner.misses,
            hit_rate: CacheStats::compute_hit_rate(inner.hits, inner.misses),
            eviction_count: inner.evictions,
            memory_usage_mb: inner.total_size_bytes as f64 / BYTES_PER_MB,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::ManualClock;
    use proptest::prelude::*;
    use serde_json::json;

    fn store_with(max_size: usize) -> (CacheStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        let config = CacheConfig {
            max_size,
            default_ttl_secs: 3600,
        };
        let store = CacheStore::new(config, clock.clone()).expect("valid config");
        (store, clock)
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let config = CacheConfig {
            max_size: 0,
            default_ttl_secs: 60,
        };
        let err = CacheStore::new(config, Arc::new(ManualClock::starting_now())).unwrap_err();
        assert_eq!(
            err,
            KeelError::Storage(StorageError::CapacityInvalid { store: "cache" })
        );
    }

    #[test]
    fn test_namespaced_key_format() {
        assert_eq!(CacheStore::namespaced_key("k", None), "default:k");
        assert_eq!(CacheStore::namespaced_key("k", Some("ns")), "ns:k");
    }

    #[tokio::test]
    async fn test_get_miss_then_hit() {
        let (store, _) = store_with(10);
        assert_eq!(store.get("a", None).await.unwrap(), None);

        store.set("a", json!("alpha"), None, None).await.unwrap();
        assert_eq!(store.get("a", None).await.unwrap(), Some(json!("alpha")));

        let stats = store.get_stats().await.unwrap();
        assert_eq!(stats.hit_count, 1);
        assert_eq!(stats.miss_count, 1);
        assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_huge_ttl_keeps_store_usable() {
        let (store, clock) = store_with(10);
        store.set("k", json!(1), Some(u64::MAX), None).await.unwrap();
        store
            .set("j", json!(2), Some(20_000_000_000_000), None)
            .await
            .unwrap();

        clock.advance_secs(365 * 24 * 3600);
        assert_eq!(store.get("k", None).await.unwrap(), Some(json!(1)));
        assert_eq!(store.get("j", None).await.unwrap(), Some(json!(2)));
        assert_eq!(store.get("other", None).await.unwrap(), None);
        assert_eq!(store.get_stats().await.unwrap().total_items, 2);
    }

    #[tokio::test]
    async fn test_get_bumps_access_bookkeeping() {
        let (store, clock) = store_with(10);
        store.set("a", json!(1), None, None).await.unwrap();
        clock.advance_secs(5);
        store.get("a", None).await.unwrap();
        store.get("a", None).await.unwrap();

        let entry = store.peek("a", None).await.unwrap().unwrap();
        assert_eq!(entry.access_count, 2);
        assert_eq!(entry.accessed_at, clock.now());
        assert!(entry.created_at < entry.accessed_at);
    }

    #[tokio::test]
    async fn test_ttl_expiry_removes_on_read() {
        let (store, clock) = store_with(10);
        store.set("k", json!("v"), Some(1), None).await.unwrap();

        clock.advance_secs(1);
        assert_eq!(store.get("k", None).await.unwrap(), Some(json!("v")));

        clock.advance(std::time::Duration::from_millis(1001));
        assert_eq!(store.get("k", None).await.unwrap(), None);

        let stats = store.get_stats().await.unwrap();
        assert_eq!(stats.total_items, 0);
        assert_eq!(stats.miss_count, 1);
    }

    #[tokio::test]
    async fn test_zero_ttl_never_expires() {
        let (store, clock) = store_with(10);
        store.set("pinned", json!(true), Some(0), None).await.unwrap();
        clock.advance_secs(10 * 365 * 24 * 3600);
        assert!(store.exists("pinned", None).await.unwrap());
    }

    #[tokio::test]
    async fn test_lru_evicts_least_recently_accessed() {
        let (store, _) = store_with(3);
        store.set("a", json!(1), None, None).await.unwrap();
        store.set("b", json!(2), None, None).await.unwrap();
        store.set("c", json!(3), None, None).await.unwrap();

        // "a" becomes most recent, so "b" is the LRU victim.
        store.get("a", None).await.unwrap();
        store.set("d", json!(4), None, None).await.unwrap();

        assert!(store.exists("a", None).await.unwrap());
        assert!(!store.exists("b", None).await.unwrap());
        assert!(store.exists("c", None).await.unwrap());
        assert!(store.exists("d", None).await.unwrap());
        assert_eq!(store.get_stats().await.unwrap().eviction_count, 1);
    }

    #[tokio::test]
    async fn test_update_existing_key_never_evicts() {
        let (store, _) = store_with(2);
        store.set("a", json!(1), None, None).await.unwrap();
        store.set("b", json!(2), None, None).await.unwrap();
        store.set("a", json!("one"), None, None).await.unwrap();

        let stats = store.get_stats().await.unwrap();
        assert_eq!(stats.total_items, 2);
        assert_eq!(stats.eviction_count, 0);
        assert_eq!(store.get("a", None).await.unwrap(), Some(json!("one")));
    }

    #[tokio::test]
    async fn test_size_accounting_tracks_updates() {
        let (store, _) = store_with(10);
        store.set("a", json!("xx"), None, None).await.unwrap();
        assert_eq!(store.get_stats().await.unwrap().total_size_bytes, 4);

        store.set("a", json!("xxxx"), None, None).await.unwrap();
        assert_eq!(store.get_stats().await.unwrap().total_size_bytes, 6);

        store.delete("a", None).await.unwrap();
        assert_eq!(store.get_stats().await.unwrap().total_size_bytes, 0);
    }

    #[tokio::test]
    async fn test_namespaces_are_independent() {
        let (store, _) = store_with(10);
        store.set("k", json!("a"), None, Some("ns1")).await.unwrap();
        store.set("k", json!("b"), None, Some("ns2")).await.unwrap();
        store.set("other", json!("c"), None, None).await.unwrap();

        assert_eq!(store.get("k", Some("ns1")).await.unwrap(), Some(json!("a")));
        assert_eq!(store.get("k", None).await.unwrap(), None);

        assert_eq!(store.clear(Some("ns1")).await.unwrap(), 1);
        assert!(!store.exists("k", Some("ns1")).await.unwrap());
        assert!(store.exists("k", Some("ns2")).await.unwrap());

        assert_eq!(store.clear(None).await.unwrap(), 2);
        assert_eq!(store.get_stats().await.unwrap().total_items, 0);
    }

    #[tokio::test]
    async fn test_delete_reports_removal() {
        let (store, _) = store_with(10);
        store.set("a", json!(1), None, None).await.unwrap();
        assert!(store.delete("a", None).await.unwrap());
        assert!(!store.delete("a", None).await.unwrap());
    }

    #[tokio::test]
    async fn test_cleanup_expired_sweeps_all() {
        let (store, clock) = store_with(10);
        store.set("short", json!(1), Some(1), None).await.unwrap();
        store.set("short2", json!(2), Some(2), Some("x")).await.unwrap();
        store.set("long", json!(3), Some(100), None).await.unwrap();

        clock.advance_secs(5);
        assert_eq!(store.cleanup_expired().await.unwrap(), 2);
        assert_eq!(store.keys(None).await.unwrap(), vec!["long".to_string()]);
    }

    #[tokio::test]
    async fn test_get_or_insert_with_memoizes() {
        let (store, _) = store_with(10);
        let key = CacheStore::fingerprint(["fn main() {", "12:4"]);

        let first = store
            .get_or_insert_with(&key, Some("completions"), None, || async {
                Ok(json!("println!()"))
            })
            .await
            .unwrap();
        let second = store
            .get_or_insert_with(&key, Some("completions"), None, || async {
                Ok(json!("never computed"))
            })
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(store.get_stats().await.unwrap().hit_count, 1);
    }

    #[tokio::test]
    async fn test_get_or_insert_with_propagates_producer_error() {
        let (store, _) = store_with(10);
        let result = store
            .get_or_insert_with("k", None, None, || async {
                Err(StorageError::Serialization {
                    reason: "boom".to_string(),
                }
                .into())
            })
            .await;
        assert!(result.is_err());
        assert!(!store.exists("k", None).await.unwrap());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Property: the store never exceeds max_size, and each overflow
        /// evicts the least recently used key.
        #[test]
        fn prop_bounded_size_evicts_lru(max_size in 1usize..8, extra in 1usize..16) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let (store, _) = store_with(max_size);
                let total = max_size + extra;
                for i in 0..total {
                    store.set(&format!("k{i}"), json!(i), None, None).await.unwrap();
                    let stats = store.get_stats().await.unwrap();
                    prop_assert!(stats.total_items <= max_size);
                }
                let keys = store.keys(None).await.unwrap();
                let expected: Vec<String> = (extra..total).map(|i| format!("k{i}")).collect();
                prop_assert_eq!(keys, expected);
                prop_assert_eq!(store.get_stats().await.unwrap().eviction_count, extra as u64);
                Ok(())
            })?;
        }
    }
}
