//! Namespaced memoization cache with TTL expiry and LRU eviction.
//!
//! Keys are stored physically as `"{namespace}:{key}"`; callers that do not
//! name a namespace land in [`DEFAULT_NAMESPACE`](keel_core::DEFAULT_NAMESPACE).
//!
//! # Expiry
//!
//! An entry is logically absent as soon as `now > expires_at`. Expired entries
//! stay physically stored until the next read of that key (lazy removal) or an
//! explicit [`CacheStore::cleanup_expired`] sweep.
//!
//! # Eviction
//!
//! Entries are kept in access order. When a *new* key arrives and the store
//! already holds `max_size` entries, exactly one entry is evicted from the
//! least-recently-used end. Overwriting an existing key never evicts.
//!
//! # Example
//!
//! ```ignore
//! let cache = CacheStore::new(CacheConfig::default(), clock);
//! let key = CacheStore::fingerprint([source.as_bytes(), cursor.as_bytes()]);
//! let completion = cache
//!     .get_or_insert_with(&key, Some("completions"), None, || generate(&source))
//!     .await?;
//! ```

mod entry;
mod store;

pub use entry::{CacheEntry, CacheStats};
pub use store::CacheStore;
