//! Identity types for Keel records

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Identifier for snapshots, sessions and assignments.
/// UUIDv7 embeds a Unix timestamp, making IDs naturally sortable by creation time.
pub type EntityId = Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Hex-encoded SHA-256 digest used as a memoization key.
pub type ContentFingerprint = String;

/// Namespace used when a cache caller does not name one.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Token matching any permission, resource type or action.
pub const WILDCARD: &str = "*";

/// Generate a new UUIDv7 EntityId (timestamp-sortable).
pub fn new_entity_id() -> EntityId {
    Uuid::now_v7()
}

/// Compute a SHA-256 fingerprint over an ordered list of content parts.
///
/// Each part is length-prefixed so `["ab", "c"]` and `["a", "bc"]` hash differently.
pub fn content_fingerprint<I, P>(parts: I) -> ContentFingerprint
where
    I: IntoIterator<Item = P>,
    P: AsRef<[u8]>,
{
    let mut hasher = Sha256::new();
    for part in parts {
        let bytes = part.as_ref();
        hasher.update((bytes.len() as u64).to_le_bytes());
        hasher.update(bytes);
    }
    hex::encode(hasher.finalize())
}
