//! Keel Core - Shared Types
//!
//! Identity and time aliases, the error taxonomy, the clock abstraction and
//! the layered configuration used by every Keel store. All other crates
//! depend on this one; it carries no store logic of its own.

pub mod clock;
pub mod config;
pub mod error;
pub mod identity;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    CacheConfig, KeelConfig, LoggingConfig, SessionConfig, StateConfig, TelemetryConfig,
};
pub use error::{
    AccessError, ConfigError, KeelError, KeelResult, SessionError, StateError, StorageError,
    TelemetryError,
};
pub use identity::{
    content_fingerprint, new_entity_id, ContentFingerprint, EntityId, Timestamp, DEFAULT_NAMESPACE,
    WILDCARD,
};
