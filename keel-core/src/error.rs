//! Error types for Keel operations
//!
//! Lookups that find nothing are not errors: they surface as `Ok(None)` or
//! `Ok(false)`. The enums here cover validation failures, poisoned locks and
//! configuration problems so callers can tell "absent" from "failed".

use thiserror::Error;

/// Store-level errors shared by every in-memory store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Storage lock poisoned: {store}")]
    LockPoisoned { store: &'static str },

    #[error("Invalid capacity for {store}: must be greater than 0")]
    CapacityInvalid { store: &'static str },

    #[error("Serialization failed: {reason}")]
    Serialization { reason: String },
}

/// State machine validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("State not found: {key}")]
    NotFound { key: String },

    #[error("Invalid transition for {key}: {from} -> {to}")]
    InvalidTransition { key: String, from: String, to: String },

    #[error("Transition condition failed for {key}: {condition}")]
    ConditionFailed { key: String, condition: String },
}

/// Access control errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AccessError {
    #[error("Unknown role: {role_id}")]
    UnknownRole { role_id: String },

    #[error("Role already exists: {role_id}")]
    RoleExists { role_id: String },

    #[error("System role cannot be modified: {role_id}")]
    SystemRoleImmutable { role_id: String },

    #[error("Quota {quota} exceeded for user {user_id} (limit {limit})")]
    QuotaExceeded {
        user_id: String,
        quota: String,
        limit: u64,
    },
}

/// Session directory errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("Session not found: {session_id}")]
    NotFound { session_id: String },
}

/// Telemetry and logging setup errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TelemetryError {
    #[error("Failed to initialize tracing subscriber: {reason}")]
    SubscriberInit { reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to read config file {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Failed to parse config: {reason}")]
    Parse { reason: String },
}

/// Master error type for all Keel errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeelError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Access error: {0}")]
    Access(#[from] AccessError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for Keel operations.
pub type KeelResult<T> = Result<T, KeelError>;

impl KeelError {
    /// Shorthand for a poisoned lock on the named store.
    pub fn poisoned(store: &'static str) -> Self {
        KeelError::Storage(StorageError::LockPoisoned { store })
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_error_display_invalid_transition() {
        let err = StateError::InvalidTransition {
            key: "task:t1:workflow".to_string(),
            from: "done".to_string(),
            to: "pending".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("task:t1:workflow"));
        assert!(msg.contains("done -> pending"));
    }

    #[test]
    fn test_access_error_display_quota_exceeded() {
        let err = AccessError::QuotaExceeded {
            user_id: "alice".to_string(),
            quota: "completions_per_day".to_string(),
            limit: 1000,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("alice"));
        assert!(msg.contains("completions_per_day"));
        assert!(msg.contains("1000"));
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "cache.max_size".to_string(),
            value: "0".to_string(),
            reason: "must be greater than 0".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("cache.max_size"));
        assert!(msg.contains("must be greater than 0"));
    }

    #[test]
    fn test_storage_error_display_lock_poisoned() {
        let msg = format!("{}", KeelError::poisoned("cache"));
        assert!(msg.contains("lock poisoned"));
        assert!(msg.contains("cache"));
    }

    #[test]
    fn test_keel_error_from_variants() {
        let storage = KeelError::from(StorageError::CapacityInvalid { store: "cache" });
        assert!(matches!(storage, KeelError::Storage(_)));

        let state = KeelError::from(StateError::NotFound {
            key: "k".to_string(),
        });
        assert!(matches!(state, KeelError::State(_)));

        let access = KeelError::from(AccessError::UnknownRole {
            role_id: "ghost".to_string(),
        });
        assert!(matches!(access, KeelError::Access(_)));

        let session = KeelError::from(SessionError::NotFound {
            session_id: "s".to_string(),
        });
        assert!(matches!(session, KeelError::Session(_)));

        let telemetry = KeelError::from(TelemetryError::SubscriberInit {
            reason: "already set".to_string(),
        });
        assert!(matches!(telemetry, KeelError::Telemetry(_)));

        let config = KeelError::from(ConfigError::Parse {
            reason: "bad toml".to_string(),
        });
        assert!(matches!(config, KeelError::Config(_)));
    }
}
