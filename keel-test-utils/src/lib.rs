//! Keel Test Utilities
//!
//! Shared test infrastructure for the Keel workspace:
//! - Stub collaborators (git metadata)
//! - Proptest generators for keys, priorities and metric series
//! - Fixtures built on a deterministic clock
//! - Assertions for Keel error variants

pub use keel_core::{
    AccessError, CacheConfig, Clock, KeelConfig, KeelError, KeelResult, ManualClock,
    SessionConfig, StateConfig, StateError, TelemetryConfig, Timestamp,
};
pub use keel_storage::{GitInfo, GitInfoProvider};

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

// ============================================================================
// STUB PROVIDERS
// ============================================================================

/// Git provider that answers instantly with canned metadata.
#[derive(Debug, Default)]
pub struct StubGitProvider {
    info: GitInfo,
    calls: AtomicUsize,
}

impl StubGitProvider {
    pub fn new(branch: &str, commit: &str) -> Self {
        Self {
            info: GitInfo {
                branch: Some(branch.to_string()),
                commit: Some(commit.to_string()),
            },
            calls: AtomicUsize::new(0),
        }
    }

    /// Behaves like a directory that isn't a repository.
    pub fn not_a_repo() -> Self {
        Self::default()
    }

    /// Number of lookups served so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GitInfoProvider for StubGitProvider {
    async fn git_info(&self, _working_directory: &Path) -> GitInfo {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.info.clone()
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for Keel inputs.

    use super::*;
    use proptest::prelude::*;
    use serde_json::Value;

    /// Cache keys: short, printable, no namespace separator.
    pub fn arb_cache_key() -> impl Strategy<Value = String> {
        "[a-z0-9_-]{1,24}"
    }

    pub fn arb_namespace() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("default".to_string()),
            Just("completions".to_string()),
            "[a-z]{3,10}",
        ]
    }

    /// Priorities clustered in a small band so ties are common.
    pub fn arb_priority() -> impl Strategy<Value = i64> {
        -3i64..=5
    }

    /// A non-empty series of finite metric values.
    pub fn arb_metric_series() -> impl Strategy<Value = Vec<f64>> {
        prop::collection::vec(-1.0e6f64..1.0e6, 1..150)
    }

    /// Small JSON payloads for cache values.
    pub fn arb_json_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::from),
            any::<i64>().prop_map(Value::from),
            "[ -~]{0,64}".prop_map(Value::from),
        ]
    }

    /// Configurations that pass `KeelConfig::validate`.
    pub fn arb_valid_config() -> impl Strategy<Value = KeelConfig> {
        (1usize..5000, 0u64..86_400, 1usize..500, 1usize..200, 0.5f64..10.0).prop_map(
            |(max_size, ttl, batch_size, window, z)| {
                let mut config = KeelConfig::default();
                config.cache.max_size = max_size;
                config.cache.default_ttl_secs = ttl;
                config.telemetry.batch_size = batch_size;
                config.telemetry.anomaly_window = window;
                config.telemetry.anomaly_z_threshold = z;
                config
            },
        )
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common test scenarios.

    use super::*;
    use std::sync::Arc;

    use chrono::TimeZone;
    use keel_access::AccessControlEngine;
    use keel_storage::{CacheStore, PriorityTaskQueue, SessionDirectory, StateMachineRegistry};
    use keel_telemetry::TelemetryCollector;

    /// 2024-01-01T00:00:00Z.
    pub fn epoch() -> Timestamp {
        chrono::Utc
            .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
            .single()
            .unwrap_or_else(chrono::Utc::now)
    }

    /// A manual clock frozen at [`epoch`].
    pub fn manual_clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(epoch()))
    }

    /// Default configuration with small capacities and a short git timeout.
    pub fn test_config() -> KeelConfig {
        let mut config = KeelConfig::default();
        config.cache.max_size = 16;
        config.cache.default_ttl_secs = 60;
        config.telemetry.batch_size = 10;
        config.state.audit_capacity = 100;
        config.session.git_timeout_ms = 200;
        config
    }

    pub fn cache(clock: Arc<ManualClock>, max_size: usize) -> CacheStore {
        let config = CacheConfig {
            max_size,
            ..test_config().cache
        };
        CacheStore::new(config, clock).unwrap_or_else(|e| panic!("cache fixture: {e}"))
    }

    pub fn access(clock: Arc<ManualClock>) -> AccessControlEngine {
        AccessControlEngine::new(clock)
    }

    pub fn telemetry(clock: Arc<ManualClock>) -> TelemetryCollector {
        TelemetryCollector::new(test_config().telemetry, clock)
            .unwrap_or_else(|e| panic!("telemetry fixture: {e}"))
    }

    pub fn state_registry(clock: Arc<ManualClock>) -> StateMachineRegistry {
        StateMachineRegistry::new(test_config().state, clock)
            .unwrap_or_else(|e| panic!("state fixture: {e}"))
    }

    pub fn sessions(clock: Arc<ManualClock>, git: Arc<StubGitProvider>) -> SessionDirectory {
        SessionDirectory::new(test_config().session, git, clock)
    }

    pub fn queue<T: Send>(clock: Arc<ManualClock>) -> PriorityTaskQueue<T> {
        PriorityTaskQueue::new(clock)
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for Keel error variants.

    use super::*;

    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &KeelResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    /// Assert a `StateError::NotFound` for `key`.
    #[track_caller]
    pub fn assert_state_not_found<T: std::fmt::Debug>(result: &KeelResult<T>, key: &str) {
        match result {
            Err(KeelError::State(StateError::NotFound { key: k })) => {
                assert_eq!(k, key, "Wrong key in NotFound error");
            }
            other => panic!("Expected state NotFound for {}, got: {:?}", key, other),
        }
    }

    /// Assert a `StateError::InvalidTransition` between `from` and `to`.
    #[track_caller]
    pub fn assert_invalid_transition<T: std::fmt::Debug>(
        result: &KeelResult<T>,
        from: &str,
        to: &str,
    ) {
        match result {
            Err(KeelError::State(StateError::InvalidTransition { from: f, to: t, .. })) => {
                assert_eq!((f.as_str(), t.as_str()), (from, to));
            }
            other => panic!(
                "Expected InvalidTransition {} -> {}, got: {:?}",
                from, to, other
            ),
        }
    }

    #[track_caller]
    pub fn assert_unknown_role<T: std::fmt::Debug>(result: &KeelResult<T>, role_id: &str) {
        match result {
            Err(KeelError::Access(AccessError::UnknownRole { role_id: r })) => {
                assert_eq!(r, role_id);
            }
            other => panic!("Expected UnknownRole {}, got: {:?}", role_id, other),
        }
    }

    #[track_caller]
    pub fn assert_quota_exceeded<T: std::fmt::Debug>(result: &KeelResult<T>, quota: &str) {
        match result {
            Err(KeelError::Access(AccessError::QuotaExceeded { quota: q, .. })) => {
                assert_eq!(q, quota);
            }
            other => panic!("Expected QuotaExceeded for {}, got: {:?}", quota, other),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
