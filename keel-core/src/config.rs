//! Configuration types
//!
//! Configuration is layered: compiled defaults, then an optional TOML file,
//! then `KEEL_*` environment variables. Every section validates itself and
//! reports the offending field through [`ConfigError::InvalidValue`].

use crate::{ConfigError, KeelResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the TOML config file.
pub const CONFIG_PATH_ENV: &str = "KEEL_CONFIG";

/// Upper bound for `cache.default_ttl_secs` (100 years).
pub const MAX_TTL_SECS: u64 = 100 * 365 * 24 * 3600;

/// Cache store settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Maximum number of live entries before LRU eviction.
    pub max_size: usize,
    /// TTL applied when `set` is called without one. Zero disables expiry.
    pub default_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            default_ttl_secs: 3600,
        }
    }
}

/// Telemetry collector settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TelemetryConfig {
    /// Buffer length that triggers a flush.
    pub batch_size: usize,
    /// Number of recent values kept per metric for anomaly detection.
    pub anomaly_window: usize,
    /// Z-score above which a value is anomalous.
    pub anomaly_z_threshold: f64,
    /// Source label stamped on every record.
    pub source: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            anomaly_window: 100,
            anomaly_z_threshold: 3.0,
            source: "keel".to_string(),
        }
    }
}

/// State machine registry settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StateConfig {
    /// Ring buffer capacity for state-change audit events.
    pub audit_capacity: usize,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            audit_capacity: 10_000,
        }
    }
}

/// Session directory settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Upper bound on the git metadata lookup.
    pub git_timeout_ms: u64,
    /// Length of the most-recent-first file list.
    pub recent_files_limit: usize,
}

impl SessionConfig {
    pub fn git_timeout(&self) -> Duration {
        Duration::from_millis(self.git_timeout_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            git_timeout_ms: 5000,
            recent_files_limit: 20,
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "keel=info,warn".to_string(),
            json: false,
        }
    }
}

/// Master configuration for the infrastructure layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KeelConfig {
    pub cache: CacheConfig,
    pub telemetry: TelemetryConfig,
    pub state: StateConfig,
    pub session: SessionConfig,
    pub logging: LoggingConfig,
}

impl KeelConfig {
    /// Load configuration from `KEEL_CONFIG` (if set) and the environment.
    pub fn load() -> KeelResult<Self> {
        let mut config = match std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from) {
            Some(path) => Self::from_path(&path)?,
            None => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file. Missing sections fall back to defaults.
    pub fn from_path(path: &Path) -> KeelResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&contents)
    }

    /// Parse TOML text. Missing sections fall back to defaults.
    pub fn from_toml_str(contents: &str) -> KeelResult<Self> {
        let config: KeelConfig = toml::from_str(contents).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        Ok(config)
    }

    /// Overlay `KEEL_*` environment variables.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Overlay values from an arbitrary variable lookup.
    ///
    /// Unparseable values are ignored and the current value is kept.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        if let Some(v) = parsed("KEEL_CACHE_MAX_SIZE") {
            self.cache.max_size = v as usize;
        }
        if let Some(v) = parsed("KEEL_CACHE_DEFAULT_TTL_SECS") {
            self.cache.default_ttl_secs = v;
        }
        if let Some(v) = parsed("KEEL_TELEMETRY_BATCH_SIZE") {
            self.telemetry.batch_size = v as usize;
        }
        if let Some(v) = parsed("KEEL_TELEMETRY_ANOMALY_WINDOW") {
            self.telemetry.anomaly_window = v as usize;
        }
        if let Some(v) = lookup("KEEL_TELEMETRY_ANOMALY_Z_THRESHOLD")
            .and_then(|v| v.trim().parse::<f64>().ok())
        {
            self.telemetry.anomaly_z_threshold = v;
        }
        if let Some(v) = lookup("KEEL_TELEMETRY_SOURCE") {
            self.telemetry.source = v;
        }
        if let Some(v) = parsed("KEEL_STATE_AUDIT_CAPACITY") {
            self.state.audit_capacity = v as usize;
        }
        if let Some(v) = parsed("KEEL_SESSION_GIT_TIMEOUT_MS") {
            self.session.git_timeout_ms = v;
        }
        if let Some(v) = parsed("KEEL_SESSION_RECENT_FILES_LIMIT") {
            self.session.recent_files_limit = v as usize;
        }
        if let Some(v) = lookup("KEEL_LOG_FILTER") {
            self.logging.filter = v;
        }
        if let Some(v) = lookup("KEEL_LOG_JSON") {
            self.logging.json = v == "true" || v == "1";
        }
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - all capacities and batch sizes are > 0
    /// - anomaly_z_threshold is finite and positive
    /// - git_timeout_ms is > 0
    /// - cache.default_ttl_secs is at most [`MAX_TTL_SECS`]
    pub fn validate(&self) -> KeelResult<()> {
        positive("cache.max_size", self.cache.max_size as u64)?;
        positive("telemetry.batch_size", self.telemetry.batch_size as u64)?;
        positive("telemetry.anomaly_window", self.telemetry.anomaly_window as u64)?;
        positive("state.audit_capacity", self.state.audit_capacity as u64)?;
        positive("session.git_timeout_ms", self.session.git_timeout_ms)?;
        positive(
            "session.recent_files_limit",
            self.session.recent_files_limit as u64,
        )?;

        if self.cache.default_ttl_secs > MAX_TTL_SECS {
            return Err(ConfigError::InvalidValue {
                field: "cache.default_ttl_secs".to_string(),
                value: self.cache.default_ttl_secs.to_string(),
                reason: format!("must be at most {}", MAX_TTL_SECS),
            }
            .into());
        }

        let z = self.telemetry.anomaly_z_threshold;
        if !z.is_finite() || z <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "telemetry.anomaly_z_threshold".to_string(),
                value: z.to_string(),
                reason: "must be a positive finite number".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

fn positive(field: &str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
            reason: "must be greater than 0".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::KeelError;
    use std::collections::HashMap;

    #[test]
    fn test_default_config_is_valid() {
        let config = KeelConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cache.max_size, 1000);
        assert_eq!(config.telemetry.batch_size, 100);
        assert_eq!(config.telemetry.anomaly_window, 100);
        assert_eq!(config.telemetry.anomaly_z_threshold, 3.0);
        assert_eq!(config.state.audit_capacity, 10_000);
        assert_eq!(config.session.git_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_excessive_default_ttl_rejected() {
        let mut config = KeelConfig::default();
        config.cache.default_ttl_secs = MAX_TTL_SECS;
        assert!(config.validate().is_ok());

        config.cache.default_ttl_secs = u64::MAX;
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            KeelError::Config(ConfigError::InvalidValue { ref field, .. })
                if field == "cache.default_ttl_secs"
        ));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = KeelConfig::from_toml_str(
            r#"
            [cache]
            max_size = 16

            [logging]
            json = true
            "#,
        )
        .unwrap();
        assert_eq!(config.cache.max_size, 16);
        assert_eq!(config.cache.default_ttl_secs, 3600);
        assert!(config.logging.json);
        assert_eq!(config.telemetry, TelemetryConfig::default());
    }

    #[test]
    fn test_unknown_field_is_parse_error() {
        let err = KeelConfig::from_toml_str("[cache]\nmax_sise = 3\n").unwrap_err();
        assert!(matches!(err, KeelError::Config(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_from_path_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keel.toml");
        std::fs::write(&path, "[state]\naudit_capacity = 42\n").unwrap();

        let config = KeelConfig::from_path(&path).unwrap();
        assert_eq!(config.state.audit_capacity, 42);
    }

    #[test]
    fn test_from_path_missing_file() {
        let err = KeelConfig::from_path(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, KeelError::Config(ConfigError::Io { .. })));
    }

    #[test]
    fn test_env_overrides_file_values() {
        let vars: HashMap<&str, &str> = [
            ("KEEL_CACHE_MAX_SIZE", "8"),
            ("KEEL_TELEMETRY_ANOMALY_Z_THRESHOLD", "2.5"),
            ("KEEL_LOG_JSON", "1"),
            ("KEEL_STATE_AUDIT_CAPACITY", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let mut config = KeelConfig::default();
        config.apply_env_from(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.cache.max_size, 8);
        assert_eq!(config.telemetry.anomaly_z_threshold, 2.5);
        assert!(config.logging.json);
        assert_eq!(config.state.audit_capacity, 10_000);
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let mut config = KeelConfig::default();
        config.cache.max_size = 0;
        match config.validate() {
            Err(KeelError::Config(ConfigError::InvalidValue { field, .. })) => {
                assert_eq!(field, "cache.max_size");
            }
            other => panic!("expected invalid value, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_bad_threshold() {
        let mut config = KeelConfig::default();
        config.telemetry.anomaly_z_threshold = f64::NAN;
        assert!(config.validate().is_err());

        config.telemetry.anomaly_z_threshold = -1.0;
        assert!(config.validate().is_err());
    }
}
