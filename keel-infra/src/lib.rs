//! Keel Infra - Store Wiring
//!
//! Constructs each store exactly once from a [`KeelConfig`] and hands out
//! cheap-to-clone [`Infrastructure`] handles. Components receive the
//! handle (or the individual `Arc`s) they need instead of reaching for
//! process-wide singletons.

use std::sync::Arc;

use keel_access::AccessControlEngine;
use keel_core::{Clock, KeelConfig, KeelResult, SystemClock};
use keel_storage::{
    CacheStats, CacheStore, GitCommandProvider, GitInfoProvider, PriorityTaskQueue, QueueStats,
    SessionDirectory, StateMachineRegistry,
};
use keel_telemetry::{TelemetryCollector, TelemetryStats};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Follow-up work deferred onto the task queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeferredTask {
    /// What to do, e.g. `"post_process"`.
    pub kind: String,
    pub payload: Value,
}

impl DeferredTask {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }
}

/// Combined counters from every store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfraStats {
    pub cache: CacheStats,
    pub telemetry: TelemetryStats,
    pub queue: QueueStats,
    pub active_sessions: usize,
}

/// Shared handles to every store in the layer.
#[derive(Debug, Clone)]
pub struct Infrastructure {
    pub config: Arc<KeelConfig>,
    pub clock: Arc<dyn Clock>,
    pub cache: Arc<CacheStore>,
    pub access: Arc<AccessControlEngine>,
    pub telemetry: Arc<TelemetryCollector>,
    pub state: Arc<StateMachineRegistry>,
    pub sessions: Arc<SessionDirectory>,
    pub tasks: Arc<PriorityTaskQueue<DeferredTask>>,
}

impl Infrastructure {
    /// Build with the system clock and the `git` binary.
    pub fn from_config(config: KeelConfig) -> KeelResult<Self> {
        InfrastructureBuilder::new(config).build()
    }

    /// Load configuration from the environment, install the logging
    /// subscriber and build.
    pub fn bootstrap() -> KeelResult<Self> {
        let config = KeelConfig::load()?;
        keel_telemetry::init_logging(&config.logging)?;
        Self::from_config(config)
    }

    pub fn builder(config: KeelConfig) -> InfrastructureBuilder {
        InfrastructureBuilder::new(config)
    }

    pub async fn stats(&self) -> KeelResult<InfraStats> {
        Ok(InfraStats {
            cache: self.cache.get_stats().await?,
            telemetry: self.telemetry.get_stats().await?,
            queue: self.tasks.get_stats().await?,
            active_sessions: self.sessions.session_count().await?,
        })
    }

    /// Flush buffered telemetry. Everything else is in memory and simply
    /// dropped with the last handle.
    pub async fn shutdown(&self) -> KeelResult<()> {
        let shipped = self.telemetry.flush().await?;
        tracing::info!(shipped, "infrastructure shut down");
        Ok(())
    }
}

/// Overrides for the clock and git collaborator, mostly for tests.
pub struct InfrastructureBuilder {
    config: KeelConfig,
    clock: Option<Arc<dyn Clock>>,
    git: Option<Arc<dyn GitInfoProvider>>,
}

impl InfrastructureBuilder {
    pub fn new(config: KeelConfig) -> Self {
        Self {
            config,
            clock: None,
            git: None,
        }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn git(mut self, git: Arc<dyn GitInfoProvider>) -> Self {
        self.git = Some(git);
        self
    }

    /// # Errors
    ///
    /// Fails if the configuration is invalid.
    pub fn build(self) -> KeelResult<Infrastructure> {
        self.config.validate()?;
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);
        let git = self
            .git
            .unwrap_or_else(|| Arc::new(GitCommandProvider) as Arc<dyn GitInfoProvider>);
        let config = self.config;

        let infra = Infrastructure {
            cache: Arc::new(CacheStore::new(config.cache.clone(), clock.clone())?),
            access: Arc::new(AccessControlEngine::new(clock.clone())),
            telemetry: Arc::new(TelemetryCollector::new(
                config.telemetry.clone(),
                clock.clone(),
            )?),
            state: Arc::new(StateMachineRegistry::new(config.state.clone(), clock.clone())?),
            sessions: Arc::new(SessionDirectory::new(
                config.session.clone(),
                git,
                clock.clone(),
            )),
            tasks: Arc::new(PriorityTaskQueue::new(clock.clone())),
            clock,
            config: Arc::new(config),
        };
        tracing::info!(
            cache_max_size = infra.config.cache.max_size,
            batch_size = infra.config.telemetry.batch_size,
            "infrastructure ready"
        );
        Ok(infra)
    }
}

impl std::fmt::Debug for InfrastructureBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InfrastructureBuilder")
            .field("config", &self.config)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}
