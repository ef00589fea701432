//! In-memory state machine registry.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use keel_core::{new_entity_id, Clock, KeelError, KeelResult, StateConfig, StateError, StorageError};
use serde_json::{Map, Value};

use super::snapshot::{
    SnapshotMetadata, StateAuditEvent, StateSnapshot, StateStatus, TransitionCondition,
    TransitionTable,
};
use super::{machine_key, state_key};

/// Arguments to [`StateMachineRegistry::transition_state`].
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionRequest {
    pub entity_id: String,
    pub entity_type: String,
    pub state_type: String,
    pub target_state: String,
    pub condition: TransitionCondition,
    pub user_id: Option<String>,
    /// Merged into the new snapshot's `state_data`.
    pub event_data: Option<Map<String, Value>>,
}

impl TransitionRequest {
    /// Unconditional transition with no actor or event data.
    pub fn new(
        entity_id: impl Into<String>,
        entity_type: impl Into<String>,
        state_type: impl Into<String>,
        target_state: impl Into<String>,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            entity_type: entity_type.into(),
            state_type: state_type.into(),
            target_state: target_state.into(),
            condition: TransitionCondition::Always,
            user_id: None,
            event_data: None,
        }
    }

    pub fn with_condition(mut self, condition: TransitionCondition) -> Self {
        self.condition = condition;
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_event_data(mut self, event_data: Map<String, Value>) -> Self {
        self.event_data = Some(event_data);
        self
    }

    fn state_key(&self) -> String {
        state_key(&self.entity_type, &self.entity_id, &self.state_type)
    }
}

#[derive(Debug, Default)]
struct RegistryInner {
    /// Append-only history per state key; the last element is the current snapshot.
    history: HashMap<String, Vec<StateSnapshot>>,
    /// Histories of earlier lifecycles, oldest first, retired on re-initialization.
    archived: HashMap<String, Vec<Vec<StateSnapshot>>>,
    transitions: HashMap<String, TransitionTable>,
    audit: VecDeque<StateAuditEvent>,
}

impl RegistryInner {
    fn current(&self, key: &str) -> Option<&StateSnapshot> {
        self.history.get(key).and_then(|h| h.last())
    }

    fn record_audit(&mut self, event: StateAuditEvent, capacity: usize) {
        while self.audit.len() >= capacity {
            self.audit.pop_front();
        }
        self.audit.push_back(event);
    }
}

/// Keyed store of versioned state snapshots.
///
/// All operations on the registry run under one `RwLock`, so concurrent
/// transitions on the same key are serialized and can never produce two
/// snapshots with the same version.
#[derive(Debug)]
pub struct StateMachineRegistry {
    inner: RwLock<RegistryInner>,
    config: StateConfig,
    clock: Arc<dyn Clock>,
}

impl StateMachineRegistry {
    /// Create a registry.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::CapacityInvalid` if `config.audit_capacity` is 0.
    pub fn new(config: StateConfig, clock: Arc<dyn Clock>) -> KeelResult<Self> {
        if config.audit_capacity == 0 {
            return Err(StorageError::CapacityInvalid { store: "state_audit" }.into());
        }
        Ok(Self {
            inner: RwLock::new(RegistryInner::default()),
            config,
            clock,
        })
    }

    fn read(&self) -> KeelResult<RwLockReadGuard<'_, RegistryInner>> {
        self.inner.read().map_err(|_| KeelError::poisoned("state"))
    }

    fn write(&self) -> KeelResult<RwLockWriteGuard<'_, RegistryInner>> {
        self.inner.write().map_err(|_| KeelError::poisoned("state"))
    }

    /// Register the allowed transitions for every entity of
    /// `entity_type` tracked under `state_type`. Replaces any previous table.
    pub async fn register_transitions(
        &self,
        entity_type: &str,
        state_type: &str,
        table: TransitionTable,
    ) -> KeelResult<()> {
        let mut inner = self.write()?;
        inner
            .transitions
            .insert(machine_key(entity_type, state_type), table);
        Ok(())
    }

    /// Create the first snapshot (version 1) for a key.
    ///
    /// If an active snapshot already exists it is returned unchanged. If the
    /// key exists but was deactivated, a fresh history is started and the
    /// old one is archived (see [`get_archived_histories`](Self::get_archived_histories)).
    pub async fn initialize_state(
        &self,
        entity_id: &str,
        entity_type: &str,
        state_type: &str,
        initial_state: &str,
        state_data: Option<Map<String, Value>>,
        user_id: Option<&str>,
    ) -> KeelResult<StateSnapshot> {
        let key = state_key(entity_type, entity_id, state_type);
        let now = self.clock.now();
        let mut inner = self.write()?;

        if let Some(existing) = inner.current(&key).filter(|s| s.is_active()) {
            tracing::warn!(
                state_key = %key,
                current_state = %existing.current_state,
                "state already initialized, returning existing snapshot"
            );
            return Ok(existing.clone());
        }

        let snapshot = StateSnapshot {
            snapshot_id: new_entity_id(),
            entity_id: entity_id.to_string(),
            entity_type: entity_type.to_string(),
            state_type: state_type.to_string(),
            current_state: initial_state.to_string(),
            previous_state: None,
            state_data: state_data.unwrap_or_default(),
            status: StateStatus::Active,
            metadata: SnapshotMetadata {
                created_by: user_id.map(str::to_string),
                version: 1,
            },
            created_at: now,
            updated_at: now,
        };

        if let Some(retired) = inner.history.insert(key.clone(), vec![snapshot.clone()]) {
            inner.archived.entry(key.clone()).or_default().push(retired);
        }
        inner.record_audit(
            StateAuditEvent {
                state_key: key.clone(),
                entity_id: entity_id.to_string(),
                entity_type: entity_type.to_string(),
                from_state: None,
                to_state: initial_state.to_string(),
                actor: user_id.map(str::to_string),
                version: 1,
                timestamp: now,
            },
            self.config.audit_capacity,
        );
        tracing::debug!(state_key = %key, state = %initial_state, "state initialized");
        Ok(snapshot)
    }

    /// Move a key to `target_state`, appending a new snapshot.
    ///
    /// # Errors
    ///
    /// - `StateError::NotFound` if the key has no active snapshot
    /// - `StateError::ConditionFailed` if the request's condition does not hold
    /// - `StateError::InvalidTransition` if a registered table forbids the move
    pub async fn transition_state(&self, request: TransitionRequest) -> KeelResult<StateSnapshot> {
        let key = request.state_key();
        let now = self.clock.now();
        let mut inner = self.write()?;

        let current = inner
            .current(&key)
            .filter(|s| s.is_active())
            .cloned()
            .ok_or_else(|| StateError::NotFound { key: key.clone() })?;

        if !request.condition.is_satisfied(&current) {
            return Err(StateError::ConditionFailed {
                key,
                condition: request.condition.to_string(),
            }
            .into());
        }

        let machine = machine_key(&request.entity_type, &request.state_type);
        if let Some(table) = inner.transitions.get(&machine) {
            if !table.permits(&current.current_state, &request.target_state) {
                return Err(StateError::InvalidTransition {
                    key,
                    from: current.current_state,
                    to: request.target_state,
                }
                .into());
            }
        }

        let mut state_data = current.state_data.clone();
        if let Some(event_data) = request.event_data {
            state_data.extend(event_data);
        }

        let version = current.version() + 1;
        let next = StateSnapshot {
            snapshot_id: new_entity_id(),
            entity_id: current.entity_id.clone(),
            entity_type: current.entity_type.clone(),
            state_type: current.state_type.clone(),
            current_state: request.target_state.clone(),
            previous_state: Some(current.current_state.clone()),
            state_data,
            status: StateStatus::Active,
            metadata: SnapshotMetadata {
                created_by: request.user_id.clone(),
                version,
            },
            created_at: current.created_at,
            updated_at: now,
        };

        inner
            .history
            .entry(key.clone())
            .or_default()
            .push(next.clone());
        inner.record_audit(
            StateAuditEvent {
                state_key: key.clone(),
                entity_id: current.entity_id,
                entity_type: current.entity_type,
                from_state: Some(current.current_state.clone()),
                to_state: request.target_state.clone(),
                actor: request.user_id,
                version,
                timestamp: now,
            },
            self.config.audit_capacity,
        );
        tracing::debug!(
            state_key = %key,
            from = %current.current_state,
            to = %request.target_state,
            version,
            "state transitioned"
        );
        Ok(next)
    }

    /// Latest snapshot for a key, active or not.
    pub async fn get_state(
        &self,
        entity_id: &str,
        entity_type: &str,
        state_type: &str,
    ) -> KeelResult<Option<StateSnapshot>> {
        let key = state_key(entity_type, entity_id, state_type);
        let inner = self.read()?;
        Ok(inner.current(&key).cloned())
    }

    /// Every snapshot for a key, oldest first. Empty when the key is unknown.
    pub async fn get_state_history(
        &self,
        entity_id: &str,
        entity_type: &str,
        state_type: &str,
    ) -> KeelResult<Vec<StateSnapshot>> {
        let key = state_key(entity_type, entity_id, state_type);
        let inner = self.read()?;
        Ok(inner.history.get(&key).cloned().unwrap_or_default())
    }

    /// Histories of earlier, deactivated lifecycles of a key, oldest first.
    pub async fn get_archived_histories(
        &self,
        entity_id: &str,
        entity_type: &str,
        state_type: &str,
    ) -> KeelResult<Vec<Vec<StateSnapshot>>> {
        let key = state_key(entity_type, entity_id, state_type);
        let inner = self.read()?;
        Ok(inner.archived.get(&key).cloned().unwrap_or_default())
    }

    /// Mark the latest snapshot inactive. History is retained.
    /// Returns false when there was no active snapshot.
    pub async fn deactivate_state(
        &self,
        entity_id: &str,
        entity_type: &str,
        state_type: &str,
    ) -> KeelResult<bool> {
        let key = state_key(entity_type, entity_id, state_type);
        let now = self.clock.now();
        let mut inner = self.write()?;
        let Some(latest) = inner.history.get_mut(&key).and_then(|h| h.last_mut()) else {
            return Ok(false);
        };
        if !latest.is_active() {
            return Ok(false);
        }
        latest.status = StateStatus::Inactive;
        latest.updated_at = now;
        tracing::debug!(state_key = %key, "state deactivated");
        Ok(true)
    }

    /// Active snapshots of one machine kind currently in `state`.
    pub async fn get_entities_in_state(
        &self,
        entity_type: &str,
        state_type: &str,
        state: &str,
    ) -> KeelResult<Vec<StateSnapshot>> {
        let inner = self.read()?;
        let mut matches: Vec<StateSnapshot> = inner
            .history
            .values()
            .filter_map(|h| h.last())
            .filter(|s| {
                s.is_active()
                    && s.entity_type == entity_type
                    && s.state_type == state_type
                    && s.current_state == state
            })
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
        Ok(matches)
    }

    /// Most recent audit events, oldest first. `None` returns the whole buffer.
    pub async fn get_audit_events(&self, limit: Option<usize>) -> KeelResult<Vec<StateAuditEvent>> {
        let inner = self.read()?;
        let len = inner.audit.len();
        let skip = limit.map(|l| len.saturating_sub(l)).unwrap_or(0);
        Ok(inner.audit.iter().skip(skip).cloned().collect())
    }
}
