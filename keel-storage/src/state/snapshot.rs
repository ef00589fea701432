//! State snapshot records, transition rules and audit events.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use keel_core::{EntityId, Timestamp, WILDCARD};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// STATUS
// ============================================================================

/// Whether a snapshot is the live state of its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateStatus {
    Active,
    Inactive,
}

impl StateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StateStatus::Active => "active",
            StateStatus::Inactive => "inactive",
        }
    }
}

impl fmt::Display for StateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for StateStatus {
    type Err = StateStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(StateStatus::Active),
            "inactive" => Ok(StateStatus::Inactive),
            _ => Err(StateStatusParseError(s.to_string())),
        }
    }
}

/// Error when parsing an invalid state status string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateStatusParseError(pub String);

impl fmt::Display for StateStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid state status: {}", self.0)
    }
}

impl std::error::Error for StateStatusParseError {}

// ============================================================================
// SNAPSHOT
// ============================================================================

/// Who produced a snapshot and at which version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub created_by: Option<String>,
    /// Starts at 1 and increases by exactly 1 per transition.
    pub version: u64,
}

/// One immutable point in a state machine's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub snapshot_id: EntityId,
    pub entity_id: String,
    pub entity_type: String,
    pub state_type: String,
    pub current_state: String,
    pub previous_state: Option<String>,
    pub state_data: Map<String, Value>,
    pub status: StateStatus,
    pub metadata: SnapshotMetadata,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl StateSnapshot {
    pub fn version(&self) -> u64 {
        self.metadata.version
    }

    pub fn is_active(&self) -> bool {
        self.status == StateStatus::Active
    }

    /// Composite key this snapshot is stored under.
    pub fn state_key(&self) -> String {
        super::state_key(&self.entity_type, &self.entity_id, &self.state_type)
    }
}

// ============================================================================
// TRANSITION RULES
// ============================================================================

/// Guard evaluated against the current snapshot before a transition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransitionCondition {
    /// Unconditional.
    #[default]
    Always,
    /// `state_data[field]` must equal `value`.
    StateDataEquals { field: String, value: Value },
}

impl TransitionCondition {
    pub fn is_satisfied(&self, snapshot: &StateSnapshot) -> bool {
        match self {
            TransitionCondition::Always => true,
            TransitionCondition::StateDataEquals { field, value } => {
                snapshot.state_data.get(field) == Some(value)
            }
        }
    }
}

impl fmt::Display for TransitionCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransitionCondition::Always => write!(f, "always"),
            TransitionCondition::StateDataEquals { field, value } => {
                write!(f, "state_data.{} == {}", field, value)
            }
        }
    }
}

/// Allowed moves for one kind of state machine: from-state → target states.
///
/// A `*` source applies to every state; a `*` target allows any target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionTable {
    allowed: HashMap<String, HashSet<String>>,
}

impl TransitionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow `from -> to`.
    pub fn allow(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.allowed.entry(from.into()).or_default().insert(to.into());
        self
    }

    /// Allow `from` to move to each of `targets`.
    pub fn allow_many<I, S>(mut self, from: impl Into<String>, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entry = self.allowed.entry(from.into()).or_default();
        entry.extend(targets.into_iter().map(Into::into));
        self
    }

    pub fn permits(&self, from: &str, to: &str) -> bool {
        [from, WILDCARD].iter().any(|source| {
            self.allowed
                .get(*source)
                .map(|targets| targets.contains(to) || targets.contains(WILDCARD))
                .unwrap_or(false)
        })
    }
}

// ============================================================================
// AUDIT
// ============================================================================

/// Record of a state change, kept in a bounded ring buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateAuditEvent {
    pub state_key: String,
    pub entity_id: String,
    pub entity_type: String,
    /// `None` for the initializing event.
    pub from_state: Option<String>,
    pub to_state: String,
    pub actor: Option<String>,
    pub version: u64,
    pub timestamp: Timestamp,
}
