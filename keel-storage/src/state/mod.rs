//! Versioned state machines keyed by `"{entity_type}:{entity_id}:{state_type}"`.
//!
//! # Lifecycle
//!
//! ```text
//! initialize_state ──→ v1 ── transition_state ──→ v2 ── ... ──→ vN
//!                                                           │
//!                                              deactivate_state (history kept)
//! ```
//!
//! Snapshots are never mutated by a transition: each successful transition
//! appends a brand-new snapshot to the key's history, so the history length
//! always equals the current version.
//!
//! When no transition table is registered for a machine, every transition
//! is permitted. Tables are opt-in configuration, not a safety net.

mod registry;
mod snapshot;

pub use registry::{StateMachineRegistry, TransitionRequest};
pub use snapshot::{
    SnapshotMetadata, StateAuditEvent, StateSnapshot, StateStatus, StateStatusParseError,
    TransitionCondition, TransitionTable,
};

/// Build the composite state key.
pub fn state_key(entity_type: &str, entity_id: &str, state_type: &str) -> String {
    format!("{}:{}:{}", entity_type, entity_id, state_type)
}

/// Build the key a transition table is registered under.
pub(crate) fn machine_key(entity_type: &str, state_type: &str) -> String {
    format!("{}:{}", entity_type, state_type)
}
