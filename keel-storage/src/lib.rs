//! Keel Storage - In-Memory Coordination Stores
//!
//! The stores every orchestrator leans on for memoization, workflow state,
//! session context and deferred work:
//!
//! - [`CacheStore`]: namespaced key/value cache with TTL and LRU eviction
//! - [`StateMachineRegistry`]: versioned state snapshots with append-only history
//! - [`SessionDirectory`]: per-user editor/session context with git metadata
//! - [`PriorityTaskQueue`]: priority-ordered, FIFO-within-priority work queue
//!
//! Everything lives in process memory and is lost on restart. Each store
//! guards its state with a single lock per operation, so every method is
//! safe to call concurrently through a shared `Arc`.

pub mod cache;
pub mod queue;
pub mod session;
pub mod state;

pub use cache::{CacheEntry, CacheStats, CacheStore};
pub use queue::{PriorityTaskQueue, QueueItem, QueueStats};
pub use session::{
    CursorPosition, GitCommandProvider, GitInfo, GitInfoProvider, ProjectMemory, SessionContext,
    SessionDirectory, SessionUpdate,
};
pub use state::{
    StateAuditEvent, StateMachineRegistry, StateSnapshot, StateStatus, TransitionCondition,
    TransitionRequest, TransitionTable,
};
