//! Session context records.

use std::path::PathBuf;

use keel_core::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Editor cursor location (zero-based).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorPosition {
    pub line: u32,
    pub column: u32,
}

impl CursorPosition {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

/// Ephemeral context for one editing session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionContext {
    pub session_id: String,
    pub user_id: String,
    pub project_id: String,
    pub cursor_position: CursorPosition,
    /// Most recent first, no duplicates.
    pub recent_files: Vec<String>,
    pub working_directory: PathBuf,
    pub git_branch: Option<String>,
    pub git_commit: Option<String>,
    pub metadata: Map<String, Value>,
    pub created_at: Timestamp,
    pub last_activity: Timestamp,
}

impl SessionContext {
    /// Move `file` to the front of `recent_files`, keeping at most `limit` entries.
    pub(crate) fn push_recent_file(&mut self, file: String, limit: usize) {
        self.recent_files.retain(|f| f != &file);
        self.recent_files.insert(0, file);
        self.recent_files.truncate(limit);
    }
}

/// Partial update applied by `update_session_context`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionUpdate {
    pub cursor_position: Option<CursorPosition>,
    /// File the user just opened or focused.
    pub opened_file: Option<String>,
    /// New working directory; git metadata is refreshed when set.
    pub working_directory: Option<PathBuf>,
    /// Merged into the session metadata.
    pub metadata: Option<Map<String, Value>>,
}

impl SessionUpdate {
    pub fn cursor(line: u32, column: u32) -> Self {
        Self {
            cursor_position: Some(CursorPosition::new(line, column)),
            ..Default::default()
        }
    }

    pub fn opened(file: impl Into<String>) -> Self {
        Self {
            opened_file: Some(file.into()),
            ..Default::default()
        }
    }
}

/// Coarse per-project snapshot that outlives individual sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectMemory {
    pub project_id: String,
    pub summary: Value,
    pub updated_at: Timestamp,
}
