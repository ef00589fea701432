//! Session directory with primary and per-user indexes.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use keel_core::{new_entity_id, Clock, KeelError, KeelResult, SessionConfig};
use serde_json::{Map, Value};

use super::context::{CursorPosition, ProjectMemory, SessionContext, SessionUpdate};
use super::git::{GitInfo, GitInfoProvider};

#[derive(Debug, Default)]
struct DirectoryInner {
    sessions: HashMap<String, SessionContext>,
    by_user: HashMap<String, HashSet<String>>,
    projects: HashMap<String, ProjectMemory>,
}

impl DirectoryInner {
    fn remove_session(&mut self, session_id: &str) -> Option<SessionContext> {
        let removed = self.sessions.remove(session_id)?;
        if let Some(ids) = self.by_user.get_mut(&removed.user_id) {
            ids.remove(session_id);
            if ids.is_empty() {
                self.by_user.remove(&removed.user_id);
            }
        }
        Some(removed)
    }
}

/// Owner of every live [`SessionContext`].
pub struct SessionDirectory {
    inner: RwLock<DirectoryInner>,
    git: Arc<dyn GitInfoProvider>,
    config: SessionConfig,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for SessionDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionDirectory")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SessionDirectory {
    pub fn new(
        config: SessionConfig,
        git: Arc<dyn GitInfoProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: RwLock::new(DirectoryInner::default()),
            git,
            config,
            clock,
        }
    }

    fn read(&self) -> KeelResult<RwLockReadGuard<'_, DirectoryInner>> {
        self.inner.read().map_err(|_| KeelError::poisoned("session"))
    }

    fn write(&self) -> KeelResult<RwLockWriteGuard<'_, DirectoryInner>> {
        self.inner.write().map_err(|_| KeelError::poisoned("session"))
    }

    /// Fetch git metadata, giving up after the configured timeout.
    async fn fetch_git_info(&self, working_directory: &Path) -> GitInfo {
        let timeout = Duration::from_millis(self.config.git_timeout_ms);
        match tokio::time::timeout(timeout, self.git.git_info(working_directory)).await {
            Ok(info) => info,
            Err(_) => {
                tracing::warn!(
                    working_directory = %working_directory.display(),
                    timeout_ms = self.config.git_timeout_ms,
                    "git metadata lookup timed out"
                );
                GitInfo::default()
            }
        }
    }

    /// Create a session for `user_id` in `project_id`.
    ///
    /// Git metadata is looked up before the session is registered; the
    /// lookup never causes creation to fail.
    pub async fn create_session_context(
        &self,
        user_id: &str,
        project_id: &str,
        working_directory: impl Into<PathBuf>,
    ) -> KeelResult<SessionContext> {
        let working_directory = working_directory.into();
        let git = self.fetch_git_info(&working_directory).await;
        let now = self.clock.now();

        let context = SessionContext {
            session_id: new_entity_id().to_string(),
            user_id: user_id.to_string(),
            project_id: project_id.to_string(),
            cursor_position: CursorPosition::default(),
            recent_files: Vec::new(),
            working_directory,
            git_branch: git.branch,
            git_commit: git.commit,
            metadata: Map::new(),
            created_at: now,
            last_activity: now,
        };

        let mut inner = self.write()?;
        inner
            .by_user
            .entry(context.user_id.clone())
            .or_default()
            .insert(context.session_id.clone());
        inner
            .sessions
            .insert(context.session_id.clone(), context.clone());

        tracing::info!(
            session_id = %context.session_id,
            user_id = %context.user_id,
            project_id = %context.project_id,
            git_branch = ?context.git_branch,
            "session created"
        );
        Ok(context)
    }

    /// Apply a partial update and bump `last_activity`.
    /// Returns `None` when the session does not exist.
    pub async fn update_session_context(
        &self,
        session_id: &str,
        update: SessionUpdate,
    ) -> KeelResult<Option<SessionContext>> {
        let git = match &update.working_directory {
            Some(dir) => Some(self.fetch_git_info(dir).await),
            None => None,
        };
        let now = self.clock.now();
        let limit = self.config.recent_files_limit;

        let mut inner = self.write()?;
        let Some(context) = inner.sessions.get_mut(session_id) else {
            return Ok(None);
        };

        if let Some(cursor) = update.cursor_position {
            context.cursor_position = cursor;
        }
        if let Some(file) = update.opened_file {
            context.push_recent_file(file, limit);
        }
        if let Some(dir) = update.working_directory {
            context.working_directory = dir;
        }
        if let Some(git) = git {
            context.git_branch = git.branch;
            context.git_commit = git.commit;
        }
        if let Some(metadata) = update.metadata {
            context.metadata.extend(metadata);
        }
        context.last_activity = now;
        Ok(Some(context.clone()))
    }

    pub async fn get_session_context(&self, session_id: &str) -> KeelResult<Option<SessionContext>> {
        let inner = self.read()?;
        Ok(inner.sessions.get(session_id).cloned())
    }

    /// All sessions of a user, most recently active first.
    pub async fn get_user_context(&self, user_id: &str) -> KeelResult<Vec<SessionContext>> {
        let inner = self.read()?;
        let mut contexts: Vec<SessionContext> = inner
            .by_user
            .get(user_id)
            .into_iter()
            .flatten()
            .filter_map(|id| inner.sessions.get(id).cloned())
            .collect();
        contexts.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        Ok(contexts)
    }

    /// Remove a session from both indexes. Returns whether it existed.
    pub async fn clear_session(&self, session_id: &str) -> KeelResult<bool> {
        let mut inner = self.write()?;
        let removed = inner.remove_session(session_id);
        if let Some(ctx) = &removed {
            tracing::debug!(session_id, user_id = %ctx.user_id, "session cleared");
        }
        Ok(removed.is_some())
    }

    /// Remove sessions idle for longer than `max_idle`. Returns how many.
    pub async fn cleanup_inactive_sessions(&self, max_idle: Duration) -> KeelResult<usize> {
        let max_idle = chrono::Duration::from_std(max_idle).unwrap_or(chrono::Duration::MAX);
        let now = self.clock.now();
        let mut inner = self.write()?;
        let stale: Vec<String> = inner
            .sessions
            .values()
            .filter(|ctx| now - ctx.last_activity > max_idle)
            .map(|ctx| ctx.session_id.clone())
            .collect();
        for id in &stale {
            inner.remove_session(id);
        }
        if !stale.is_empty() {
            tracing::info!(removed = stale.len(), "cleaned up inactive sessions");
        }
        Ok(stale.len())
    }

    /// Number of live sessions.
    pub async fn session_count(&self) -> KeelResult<usize> {
        Ok(self.read()?.sessions.len())
    }

    /// Store (or replace) the memory snapshot of a project.
    pub async fn save_project_memory(
        &self,
        project_id: &str,
        summary: Value,
    ) -> KeelResult<ProjectMemory> {
        let memory = ProjectMemory {
            project_id: project_id.to_string(),
            summary,
            updated_at: self.clock.now(),
        };
        let mut inner = self.write()?;
        inner
            .projects
            .insert(project_id.to_string(), memory.clone());
        Ok(memory)
    }

    pub async fn get_project_memory(&self, project_id: &str) -> KeelResult<Option<ProjectMemory>> {
        let inner = self.read()?;
        Ok(inner.projects.get(project_id).cloned())
    }
}
