//! Per-user, per-session editor context.
//!
//! Sessions are indexed twice: by `session_id` (the owning index) and by
//! `user_id` (a set of session IDs for fast per-user enumeration). Both
//! indexes are updated under the same lock so they never disagree.
//!
//! Git metadata comes from an external [`GitInfoProvider`]. The lookup is
//! bounded by a timeout and fails open: a missing repository, a failing
//! `git` binary or a timeout all leave `git_branch`/`git_commit` as `None`
//! without failing session creation.

mod context;
mod directory;
mod git;

pub use context::{CursorPosition, ProjectMemory, SessionContext, SessionUpdate};
pub use directory::SessionDirectory;
pub use git::{GitCommandProvider, GitInfo, GitInfoProvider};
