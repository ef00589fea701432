//! Git metadata collaborator.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

/// Branch and abbreviated commit of a working directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitInfo {
    pub branch: Option<String>,
    pub commit: Option<String>,
}

/// Source of git metadata for a working directory.
///
/// Implementations return `GitInfo::default()` (both fields `None`) on any
/// failure; the caller bounds the call with its own timeout.
#[async_trait]
pub trait GitInfoProvider: Send + Sync {
    async fn git_info(&self, working_directory: &Path) -> GitInfo;
}

/// Reads git metadata by running the `git` binary.
#[derive(Debug, Clone, Default)]
pub struct GitCommandProvider;

impl GitCommandProvider {
    async fn rev_parse(working_directory: &Path, args: &[&str]) -> Option<String> {
        let output = match Command::new("git")
            .arg("-C")
            .arg(working_directory)
            .arg("rev-parse")
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
        {
            Ok(output) => output,
            Err(e) => {
                tracing::debug!(error = %e, "failed to spawn git");
                return None;
            }
        };

        if !output.status.success() {
            return None;
        }
        let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
        (!value.is_empty()).then_some(value)
    }
}

#[async_trait]
impl GitInfoProvider for GitCommandProvider {
    async fn git_info(&self, working_directory: &Path) -> GitInfo {
        let branch = Self::rev_parse(working_directory, &["--abbrev-ref", "HEAD"]).await;
        let commit = Self::rev_parse(working_directory, &["--short", "HEAD"]).await;
        GitInfo { branch, commit }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_directory_yields_none() {
        let info = GitCommandProvider
            .git_info(Path::new("/definitely/not/a/repo/keel"))
            .await;
        assert_eq!(info, GitInfo::default());
    }
}
