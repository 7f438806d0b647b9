// Collaborator seams
//
// The engine consumes these interfaces but does not implement the external
// systems behind them. They are injected at construction; tests inject
// in-memory doubles (see `testing`).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;

/// A fetched issue
#[derive(Debug, Clone)]
pub struct Issue {
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
}

/// Issue-tracker adapter
#[async_trait]
pub trait IssueSource: Send + Sync {
    async fn fetch(&self, issue_ref: &str) -> Result<Issue>;
    async fn post_comment(&self, issue_ref: &str, text: &str) -> Result<()>;
}

/// Version-control adapter
#[async_trait]
pub trait Workspace: Send + Sync {
    async fn create_worktree(&self, branch: &str, base: &str) -> Result<PathBuf>;
    async fn commit(&self, path: &Path, message: &str) -> Result<()>;
    async fn push(&self, path: &Path) -> Result<()>;
    async fn open_review(&self, branch: &str, title: &str, body: &str) -> Result<String>;
}

/// Runs the project test suite and reports the exit code. Consumed by the
/// `test`, `verify_red` and `verify_green` phases; verify phases always
/// execute tests, there is no silent skip.
#[async_trait]
pub trait TestRunner: Send + Sync {
    async fn run(&self, worktree: &Path) -> Result<i32>;
}

/// Test runner that shells out to a configured command in the worktree.
pub struct ShellTestRunner {
    command: String,
}

impl ShellTestRunner {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl TestRunner for ShellTestRunner {
    async fn run(&self, worktree: &Path) -> Result<i32> {
        let status = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .current_dir(worktree)
            .status()
            .await
            .with_context(|| format!("failed to spawn test command: {}", self.command))?;
        Ok(status.code().unwrap_or(-1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shell_runner_reports_exit_code() {
        let runner = ShellTestRunner::new("exit 3");
        let code = runner.run(Path::new(".")).await.unwrap();
        assert_eq!(code, 3);

        let runner = ShellTestRunner::new("true");
        assert_eq!(runner.run(Path::new(".")).await.unwrap(), 0);
    }
}
