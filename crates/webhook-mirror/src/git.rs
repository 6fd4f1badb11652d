//! Git operations using the `git` binary.
//!
//! Uses tokio::process::Command so clones and pushes don't block the runtime.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Errors from git invocations. Messages have secrets redacted.
#[derive(Debug, Error)]
pub enum GitError {
    /// The git binary could not be started
    #[error("Failed to execute git {operation}: {source}")]
    Spawn {
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// git exited unsuccessfully
    #[error("git {operation} failed: {stderr}")]
    Failed {
        operation: &'static str,
        stderr: String,
    },
}

/// Runs git with an optional `HOME` override. The home directory's
/// `.gitconfig` is where the destination credential helper lives.
#[derive(Debug, Clone, Default)]
pub struct Git {
    home: Option<PathBuf>,
    /// Values scrubbed from error output.
    secrets: Vec<String>,
}

impl Git {
    /// Create a runner. `home` becomes `HOME` for every git child process.
    #[must_use]
    pub fn new(home: Option<PathBuf>) -> Self {
        Self {
            home,
            secrets: Vec::new(),
        }
    }

    /// Same runner, additionally redacting `secret` from error messages.
    #[must_use]
    pub fn redacting(&self, secret: impl Into<String>) -> Self {
        let mut git = self.clone();
        let secret = secret.into();
        if !secret.is_empty() {
            git.secrets.push(secret);
        }
        git
    }

    fn command(&self, dir: Option<&Path>) -> Command {
        let mut command = Command::new("git");
        if let Some(home) = &self.home {
            command.env("HOME", home);
        }
        if let Some(dir) = dir {
            command.current_dir(dir);
        }
        // Never block on an interactive credential prompt
        command.env("GIT_TERMINAL_PROMPT", "0");
        command
    }

    async fn run(
        &self,
        operation: &'static str,
        dir: Option<&Path>,
        args: &[&str],
    ) -> Result<String, GitError> {
        let output = self
            .command(dir)
            .args(args)
            .output()
            .await
            .map_err(|source| GitError::Spawn { operation, source })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GitError::Failed {
                operation,
                stderr: self.redact(stderr.trim()),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn redact(&self, text: &str) -> String {
        self.secrets
            .iter()
            .fold(text.to_string(), |acc, secret| acc.replace(secret.as_str(), "[REDACTED]"))
    }

    /// Clone `url` into `target_dir`.
    pub async fn clone_repo(&self, url: &str, target_dir: &Path) -> Result<(), GitError> {
        debug!(target = %target_dir.display(), "Cloning repository");
        let target = target_dir.to_string_lossy();
        self.run("clone", None, &["clone", "--quiet", url, &target])
            .await
            .map(|_| ())
    }

    /// Register `url` as remote `name` on the repository at `repo_dir`.
    pub async fn add_remote(&self, repo_dir: &Path, name: &str, url: &str) -> Result<(), GitError> {
        debug!(remote = %name, "Adding remote");
        self.run("remote add", Some(repo_dir), &["remote", "add", name, url])
            .await
            .map(|_| ())
    }

    /// Push `refspec` to `remote`. Never forces.
    pub async fn push(&self, repo_dir: &Path, remote: &str, refspec: &str) -> Result<(), GitError> {
        debug!(remote = %remote, refspec = %refspec, "Pushing to remote");
        self.run("push", Some(repo_dir), &["push", "--quiet", remote, refspec])
            .await
            .map(|_| ())
    }

    /// Resolve a revision to a commit id.
    pub async fn rev_parse(&self, repo_dir: &Path, rev: &str) -> Result<String, GitError> {
        self.run("rev-parse", Some(repo_dir), &["rev-parse", "--verify", rev])
            .await
    }
}
