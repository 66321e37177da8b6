//! Shared git subprocess runner used by [`crate::worktree`] and
//! [`crate::merge`] — the only two components that shell out to git
//! (spec.md §4.2).
//!
//! Grounded on the teacher's `harness::git_manager::GitManager`: every
//! invocation goes through `run` / `run_with_retry`, with exponential
//! backoff on transient failures.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

const DEFAULT_MAX_RETRIES: u32 = 3;
const RETRY_BASE_DELAY_MS: u64 = 100;

/// Thin wrapper around `git` invocations scoped to one working directory.
pub struct Git {
    working_dir: PathBuf,
    max_retries: u32,
}

/// Raised when a git subprocess exits non-zero or cannot be spawned.
#[derive(Debug, Clone, thiserror::Error)]
#[error("git {command} failed: {stderr}")]
pub struct GitCommandError {
    pub command: String,
    pub stderr: String,
    pub retryable: bool,
}

impl GitCommandError {
    fn is_retryable(&self) -> bool {
        self.retryable
    }
}

impl Git {
    pub fn new(working_dir: impl AsRef<Path>) -> Self {
        Self {
            working_dir: working_dir.as_ref().to_path_buf(),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Run a git command, returning trimmed stdout.
    pub fn run(&self, args: &[&str]) -> Result<String, GitCommandError> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.working_dir)
            .output()
            .map_err(|e| GitCommandError {
                command: args.join(" "),
                stderr: e.to_string(),
                retryable: true,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            let retryable = stderr.contains("index.lock")
                || stderr.contains("Could not resolve host")
                || stderr.contains("Resource temporarily unavailable");
            tracing::error!(command = %args.join(" "), %stderr, "git command failed");
            return Err(GitCommandError {
                command: args.join(" "),
                stderr,
                retryable,
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Run stdout-returning git command; returns `None` on any failure
    /// rather than propagating, for callers that tolerate a missing answer
    /// (e.g. probing whether a ref exists).
    pub fn try_run(&self, args: &[&str]) -> Option<String> {
        self.run(args).ok()
    }

    /// Run with exponential backoff (100ms, 200ms, 400ms, …) on transient
    /// failures, matching the teacher's `run_git_with_retry`.
    pub fn run_with_retry(&self, args: &[&str]) -> Result<String, GitCommandError> {
        let mut last_err = None;
        for attempt in 0..=self.max_retries {
            match self.run(args) {
                Ok(out) => return Ok(out),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    let delay = RETRY_BASE_DELAY_MS * (1 << attempt);
                    tracing::warn!(command = %args.join(" "), attempt, delay, "retrying git command");
                    std::thread::sleep(Duration::from_millis(delay));
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.expect("loop always sets last_err before exhausting retries"))
    }

    pub fn current_branch(&self) -> Result<String, GitCommandError> {
        self.run(&["rev-parse", "--abbrev-ref", "HEAD"])
    }

    pub fn current_commit(&self) -> Result<String, GitCommandError> {
        self.run(&["rev-parse", "HEAD"])
    }

    pub fn is_detached(&self) -> bool {
        self.current_branch().map(|b| b == "HEAD").unwrap_or(false)
    }

    pub fn has_uncommitted_changes(&self) -> Result<bool, GitCommandError> {
        Ok(!self.run(&["status", "--porcelain"])?.is_empty())
    }

    pub fn branch_exists(&self, name: &str) -> bool {
        self.try_run(&["rev-parse", "--verify", "--quiet", name])
            .is_some()
    }
}
