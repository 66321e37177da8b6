//! Git worktree lifecycle management.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::gitutil::{Git, GitCommandError};

use super::sanitize::sanitize_task_name;

/// A snapshot of one `git worktree list --porcelain` entry (spec.md §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorktreeInfo {
    pub path: PathBuf,
    pub branch: String,
    pub commit: String,
    pub locked: bool,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum WorktreeError {
    #[error("worktree already exists: branch or directory for session {session_id} already present")]
    WorktreeExists { session_id: u32, path: PathBuf },

    #[error("worktree at {0} has uncommitted changes")]
    WorktreeNotClean(PathBuf),

    #[error("git command failed: {0}")]
    GitCommandFailed(#[from] GitCommandError),
}

impl WorktreeError {
    pub fn code(&self) -> &'static str {
        match self {
            WorktreeError::WorktreeExists { .. } => "WORKTREE_EXISTS",
            WorktreeError::WorktreeNotClean(_) => "WORKTREE_NOT_CLEAN",
            WorktreeError::GitCommandFailed(_) => "GIT_COMMAND_FAILED",
        }
    }

    pub fn recovery_action(&self) -> String {
        match self {
            WorktreeError::WorktreeExists { path, .. } => format!(
                "Remove the existing worktree/branch at {} first, or resume the existing session instead of recreating it.",
                path.display()
            ),
            WorktreeError::WorktreeNotClean(path) => format!(
                "Commit or stash changes in {}, or call remove_force to discard them.",
                path.display()
            ),
            WorktreeError::GitCommandFailed(e) => {
                format!("Inspect and re-run: git {}", e.command)
            }
        }
    }
}

/// The only component that shells out to `git worktree` (spec.md §4.2).
pub struct WorktreeManager {
    repo_root: PathBuf,
    git: Git,
}

impl WorktreeManager {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        let repo_root = repo_root.into();
        Self {
            git: Git::new(&repo_root),
            repo_root,
        }
    }

    fn branch_name(spec_id: &str, session_id: u32) -> String {
        format!("impl-{spec_id}-session-{session_id}")
    }

    fn worktree_path(&self, spec_id: &str, session_id: u32, task_name: &str) -> PathBuf {
        let sanitized = sanitize_task_name(task_name);
        self.repo_root
            .join(format!(".worktrees-{spec_id}"))
            .join(format!("session-{session_id}-{sanitized}"))
    }

    /// Create a worktree and branch for `session_id`'s first task in a phase.
    pub fn create(
        &self,
        spec_id: &str,
        session_id: u32,
        task_name: &str,
    ) -> Result<PathBuf, WorktreeError> {
        let branch = Self::branch_name(spec_id, session_id);
        let path = self.worktree_path(spec_id, session_id, task_name);

        if self.git.branch_exists(&branch) || path.exists() {
            return Err(WorktreeError::WorktreeExists { session_id, path });
        }

        tracing::info!(%branch, path = %path.display(), "creating worktree");
        self.git.run_with_retry(&[
            "worktree",
            "add",
            "-b",
            &branch,
            path.to_str().expect("worktree path must be valid utf-8"),
        ])?;

        Ok(path)
    }

    /// Parse `git worktree list --porcelain` into structured entries.
    /// Blocks missing required fields are dropped; returns `[]` if the
    /// underlying command fails (spec.md §4.2).
    pub fn list(&self) -> Vec<WorktreeInfo> {
        let Some(output) = self.git.try_run(&["worktree", "list", "--porcelain"]) else {
            return Vec::new();
        };
        parse_porcelain(&output)
    }

    /// `list()` filtered to worktrees under `.worktrees-{spec_id}`.
    pub fn get_spec_worktrees(&self, spec_id: &str) -> Vec<WorktreeInfo> {
        let prefix = self.repo_root.join(format!(".worktrees-{spec_id}"));
        self.list()
            .into_iter()
            .filter(|w| w.path.starts_with(&prefix))
            .collect()
    }

    /// Remove a clean worktree; raises if it has uncommitted changes.
    pub fn remove(&self, path: &Path) -> Result<(), WorktreeError> {
        let worktree_git = Git::new(path);
        if worktree_git.has_uncommitted_changes().unwrap_or(false) {
            return Err(WorktreeError::WorktreeNotClean(path.to_path_buf()));
        }
        self.git
            .run(&["worktree", "remove", path.to_str().unwrap_or_default()])?;
        Ok(())
    }

    /// Force-remove even a dirty worktree; may destroy uncommitted work.
    pub fn remove_force(&self, path: &Path) -> Result<(), WorktreeError> {
        tracing::warn!(path = %path.display(), "force-removing worktree");
        self.git
            .run(&["worktree", "remove", "--force", path.to_str().unwrap_or_default()])?;
        Ok(())
    }

    /// Force-remove each of a spec's worktrees independently, continuing on
    /// individual failure, then remove the now-empty parent directory.
    /// Never raises for a missing spec (spec.md §4.2).
    pub fn cleanup_spec(&self, spec_id: &str) -> usize {
        let worktrees = self.get_spec_worktrees(spec_id);
        let mut removed = 0;
        for w in &worktrees {
            match self.remove_force(&w.path) {
                Ok(()) => removed += 1,
                Err(e) => tracing::warn!(path = %w.path.display(), error = %e, "failed to remove worktree during cleanup"),
            }
        }

        let parent = self.repo_root.join(format!(".worktrees-{spec_id}"));
        if parent.exists() {
            if std::fs::remove_dir(&parent).is_err() {
                let _ = std::fs::remove_dir_all(&parent);
            }
        }

        removed
    }
}

fn parse_porcelain(output: &str) -> Vec<WorktreeInfo> {
    let mut infos = Vec::new();
    let mut path: Option<PathBuf> = None;
    let mut commit: Option<String> = None;
    let mut branch: Option<String> = None;
    let mut locked = false;

    let flush = |path: &mut Option<PathBuf>,
                 commit: &mut Option<String>,
                 branch: &mut Option<String>,
                 locked: &mut bool,
                 infos: &mut Vec<WorktreeInfo>| {
        if let (Some(p), Some(c)) = (path.take(), commit.take()) {
            infos.push(WorktreeInfo {
                path: p,
                commit: c,
                branch: branch.take().unwrap_or_else(|| "(detached)".to_string()),
                locked: *locked,
            });
        }
        *locked = false;
    };

    for line in output.lines() {
        if line.is_empty() {
            flush(&mut path, &mut commit, &mut branch, &mut locked, &mut infos);
            continue;
        }
        if let Some(rest) = line.strip_prefix("worktree ") {
            path = Some(PathBuf::from(rest));
        } else if let Some(rest) = line.strip_prefix("HEAD ") {
            commit = Some(rest.to_string());
        } else if let Some(rest) = line.strip_prefix("branch refs/heads/") {
            branch = Some(rest.to_string());
        } else if line == "detached" {
            branch = Some("(detached)".to_string());
        } else if line == "locked" || line.starts_with("locked ") {
            locked = true;
        }
    }
    flush(&mut path, &mut commit, &mut branch, &mut locked, &mut infos);

    infos
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    fn init_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for args in [
            vec!["init", "-b", "main"],
            vec!["config", "user.email", "test@test.com"],
            vec!["config", "user.name", "Test"],
        ] {
            Command::new("git").args(args).current_dir(dir.path()).output().unwrap();
        }
        std::fs::write(dir.path().join("README.md"), "# test").unwrap();
        Command::new("git").args(["add", "."]).current_dir(dir.path()).output().unwrap();
        Command::new("git")
            .args(["commit", "-m", "initial"])
            .current_dir(dir.path())
            .output()
            .unwrap();
        dir
    }

    #[test]
    fn parse_porcelain_drops_incomplete_blocks() {
        let sample = "worktree /repo\nHEAD abcdef\nbranch refs/heads/main\n\nworktree /repo/.worktrees-042/session-0-foo\nHEAD 123456\nbranch refs/heads/impl-042-session-0\n\nworktree /incomplete\n";
        let infos = parse_porcelain(sample);
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[0].branch, "main");
        assert_eq!(infos[1].branch, "impl-042-session-0");
    }

    #[test]
    fn parse_porcelain_marks_detached_and_locked() {
        let sample = "worktree /repo/wt\nHEAD abcdef\ndetached\nlocked reason\n";
        let infos = parse_porcelain(sample);
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].branch, "(detached)");
        assert!(infos[0].locked);
    }

    #[test]
    fn create_then_list_then_cleanup() {
        let dir = init_repo();
        let mgr = WorktreeManager::new(dir.path());

        let path = mgr.create("042", 0, "Add Login Flow").unwrap();
        assert!(path.ends_with("session-0-add-login-flow"));
        assert!(path.exists());

        let spec_worktrees = mgr.get_spec_worktrees("042");
        assert_eq!(spec_worktrees.len(), 1);
        assert_eq!(spec_worktrees[0].branch, "impl-042-session-0");

        let removed = mgr.cleanup_spec("042");
        assert_eq!(removed, 1);
        assert!(!path.exists());
    }

    #[test]
    fn create_twice_for_same_session_fails() {
        let dir = init_repo();
        let mgr = WorktreeManager::new(dir.path());
        mgr.create("042", 0, "first task").unwrap();
        let err = mgr.create("042", 0, "first task").unwrap_err();
        assert!(matches!(err, WorktreeError::WorktreeExists { .. }));
    }

    #[test]
    fn cleanup_missing_spec_never_raises() {
        let dir = init_repo();
        let mgr = WorktreeManager::new(dir.path());
        assert_eq!(mgr.cleanup_spec("does-not-exist"), 0);
    }
}
