//! Sequential merge planner (spec.md §4.6).
//!
//! Grounded on the teacher's `work_packet::generator` fallback-chain style
//! for deriving git state (try the cheap path, fall back to a more thorough
//! one, never silently return nothing when git state is ambiguous) and on
//! `harness::git_manager::GitManager` for the underlying subprocess
//! conventions.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::gitutil::{Git, GitCommandError};
use crate::worktree::WorktreeManager;

use super::types::{FinalizeReport, MergeAnalysis, MergeResult, SessionChanges};

#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    #[error("no session branches found for spec {spec_id} (expected impl-{spec_id}-session-*)")]
    NoSessionBranches { spec_id: String },

    #[error("integration branch {0} already exists")]
    IntegrationBranchExists(String),

    #[error("git command failed: {0}")]
    GitCommandFailed(#[from] GitCommandError),
}

impl MergeError {
    pub fn code(&self) -> &'static str {
        match self {
            MergeError::NoSessionBranches { .. } => "NO_SESSION_BRANCHES",
            MergeError::IntegrationBranchExists(_) => "INTEGRATION_BRANCH_EXISTS",
            MergeError::GitCommandFailed(_) => "GIT_COMMAND_FAILED",
        }
    }

    pub fn recovery_action(&self) -> String {
        match self {
            MergeError::NoSessionBranches { spec_id } => format!(
                "Run the orchestration for spec {spec_id} first, or check that session branches were pushed/kept after the run."
            ),
            MergeError::IntegrationBranchExists(name) => format!(
                "Delete the stale integration branch first: git branch -D {name}"
            ),
            MergeError::GitCommandFailed(e) => format!("Inspect and re-run: git {}", e.command),
        }
    }
}

/// Integrates session branches produced by one orchestration run back into
/// the base branch (spec.md §4.6).
pub struct MergeOrchestrator {
    repo_root: PathBuf,
    spec_id: String,
    git: Git,
}

impl MergeOrchestrator {
    pub fn new(repo_root: impl Into<PathBuf>, spec_id: impl Into<String>) -> Self {
        let repo_root = repo_root.into();
        Self {
            git: Git::new(&repo_root),
            repo_root,
            spec_id: spec_id.into(),
        }
    }

    fn integration_branch(&self) -> String {
        format!("impl-{}-integrated", self.spec_id)
    }

    fn session_branch_prefix(&self) -> String {
        format!("impl-{}-session-", self.spec_id)
    }

    fn resolve_base_branch(&self, base_branch: Option<&str>) -> String {
        if let Some(b) = base_branch {
            return b.to_string();
        }
        if self.git.is_detached() {
            "main".to_string()
        } else {
            self.git
                .current_branch()
                .unwrap_or_else(|_| "main".to_string())
        }
    }

    /// List session branches for this spec, ordered by ascending session id
    /// (spec.md §4.6 — "why ascending session_id: deterministic order").
    fn session_branches(&self) -> Result<Vec<(u32, String)>, MergeError> {
        let output = self
            .git
            .run(&["branch", "--list", &format!("{}*", self.session_branch_prefix())])?;
        let prefix = self.session_branch_prefix();
        let mut branches: Vec<(u32, String)> = output
            .lines()
            .map(|l| l.trim_start_matches('*').trim().to_string())
            .filter(|l| !l.is_empty())
            .filter_map(|name| {
                let suffix = name.strip_prefix(&prefix)?;
                let id: u32 = suffix.parse().ok()?;
                Some((id, name))
            })
            .collect();
        branches.sort_by_key(|(id, _)| *id);
        Ok(branches)
    }

    /// Enumerate session branches, diff each against `base_branch` with a
    /// triple-dot comparison, and compute the cross-session overlap
    /// (spec.md §4.6, §8 scenario 5).
    pub fn analyze(&self, base_branch: Option<&str>) -> Result<MergeAnalysis, MergeError> {
        let base = self.resolve_base_branch(base_branch);
        let branches = self.session_branches()?;
        if branches.is_empty() {
            return Err(MergeError::NoSessionBranches {
                spec_id: self.spec_id.clone(),
            });
        }

        let mut per_session = Vec::new();
        let mut overlapping: BTreeMap<PathBuf, BTreeSet<u32>> = BTreeMap::new();
        let mut touched_by: BTreeMap<PathBuf, BTreeSet<u32>> = BTreeMap::new();

        for (session_id, branch) in &branches {
            let changes = self.diff_against_base(*session_id, branch, &base)?;
            for path in changes.all_paths() {
                touched_by.entry(path.clone()).or_default().insert(*session_id);
            }
            per_session.push(changes);
        }

        for (path, sessions) in &touched_by {
            if sessions.len() >= 2 {
                overlapping.insert(path.clone(), sessions.clone());
            }
        }

        tracing::info!(
            base = %base,
            sessions = branches.len(),
            overlaps = overlapping.len(),
            "merge analysis complete"
        );

        Ok(MergeAnalysis {
            base_branch: base,
            per_session,
            overlapping,
        })
    }

    fn diff_against_base(
        &self,
        session_id: u32,
        branch: &str,
        base: &str,
    ) -> Result<SessionChanges, MergeError> {
        let output = self
            .git
            .run(&["diff", "--name-status", &format!("{base}...{branch}")])?;

        let mut added = BTreeSet::new();
        let mut modified = BTreeSet::new();
        let mut deleted = BTreeSet::new();

        for line in output.lines() {
            let mut fields = line.split('\t');
            let Some(status) = fields.next() else { continue };
            match status.chars().next() {
                Some('A') => {
                    if let Some(path) = fields.next() {
                        added.insert(PathBuf::from(path));
                    }
                }
                Some('M') => {
                    if let Some(path) = fields.next() {
                        modified.insert(PathBuf::from(path));
                    }
                }
                Some('D') => {
                    if let Some(path) = fields.next() {
                        deleted.insert(PathBuf::from(path));
                    }
                }
                Some('R') => {
                    // modified-with-new-path (spec.md §4.6): the rename's
                    // destination is what downstream callers care about.
                    let _old = fields.next();
                    if let Some(new_path) = fields.next() {
                        modified.insert(PathBuf::from(new_path));
                    }
                }
                _ => {}
            }
        }

        Ok(SessionChanges {
            session_id,
            branch_name: branch.to_string(),
            added,
            modified,
            deleted,
        })
    }

    /// Create the integration branch off `base_branch` and merge session
    /// branches in ascending session-id order with non-fast-forward merges.
    /// On the first conflict, aborts, restores the base branch, deletes the
    /// integration branch, and reports the offending session (spec.md §4.6,
    /// §8 scenario 6).
    pub fn merge_sequential(&self, base_branch: Option<&str>) -> Result<MergeResult, MergeError> {
        let base = self.resolve_base_branch(base_branch);
        let branches = self.session_branches()?;
        if branches.is_empty() {
            return Err(MergeError::NoSessionBranches {
                spec_id: self.spec_id.clone(),
            });
        }

        let integration = self.integration_branch();
        if self.git.branch_exists(&integration) {
            return Err(MergeError::IntegrationBranchExists(integration));
        }

        self.git.run(&["checkout", &base])?;
        self.git.run(&["checkout", "-b", &integration])?;
        tracing::info!(branch = %integration, base = %base, "created integration branch");

        let mut merged_sessions = Vec::new();
        for (session_id, branch) in &branches {
            let message = format!("Merge session {session_id} ({branch})");
            let merge_result = self
                .git
                .run(&["merge", "--no-ff", "-m", &message, branch]);

            match merge_result {
                Ok(_) => {
                    merged_sessions.push(*session_id);
                    tracing::info!(session_id, branch, "merged session branch");
                }
                Err(_) => {
                    let conflicting_files = self.unresolved_files();
                    tracing::warn!(session_id, branch, ?conflicting_files, "merge conflict, aborting");
                    let _ = self.git.run(&["merge", "--abort"]);
                    let _ = self.git.run(&["checkout", &base]);
                    let _ = self.git.run(&["branch", "-D", &integration]);
                    return Ok(MergeResult {
                        success: false,
                        integration_branch: integration,
                        merged_sessions,
                        conflict_session: Some(*session_id),
                        conflicting_files,
                        error_message: Some(format!(
                            "conflict merging session {session_id} ({branch}) into {base}"
                        )),
                    });
                }
            }
        }

        Ok(MergeResult {
            success: true,
            integration_branch: integration,
            merged_sessions,
            conflict_session: None,
            conflicting_files: Vec::new(),
            error_message: None,
        })
    }

    fn unresolved_files(&self) -> Vec<PathBuf> {
        self.git
            .try_run(&["diff", "--name-only", "--diff-filter=U"])
            .map(|out| out.lines().map(PathBuf::from).collect())
            .unwrap_or_default()
    }

    /// Check out the integration branch and run `test_cmd` through the
    /// shell in the repo root, capturing combined stdout/stderr. Absent a
    /// command, trivially succeeds (spec.md §4.6). Runs exactly once; the
    /// source this was ported from does not retry transient failures and
    /// that behavior is preserved (spec.md §9, Open Questions).
    pub fn validate(&self, test_cmd: Option<&str>) -> (bool, String) {
        let Some(cmd) = test_cmd else {
            return (true, String::new());
        };

        if let Err(e) = self.git.run(&["checkout", &self.integration_branch()]) {
            return (false, format!("failed to check out integration branch: {e}"));
        }

        let shell = if cfg!(windows) { "cmd" } else { "sh" };
        let flag = if cfg!(windows) { "/C" } else { "-c" };
        match Command::new(shell)
            .arg(flag)
            .arg(cmd)
            .current_dir(&self.repo_root)
            .output()
        {
            Ok(output) => {
                let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
                combined.push_str(&String::from_utf8_lossy(&output.stderr));
                (output.status.success(), combined)
            }
            Err(e) => (false, format!("failed to run validation command: {e}")),
        }
    }

    /// Gather `git diff --shortstat` between the merge base and the
    /// integration tip, optionally force-removing the spec's worktrees
    /// (spec.md §4.6). `base_branch` must name the branch the run actually
    /// integrated against (e.g. `OrchestrationState.base_branch`) — by the
    /// time `finalize` runs, `merge_sequential` has left the integration
    /// branch checked out, so resolving the base from the current checkout
    /// would just resolve back to the integration branch itself.
    pub fn finalize(
        &self,
        base_branch: Option<&str>,
        keep_worktrees: bool,
        worktrees: &WorktreeManager,
    ) -> Result<FinalizeReport, MergeError> {
        let integration = self.integration_branch();
        let base = self.resolve_base_branch(base_branch);
        let merge_base = self
            .git
            .try_run(&["merge-base", &base, &integration])
            .unwrap_or_else(|| base.clone());

        let shortstat = self
            .git
            .try_run(&["diff", "--shortstat", &merge_base, &integration])
            .unwrap_or_default();
        let (files_changed, lines_added, lines_deleted) = parse_shortstat(&shortstat);

        let worktrees_removed = if keep_worktrees {
            0
        } else {
            worktrees.cleanup_spec(&self.spec_id)
        };

        Ok(FinalizeReport {
            worktrees_removed,
            files_changed,
            lines_added,
            lines_deleted,
            integration_branch: integration,
        })
    }
}

/// Tolerant parse of `git diff --shortstat` output, e.g.
/// `" 3 files changed, 42 insertions(+), 7 deletions(-)"`. Missing
/// insertions or deletions become 0 (spec.md §4.6).
fn parse_shortstat(text: &str) -> (u64, u64, u64) {
    let mut files = 0;
    let mut insertions = 0;
    let mut deletions = 0;
    for part in text.split(',') {
        let part = part.trim();
        let Some(count) = part.split_whitespace().next().and_then(|s| s.parse::<u64>().ok()) else {
            continue;
        };
        if part.contains("file") {
            files = count;
        } else if part.contains("insertion") {
            insertions = count;
        } else if part.contains("deletion") {
            deletions = count;
        }
    }
    (files, insertions, deletions)
}
