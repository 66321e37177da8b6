//! Data model for the merge/integration phase (spec.md §3).

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// The file-level diff one session branch carries relative to the base
/// (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionChanges {
    pub session_id: u32,
    pub branch_name: String,
    #[serde(default)]
    pub added: BTreeSet<PathBuf>,
    #[serde(default)]
    pub modified: BTreeSet<PathBuf>,
    #[serde(default)]
    pub deleted: BTreeSet<PathBuf>,
}

impl SessionChanges {
    pub fn all_paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.added.iter().chain(self.modified.iter()).chain(self.deleted.iter())
    }
}

/// Pre-merge analysis across every session branch (spec.md §3, §4.6).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeAnalysis {
    pub base_branch: String,
    pub per_session: Vec<SessionChanges>,
    /// Files touched by two or more sessions, keyed by path, valued by the
    /// set of sessions that touched them.
    pub overlapping: BTreeMap<PathBuf, BTreeSet<u32>>,
}

impl MergeAnalysis {
    /// Derived: no merge required conflict resolution upfront when no file
    /// was touched by more than one session.
    pub fn safe_to_merge(&self) -> bool {
        self.overlapping.is_empty()
    }

    pub fn total_files_changed(&self) -> usize {
        let mut all = BTreeSet::new();
        for session in &self.per_session {
            for path in session.all_paths() {
                all.insert(path.clone());
            }
        }
        all.len()
    }
}

/// Outcome of [`super::MergeOrchestrator::merge_sequential`] (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeResult {
    pub success: bool,
    pub integration_branch: String,
    #[serde(default)]
    pub merged_sessions: Vec<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict_session: Option<u32>,
    #[serde(default)]
    pub conflicting_files: Vec<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Outcome of [`super::MergeOrchestrator::finalize`] (spec.md §4.6).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizeReport {
    pub worktrees_removed: usize,
    pub files_changed: u64,
    pub lines_added: u64,
    pub lines_deleted: u64,
    pub integration_branch: String,
}
