//! AgentAdapter capability interface (spec.md §1, §9).
//!
//! The core never instantiates a concrete agent process — adapters are the
//! pluggable boundary spec.md places out of scope, reduced here to the
//! capability set the coordinator actually calls: `setup_session`,
//! `notify_user`, `files_to_watch`. Dispatch is by trait object (Rust's
//! analogue of the source's "tagged variant, not inheritance" note in
//! spec.md §9) plus one built-in no-op implementation.

use std::path::{Path, PathBuf};

use crate::types::TaskInfo;

/// Error surfaced by an adapter implementation. The core treats adapters as
/// untrusted plugins: any failure here aborts the originating session's
/// task start and is reported to the caller, but never panics the
/// coordinator (spec.md §7: filesystem/git errors during worktree/session
/// setup mark only the originating session failed).
#[derive(Debug, thiserror::Error)]
#[error("agent adapter failed: {0}")]
pub struct AdapterError(pub String);

impl AdapterError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Capability set a pluggable agent integration must provide (spec.md §1,
/// §9). Implementations live outside this crate; the core only depends on
/// this trait.
pub trait AgentAdapter: Send + Sync {
    /// Write whatever context a human-or-agent session needs into
    /// `worktree` to start on `task` (e.g. a context file, a prompt seed).
    fn setup_session(&self, worktree: &Path, task: &TaskInfo) -> Result<(), AdapterError>;

    /// Emit a user-facing notification that `session_id` should pick up
    /// `task` in `worktree`.
    fn notify_user(
        &self,
        session_id: u32,
        worktree: &Path,
        task: &TaskInfo,
    ) -> Result<(), AdapterError>;

    /// Additional paths (beyond the feature's `tasks.md`) the completion
    /// monitor should be made aware of for this worktree.
    fn files_to_watch(&self, worktree: &Path) -> Vec<PathBuf> {
        let _ = worktree;
        Vec::new()
    }

    /// Where this adapter would write its context file, for callers that
    /// need to surface the path without performing setup (spec.md §9).
    fn context_file_path(&self, worktree: &Path) -> Option<PathBuf> {
        let _ = worktree;
        None
    }
}

/// The null adapter: performs no setup, emits no notification. Useful for
/// dry runs and tests that only exercise the scheduling/coordination logic.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAgentAdapter;

impl AgentAdapter for NoopAgentAdapter {
    fn setup_session(&self, _worktree: &Path, _task: &TaskInfo) -> Result<(), AdapterError> {
        Ok(())
    }

    fn notify_user(
        &self,
        _session_id: u32,
        _worktree: &Path,
        _task: &TaskInfo,
    ) -> Result<(), AdapterError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TaskId;

    #[test]
    fn noop_adapter_never_fails() {
        let adapter = NoopAgentAdapter;
        let task = TaskInfo::new(TaskId::parse("T001").unwrap(), "bootstrap");
        let path = Path::new("/tmp/doesnt-matter");
        assert!(adapter.setup_session(path, &task).is_ok());
        assert!(adapter.notify_user(0, path, &task).is_ok());
        assert!(adapter.files_to_watch(path).is_empty());
        assert!(adapter.context_file_path(path).is_none());
    }
}
