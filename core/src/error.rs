//! Crate-level error taxonomy.
//!
//! Every variant names what was attempted and carries the fields needed to
//! build a message naming why it failed and what to do next, following the
//! same contract as the harness's structured error responses: code, message,
//! recovery action.

use std::path::PathBuf;

use thiserror::Error;

use crate::completion::CompletionError;
use crate::dag::DagError;
use crate::merge::MergeError;
use crate::state::StateError;
use crate::worktree::WorktreeError;

/// Top-level result alias for orchestration operations.
pub type FlowResult<T> = Result<T, FlowError>;

/// Aggregated error taxonomy for the orchestration engine (spec.md §7).
#[derive(Debug, Error)]
pub enum FlowError {
    #[error(transparent)]
    Dag(#[from] DagError),

    #[error(transparent)]
    Worktree(#[from] WorktreeError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Completion(#[from] CompletionError),

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("malformed task file {path}: {reason}")]
    MalformedTaskFile { path: PathBuf, reason: String },

    #[error("agent adapter failed for worktree {worktree}: {message}")]
    AdapterFailed { worktree: PathBuf, message: String },

    #[error("orchestration run was cancelled")]
    Cancelled,
}

impl FlowError {
    /// Machine-readable error code, stable across releases.
    pub fn code(&self) -> &'static str {
        match self {
            FlowError::Dag(e) => e.code(),
            FlowError::Worktree(e) => e.code(),
            FlowError::State(e) => e.code(),
            FlowError::Completion(e) => e.code(),
            FlowError::Merge(e) => e.code(),
            FlowError::InvalidArgument { .. } => "INVALID_ARGUMENT",
            FlowError::MalformedTaskFile { .. } => "MALFORMED_TASK_FILE",
            FlowError::AdapterFailed { .. } => "ADAPTER_FAILED",
            FlowError::Cancelled => "CANCELLED",
        }
    }

    /// A concrete next action the operator can take, per spec.md §7's
    /// user-visible behavior contract.
    pub fn recovery_action(&self) -> String {
        match self {
            FlowError::Dag(e) => e.recovery_action(),
            FlowError::Worktree(e) => e.recovery_action(),
            FlowError::State(e) => e.recovery_action(),
            FlowError::Completion(e) => e.recovery_action(),
            FlowError::Merge(e) => e.recovery_action(),
            FlowError::InvalidArgument { .. } => {
                "Correct the argument and retry the call.".to_string()
            }
            FlowError::MalformedTaskFile { path, .. } => {
                format!("Fix the task list at {} and retry.", path.display())
            }
            FlowError::AdapterFailed { worktree, .. } => format!(
                "Inspect the agent adapter's setup for {} and retry the session.",
                worktree.display()
            ),
            FlowError::Cancelled => {
                "Re-run with resume=true to continue from the last checkpoint.".to_string()
            }
        }
    }
}
