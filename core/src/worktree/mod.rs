//! WorktreeManager (spec.md §4.2): the only component that shells out to
//! `git worktree`.

mod manager;
mod sanitize;

pub use manager::{WorktreeError, WorktreeInfo, WorktreeManager};
pub use sanitize::sanitize_task_name;
