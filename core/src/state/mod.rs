//! StateStore (spec.md §4.3): durable, concurrent-safe orchestration state.

mod lock;
mod store;
mod types;

pub use lock::{acquire_exclusive, FileLockGuard, LockTimeoutError};
pub use store::{StateError, StateStore};
pub use types::{MergeStatus, OrchestrationState, SessionState, TaskRecord};
