//! CompletionMonitor (spec.md §4.4): unified "has task T finished?" across
//! two orthogonal channels — manual touch files and watched `tasks.md`
//! checkbox transitions.

mod manual;
mod watcher;

pub use manual::ManualCompletions;
pub use watcher::{parse_completed_tasks, read_completed_tasks, watch_tasks_file, TasksFileWatch};

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::types::TaskId;

/// Errors raised by the completion-detection subsystem (spec.md §7).
#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error("timed out waiting for tasks to complete: {0:?} still pending after {1:?}")]
    WaitTimeout(Vec<TaskId>, Duration),

    #[error("wait for task completion was cancelled")]
    Cancelled,

    #[error("io error watching {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CompletionError {
    pub fn code(&self) -> &'static str {
        match self {
            CompletionError::WaitTimeout(..) => "WAIT_TIMEOUT",
            CompletionError::Cancelled => "CANCELLED",
            CompletionError::Io { .. } => "IO_ERROR",
        }
    }

    pub fn recovery_action(&self) -> String {
        match self {
            CompletionError::WaitTimeout(pending, _) => format!(
                "Check on the agents still assigned to {}, or retry wait_for with a longer timeout.",
                pending
                    .iter()
                    .map(TaskId::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            CompletionError::Cancelled => {
                "Resume the run to continue waiting from where it left off.".to_string()
            }
            CompletionError::Io { path, .. } => {
                format!("Check permissions on {}.", path.display())
            }
        }
    }
}

/// Cooperative cancellation flag threaded into [`CompletionMonitor::wait_for`]
/// (spec.md §5, §9 — "use a cancellation token ... check around subprocess
/// calls").
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Unified dual-source completion detector (spec.md §4.4).
///
/// Channel A (manual `.done` touch files) and Channel B (watched
/// `tasks.md` checkboxes) both feed a shared `watched` set; `completed()`
/// is simply `task_ids ∩ (manual ∪ watched)`.
pub struct CompletionMonitor {
    manual: ManualCompletions,
    watched: Arc<Mutex<HashSet<TaskId>>>,
    watch: Option<TasksFileWatch>,
    poll_interval: Duration,
    watch_debounce: Duration,
    watch_poll_interval: Duration,
    registered_paths: Vec<PathBuf>,
}

impl CompletionMonitor {
    pub fn new(
        completions_dir: impl Into<PathBuf>,
        poll_interval: Duration,
        watch_debounce: Duration,
        watch_poll_interval: Duration,
    ) -> Self {
        Self {
            manual: ManualCompletions::new(completions_dir),
            watched: Arc::new(Mutex::new(HashSet::new())),
            watch: None,
            poll_interval,
            watch_debounce,
            watch_poll_interval,
            registered_paths: Vec::new(),
        }
    }

    /// Record adapter-declared paths alongside the watched `tasks.md`
    /// (spec.md §4.5 step 3). These do not themselves drive completion
    /// detection — only `tasks.md` and manual touch files do — but are kept
    /// for observability by whatever surface inspects the monitor.
    pub fn register_watch_paths(&mut self, paths: impl IntoIterator<Item = PathBuf>) {
        self.registered_paths.extend(paths);
    }

    pub fn registered_watch_paths(&self) -> &[PathBuf] {
        &self.registered_paths
    }

    /// Channel A: create `<task_id>.done`. Idempotent (spec.md §8: marking
    /// twice leaves exactly one file).
    pub fn mark_complete(&self, task_id: &TaskId) -> Result<(), CompletionError> {
        self.manual.mark_complete(task_id)
    }

    pub fn is_complete(&self, task_id: &TaskId) -> bool {
        self.manual.is_complete(task_id) || self.watched_snapshot().contains(task_id)
    }

    pub fn manual_completions(&self) -> HashSet<TaskId> {
        self.manual.completions()
    }

    fn watched_snapshot(&self) -> HashSet<TaskId> {
        self.watched
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Begin watching `tasks_md` for checkbox transitions (Channel B). Any
    /// previously active watch is dropped (and thus stopped) first.
    pub fn watch_tasks_file(&mut self, tasks_md: impl Into<PathBuf>) -> Result<(), CompletionError> {
        let path = tasks_md.into();
        // Seed the shared set with whatever is already checked off, so a
        // resumed run doesn't treat pre-existing completions as "new".
        {
            let mut seen = self.watched.lock().unwrap_or_else(|e| e.into_inner());
            seen.extend(read_completed_tasks(&path));
        }
        let watched = Arc::clone(&self.watched);
        let watch = watch_tasks_file(
            path,
            move |new_ones| {
                let mut guard = watched.lock().unwrap_or_else(|e| e.into_inner());
                guard.extend(new_ones);
            },
            self.watch_debounce,
            self.watch_poll_interval,
            Arc::clone(&self.watched),
        )
        .map_err(|e| CompletionError::Io {
            path: PathBuf::new(),
            source: std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
        })?;
        self.watch = Some(watch);
        Ok(())
    }

    pub fn stop_watch(&mut self) {
        self.watch = None;
    }

    /// Intersection of `task_ids` with the union of manual and watched
    /// completions (spec.md §4.4).
    pub fn completed(&self, task_ids: &HashSet<TaskId>) -> HashSet<TaskId> {
        let manual = self.manual.completions();
        let watched = self.watched_snapshot();
        task_ids
            .iter()
            .filter(|id| manual.contains(*id) || watched.contains(*id))
            .cloned()
            .collect()
    }

    /// Block until `completed(task_ids) == task_ids`, the `timeout` elapses
    /// (raising [`CompletionError::WaitTimeout`]), or `cancel` is signalled
    /// (raising [`CompletionError::Cancelled`]). Polls at `poll_interval`
    /// between checks, consistent with the coordinator's coarse 500ms tick
    /// layered on top of the watcher's fast path (spec.md §4.4, §5).
    pub fn wait_for(
        &self,
        task_ids: &HashSet<TaskId>,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<HashSet<TaskId>, CompletionError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let done = self.completed(task_ids);
            if done.len() == task_ids.len() {
                return Ok(done);
            }
            if cancel.is_cancelled() {
                return Err(CompletionError::Cancelled);
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    let pending: Vec<TaskId> = task_ids.difference(&done).cloned().collect();
                    return Err(CompletionError::WaitTimeout(
                        pending,
                        timeout.unwrap_or_default(),
                    ));
                }
            }
            std::thread::sleep(self.poll_interval.min(Duration::from_millis(50)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[&str]) -> HashSet<TaskId> {
        raw.iter().map(|s| TaskId::parse(*s).unwrap()).collect()
    }

    #[test]
    fn manual_mark_then_wait_returns_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let monitor = CompletionMonitor::new(
            dir.path().join("completions"),
            Duration::from_millis(5),
            Duration::from_millis(10),
            Duration::from_millis(5),
        );
        let t001 = TaskId::parse("T001").unwrap();
        monitor.mark_complete(&t001).unwrap();
        let cancel = CancellationToken::new();
        let result = monitor
            .wait_for(&ids(&["T001"]), Some(Duration::from_secs(1)), &cancel)
            .unwrap();
        assert_eq!(result, ids(&["T001"]));
    }

    #[test]
    fn wait_for_times_out_when_incomplete() {
        let dir = tempfile::tempdir().unwrap();
        let monitor = CompletionMonitor::new(
            dir.path().join("completions"),
            Duration::from_millis(5),
            Duration::from_millis(10),
            Duration::from_millis(5),
        );
        let cancel = CancellationToken::new();
        let err = monitor
            .wait_for(&ids(&["T001"]), Some(Duration::from_millis(50)), &cancel)
            .unwrap_err();
        assert!(matches!(err, CompletionError::WaitTimeout(..)));
    }

    #[test]
    fn wait_for_unblocks_promptly_on_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let monitor = Arc::new(CompletionMonitor::new(
            dir.path().join("completions"),
            Duration::from_millis(5),
            Duration::from_millis(10),
            Duration::from_millis(5),
        ));
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            cancel_clone.cancel();
        });
        let err = monitor
            .wait_for(&ids(&["T001"]), None, &cancel)
            .unwrap_err();
        assert!(matches!(err, CompletionError::Cancelled));
    }

    #[test]
    fn completed_is_union_of_manual_and_watched() {
        let dir = tempfile::tempdir().unwrap();
        let tasks_md = dir.path().join("tasks.md");
        std::fs::write(&tasks_md, "- [x] [T002] done via checkbox\n").unwrap();

        let mut monitor = CompletionMonitor::new(
            dir.path().join("completions"),
            Duration::from_millis(5),
            Duration::from_millis(10),
            Duration::from_millis(5),
        );
        monitor.mark_complete(&TaskId::parse("T001").unwrap()).unwrap();
        monitor.watch_tasks_file(&tasks_md).unwrap();

        // Seeding happens synchronously in watch_tasks_file.
        let done = monitor.completed(&ids(&["T001", "T002", "T003"]));
        assert_eq!(done, ids(&["T001", "T002"]));
    }
}
