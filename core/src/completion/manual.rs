//! Channel A: manual completion via empty `.done` touch files.
//!
//! Grounded on the spec's note that touch files are "write-once, crash-safe,
//! and cross-process without a daemon" — creation relies on filesystem
//! atomicity rather than any lock, matching the teacher's preference for
//! filesystem-backed state over in-process singletons.

use std::collections::HashSet;
use std::path::PathBuf;

use crate::types::TaskId;

use super::CompletionError;

/// Manages the `<repo>/.speckit/completions/<TaskId>.done` marker files
/// (spec.md §4.4, §6).
pub struct ManualCompletions {
    dir: PathBuf,
}

impl ManualCompletions {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn marker_path(&self, task_id: &TaskId) -> PathBuf {
        self.dir.join(format!("{task_id}.done"))
    }

    /// Create the marker file if absent. Idempotent: calling this twice for
    /// the same task leaves exactly one `.done` file (spec.md §8).
    pub fn mark_complete(&self, task_id: &TaskId) -> Result<(), CompletionError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| CompletionError::Io {
            path: self.dir.clone(),
            source: e,
        })?;
        let path = self.marker_path(task_id);
        match std::fs::OpenOptions::new().create_new(true).write(true).open(&path) {
            Ok(_) => {
                tracing::info!(task = %task_id, path = %path.display(), "marked task complete");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(CompletionError::Io { path, source: e }),
        }
    }

    pub fn is_complete(&self, task_id: &TaskId) -> bool {
        self.marker_path(task_id).exists()
    }

    /// Glob `*.done` in the completions directory for the full manual set.
    pub fn completions(&self) -> HashSet<TaskId> {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return HashSet::new();
        };
        entries
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let name = e.file_name();
                let name = name.to_str()?;
                let id = name.strip_suffix(".done")?;
                TaskId::parse(id).ok()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_complete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let manual = ManualCompletions::new(dir.path().join("completions"));
        let t042 = TaskId::parse("T042").unwrap();
        manual.mark_complete(&t042).unwrap();
        manual.mark_complete(&t042).unwrap();

        let entries: Vec<_> = std::fs::read_dir(dir.path().join("completions"))
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert_eq!(entries.len(), 1);
        assert!(manual.is_complete(&t042));
    }

    #[test]
    fn completions_globs_done_files() {
        let dir = tempfile::tempdir().unwrap();
        let manual = ManualCompletions::new(dir.path().join("completions"));
        manual.mark_complete(&TaskId::parse("T001").unwrap()).unwrap();
        manual.mark_complete(&TaskId::parse("T002").unwrap()).unwrap();
        let set = manual.completions();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn concurrent_mark_complete_leaves_exactly_one_file() {
        use std::sync::Arc;
        let dir = tempfile::tempdir().unwrap();
        let manual = Arc::new(ManualCompletions::new(dir.path().join("completions")));
        let t042 = TaskId::parse("T042").unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let manual = Arc::clone(&manual);
                let id = t042.clone();
                std::thread::spawn(move || manual.mark_complete(&id).unwrap())
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let entries: Vec<_> = std::fs::read_dir(dir.path().join("completions"))
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert_eq!(entries.len(), 1);
    }
}
