//! Channel B: watches `tasks.md` for checkbox transitions.
//!
//! Grounded on the pack's `at-core::file_watcher` module: a `notify`
//! `RecommendedWatcher` relayed through a `crossbeam-channel`, drained on a
//! dedicated thread.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::TaskId;

static CHECKBOX_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*-\s+\[([xX])\]\s+\[(T\d{3})\]").unwrap());

/// Parse the set of task ids whose checkbox is marked complete
/// (spec.md §4.4, §6).
pub fn parse_completed_tasks(content: &str) -> HashSet<TaskId> {
    CHECKBOX_PATTERN
        .captures_iter(content)
        .filter_map(|cap| TaskId::parse(&cap[2]).ok())
        .collect()
}

/// A running watch on one `tasks.md` file. Dropping this stops the watch.
pub struct TasksFileWatch {
    stop: Arc<AtomicBool>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl Drop for TasksFileWatch {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

/// Watch `path` for modifications; after a `debounce` quiet window,
/// recompute the completed set and invoke `callback` with the
/// new-since-last-seen subset. Deletion of the watched file terminates the
/// watch cleanly without error (spec.md §4.4).
pub fn watch_tasks_file(
    path: impl Into<PathBuf>,
    callback: impl Fn(HashSet<TaskId>) + Send + 'static,
    debounce: Duration,
    poll_interval: Duration,
    seen: Arc<Mutex<HashSet<TaskId>>>,
) -> notify::Result<TasksFileWatch> {
    let path = path.into();
    let stop = Arc::new(AtomicBool::new(false));
    let stop_for_thread = Arc::clone(&stop);

    let (tx, rx) = crossbeam_channel::unbounded();
    let mut watcher = notify::recommended_watcher(move |res| {
        let _ = tx.send(res);
    })?;

    if let Some(parent) = path.parent().filter(|p| p.exists()) {
        watcher.watch(parent, RecursiveMode::NonRecursive)?;
    } else if path.exists() {
        watcher.watch(&path, RecursiveMode::NonRecursive)?;
    }

    let handle = std::thread::Builder::new()
        .name("speckitflow-completion-watcher".to_string())
        .spawn(move || {
            // `watcher` must stay alive for the duration of the thread.
            let _watcher = watcher;
            let mut last_event = None;

            loop {
                if stop_for_thread.load(Ordering::SeqCst) {
                    return;
                }

                match rx.recv_timeout(poll_interval) {
                    Ok(Ok(event)) => {
                        let touches_target = event.paths.iter().any(|p| p == &path);
                        if touches_target {
                            last_event = Some(std::time::Instant::now());
                        }
                    }
                    Ok(Err(_)) => {}
                    Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
                    Err(crossbeam_channel::RecvTimeoutError::Disconnected) => return,
                }

                if !path.exists() {
                    // File deletion terminates the watch cleanly.
                    return;
                }

                let quiet_elapsed = last_event
                    .map(|t| t.elapsed() >= debounce)
                    .unwrap_or(false);
                if last_event.is_some() && quiet_elapsed {
                    last_event = None;
                    if let Ok(content) = std::fs::read_to_string(&path) {
                        let current = parse_completed_tasks(&content);
                        let mut seen_guard = seen.lock().unwrap_or_else(|e| e.into_inner());
                        let new_ones: HashSet<TaskId> =
                            current.difference(&seen_guard).cloned().collect();
                        if !new_ones.is_empty() {
                            seen_guard.extend(new_ones.iter().cloned());
                            drop(seen_guard);
                            callback(new_ones);
                        }
                    }
                }
            }
        })
        .expect("spawning the completion watcher thread should not fail");

    Ok(TasksFileWatch {
        stop,
        handle: Some(handle),
    })
}

/// One-shot synchronous read, used by the coordinator's poll loop alongside
/// the watcher callback.
pub fn read_completed_tasks(path: &Path) -> HashSet<TaskId> {
    std::fs::read_to_string(path)
        .map(|content| parse_completed_tasks(&content))
        .unwrap_or_default()
}
