//! Durable, file-locked orchestration state store (spec.md §4.3).

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;

use super::lock::{acquire_exclusive, LockTimeoutError};
use super::types::OrchestrationState;

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("timed out acquiring the state lock: {0}")]
    StateLockTimeout(#[from] LockTimeoutError),

    #[error("orchestration state at {path} is corrupt: {reason}")]
    CorruptState { path: PathBuf, reason: String },

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no orchestration state exists at {0}")]
    NotFound(PathBuf),
}

impl StateError {
    pub fn code(&self) -> &'static str {
        match self {
            StateError::StateLockTimeout(_) => "STATE_LOCK_TIMEOUT",
            StateError::CorruptState { .. } => "CORRUPT_STATE",
            StateError::Io { .. } => "IO_ERROR",
            StateError::NotFound(_) => "STATE_NOT_FOUND",
        }
    }

    pub fn recovery_action(&self) -> String {
        match self {
            StateError::StateLockTimeout(_) => {
                "Check for a stuck process holding the lock, or retry with a longer timeout."
                    .to_string()
            }
            StateError::CorruptState { path, .. } => format!(
                "Restore from the latest checkpoint under {}/checkpoints, or delete state to start over.",
                path.parent().map(|p| p.display().to_string()).unwrap_or_default()
            ),
            StateError::Io { path, .. } => {
                format!("Check permissions and free space at {}.", path.display())
            }
            StateError::NotFound(path) => {
                format!("Run initialize() to create state at {}.", path.display())
            }
        }
    }
}

/// Durable state store rooted at `<repo>/.speckit/` (spec.md §4.3).
pub struct StateStore {
    state_path: PathBuf,
    lock_path: PathBuf,
    checkpoints_dir: PathBuf,
    lock_timeout: Duration,
}

impl StateStore {
    pub fn new(
        state_path: impl Into<PathBuf>,
        lock_path: impl Into<PathBuf>,
        checkpoints_dir: impl Into<PathBuf>,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            state_path: state_path.into(),
            lock_path: lock_path.into(),
            checkpoints_dir: checkpoints_dir.into(),
            lock_timeout,
        }
    }

    pub fn exists(&self) -> bool {
        self.state_path.exists()
    }

    /// Load the current state, holding the lock only for the duration of the
    /// read.
    pub fn load(&self) -> Result<OrchestrationState, StateError> {
        let _guard = acquire_exclusive(&self.lock_path, self.lock_timeout)?;
        self.load_unlocked()
    }

    fn load_unlocked(&self) -> Result<OrchestrationState, StateError> {
        if !self.state_path.exists() {
            return Err(StateError::NotFound(self.state_path.clone()));
        }
        let content = std::fs::read_to_string(&self.state_path).map_err(|e| StateError::Io {
            path: self.state_path.clone(),
            source: e,
        })?;
        serde_yaml::from_str(&content).map_err(|e| StateError::CorruptState {
            path: self.state_path.clone(),
            reason: e.to_string(),
        })
    }

    /// Atomically persist `state` (write temp + rename).
    pub fn save(&self, state: &OrchestrationState) -> Result<(), StateError> {
        let _guard = acquire_exclusive(&self.lock_path, self.lock_timeout)?;
        self.write_atomic(&self.state_path, state)
    }

    fn write_atomic(&self, path: &Path, state: &OrchestrationState) -> Result<(), StateError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StateError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        let yaml = serde_yaml::to_string(state).map_err(|e| StateError::CorruptState {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let tmp = path.with_extension("yaml.tmp");
        std::fs::write(&tmp, yaml).map_err(|e| StateError::Io {
            path: tmp.clone(),
            source: e,
        })?;
        std::fs::rename(&tmp, path).map_err(|e| StateError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        tracing::debug!(path = %path.display(), "orchestration state written");
        Ok(())
    }

    /// Remove state and lock, but not checkpoints.
    pub fn delete(&self) -> Result<(), StateError> {
        let _guard = acquire_exclusive(&self.lock_path, self.lock_timeout)?;
        if self.state_path.exists() {
            std::fs::remove_file(&self.state_path).map_err(|e| StateError::Io {
                path: self.state_path.clone(),
                source: e,
            })?;
        }
        Ok(())
    }

    /// Write a new, uniquely named checkpoint snapshot; never overwrites
    /// (spec.md invariant 9).
    pub fn checkpoint(&self, state: &OrchestrationState) -> Result<PathBuf, StateError> {
        let _guard = acquire_exclusive(&self.lock_path, self.lock_timeout)?;
        std::fs::create_dir_all(&self.checkpoints_dir).map_err(|e| StateError::Io {
            path: self.checkpoints_dir.clone(),
            source: e,
        })?;

        let stamp = Utc::now().format("%Y%m%dT%H%M%SZ");
        let mut path = self.checkpoints_dir.join(format!("flow-state-{stamp}.yaml"));
        let mut suffix = 1;
        while path.exists() {
            path = self
                .checkpoints_dir
                .join(format!("flow-state-{stamp}-{suffix}.yaml"));
            suffix += 1;
        }

        self.write_atomic(&path, state)?;
        tracing::info!(path = %path.display(), "checkpoint written");
        Ok(path)
    }

    /// The most recently created checkpoint. Ordered by `(timestamp,
    /// collision_suffix)` rather than raw filename bytes: a same-second
    /// collision is disambiguated with a `-{n}` suffix (see `checkpoint`
    /// above), and `'-'` (0x2D) sorts *before* `'.'` (0x2E) — so the
    /// unsuffixed, oldest member of a same-second group would otherwise
    /// win a byte-wise `max_by_key` over every suffixed, newer one.
    pub fn latest_checkpoint(&self) -> Option<PathBuf> {
        let entries = std::fs::read_dir(&self.checkpoints_dir).ok()?;
        entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter_map(|p| checkpoint_sort_key(&p).map(|key| (key, p)))
            .max_by(|a, b| a.0.cmp(&b.0))
            .map(|(_, p)| p)
    }

    pub fn restore_from(&self, path: &Path) -> Result<OrchestrationState, StateError> {
        let content = std::fs::read_to_string(path).map_err(|e| StateError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        serde_yaml::from_str(&content).map_err(|e| StateError::CorruptState {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}

/// Extract `(timestamp, collision_suffix)` from a `flow-state-<stamp>.yaml`
/// or `flow-state-<stamp>-<n>.yaml` checkpoint filename, `collision_suffix`
/// defaulting to 0 for the unsuffixed (first-created) name of a group. The
/// `%Y%m%dT%H%M%SZ` stamp never itself contains `-`, so splitting on the
/// last `-` only ever separates a genuine numeric collision suffix.
fn checkpoint_sort_key(path: &Path) -> Option<(String, u32)> {
    let name = path.file_name()?.to_str()?;
    let stem = name.strip_prefix("flow-state-")?.strip_suffix(".yaml")?;
    match stem.rsplit_once('-') {
        Some((stamp, suffix)) if suffix.chars().all(|c| c.is_ascii_digit()) && !suffix.is_empty() => {
            suffix.parse().ok().map(|n| (stamp.to_string(), n))
        }
        _ => Some((stem.to_string(), 0)),
    }
}
