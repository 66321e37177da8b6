//! Tunable defaults for the orchestration engine.
//!
//! The core reads no environment variables (spec.md §6); callers either take
//! the documented defaults or load a `flow.toml` file explicitly.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Orchestration-wide tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// Repository root the `.speckit/`, `.worktrees-*`, and `specs/` layout
    /// (spec.md §6) is rooted at.
    pub repo_root: PathBuf,
    /// Deadline for acquiring the state-file advisory lock before
    /// `StateLockTimeout` is raised.
    #[serde(with = "duration_secs")]
    pub state_lock_timeout: Duration,
    /// Coarse poll tick the coordinator uses alongside watcher callbacks.
    #[serde(with = "duration_millis")]
    pub completion_poll_interval: Duration,
    /// Quiet window collapsed into a single `tasks.md` recompute.
    #[serde(with = "duration_millis")]
    pub watch_debounce: Duration,
    /// Polling interval backstopping the `notify` watcher.
    #[serde(with = "duration_millis")]
    pub watch_poll_interval: Duration,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            repo_root: PathBuf::from("."),
            state_lock_timeout: Duration::from_secs(30),
            completion_poll_interval: Duration::from_millis(500),
            watch_debounce: Duration::from_millis(100),
            watch_poll_interval: Duration::from_millis(50),
        }
    }
}

impl FlowConfig {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
            ..Self::default()
        }
    }

    /// Load overrides from a `flow.toml` file, falling back to defaults for
    /// any field the file omits.
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(path.as_ref().to_path_buf(), e))?;
        toml::from_str(&content).map_err(ConfigError::Parse)
    }

    pub fn speckit_dir(&self) -> PathBuf {
        self.repo_root.join(".speckit")
    }

    pub fn state_path(&self) -> PathBuf {
        self.speckit_dir().join("flow-state.yaml")
    }

    pub fn lock_path(&self) -> PathBuf {
        let mut p = self.state_path().into_os_string();
        p.push(".lock");
        PathBuf::from(p)
    }

    pub fn checkpoints_dir(&self) -> PathBuf {
        self.speckit_dir().join("checkpoints")
    }

    pub fn completions_dir(&self) -> PathBuf {
        self.speckit_dir().join("completions")
    }

    pub fn worktrees_dir(&self, spec_id: &str) -> PathBuf {
        self.repo_root.join(format!(".worktrees-{spec_id}"))
    }

    pub fn tasks_path(&self, spec_id: &str) -> PathBuf {
        self.repo_root.join("specs").join(spec_id).join("tasks.md")
    }

    pub fn dag_path(&self, spec_id: &str) -> PathBuf {
        self.repo_root.join("specs").join(spec_id).join("dag.yaml")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    Io(PathBuf, std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
