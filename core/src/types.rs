//! Core data model shared across components (spec.md §3).

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static TASK_ID_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^T\d{3}$").unwrap());

/// Identifier matching the pattern `T` followed by exactly three decimal
/// digits (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaskId(String);

impl TaskId {
    /// Parse and validate a task id, rejecting anything not matching `T\d{3}`.
    pub fn parse(raw: impl Into<String>) -> Result<Self, TaskIdError> {
        let raw = raw.into();
        if TASK_ID_PATTERN.is_match(&raw) {
            Ok(Self(raw))
        } else {
            Err(TaskIdError(raw))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The numeric ordinal, used for deterministic within-phase ordering.
    pub fn ordinal(&self) -> u32 {
        self.0[1..].parse().unwrap_or(0)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = TaskIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TaskId {
    type Error = TaskIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<TaskId> for String {
    fn from(value: TaskId) -> Self {
        value.0
    }
}

/// Error returned when a string does not match the `T\d{3}` task id pattern.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid task id '{0}': expected pattern T### (e.g. T001)")]
pub struct TaskIdError(pub String);

/// Status of a task as it moves through the orchestration lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    /// Whether `next` is a legal transition from `self` (spec.md invariant 6).
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::InProgress)
                | (TaskStatus::InProgress, TaskStatus::Completed)
                | (TaskStatus::InProgress, TaskStatus::Failed)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::InProgress => write!(f, "in_progress"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Status of a session within the currently executing phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Executing,
    Waiting,
    Completed,
    Failed,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Idle => write!(f, "idle"),
            SessionStatus::Executing => write!(f, "executing"),
            SessionStatus::Waiting => write!(f, "waiting"),
            SessionStatus::Completed => write!(f, "completed"),
            SessionStatus::Failed => write!(f, "failed"),
        }
    }
}

/// An implementable task parsed from `tasks.md` (parsing itself is out of
/// scope for this crate; callers hand in already-parsed records).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInfo {
    pub id: TaskId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub dependencies: BTreeSet<TaskId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<u32>,
    #[serde(default = "default_true")]
    pub parallelizable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub story: Option<String>,
    #[serde(default)]
    pub files: Vec<PathBuf>,
    #[serde(default = "default_pending")]
    pub status: TaskStatus,
}

fn default_true() -> bool {
    true
}

fn default_pending() -> TaskStatus {
    TaskStatus::Pending
}

/// Serde helpers truncating `chrono::DateTime<Utc>` to second precision with
/// a literal `Z` suffix (spec.md §3 invariant 9, §4.3 serialization
/// contract) — chrono's own `Serialize` impl keeps sub-second digits, which
/// would drift from the documented `YYYY-MM-DDTHH:MM:SSZ` wire format.
pub mod timestamp {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        dt.to_rfc3339_opts(SecondsFormat::Secs, true).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }

    pub mod option {
        use chrono::{DateTime, SecondsFormat, Utc};
        use serde::{Deserialize, Deserializer, Serialize, Serializer};

        pub fn serialize<S: Serializer>(
            dt: &Option<DateTime<Utc>>,
            s: S,
        ) -> Result<S::Ok, S::Error> {
            dt.map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
                .serialize(s)
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            d: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            let raw = Option::<String>::deserialize(d)?;
            raw.map(|raw| {
                DateTime::parse_from_rfc3339(&raw)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(serde::de::Error::custom)
            })
            .transpose()
        }
    }
}

impl TaskInfo {
    pub fn new(id: TaskId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            description: None,
            dependencies: BTreeSet::new(),
            session: None,
            parallelizable: true,
            story: None,
            files: Vec::new(),
            status: TaskStatus::Pending,
        }
    }

    pub fn with_dependencies(mut self, deps: impl IntoIterator<Item = TaskId>) -> Self {
        self.dependencies = deps.into_iter().collect();
        self
    }

    pub fn parallelizable(mut self, value: bool) -> Self {
        self.parallelizable = value;
        self
    }
}
