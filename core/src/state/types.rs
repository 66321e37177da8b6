//! Persisted orchestration state (spec.md §3, §6).

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{timestamp, SessionStatus, TaskId, TaskStatus};

/// Runtime view of one session (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worktree_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_task: Option<TaskId>,
    #[serde(default)]
    pub completed_tasks: Vec<TaskId>,
    pub status: SessionStatus,
}

impl SessionState {
    pub fn new(session_id: u32) -> Self {
        Self {
            session_id,
            worktree_path: None,
            branch_name: None,
            current_task: None,
            completed_tasks: Vec::new(),
            status: SessionStatus::Idle,
        }
    }
}

/// Per-task bookkeeping tracked alongside the state (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "timestamp::option")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "timestamp::option")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    pub fn pending() -> Self {
        Self {
            status: TaskStatus::Pending,
            session: None,
            started_at: None,
            completed_at: None,
        }
    }
}

/// Outcome of the post-run merge, persisted once available.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeStatus {
    pub success: bool,
    pub integration_branch: String,
    #[serde(default)]
    pub merged_sessions: Vec<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict_session: Option<u32>,
    #[serde(default)]
    pub conflicting_files: Vec<PathBuf>,
}

/// The durable orchestration state (spec.md §3), persisted at
/// `<repo>/.speckit/flow-state.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationState {
    pub version: String,
    pub spec_id: String,
    pub agent_type: String,
    pub num_sessions: u32,
    pub base_branch: String,
    #[serde(with = "timestamp")]
    pub started_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub updated_at: DateTime<Utc>,
    pub current_phase: String,
    #[serde(default)]
    pub phases_completed: Vec<String>,
    #[serde(default)]
    pub sessions: Vec<SessionState>,
    #[serde(default)]
    pub tasks: BTreeMap<TaskId, TaskRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_status: Option<MergeStatus>,
}

impl OrchestrationState {
    pub fn new(
        spec_id: impl Into<String>,
        agent_type: impl Into<String>,
        num_sessions: u32,
        base_branch: impl Into<String>,
        task_ids: impl IntoIterator<Item = TaskId>,
    ) -> Self {
        let now = Utc::now();
        Self {
            version: "1.0".to_string(),
            spec_id: spec_id.into(),
            agent_type: agent_type.into(),
            num_sessions,
            base_branch: base_branch.into(),
            started_at: now,
            updated_at: now,
            current_phase: "phase-0".to_string(),
            phases_completed: Vec::new(),
            sessions: (0..num_sessions).map(SessionState::new).collect(),
            tasks: task_ids
                .into_iter()
                .map(|id| (id, TaskRecord::pending()))
                .collect(),
            merge_status: None,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn session_mut(&mut self, session_id: u32) -> Option<&mut SessionState> {
        self.sessions.iter_mut().find(|s| s.session_id == session_id)
    }
}
