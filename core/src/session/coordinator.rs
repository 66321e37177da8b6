//! SessionCoordinator (spec.md §4.5): the top-level phase-by-phase
//! execution loop.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::completion::{CancellationToken, CompletionMonitor};
use crate::config::FlowConfig;
use crate::dag::{DAGEngine, DagDocument};
use crate::error::{FlowError, FlowResult};
use crate::state::{OrchestrationState, StateStore};
use crate::types::{SessionStatus, TaskId, TaskInfo, TaskStatus};
use crate::worktree::WorktreeManager;

use super::adapter::AgentAdapter;

/// Everything the coordinator needs to start a run: already-parsed tasks
/// and the identifiers that name this orchestration (spec.md §1 — parsing
/// `tasks.md` is out of scope; callers hand in `TaskInfo` records).
pub struct Spec {
    pub spec_id: String,
    pub tasks: Vec<TaskInfo>,
    pub base_branch: String,
    pub tasks_md_path: std::path::PathBuf,
}

/// Drives phase-by-phase execution: partitions the current phase,
/// provisions worktrees, notifies the agent adapter, waits for completion,
/// checkpoints, and advances (spec.md §4.5).
pub struct SessionCoordinator {
    config: FlowConfig,
    adapter: Arc<dyn AgentAdapter>,
    state_store: StateStore,
    worktrees: WorktreeManager,
    monitor: CompletionMonitor,
    cancel: CancellationToken,
    engine: Option<DAGEngine>,
    state: Option<OrchestrationState>,
    spec_id: String,
    tasks_md_path: std::path::PathBuf,
}

impl SessionCoordinator {
    pub fn new(config: FlowConfig, adapter: Arc<dyn AgentAdapter>) -> Self {
        let state_store = StateStore::new(
            config.state_path(),
            config.lock_path(),
            config.checkpoints_dir(),
            config.state_lock_timeout,
        );
        let worktrees = WorktreeManager::new(&config.repo_root);
        let monitor = CompletionMonitor::new(
            config.completions_dir(),
            config.completion_poll_interval,
            config.watch_debounce,
            config.watch_poll_interval,
        );
        Self {
            config,
            adapter,
            state_store,
            worktrees,
            monitor,
            cancel: CancellationToken::new(),
            engine: None,
            state: None,
            spec_id: String::new(),
            tasks_md_path: std::path::PathBuf::new(),
        }
    }

    /// A token the caller can use to cooperatively interrupt an in-flight
    /// `run` (spec.md §5, §9).
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn branch_name(&self, session_id: u32) -> String {
        format!("impl-{}-session-{session_id}", self.spec_id)
    }

    /// Build the DAG, assign sessions, and persist the initial
    /// orchestration state and `dag.yaml` document (spec.md §4.5).
    pub fn initialize(
        &mut self,
        spec: &Spec,
        num_sessions: u32,
        agent_type: &str,
    ) -> FlowResult<DagDocument> {
        let mut engine = DAGEngine::build(spec.tasks.clone())?;
        engine.assign_sessions(num_sessions)?;

        let task_ids: Vec<TaskId> = engine.tasks().keys().cloned().collect();
        let state = OrchestrationState::new(
            &spec.spec_id,
            agent_type,
            num_sessions,
            &spec.base_branch,
            task_ids,
        );
        self.state_store.save(&state)?;

        let doc = engine.to_serialized(&spec.spec_id, num_sessions);
        doc.save(self.config.dag_path(&spec.spec_id))
            .map_err(|e| FlowError::MalformedTaskFile {
                path: self.config.dag_path(&spec.spec_id),
                reason: e.to_string(),
            })?;

        self.spec_id = spec.spec_id.clone();
        self.tasks_md_path = spec.tasks_md_path.clone();
        self.engine = Some(engine);
        self.state = Some(state);

        tracing::info!(spec_id = %self.spec_id, num_sessions, "orchestration initialized");
        Ok(doc)
    }

    fn engine(&self) -> &DAGEngine {
        self.engine.as_ref().expect("initialize() or run() must be called first")
    }

    fn state_mut(&mut self) -> &mut OrchestrationState {
        self.state.as_mut().expect("initialize() or run() must be called first")
    }

    /// Group a phase's task ids by the session assigned to run them,
    /// ordered by numeric task id within each session (spec.md invariant 4,
    /// §4.5 step 1).
    fn session_groups(&self, phase_idx: usize) -> BTreeMap<u32, Vec<TaskId>> {
        let phase = &self.engine().phases()[phase_idx];
        let mut groups: BTreeMap<u32, Vec<TaskId>> = BTreeMap::new();
        for task_id in phase {
            let task = self.engine().task(task_id).expect("phase task must exist");
            let session_id = task.session.unwrap_or(0);
            groups.entry(session_id).or_default().push(task_id.clone());
        }
        for ids in groups.values_mut() {
            ids.sort_by_key(|id| id.ordinal());
        }
        groups
    }

    /// Run one topological phase to completion (spec.md §4.5).
    pub fn run_phase(&mut self, phase_idx: usize) -> FlowResult<()> {
        let groups = self.session_groups(phase_idx);
        tracing::info!(phase = phase_idx, sessions = groups.len(), "starting phase");

        for (session_id, task_ids) in &groups {
            let first_task_id = task_ids.first().expect("session group is never empty").clone();
            let task = self.engine().task(&first_task_id).expect("task exists").clone();

            // A session's worktree and branch persist across phases (spec.md
            // §3: "Worktrees live under ... session-<N>-..."; one branch per
            // session, not per phase). Only provision a fresh worktree the
            // first time this session picks up work; later phases reuse it.
            let existing_worktree = self
                .state
                .as_ref()
                .and_then(|s| s.sessions.iter().find(|s| s.session_id == *session_id))
                .and_then(|s| s.worktree_path.clone());
            let worktree = match existing_worktree {
                Some(path) => path,
                None => self.worktrees.create(&self.spec_id, *session_id, &task.name)?,
            };
            let branch = self.branch_name(*session_id);
            let now = Utc::now();

            {
                let state = self.state_mut();
                if let Some(session_state) = state.session_mut(*session_id) {
                    session_state.worktree_path = Some(worktree.clone());
                    session_state.branch_name = Some(branch);
                    session_state.current_task = Some(first_task_id.clone());
                    session_state.status = SessionStatus::Executing;
                }
                state.tasks.entry(first_task_id.clone()).and_modify(|r| {
                    r.status = TaskStatus::InProgress;
                    r.session = Some(*session_id);
                    r.started_at = Some(now);
                });
                state.touch();
            }
            self.state_store.save(self.state.as_ref().unwrap())?;

            self.adapter
                .setup_session(&worktree, &task)
                .map_err(|e| FlowError::AdapterFailed {
                    worktree: worktree.clone(),
                    message: e.to_string(),
                })?;
            self.adapter
                .notify_user(*session_id, &worktree, &task)
                .map_err(|e| FlowError::AdapterFailed {
                    worktree: worktree.clone(),
                    message: e.to_string(),
                })?;

            let mut watch_paths = vec![self.tasks_md_path.clone()];
            watch_paths.extend(self.adapter.files_to_watch(&worktree));
            self.monitor.register_watch_paths(watch_paths);
        }

        if self.tasks_md_path.exists() || self.tasks_md_path.parent().map(|p| p.exists()).unwrap_or(false)
        {
            self.monitor.watch_tasks_file(self.tasks_md_path.clone())?;
        }

        let phase_task_ids: HashSet<TaskId> = groups.values().flatten().cloned().collect();
        let completed = self.monitor.wait_for(&phase_task_ids, None, &self.cancel)?;

        let now = Utc::now();
        for (session_id, task_ids) in &groups {
            for (idx, task_id) in task_ids.iter().enumerate() {
                if !completed.contains(task_id) {
                    continue;
                }
                let state = self.state_mut();
                state.tasks.entry(task_id.clone()).and_modify(|r| {
                    r.status = TaskStatus::Completed;
                    r.completed_at = Some(now);
                });
                if let Some(session_state) = state.session_mut(*session_id) {
                    if !session_state.completed_tasks.contains(task_id) {
                        session_state.completed_tasks.push(task_id.clone());
                    }
                    match task_ids.get(idx + 1) {
                        Some(next) => {
                            session_state.current_task = Some(next.clone());
                            state.tasks.entry(next.clone()).and_modify(|r| {
                                r.status = TaskStatus::InProgress;
                                r.started_at = Some(now);
                            });
                        }
                        None => {
                            session_state.current_task = None;
                            session_state.status = SessionStatus::Waiting;
                        }
                    }
                }
                state.touch();
            }
        }
        self.state_store.save(self.state.as_ref().unwrap())?;

        self.monitor.stop_watch();
        tracing::info!(phase = phase_idx, "phase complete");
        Ok(())
    }

    /// Signal that `task_id` failed (spec.md §4.5 failure semantics):
    /// failure detection itself is external to `CompletionMonitor` (which
    /// only ever reports success), so callers invoke this explicitly.
    pub fn fail_task(&mut self, task_id: &TaskId, session_id: u32) -> FlowResult<()> {
        let state = self.state_mut();
        state.tasks.entry(task_id.clone()).and_modify(|r| {
            r.status = TaskStatus::Failed;
        });
        if let Some(session_state) = state.session_mut(session_id) {
            session_state.status = SessionStatus::Failed;
        }
        state.touch();
        self.state_store.checkpoint(self.state.as_ref().unwrap())?;
        self.state_store.save(self.state.as_ref().unwrap())?;
        tracing::error!(task = %task_id, session_id, "task failed, session marked failed");
        Ok(())
    }

    /// Checkpoint, record the phase as complete, and advance
    /// `current_phase` (spec.md §4.5).
    pub fn checkpoint_phase(&mut self, phase_idx: usize) -> FlowResult<()> {
        self.state_store.checkpoint(self.state.as_ref().unwrap())?;

        let total_phases = self.engine().phases().len();
        let state = self.state_mut();
        state.phases_completed.push(format!("phase-{phase_idx}"));
        state.current_phase = if phase_idx + 1 < total_phases {
            format!("phase-{}", phase_idx + 1)
        } else {
            "done".to_string()
        };
        state.touch();
        self.state_store.save(self.state.as_ref().unwrap())?;
        Ok(())
    }

    fn current_phase_index(state: &OrchestrationState) -> usize {
        state
            .current_phase
            .strip_prefix("phase-")
            .and_then(|n| n.parse().ok())
            .unwrap_or(0)
    }

    /// Orchestrate the full phase loop. On `resume=true`, reloads state
    /// from the store and continues from `current_phase`, skipping phases
    /// already recorded in `phases_completed` (spec.md §4.5, §8 "resume
    /// fidelity").
    pub fn run(
        &mut self,
        spec: &Spec,
        num_sessions: u32,
        agent_type: &str,
        resume: bool,
    ) -> FlowResult<()> {
        let start_phase = if resume && self.state_store.exists() {
            let state = self.state_store.load()?;
            let mut engine = DAGEngine::build(spec.tasks.clone())?;
            engine.assign_sessions(state.num_sessions)?;
            let start = Self::current_phase_index(&state);
            self.spec_id = spec.spec_id.clone();
            self.tasks_md_path = spec.tasks_md_path.clone();
            self.engine = Some(engine);
            self.state = Some(state);
            start
        } else {
            self.initialize(spec, num_sessions, agent_type)?;
            0
        };

        let total_phases = self.engine().phases().len();
        for phase_idx in start_phase..total_phases {
            if self.cancel.is_cancelled() {
                tracing::warn!(phase = phase_idx, "run cancelled, preserving state for resume");
                return Err(FlowError::Cancelled);
            }

            if let Err(e) = self.run_phase(phase_idx) {
                tracing::error!(phase = phase_idx, error = %e, "phase failed, checkpointing best-effort");
                let _ = self.state_store.checkpoint(self.state.as_ref().unwrap());
                return Err(e);
            }
            self.checkpoint_phase(phase_idx)?;
        }

        tracing::info!(spec_id = %self.spec_id, "all phases complete");
        Ok(())
    }
}

/// Default backoff between `wait_for` polls when a coordinator-level caller
/// wants to align with the spec's documented ~500ms tick (spec.md §4.4, §5).
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::adapter::NoopAgentAdapter;
    use std::process::Command;

    fn init_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for args in [
            vec!["init", "-b", "main"],
            vec!["config", "user.email", "test@test.com"],
            vec!["config", "user.name", "Test"],
        ] {
            Command::new("git").args(args).current_dir(dir.path()).output().unwrap();
        }
        std::fs::write(dir.path().join("README.md"), "# test").unwrap();
        Command::new("git").args(["add", "."]).current_dir(dir.path()).output().unwrap();
        Command::new("git")
            .args(["commit", "-m", "initial"])
            .current_dir(dir.path())
            .output()
            .unwrap();
        dir
    }

    fn task(id: &str, deps: &[&str]) -> TaskInfo {
        TaskInfo::new(TaskId::parse(id).unwrap(), format!("task {id}"))
            .with_dependencies(deps.iter().map(|d| TaskId::parse(*d).unwrap()))
    }

    #[test]
    fn initialize_persists_state_and_dag() {
        let dir = init_repo();
        let mut config = FlowConfig::new(dir.path());
        config.completion_poll_interval = Duration::from_millis(5);
        config.watch_debounce = Duration::from_millis(10);
        config.watch_poll_interval = Duration::from_millis(5);

        let mut coordinator = SessionCoordinator::new(config.clone(), Arc::new(NoopAgentAdapter));
        let spec = Spec {
            spec_id: "042-feature".to_string(),
            tasks: vec![task("T001", &[]), task("T002", &["T001"])],
            base_branch: "main".to_string(),
            tasks_md_path: dir.path().join("specs/042-feature/tasks.md"),
        };

        let doc = coordinator.initialize(&spec, 2, "claude").unwrap();
        assert_eq!(doc.phases.len(), 2);
        assert!(config.state_path().exists());
        assert!(config.dag_path("042-feature").exists());
    }

    #[test]
    fn run_phase_marks_tasks_complete_via_manual_touch() {
        let dir = init_repo();
        let mut config = FlowConfig::new(dir.path());
        config.completion_poll_interval = Duration::from_millis(5);
        config.watch_debounce = Duration::from_millis(10);
        config.watch_poll_interval = Duration::from_millis(5);

        let mut coordinator = SessionCoordinator::new(config.clone(), Arc::new(NoopAgentAdapter));
        let spec = Spec {
            spec_id: "042".to_string(),
            tasks: vec![task("T001", &[])],
            base_branch: "main".to_string(),
            tasks_md_path: dir.path().join("specs/042/tasks.md"),
        };
        coordinator.initialize(&spec, 1, "claude").unwrap();

        let monitor_dir = config.completions_dir();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            std::fs::create_dir_all(&monitor_dir).unwrap();
            std::fs::write(monitor_dir.join("T001.done"), "").unwrap();
        });

        coordinator.run_phase(0).unwrap();
        handle.join().unwrap();

        let state = coordinator.state_store.load().unwrap();
        assert_eq!(state.tasks[&TaskId::parse("T001").unwrap()].status, TaskStatus::Completed);
        assert_eq!(state.sessions[0].completed_tasks, vec![TaskId::parse("T001").unwrap()]);
    }

    #[test]
    fn resume_executes_only_phases_at_or_past_current_phase() {
        // Resume fidelity property from spec.md §8: given
        // phases_completed = [phase-0, phase-1] and current_phase = phase-2,
        // run(resume=true) must execute only phase 2 onward, leaving
        // whatever is already recorded for phases 0/1 untouched.
        let dir = init_repo();
        let mut config = FlowConfig::new(dir.path());
        config.completion_poll_interval = Duration::from_millis(5);
        config.watch_debounce = Duration::from_millis(10);
        config.watch_poll_interval = Duration::from_millis(5);

        let spec = Spec {
            spec_id: "042".to_string(),
            tasks: vec![
                task("T001", &[]),
                task("T002", &["T001"]),
                task("T003", &["T002"]),
            ],
            base_branch: "main".to_string(),
            tasks_md_path: dir.path().join("specs/042/tasks.md"),
        };

        let state_store = StateStore::new(
            config.state_path(),
            config.lock_path(),
            config.checkpoints_dir(),
            config.state_lock_timeout,
        );
        let mut seed = OrchestrationState::new(
            "042",
            "claude",
            1,
            "main",
            vec![
                TaskId::parse("T001").unwrap(),
                TaskId::parse("T002").unwrap(),
                TaskId::parse("T003").unwrap(),
            ],
        );
        let earlier = Utc::now() - chrono::Duration::hours(1);
        for id in ["T001", "T002"] {
            seed.tasks.entry(TaskId::parse(id).unwrap()).and_modify(|r| {
                r.status = TaskStatus::Completed;
                r.session = Some(0);
                r.started_at = Some(earlier);
                r.completed_at = Some(earlier);
            });
        }
        seed.sessions[0].completed_tasks = vec![TaskId::parse("T001").unwrap(), TaskId::parse("T002").unwrap()];
        seed.phases_completed = vec!["phase-0".to_string(), "phase-1".to_string()];
        seed.current_phase = "phase-2".to_string();
        state_store.save(&seed).unwrap();

        let mut coordinator = SessionCoordinator::new(config.clone(), Arc::new(NoopAgentAdapter));
        let completions_dir = config.completions_dir();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            std::fs::create_dir_all(&completions_dir).unwrap();
            std::fs::write(completions_dir.join("T003.done"), "").unwrap();
        });

        coordinator.run(&spec, 1, "claude", true).unwrap();
        handle.join().unwrap();

        let final_state = state_store.load().unwrap();
        assert_eq!(final_state.current_phase, "done");
        assert_eq!(
            final_state.phases_completed,
            vec!["phase-0".to_string(), "phase-1".to_string(), "phase-2".to_string()]
        );
        // Phase 0/1 task records were never re-touched by the resumed run.
        for id in ["T001", "T002"] {
            let record = &final_state.tasks[&TaskId::parse(id).unwrap()];
            assert_eq!(record.started_at, Some(earlier));
            assert_eq!(record.completed_at, Some(earlier));
        }
        assert_eq!(
            final_state.tasks[&TaskId::parse("T003").unwrap()].status,
            TaskStatus::Completed
        );
    }
}
