//! End-to-end integration test covering the full phase-by-phase run: two
//! parallel sessions in phase 0, a convergent session in phase 1 reusing its
//! existing worktree/branch, and a final sequential merge back to main.

use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use speckitflow_core::merge::MergeOrchestrator;
use speckitflow_core::session::{NoopAgentAdapter, SessionCoordinator, Spec};
use speckitflow_core::state::StateStore;
use speckitflow_core::types::{TaskId, TaskInfo, TaskStatus};
use speckitflow_core::worktree::WorktreeManager;
use speckitflow_core::FlowConfig;

fn git(dir: &std::path::Path, args: &[&str]) {
    let status = Command::new("git").args(args).current_dir(dir).status().unwrap();
    assert!(status.success(), "git {args:?} failed in {}", dir.display());
}

fn init_repo() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    git(dir.path(), &["init", "-b", "main"]);
    git(dir.path(), &["config", "user.email", "test@test.com"]);
    git(dir.path(), &["config", "user.name", "Test User"]);
    std::fs::write(dir.path().join("README.md"), "# test\n").unwrap();
    git(dir.path(), &["add", "."]);
    git(dir.path(), &["commit", "-m", "initial"]);
    dir
}

fn task(id: &str, deps: &[&str], parallelizable: bool) -> TaskInfo {
    TaskInfo::new(TaskId::parse(id).unwrap(), format!("implement {id}"))
        .with_dependencies(deps.iter().map(|d| TaskId::parse(*d).unwrap()))
        .parallelizable(parallelizable)
}

fn commit_and_mark_done(worktree: &std::path::Path, file: &str, completions_dir: &std::path::Path, task_id: &str) {
    std::fs::write(worktree.join(file), format!("work for {task_id}\n")).unwrap();
    git(worktree, &["add", "."]);
    git(worktree, &["commit", "-m", &format!("complete {task_id}")]);
    std::fs::create_dir_all(completions_dir).unwrap();
    std::fs::write(completions_dir.join(format!("{task_id}.done")), "").unwrap();
}

/// Drives a fan-out-then-converge DAG (T001, T002 in phase 0 on separate
/// sessions; T003 in phase 1 depends on both and lands back on session 0)
/// through two real phases and a sequential merge, asserting that session 0's
/// worktree/branch from phase 0 is reused rather than recreated in phase 1.
#[test]
fn two_phase_run_reuses_session_worktree_then_merges_cleanly() {
    let repo = init_repo();
    let spec_id = "e2e-042".to_string();

    let mut config = FlowConfig::new(repo.path());
    config.completion_poll_interval = Duration::from_millis(5);
    config.watch_debounce = Duration::from_millis(10);
    config.watch_poll_interval = Duration::from_millis(5);

    let spec = Spec {
        spec_id: spec_id.clone(),
        tasks: vec![
            task("T001", &[], true),
            task("T002", &[], true),
            task("T003", &["T001", "T002"], false),
        ],
        base_branch: "main".to_string(),
        tasks_md_path: repo.path().join("specs").join(&spec_id).join("tasks.md"),
    };

    let mut coordinator = SessionCoordinator::new(config.clone(), Arc::new(NoopAgentAdapter));
    coordinator.initialize(&spec, 2, "claude").unwrap();

    let completions_dir = config.completions_dir();
    let worktrees_dir = config.worktrees_dir(&spec_id);

    // Phase 0: T001 -> session 0, T002 -> session 1 (round-robin fan-out).
    let completions_for_phase0 = completions_dir.clone();
    let worktrees_for_phase0 = worktrees_dir.clone();
    let phase0_worker = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(80));
        let session0_wt = find_session_worktree(&worktrees_for_phase0, 0);
        let session1_wt = find_session_worktree(&worktrees_for_phase0, 1);
        commit_and_mark_done(&session0_wt, "a.txt", &completions_for_phase0, "T001");
        commit_and_mark_done(&session1_wt, "b.txt", &completions_for_phase0, "T002");
    });
    coordinator.run_phase(0).unwrap();
    phase0_worker.join().unwrap();
    coordinator.checkpoint_phase(0).unwrap();

    let session0_worktree_after_phase0 = find_session_worktree(&worktrees_dir, 0);
    assert!(
        session0_worktree_after_phase0.exists(),
        "session 0's worktree from phase 0 should still be on disk"
    );

    // Phase 1: T003 is non-parallelizable -> session 0, which already owns a
    // worktree/branch from phase 0. run_phase must reuse it, not fail with
    // WorktreeExists trying to recreate `impl-e2e-042-session-0`.
    let completions_for_phase1 = completions_dir.clone();
    let worktrees_for_phase1 = worktrees_dir.clone();
    let phase1_worker = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(80));
        let session0_wt = find_session_worktree(&worktrees_for_phase1, 0);
        commit_and_mark_done(&session0_wt, "c.txt", &completions_for_phase1, "T003");
    });
    coordinator.run_phase(1).unwrap();
    phase1_worker.join().unwrap();
    coordinator.checkpoint_phase(1).unwrap();

    let state_store = StateStore::new(
        config.state_path(),
        config.lock_path(),
        config.checkpoints_dir(),
        Duration::from_secs(5),
    );
    let state = state_store.load().unwrap();
    assert_eq!(state.current_phase, "done");
    assert_eq!(state.phases_completed, vec!["phase-0", "phase-1"]);
    for id in ["T001", "T002", "T003"] {
        assert_eq!(
            state.tasks[&TaskId::parse(id).unwrap()].status,
            TaskStatus::Completed
        );
    }
    // Session 0 ran T001 then T003 on the very same worktree/branch.
    let session0 = state.sessions.iter().find(|s| s.session_id == 0).unwrap();
    assert_eq!(
        session0.completed_tasks,
        vec![TaskId::parse("T001").unwrap(), TaskId::parse("T003").unwrap()]
    );
    assert_eq!(
        session0.worktree_path.as_deref(),
        Some(session0_worktree_after_phase0.as_path())
    );

    // Both sessions' work merges cleanly since they never touched the same
    // path (a.txt/c.txt on session 0, b.txt on session 1).
    let merge = MergeOrchestrator::new(repo.path(), &spec_id);
    let analysis = merge.analyze(Some("main")).unwrap();
    assert!(analysis.safe_to_merge());
    assert_eq!(analysis.total_files_changed(), 3);

    let result = merge.merge_sequential(Some("main")).unwrap();
    assert!(result.success);
    assert_eq!(result.merged_sessions, vec![0, 1]);

    for file in ["a.txt", "b.txt", "c.txt"] {
        assert!(repo.path().join(file).exists(), "{file} missing from integration branch");
    }

    let worktrees = WorktreeManager::new(repo.path());
    let report = merge.finalize(Some("main"), false, &worktrees).unwrap();
    assert_eq!(report.worktrees_removed, 2);
    assert_eq!(report.files_changed, 3);
    assert_eq!(report.lines_added, 3);
    assert_eq!(report.lines_deleted, 0);
    assert!(!worktrees_dir.exists());
}

fn find_session_worktree(worktrees_dir: &std::path::Path, session_id: u32) -> std::path::PathBuf {
    let prefix = format!("session-{session_id}-");
    std::fs::read_dir(worktrees_dir)
        .unwrap_or_else(|e| panic!("reading {}: {e}", worktrees_dir.display()))
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .find(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with(&prefix))
                .unwrap_or(false)
        })
        .unwrap_or_else(|| panic!("no worktree for session {session_id} under {}", worktrees_dir.display()))
}
