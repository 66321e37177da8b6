//! Dependency graph builder and phase partitioner.

use std::collections::HashMap;

use petgraph::algo::kosaraju_scc;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::types::{TaskId, TaskInfo};

use super::DAGPhase;

/// Errors raised while building or partitioning the dependency graph.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DagError {
    #[error("unknown dependency: task {task} depends on {dependency}, which does not exist")]
    UnknownDependency { task: TaskId, dependency: TaskId },

    #[error("cycle detected among tasks: {}", .cycle.iter().map(TaskId::to_string).collect::<Vec<_>>().join(" -> "))]
    CycleDetected { cycle: Vec<TaskId> },

    #[error("invalid argument: num_sessions must be >= 1, got {0}")]
    InvalidArgument(i64),
}

impl DagError {
    pub fn code(&self) -> &'static str {
        match self {
            DagError::UnknownDependency { .. } => "UNKNOWN_DEPENDENCY",
            DagError::CycleDetected { .. } => "CYCLE_DETECTED",
            DagError::InvalidArgument(_) => "INVALID_ARGUMENT",
        }
    }

    pub fn recovery_action(&self) -> String {
        match self {
            DagError::UnknownDependency { task, dependency } => format!(
                "Remove the dependency on {dependency} from {task}, or add {dependency} to the task list."
            ),
            DagError::CycleDetected { cycle } => format!(
                "Break the dependency cycle by removing one edge among: {}.",
                cycle
                    .iter()
                    .map(TaskId::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            DagError::InvalidArgument(n) => {
                format!("Pass num_sessions >= 1 instead of {n}.")
            }
        }
    }
}

/// Builds a validated, phase-partitioned, session-assigned execution plan
/// from an ordered list of [`TaskInfo`] records (spec.md §4.1).
pub struct DAGEngine {
    tasks: HashMap<TaskId, TaskInfo>,
    phases: Vec<DAGPhase>,
}

impl DAGEngine {
    /// Validate the task set (all dependency ids exist, graph is acyclic)
    /// and compute the phase partition.
    pub fn build(tasks: Vec<TaskInfo>) -> Result<Self, DagError> {
        let by_id: HashMap<TaskId, TaskInfo> =
            tasks.into_iter().map(|t| (t.id.clone(), t)).collect();

        for task in by_id.values() {
            for dep in &task.dependencies {
                if !by_id.contains_key(dep) {
                    return Err(DagError::UnknownDependency {
                        task: task.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        check_acyclic(&by_id)?;
        let phases = partition_into_phases(&by_id);

        Ok(Self {
            tasks: by_id,
            phases,
        })
    }

    /// The computed phase partition, in phase order; within each phase, task
    /// ids are sorted numerically for determinism.
    pub fn phases(&self) -> &[DAGPhase] {
        &self.phases
    }

    pub fn task(&self, id: &TaskId) -> Option<&TaskInfo> {
        self.tasks.get(id)
    }

    pub fn tasks(&self) -> &HashMap<TaskId, TaskInfo> {
        &self.tasks
    }

    /// Assign a `session` to every task (spec.md invariant 4): parallelizable
    /// tasks round-robin across `0..num_sessions` in numeric-id order within
    /// each phase; non-parallelizable tasks always go to session 0.
    pub fn assign_sessions(&mut self, num_sessions: u32) -> Result<(), DagError> {
        if num_sessions < 1 {
            return Err(DagError::InvalidArgument(num_sessions as i64));
        }

        for phase in &self.phases {
            let mut next_session: u32 = 0;
            for task_id in phase {
                let task = self
                    .tasks
                    .get_mut(task_id)
                    .expect("phase only contains known task ids");
                if task.parallelizable {
                    task.session = Some(next_session);
                    next_session = (next_session + 1) % num_sessions;
                } else {
                    task.session = Some(0);
                }
            }
        }

        Ok(())
    }
}

/// Detect cycles with Kosaraju's SCC algorithm; any non-trivial component
/// (size > 1, or a single node with a self-loop) is a cycle.
fn check_acyclic(tasks: &HashMap<TaskId, TaskInfo>) -> Result<(), DagError> {
    let mut graph = DiGraph::<TaskId, ()>::new();
    let mut index_of: HashMap<TaskId, NodeIndex> = HashMap::new();

    for id in tasks.keys() {
        let idx = graph.add_node(id.clone());
        index_of.insert(id.clone(), idx);
    }
    for task in tasks.values() {
        let from = index_of[&task.id];
        for dep in &task.dependencies {
            // Edge points dependency -> dependent, i.e. dep must run first.
            let to = index_of[dep];
            graph.add_edge(to, from, ());
        }
    }

    for scc in kosaraju_scc(&graph) {
        if scc.len() > 1 {
            let mut cycle: Vec<TaskId> = scc.into_iter().map(|idx| graph[idx].clone()).collect();
            cycle.sort();
            return Err(DagError::CycleDetected { cycle });
        }
    }

    Ok(())
}

/// `phase(t) = 1 + max(phase(d) for d in t.dependencies)`, or `0` if no
/// dependencies (spec.md §4.1). Computed via memoized recursion; acyclicity
/// was already established by [`check_acyclic`].
fn partition_into_phases(tasks: &HashMap<TaskId, TaskInfo>) -> Vec<DAGPhase> {
    let mut memo: HashMap<TaskId, usize> = HashMap::new();

    fn phase_of<'a>(
        id: &'a TaskId,
        tasks: &'a HashMap<TaskId, TaskInfo>,
        memo: &mut HashMap<TaskId, usize>,
    ) -> usize {
        if let Some(p) = memo.get(id) {
            return *p;
        }
        let task = &tasks[id];
        let p = task
            .dependencies
            .iter()
            .map(|d| phase_of(d, tasks, memo) + 1)
            .max()
            .unwrap_or(0);
        memo.insert(id.clone(), p);
        p
    }

    let mut max_phase = 0;
    let mut phase_of_task: HashMap<TaskId, usize> = HashMap::new();
    for id in tasks.keys() {
        let p = phase_of(id, tasks, &mut memo);
        max_phase = max_phase.max(p);
        phase_of_task.insert(id.clone(), p);
    }

    let mut phases: Vec<DAGPhase> = vec![Vec::new(); max_phase + 1];
    for (id, p) in phase_of_task {
        phases[p].push(id);
    }
    for phase in &mut phases {
        phase.sort_by_key(|id| id.ordinal());
    }

    phases
}
