//! DAGEngine (spec.md §4.1): builds a validated, phase-partitioned,
//! session-assigned plan from a task list.

mod engine;
mod serialize;

pub use engine::{DagError, DAGEngine};
pub use serialize::{DagDocument, DagPhaseDoc, DagTaskDoc};

use crate::types::TaskId;

/// One topological layer of the task DAG — an ordered list of task ids whose
/// dependencies are all satisfied by strictly earlier phases.
pub type DAGPhase = Vec<TaskId>;
