//! Pure analysis passes over a schedule: usage-link topology, residency and
//! time simulation, and transformation-candidate enumeration.

pub mod candidates;
mod simulate;
mod topology;

pub use candidates::{enumerate, Occupy, RE_GEN_TASK_LIMIT};

use crate::hashing::fold_hashes;
use crate::trace::{Common, OperandId, Task, TaskId};

/// Results of one analysis run, cached on the owning schedule.
#[derive(Debug, Clone)]
pub struct Analysis {
    /// Maximum of `current_memory + workspace` over all tasks.
    pub peak_memory: u64,
    /// Sum of task durations in nanoseconds.
    pub total_time: u64,
    /// First task whose execution memory equals the peak.
    pub peak_task: TaskId,
    /// Per-task `current_memory + workspace` at execution.
    pub execution_memory: Vec<u64>,
    /// Operands whose residency ends right after each task.
    pub to_dealloc_after: Vec<Vec<OperandId>>,
    /// Fingerprint of the task sequence.
    pub structural_hash: u64,
}

/// Runs every pass in order. Each pass clears the transient state it owns, so
/// re-running on a rewritten task list is always safe.
pub(crate) fn run(tasks: &mut [Task], common: &Common) -> Analysis {
    let to_dealloc_after = topology::rebuild(tasks, common);
    let sim = simulate::run(tasks, common, &to_dealloc_after);
    let structural_hash = fold_hashes(tasks.iter().map(Task::structural_hash));
    Analysis {
        peak_memory: sim.peak_memory,
        total_time: sim.total_time,
        peak_task: sim.peak_task,
        execution_memory: sim.execution_memory,
        to_dealloc_after,
        structural_hash,
    }
}
