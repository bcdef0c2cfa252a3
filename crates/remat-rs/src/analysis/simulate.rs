//! Residency and time simulation over a dealloc-elided task list.
//!
//! Inputs not resident at execution or a final residency that disagrees with
//! the recorded exit set are programming errors here; traces are validated
//! against these conditions at load time.

use crate::trace::{Common, OperandId, Task, TaskId};

pub(crate) struct Simulation {
    pub peak_memory: u64,
    pub total_time: u64,
    pub peak_task: TaskId,
    pub execution_memory: Vec<u64>,
}

pub(crate) fn run(tasks: &[Task], common: &Common, to_dealloc_after: &[Vec<OperandId>]) -> Simulation {
    let total_time = tasks.iter().map(|t| t.duration).sum();

    let mut resident = vec![false; common.operands.len()];
    let mut current: u64 = 0;
    for operand in &common.already_on {
        resident[operand.idx()] = true;
        current += common.size_of(*operand);
    }

    let mut peak_memory = current;
    let mut execution_memory = Vec::with_capacity(tasks.len());
    for (index, task) in tasks.iter().enumerate() {
        for u in &task.ins {
            assert!(
                resident[u.operand.idx()],
                "task `{}` (#{index}) consumes non-resident operand {}",
                task.name,
                u.operand.0
            );
        }
        for u in &task.outs {
            if !resident[u.operand.idx()] {
                resident[u.operand.idx()] = true;
                current += common.size_of(u.operand);
            }
        }
        let execution = current + task.workspace;
        peak_memory = peak_memory.max(execution);
        execution_memory.push(execution);

        for operand in &to_dealloc_after[index] {
            assert!(
                resident[operand.idx()],
                "releasing non-resident operand {} after task #{index}",
                operand.0
            );
            resident[operand.idx()] = false;
            current -= common.size_of(*operand);
        }
    }

    for (index, live) in resident.iter().enumerate() {
        let expected = common.not_dealloc.contains(&OperandId(index as u32));
        assert!(
            *live == expected,
            "operand {index} residency at exit diverges from the recorded exit set"
        );
    }

    let peak_task = execution_memory
        .iter()
        .position(|m| *m == peak_memory)
        .map(|i| TaskId(i as u32))
        .unwrap_or(TaskId(0));

    Simulation {
        peak_memory,
        total_time,
        peak_task,
        execution_memory,
    }
}
