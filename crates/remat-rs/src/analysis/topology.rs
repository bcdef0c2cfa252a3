//! Usage-link reconstruction: generator/use chains, regeneration versioning
//! and the derived per-task deallocation sets.

use crate::hashing::RollingHasher;
use crate::trace::{Common, OperandId, OperandUsage, Task, TaskId, UsageRef};

fn usage(tasks: &[Task], r: UsageRef) -> &OperandUsage {
    let task = &tasks[r.task.idx()];
    match r.port {
        crate::trace::Port::In => &task.ins[r.slot as usize],
        crate::trace::Port::Out => &task.outs[r.slot as usize],
    }
}

fn usage_mut(tasks: &mut [Task], r: UsageRef) -> &mut OperandUsage {
    let task = &mut tasks[r.task.idx()];
    match r.port {
        crate::trace::Port::In => &mut task.ins[r.slot as usize],
        crate::trace::Port::Out => &mut task.outs[r.slot as usize],
    }
}

/// Rebuilds every usage link from scratch and returns, per task, the operands
/// whose residency ends right after it.
pub(crate) fn rebuild(tasks: &mut [Task], common: &Common) -> Vec<Vec<OperandId>> {
    let operand_count = common.operands.len();

    for task in tasks.iter_mut() {
        for u in task.ins.iter_mut().chain(task.outs.iter_mut()) {
            u.reset_links();
        }
    }

    // Forward: generators, prev/next use chains, versions.
    let mut last_gen: Vec<Option<UsageRef>> = vec![None; operand_count];
    let mut last_use: Vec<Option<UsageRef>> = vec![None; operand_count];
    for index in 0..tasks.len() {
        let tid = TaskId(index as u32);

        for slot in 0..tasks[index].ins.len() {
            let operand = tasks[index].ins[slot].operand;
            let here = UsageRef::input(tid, slot);
            let generator = last_gen[operand.idx()];
            let previous = last_use[operand.idx()];

            // Entry operands have no generator and carry version 0.
            let (gen_task, version) = match generator {
                Some(g) => (Some(g.task), usage(tasks, g).version),
                None => (None, 0),
            };

            if let Some(prev) = previous {
                usage_mut(tasks, prev).next_use = Some(here);
            }
            if let Some(g) = generator {
                let gen_usage = usage_mut(tasks, g);
                if gen_usage.next_use.is_none() {
                    gen_usage.next_use = Some(here);
                }
            }

            let u = &mut tasks[index].ins[slot];
            u.gen = gen_task;
            u.prev_use = previous;
            u.version = version;
            last_use[operand.idx()] = Some(here);
        }

        // A new generation hashes the input versions with the operand id;
        // repeated runs with identical inputs produce identical versions.
        let mut base = RollingHasher::new();
        for u in &tasks[index].ins {
            base.write_u64(u.version);
        }
        for slot in 0..tasks[index].outs.len() {
            let operand = tasks[index].outs[slot].operand;
            let mut hasher = base;
            hasher.write_u64(u64::from(operand.0));

            let u = &mut tasks[index].outs[slot];
            u.gen = Some(tid);
            u.prev_use = None;
            u.version = hasher.finish();
            last_gen[operand.idx()] = Some(UsageRef::output(tid, slot));
            last_use[operand.idx()] = None;
        }
    }

    // Backward: next regeneration per usage. Outputs of a task count as the
    // next regeneration for that same task's inputs (inplace overwrites).
    let mut next_gen: Vec<Option<UsageRef>> = vec![None; operand_count];
    for index in (0..tasks.len()).rev() {
        let tid = TaskId(index as u32);
        for slot in 0..tasks[index].outs.len() {
            let operand = tasks[index].outs[slot].operand;
            tasks[index].outs[slot].next_gen = next_gen[operand.idx()];
        }
        for slot in 0..tasks[index].outs.len() {
            let operand = tasks[index].outs[slot].operand;
            next_gen[operand.idx()] = Some(UsageRef::output(tid, slot));
        }
        for slot in 0..tasks[index].ins.len() {
            let operand = tasks[index].ins[slot].operand;
            tasks[index].ins[slot].next_gen = next_gen[operand.idx()];
        }
    }

    // Backward: tail of each next_use chain.
    let mut tail: Vec<Option<UsageRef>> = vec![None; operand_count];
    for index in (0..tasks.len()).rev() {
        let tid = TaskId(index as u32);
        for slot in 0..tasks[index].outs.len() {
            let operand = tasks[index].outs[slot].operand;
            tail[operand.idx()] = None;
        }
        for slot in (0..tasks[index].ins.len()).rev() {
            let operand = tasks[index].ins[slot].operand;
            let here = UsageRef::input(tid, slot);
            let u = &mut tasks[index].ins[slot];
            if u.next_use.is_none() {
                tail[operand.idx()] = Some(here);
            }
            u.last_use = tail[operand.idx()];
        }
    }

    // Forward: residency of a generation ends at its final use; an output
    // nothing consumes ends right after its producer. Operands that must stay
    // live at exit and inplace self-aliases are exempt.
    let mut to_dealloc = Vec::with_capacity(tasks.len());
    for task in tasks.iter() {
        let mut dead: Vec<OperandId> = Vec::new();
        for u in &task.ins {
            if u.next_use.is_none()
                && !common.not_dealloc.contains(&u.operand)
                && !task.writes(u.operand)
                && !dead.contains(&u.operand)
            {
                dead.push(u.operand);
            }
        }
        for u in &task.outs {
            if u.next_use.is_none()
                && !common.not_dealloc.contains(&u.operand)
                && !dead.contains(&u.operand)
            {
                dead.push(u.operand);
            }
        }
        to_dealloc.push(dead);
    }
    to_dealloc
}
