//! Applies a single re-materialization candidate to produce a new schedule.

use crate::analysis::Occupy;
use crate::trace::{Schedule, TaskId};

/// Walks the source task list in order, inserting fresh copies of the closure
/// (in reverse) and of the generator right before the consuming task, and
/// dropping the original generator when the candidate allows it. The returned
/// schedule shares the source's `Common` and has no analysis caches yet.
pub fn apply(schedule: &Schedule, occupy: &Occupy) -> Schedule {
    let source = schedule.tasks();
    let mut tasks = Vec::with_capacity(source.len() + occupy.re_gen.len() + 1);

    for (index, task) in source.iter().enumerate() {
        let id = TaskId(index as u32);
        if id == occupy.use_site {
            for replicated in occupy.re_gen.iter().rev() {
                tasks.push(schedule.task(*replicated).fresh_copy());
            }
            tasks.push(schedule.task(occupy.gen).fresh_copy());
        }
        if id == occupy.gen && occupy.move_gen {
            continue;
        }
        tasks.push(task.fresh_copy());
    }

    Schedule::new(schedule.common().clone(), tasks)
}
