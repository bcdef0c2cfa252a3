//! Enumeration of re-materialization candidates over an analyzed schedule.
//!
//! A candidate pairs a generator living through the memory peak with the
//! first task after the peak that consumes its output, plus the closure of
//! extra tasks needed to reproduce stale inputs at the insertion point.

use std::collections::HashSet;

use rand::rngs::StdRng;
use rand::Rng;

use crate::trace::{OperandId, Schedule, TaskId, UsageRef};

/// Upper bound on the re-generation closure per candidate.
pub const RE_GEN_TASK_LIMIT: usize = 3;
/// Candidates kept by the memory-light score.
pub const O1_OCCUPIES_LIMIT: usize = 2;
/// Candidates kept by the memory-heavy score.
pub const O2_OCCUPIES_LIMIT: usize = 2;
/// One extra random candidate survives pruning once per this many draws.
pub const TIMES_PER_RANDOM: u32 = 4;

const SCORE1_MEMORY_WEIGHT: f64 = 0.2;
const SCORE2_MEMORY_WEIGHT: f64 = 0.8;

/// One applicable transformation: re-materialize `gen`'s outputs right before
/// `use_site`, optionally deleting `gen` at its original position.
#[derive(Debug, Clone)]
pub struct Occupy {
    /// Generator whose output lives through the peak.
    pub gen: TaskId,
    /// First post-peak consumer of that output.
    pub use_site: TaskId,
    /// Extra generators replicated so stale inputs are reproduced; emitted in
    /// reverse order by the rewriter.
    pub re_gen: Vec<TaskId>,
    /// Input usages the replicated tasks read.
    pub re_gen_ins: Vec<UsageRef>,
    /// The original `gen` has no surviving consumer before `use_site` and can
    /// be deleted at its position.
    pub move_gen: bool,
    pub score1: f64,
    pub score2: f64,
}

// A given peak yields at most one candidate per generator (its first
// post-peak use), so generator identity is the candidate's key.
impl PartialEq for Occupy {
    fn eq(&self, other: &Self) -> bool {
        self.gen == other.gen
    }
}

impl Eq for Occupy {}

impl PartialOrd for Occupy {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Occupy {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.gen.cmp(&other.gen)
    }
}

/// Enumerates, scores and prunes the candidates of an analyzed schedule.
pub fn enumerate(schedule: &Schedule, origin_time: u64, rng: &mut StdRng) -> Vec<Occupy> {
    let analysis = schedule.analysis();
    let tasks = schedule.tasks();
    if tasks.is_empty() {
        return Vec::new();
    }

    let peak_task = analysis.peak_task;
    let peak_memory = analysis.peak_memory;

    let mut found = Vec::new();
    let mut seen_gen: HashSet<TaskId> = HashSet::new();
    for index in (peak_task.idx() + 1)..tasks.len() {
        let use_site = TaskId(index as u32);
        for u in &tasks[index].ins {
            let Some(gen) = u.gen else { continue };
            if gen >= peak_task {
                continue;
            }
            // First post-peak use per generator only.
            if !seen_gen.insert(gen) {
                continue;
            }
            let Some((re_gen, re_gen_ins)) = expand_closure(schedule, gen, use_site) else {
                continue;
            };
            let move_gen = can_move(schedule, gen, use_site);
            let time_increased = time_cost(schedule, gen, &re_gen, move_gen);
            let memory_increased =
                memory_cost(schedule, gen, use_site, &re_gen_ins, peak_task);

            let memory_term = if peak_memory > 0 {
                memory_increased as f64 / peak_memory as f64
            } else {
                0.0
            };
            let time_term = if origin_time > 0 {
                time_increased as f64 / origin_time as f64
            } else {
                0.0
            };
            found.push(Occupy {
                gen,
                use_site,
                re_gen,
                re_gen_ins,
                move_gen,
                score1: SCORE1_MEMORY_WEIGHT * memory_term
                    + (1.0 - SCORE1_MEMORY_WEIGHT) * time_term,
                score2: SCORE2_MEMORY_WEIGHT * memory_term
                    + (1.0 - SCORE2_MEMORY_WEIGHT) * time_term,
            });
        }
    }

    prune(found, rng)
}

/// Collects the generators that must be replicated alongside `gen` so that
/// every input it reads carries the expected version right before `use_site`.
/// Returns `None` when the closure would exceed [`RE_GEN_TASK_LIMIT`] or a
/// stale input cannot be re-generated at all.
fn expand_closure(
    schedule: &Schedule,
    gen: TaskId,
    use_site: TaskId,
) -> Option<(Vec<TaskId>, Vec<UsageRef>)> {
    let mut re_gen: Vec<TaskId> = Vec::new();
    let mut re_gen_ins: Vec<UsageRef> = Vec::new();
    push_inputs(schedule, gen, &mut re_gen_ins);

    loop {
        let mut bad: Option<usize> = None;
        for (index, r) in re_gen_ins.iter().enumerate() {
            let u = schedule.usage(*r);
            // Last regeneration strictly before the insertion point.
            let mut regen_version = None;
            let mut cursor = u.next_gen;
            while let Some(next) = cursor {
                if next.task >= use_site {
                    break;
                }
                let regen = schedule.usage(next);
                regen_version = Some(regen.version);
                cursor = regen.next_gen;
            }
            if let Some(version) = regen_version {
                if version != u.version {
                    bad = Some(index);
                    break;
                }
            }
        }

        let Some(index) = bad else {
            return Some((re_gen, re_gen_ins));
        };
        if re_gen.len() >= RE_GEN_TASK_LIMIT {
            return None;
        }

        let stale = re_gen_ins.remove(index);
        // Entry operands have no generator to replicate.
        let producer = schedule.usage(stale).gen?;
        re_gen.push(producer);
        push_inputs(schedule, producer, &mut re_gen_ins);
    }
}

/// Adds a task's input usages to the accumulated set, one per operand.
fn push_inputs(schedule: &Schedule, task: TaskId, re_gen_ins: &mut Vec<UsageRef>) {
    for slot in 0..schedule.task(task).ins.len() {
        let r = UsageRef::input(task, slot);
        let operand = schedule.usage(r).operand;
        let present = re_gen_ins
            .iter()
            .any(|existing| schedule.usage(*existing).operand == operand);
        if !present {
            re_gen_ins.push(r);
        }
    }
}

/// `gen` can be deleted at its original position iff none of its outputs is
/// consumed strictly before the insertion point.
fn can_move(schedule: &Schedule, gen: TaskId, use_site: TaskId) -> bool {
    schedule
        .task(gen)
        .outs
        .iter()
        .all(|u| match u.next_use {
            Some(r) => r.task >= use_site,
            None => true,
        })
}

fn time_cost(schedule: &Schedule, gen: TaskId, re_gen: &[TaskId], move_gen: bool) -> u64 {
    let base = if move_gen {
        0
    } else {
        schedule.task(gen).duration
    };
    base + re_gen
        .iter()
        .map(|t| schedule.task(*t).duration)
        .sum::<u64>()
}

/// Net bytes held across the peak after the rewrite: closure inputs that must
/// now outlive it, minus the generator outputs the consumer no longer keeps
/// alive through it.
fn memory_cost(
    schedule: &Schedule,
    gen: TaskId,
    use_site: TaskId,
    re_gen_ins: &[UsageRef],
    peak_task: TaskId,
) -> i64 {
    let common = schedule.common();
    let gen_outs: Vec<OperandId> = schedule
        .task(gen)
        .outs
        .iter()
        .map(|u| u.operand)
        .collect();

    let mut increased: i64 = 0;
    for r in re_gen_ins {
        let u = schedule.usage(*r);
        if gen_outs.contains(&u.operand) {
            continue;
        }
        if matches!(u.last_use, Some(l) if l.task < peak_task) {
            increased += common.size_of(u.operand) as i64;
        }
    }

    let mut counted: Vec<OperandId> = Vec::new();
    for u in &schedule.task(use_site).ins {
        if u.gen != Some(gen) || counted.contains(&u.operand) {
            continue;
        }
        counted.push(u.operand);
        let freed_across_peak = match u.prev_use {
            Some(p) => p.task < peak_task,
            None => true,
        };
        if freed_across_peak {
            increased -= common.size_of(u.operand) as i64;
        }
    }
    increased
}

/// Keeps the best candidates under both score weightings plus, once in a
/// while, one random survivor.
fn prune(candidates: Vec<Occupy>, rng: &mut StdRng) -> Vec<Occupy> {
    if candidates.len() <= O1_OCCUPIES_LIMIT.min(O2_OCCUPIES_LIMIT) {
        return candidates;
    }

    let mut by_score1: Vec<usize> = (0..candidates.len()).collect();
    by_score1.sort_by(|a, b| candidates[*a].score1.total_cmp(&candidates[*b].score1));
    let mut by_score2: Vec<usize> = (0..candidates.len()).collect();
    by_score2.sort_by(|a, b| candidates[*a].score2.total_cmp(&candidates[*b].score2));

    let mut selected: HashSet<usize> = HashSet::new();
    selected.extend(by_score1.iter().take(O1_OCCUPIES_LIMIT));
    selected.extend(by_score2.iter().take(O2_OCCUPIES_LIMIT));
    if rng.gen_range(0..TIMES_PER_RANDOM) == 0 {
        selected.insert(rng.gen_range(0..candidates.len()));
    }

    candidates
        .into_iter()
        .enumerate()
        .filter_map(|(index, occupy)| selected.contains(&index).then_some(occupy))
        .collect()
}
