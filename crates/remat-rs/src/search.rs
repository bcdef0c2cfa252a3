//! Bounded best-first search over single-step re-materialization rewrites.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};

use crate::analysis::candidates;
use crate::env;
use crate::rewrite;
use crate::trace::Schedule;

/// Default upper bound on processed queue pops.
pub const SEARCH_LIMIT: usize = 1000;
/// Ceiling on the frontier size.
pub const QUEUE_SIZE_LIMIT: usize = 100_000;
/// Progress record cadence, in pops.
pub const PRINT_FREQUENCY: usize = 100;

/// Weight of the exceeded-memory ratio in the blended score.
pub const MEMORY_FACTOR: f64 = 0.6;
/// Weight of the exceeded-time ratio in the blended score.
pub const TIME_FACTOR: f64 = 1.0 - MEMORY_FACTOR;
/// A schedule stays on the frontier while its score is within this factor of
/// the best schedule's score.
pub const RECONSIDER_RATIO: f64 = 1.2;
/// Total-time slack accepted by the termination predicate.
pub const TIME_REQUIREMENT_RATIO: f64 = 1.01;

/// Tunables of one search run.
#[derive(Debug, Clone)]
pub struct SearchParams {
    /// Device memory budget in bytes.
    pub memory_limit: u64,
    pub search_limit: usize,
    pub queue_limit: usize,
    /// Seed for the candidate-pruning random pick.
    pub seed: u64,
}

impl SearchParams {
    /// Builds parameters for the given budget, honoring the process
    /// environment overrides.
    pub fn new(memory_limit: u64) -> Self {
        Self {
            memory_limit,
            search_limit: env::search_limit(),
            queue_limit: QUEUE_SIZE_LIMIT,
            seed: env::seed().unwrap_or(0),
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// Ranks schedules against the original runtime and the memory budget.
#[derive(Debug, Clone, Copy)]
pub struct Comparator {
    pub origin_time: u64,
    pub memory_limit: u64,
}

impl Comparator {
    /// Blend of exceeded-memory and exceeded-time ratios; lower is better.
    pub fn score(&self, schedule: &Schedule) -> f64 {
        let memory = schedule.peak_memory();
        let time = schedule.total_time();
        let exceeded_memory = if memory > self.memory_limit && self.memory_limit > 0 {
            (memory - self.memory_limit) as f64 / self.memory_limit as f64
        } else {
            0.0
        };
        let exceeded_time = if self.origin_time > 0 {
            (time as f64 - self.origin_time as f64) / self.origin_time as f64
        } else {
            0.0
        };
        MEMORY_FACTOR * exceeded_memory + TIME_FACTOR * exceeded_time
    }

    pub fn meets_limit(&self, schedule: &Schedule) -> bool {
        schedule.peak_memory() <= self.memory_limit
    }

    /// Strict preference: a budget-satisfier beats a violator; two satisfiers
    /// compare by time; otherwise the lower score wins.
    pub fn prefers(&self, candidate: &Schedule, incumbent: &Schedule) -> bool {
        let fits = self.meets_limit(candidate);
        if fits != self.meets_limit(incumbent) {
            return fits;
        }
        if fits {
            return candidate.total_time() < incumbent.total_time();
        }
        self.score(candidate) < self.score(incumbent)
    }

    /// Termination predicate: within budget and within the time slack.
    pub fn satisfy(&self, schedule: &Schedule) -> bool {
        self.meets_limit(schedule)
            && (schedule.total_time() as f64)
                <= TIME_REQUIREMENT_RATIO * self.origin_time as f64
    }

    /// Whether a score keeps a schedule worth expanding against the best.
    pub fn considerable(&self, score: f64, best_score: f64) -> bool {
        score < best_score * RECONSIDER_RATIO
    }
}

/// Frontier entry with its ranking ingredients precomputed at push time.
#[derive(Clone)]
struct Entry {
    schedule: Arc<Schedule>,
    meets_limit: bool,
    time: u64,
    score: f64,
}

impl Entry {
    fn new(schedule: Arc<Schedule>, comparator: &Comparator) -> Self {
        let meets_limit = comparator.meets_limit(&schedule);
        let time = schedule.total_time();
        let score = comparator.score(&schedule);
        Self {
            schedule,
            meets_limit,
            time,
            score,
        }
    }

    fn better_than(&self, other: &Entry) -> bool {
        if self.meets_limit != other.meets_limit {
            return self.meets_limit;
        }
        if self.meets_limit {
            return self.time < other.time;
        }
        self.score < other.score
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // BinaryHeap pops its maximum, so "better" compares as greater.
    fn cmp(&self, other: &Self) -> Ordering {
        if self.better_than(other) {
            Ordering::Greater
        } else if other.better_than(self) {
            Ordering::Less
        } else {
            Ordering::Equal
        }
    }
}

/// Result of one search run. The search is best-effort: `best` is the origin
/// whenever no improvement was found.
pub struct SearchOutcome {
    pub best: Arc<Schedule>,
    pub searched: usize,
    pub satisfied: bool,
    pub elapsed: Duration,
}

/// Explores rewrites of `origin` until the budget is met, the frontier
/// drains, or the iteration bound is hit.
pub fn optimize(mut origin: Schedule, params: &SearchParams) -> SearchOutcome {
    origin.analyze();
    let origin = Arc::new(origin);
    let comparator = Comparator {
        origin_time: origin.total_time(),
        memory_limit: params.memory_limit,
    };
    let mut rng = StdRng::seed_from_u64(params.seed);
    let started = Instant::now();

    let mut best = Entry::new(Arc::clone(&origin), &comparator);
    let mut queue: BinaryHeap<Entry> = BinaryHeap::new();
    let mut seen: HashSet<u64> = HashSet::new();
    queue.push(best.clone());
    seen.insert(origin.structural_hash());

    info!("starting search from origin ({})", origin.summary());

    let mut searched = 0usize;
    while let Some(top) = queue.pop() {
        searched += 1;

        // The best may have improved since this entry was queued.
        if !comparator.considerable(top.score, best.score) {
            continue;
        }

        let occupies = candidates::enumerate(&top.schedule, comparator.origin_time, &mut rng);
        debug!(
            candidates = occupies.len(),
            peak = top.schedule.peak_memory(),
            "expanding schedule"
        );
        for occupy in &occupies {
            if queue.len() >= params.queue_limit {
                warn!("reached search queue size limit {}", params.queue_limit);
                break;
            }
            let mut child = rewrite::apply(&top.schedule, occupy);
            child.analyze();
            if seen.contains(&child.structural_hash()) {
                continue;
            }
            let entry = Entry::new(Arc::new(child), &comparator);
            if comparator.considerable(entry.score, best.score) {
                seen.insert(entry.schedule.structural_hash());
                queue.push(entry.clone());
            }
            if entry.better_than(&best) {
                best = entry;
            }
        }

        if comparator.satisfy(&best.schedule) {
            info!("requirement already satisfied, stopping search");
            break;
        }
        if searched >= params.search_limit {
            warn!("reached search limit {}", params.search_limit);
            break;
        }
        if searched % PRINT_FREQUENCY == 0 {
            info!(
                searched,
                frontier = queue.len(),
                best = %best.schedule.summary(),
                "search progress"
            );
        }
    }

    let satisfied = comparator.satisfy(&best.schedule);
    SearchOutcome {
        best: best.schedule,
        searched,
        satisfied,
        elapsed: started.elapsed(),
    }
}
