//! In-memory model for a recorded execution trace: operands, tasks, operand
//! usages and the schedules built from them.
//!
//! The working representation is dealloc-elided: a [`Schedule`] only holds
//! compute tasks, and liveness is derived from usage links during analysis.

use std::collections::HashSet;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::analysis::{self, Analysis};
use crate::hashing::RollingHasher;
use crate::units::{pretty_bytes, pretty_nanos};

/// Reserved name of the deallocation pseudo-op.
pub const DEALLOC_NAME: &str = ".dealloc";
/// Reserved name of the aliasing pseudo-op.
pub const SHARE_NAME: &str = ".share";

/// Pseudo-ops that the active trace path does not support.
pub const FORBIDDEN_NAMES: [&str; 4] = [".host2device", ".device2host", ".sync", ".alloc"];

/// Returns `true` for pseudo-op names that must be rejected at load.
pub fn is_forbidden_name(name: &str) -> bool {
    FORBIDDEN_NAMES.contains(&name)
}

/// Stable identifier of an operand; doubles as the index into the operand
/// table held by [`Common`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperandId(pub u32);

impl OperandId {
    #[inline]
    pub fn idx(self) -> usize {
        self.0 as usize
    }
}

/// Position of a task within one schedule. Schedules are immutable once
/// analyzed, so the position also serves as the task's time stamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u32);

impl TaskId {
    #[inline]
    pub fn idx(self) -> usize {
        self.0 as usize
    }
}

/// Whether a [`UsageRef`] names an input or an output slot of its task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Port {
    In,
    Out,
}

/// Reference to one operand usage inside a schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UsageRef {
    pub task: TaskId,
    pub port: Port,
    pub slot: u32,
}

impl UsageRef {
    pub fn input(task: TaskId, slot: usize) -> Self {
        Self {
            task,
            port: Port::In,
            slot: slot as u32,
        }
    }

    pub fn output(task: TaskId, slot: usize) -> Self {
        Self {
            task,
            port: Port::Out,
            slot: slot as u32,
        }
    }
}

/// A tensor-like value resident in device memory. Shared by every schedule
/// derived from one trace.
#[derive(Debug, Clone)]
pub struct Operand {
    pub id: OperandId,
    pub size: u64,
    /// Original JSON descriptor, re-emitted verbatim on dump.
    pub raw: Arc<serde_json::Value>,
}

impl Operand {
    pub fn new(id: OperandId, size: u64) -> Self {
        Self {
            id,
            size,
            raw: Arc::new(serde_json::Value::Null),
        }
    }

    pub fn with_raw(id: OperandId, size: u64, raw: Arc<serde_json::Value>) -> Self {
        Self { id, size, raw }
    }
}

/// One reference to an operand at a task-local position, together with the
/// links the analyzer derives over it. Links are meaningless until the owning
/// schedule has been analyzed and are recomputed from scratch on each pass.
#[derive(Debug, Clone)]
pub struct OperandUsage {
    pub operand: OperandId,
    /// Task that produced the version consumed or regenerated here.
    pub gen: Option<TaskId>,
    /// Neighboring uses of the same generation.
    pub prev_use: Option<UsageRef>,
    pub next_use: Option<UsageRef>,
    /// Next regeneration of the operand, if any.
    pub next_gen: Option<UsageRef>,
    /// Tail of the `next_use` chain this usage belongs to.
    pub last_use: Option<UsageRef>,
    /// Hash over the generating task's input versions and the operand id.
    pub version: u64,
}

impl OperandUsage {
    pub fn new(operand: OperandId) -> Self {
        Self {
            operand,
            gen: None,
            prev_use: None,
            next_use: None,
            next_gen: None,
            last_use: None,
            version: 0,
        }
    }

    pub(crate) fn reset_links(&mut self) {
        self.gen = None;
        self.prev_use = None;
        self.next_use = None;
        self.next_gen = None;
        self.last_use = None;
        self.version = 0;
    }
}

/// One recorded compute operation.
#[derive(Debug, Clone)]
pub struct Task {
    pub name: String,
    /// Scratch bytes required only while the task executes.
    pub workspace: u64,
    /// Duration in nanoseconds.
    pub duration: u64,
    pub ins: SmallVec<[OperandUsage; 4]>,
    pub outs: SmallVec<[OperandUsage; 4]>,
    /// An output operand also appears among the inputs.
    pub inplace: bool,
    /// Opaque per-task attribute blob, preserved through the round trip.
    pub attr: Arc<serde_json::Value>,
}

impl Task {
    pub fn new(
        name: impl Into<String>,
        workspace: u64,
        duration: u64,
        ins: impl IntoIterator<Item = OperandId>,
        outs: impl IntoIterator<Item = OperandId>,
    ) -> Self {
        let ins: SmallVec<[OperandUsage; 4]> = ins.into_iter().map(OperandUsage::new).collect();
        let outs: SmallVec<[OperandUsage; 4]> = outs.into_iter().map(OperandUsage::new).collect();
        let inplace = outs
            .iter()
            .any(|o| ins.iter().any(|i| i.operand == o.operand));
        Self {
            name: name.into(),
            workspace,
            duration,
            ins,
            outs,
            inplace,
            attr: Arc::new(serde_json::Value::Null),
        }
    }

    pub fn with_attr(mut self, attr: Arc<serde_json::Value>) -> Self {
        self.attr = attr;
        self
    }

    /// Duplicates the structural fields; analyzer links come back bare.
    pub fn fresh_copy(&self) -> Task {
        Task {
            name: self.name.clone(),
            workspace: self.workspace,
            duration: self.duration,
            ins: self.ins.iter().map(|u| OperandUsage::new(u.operand)).collect(),
            outs: self
                .outs
                .iter()
                .map(|u| OperandUsage::new(u.operand))
                .collect(),
            inplace: self.inplace,
            attr: Arc::clone(&self.attr),
        }
    }

    pub fn reads(&self, operand: OperandId) -> bool {
        self.ins.iter().any(|u| u.operand == operand)
    }

    pub fn writes(&self, operand: OperandId) -> bool {
        self.outs.iter().any(|u| u.operand == operand)
    }

    /// Rolling hash over the structural fields. Duration is excluded so that
    /// copies of a task hash identically.
    pub fn structural_hash(&self) -> u64 {
        let mut hasher = RollingHasher::new();
        hasher.write_bytes(self.name.as_bytes());
        hasher.write_u64(self.workspace);
        for usage in &self.ins {
            hasher.write_u64(u64::from(usage.operand.0));
        }
        for usage in &self.outs {
            hasher.write_u64(u64::from(usage.operand.0));
        }
        hasher.finish()
    }
}

/// Trace-wide context shared by every schedule derived from one load.
#[derive(Debug)]
pub struct Common {
    /// Dense operand table indexed by [`OperandId`].
    pub operands: Vec<Operand>,
    /// Operands live at entry (weights, input activations).
    pub already_on: HashSet<OperandId>,
    /// Operands that must remain live at exit.
    pub not_dealloc: HashSet<OperandId>,
}

impl Common {
    pub fn new(
        operands: Vec<Operand>,
        already_on: HashSet<OperandId>,
        not_dealloc: HashSet<OperandId>,
    ) -> Self {
        Self {
            operands,
            already_on,
            not_dealloc,
        }
    }

    #[inline]
    pub fn size_of(&self, operand: OperandId) -> u64 {
        self.operands[operand.idx()].size
    }
}

/// An ordered list of compute tasks over a shared [`Common`], plus the
/// analysis results cached once [`Schedule::analyze`] has run.
#[derive(Debug)]
pub struct Schedule {
    common: Arc<Common>,
    tasks: Vec<Task>,
    analysis: Option<Analysis>,
}

impl Schedule {
    pub fn new(common: Arc<Common>, tasks: Vec<Task>) -> Self {
        Self {
            common,
            tasks,
            analysis: None,
        }
    }

    pub fn common(&self) -> &Arc<Common> {
        &self.common
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn task(&self, id: TaskId) -> &Task {
        &self.tasks[id.idx()]
    }

    pub fn usage(&self, r: UsageRef) -> &OperandUsage {
        let task = &self.tasks[r.task.idx()];
        match r.port {
            Port::In => &task.ins[r.slot as usize],
            Port::Out => &task.outs[r.slot as usize],
        }
    }

    pub fn is_analyzed(&self) -> bool {
        self.analysis.is_some()
    }

    /// Rebuilds usage links and simulates memory and time. Idempotent; the
    /// first call freezes the schedule's caches.
    pub fn analyze(&mut self) {
        if self.analysis.is_none() {
            self.analysis = Some(analysis::run(&mut self.tasks, &self.common));
        }
    }

    /// Cached analysis results.
    ///
    /// # Panics
    ///
    /// Panics if [`Schedule::analyze`] has not run.
    pub fn analysis(&self) -> &Analysis {
        self.analysis
            .as_ref()
            .expect("schedule must be analyzed before its caches are read")
    }

    pub fn peak_memory(&self) -> u64 {
        self.analysis().peak_memory
    }

    pub fn total_time(&self) -> u64 {
        self.analysis().total_time
    }

    pub fn structural_hash(&self) -> u64 {
        self.analysis().structural_hash
    }

    pub fn summary(&self) -> String {
        format!(
            "peak memory: {}, total time: {}",
            pretty_bytes(self.peak_memory()),
            pretty_nanos(self.total_time())
        )
    }
}
