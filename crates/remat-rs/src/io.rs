//! Trace file loading and dumping.
//!
//! The on-disk format carries explicit `.dealloc` and `.share` pseudo-ops.
//! Loading resolves `.share` aliasing, discovers entry/exit placement,
//! validates residency and hands back a dealloc-elided [`Schedule`]. Dumping
//! restores `.dealloc` tasks from the derived liveness and re-emits operand
//! descriptors and task attributes verbatim.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::trace::{
    is_forbidden_name, Common, Operand, OperandId, Schedule, Task, DEALLOC_NAME, SHARE_NAME,
};

#[derive(Debug, Error)]
pub enum TraceLoadError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("operand descriptor #{index} is missing a non-negative integer `{field}`")]
    BadOperand { index: usize, field: &'static str },
    #[error("operand id {id} appears twice in `data`")]
    DuplicateOperand { id: u32 },
    #[error("operand table has a hole at id {id}")]
    MissingOperand { id: u32 },
    #[error("task `{name}` references unknown operand {id}")]
    UnknownOperand { name: String, id: u32 },
    #[error("pseudo-op `{0}` is not allowed in input traces")]
    ForbiddenOp(String),
    #[error("`.share` task #{0} must have exactly one input")]
    MalformedShare(usize),
    #[error("`.dealloc` task #{0} must not have inputs")]
    MalformedDealloc(usize),
    #[error(transparent)]
    Invalid(#[from] TraceValidityError),
}

#[derive(Debug, Error)]
pub enum TraceValidityError {
    #[error("task `{name}` (#{index}) consumes operand {operand} which is not resident")]
    InputNotResident {
        name: String,
        index: usize,
        operand: u32,
    },
    #[error("`.dealloc` (#{index}) frees operand {operand} which is not resident")]
    DeallocNotResident { index: usize, operand: u32 },
    #[error("residency at exit does not match the schedule's exit set")]
    ExitResidencyMismatch,
}

#[derive(Debug, Error)]
pub enum TraceDumpError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Invalid(#[from] TraceValidityError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawTask {
    name: String,
    ins: Vec<u32>,
    outs: Vec<u32>,
    workspace: u64,
    /// Duration in microseconds.
    time: f64,
    #[serde(default)]
    attr: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct TraceFile {
    data: Vec<serde_json::Value>,
    code: Vec<RawTask>,
}

/// Loads a trace file and returns its analyzed, dealloc-elided schedule.
pub fn load_trace(path: impl AsRef<Path>) -> Result<Schedule, TraceLoadError> {
    let text = fs::read_to_string(path)?;
    load_trace_str(&text)
}

/// As [`load_trace`], from an in-memory JSON document.
pub fn load_trace_str(text: &str) -> Result<Schedule, TraceLoadError> {
    let file: TraceFile = serde_json::from_str(text)?;

    // Operand table; descriptors are kept verbatim for the round trip.
    let mut slots: Vec<Option<Operand>> = Vec::new();
    for (index, raw) in file.data.iter().enumerate() {
        let id = raw
            .get("id")
            .and_then(serde_json::Value::as_u64)
            .ok_or(TraceLoadError::BadOperand { index, field: "id" })? as u32;
        let size = raw
            .get("size")
            .and_then(serde_json::Value::as_u64)
            .ok_or(TraceLoadError::BadOperand {
                index,
                field: "size",
            })?;
        let slot = id as usize;
        if slot >= slots.len() {
            slots.resize(slot + 1, None);
        }
        if slots[slot].is_some() {
            return Err(TraceLoadError::DuplicateOperand { id });
        }
        slots[slot] = Some(Operand::with_raw(
            OperandId(id),
            size,
            Arc::new(raw.clone()),
        ));
    }
    let operands: Vec<Operand> = slots
        .into_iter()
        .enumerate()
        .map(|(id, slot)| slot.ok_or(TraceLoadError::MissingOperand { id: id as u32 }))
        .collect::<Result<_, _>>()?;

    // Resolve `.share` aliasing and check names and operand references.
    // Aliases always point at a root because inputs are resolved first.
    let mut alias: HashMap<u32, u32> = HashMap::new();
    let mut records: Vec<RawTask> = Vec::with_capacity(file.code.len());
    for (index, mut record) in file.code.into_iter().enumerate() {
        if is_forbidden_name(&record.name) {
            return Err(TraceLoadError::ForbiddenOp(record.name));
        }
        for id in record.ins.iter_mut().chain(record.outs.iter_mut()) {
            *id = alias.get(id).copied().unwrap_or(*id);
            if operands.get(*id as usize).is_none() {
                return Err(TraceLoadError::UnknownOperand {
                    name: record.name.clone(),
                    id: *id,
                });
            }
        }
        if record.name == SHARE_NAME {
            if record.ins.len() != 1 {
                return Err(TraceLoadError::MalformedShare(index));
            }
            let source = record.ins[0];
            for target in &record.outs {
                if *target != source {
                    alias.insert(*target, source);
                }
            }
            continue;
        }
        if record.name == DEALLOC_NAME && !record.ins.is_empty() {
            return Err(TraceLoadError::MalformedDealloc(index));
        }
        records.push(record);
    }

    let (already_on, not_dealloc) = discover_placement(&records, operands.len())?;

    let tasks: Vec<Task> = records
        .into_iter()
        .filter(|record| record.name != DEALLOC_NAME)
        .map(|record| {
            Task::new(
                record.name,
                record.workspace,
                micros_to_nanos(record.time),
                record.ins.into_iter().map(OperandId),
                record.outs.into_iter().map(OperandId),
            )
            .with_attr(Arc::new(record.attr))
        })
        .collect();

    let common = Arc::new(Common::new(operands, already_on, not_dealloc));
    let mut schedule = Schedule::new(common, tasks);
    schedule.analyze();
    Ok(schedule)
}

/// One forward sweep over the original records: operands consumed before they
/// are produced were live at entry; operands still resident at the end must
/// stay live at exit.
fn discover_placement(
    records: &[RawTask],
    operand_count: usize,
) -> Result<(HashSet<OperandId>, HashSet<OperandId>), TraceValidityError> {
    let mut produced = vec![false; operand_count];
    let mut resident = vec![false; operand_count];
    let mut already_on = HashSet::new();

    for (index, record) in records.iter().enumerate() {
        if record.name == DEALLOC_NAME {
            for id in &record.outs {
                if !resident[*id as usize] {
                    return Err(TraceValidityError::DeallocNotResident {
                        index,
                        operand: *id,
                    });
                }
                resident[*id as usize] = false;
            }
            continue;
        }
        for id in &record.ins {
            let slot = *id as usize;
            if !produced[slot] {
                produced[slot] = true;
                resident[slot] = true;
                already_on.insert(OperandId(*id));
            } else if !resident[slot] {
                return Err(TraceValidityError::InputNotResident {
                    name: record.name.clone(),
                    index,
                    operand: *id,
                });
            }
        }
        for id in &record.outs {
            produced[*id as usize] = true;
            resident[*id as usize] = true;
        }
    }

    let not_dealloc = resident
        .iter()
        .enumerate()
        .filter_map(|(id, live)| live.then_some(OperandId(id as u32)))
        .collect();
    Ok((already_on, not_dealloc))
}

/// Restores `.dealloc` tasks from the derived liveness and writes the trace.
/// The schedule must be analyzed.
pub fn dump_trace(schedule: &Schedule, path: impl AsRef<Path>) -> Result<(), TraceDumpError> {
    let text = dump_trace_string(schedule)?;
    fs::write(path, text)?;
    Ok(())
}

/// As [`dump_trace`], to an in-memory JSON document.
pub fn dump_trace_string(schedule: &Schedule) -> Result<String, TraceDumpError> {
    let analysis = schedule.analysis();
    let common = schedule.common();

    let mut code = Vec::with_capacity(schedule.tasks().len());
    for (index, task) in schedule.tasks().iter().enumerate() {
        code.push(RawTask {
            name: task.name.clone(),
            ins: task.ins.iter().map(|u| u.operand.0).collect(),
            outs: task.outs.iter().map(|u| u.operand.0).collect(),
            workspace: task.workspace,
            time: nanos_to_micros(task.duration),
            attr: (*task.attr).clone(),
        });
        let dead = &analysis.to_dealloc_after[index];
        if !dead.is_empty() {
            code.push(RawTask {
                name: DEALLOC_NAME.to_string(),
                ins: Vec::new(),
                outs: dead.iter().map(|o| o.0).collect(),
                workspace: 0,
                time: 0.0,
                attr: serde_json::Value::Null,
            });
        }
    }

    verify_restored(&code, common)?;

    let data = common.operands.iter().map(|o| (*o.raw).clone()).collect();
    let file = TraceFile { data, code };
    Ok(serde_json::to_string_pretty(&file)?)
}

/// Re-simulates residency over the restored records before they hit disk.
fn verify_restored(records: &[RawTask], common: &Common) -> Result<(), TraceValidityError> {
    let mut resident = vec![false; common.operands.len()];
    for operand in &common.already_on {
        resident[operand.idx()] = true;
    }

    for (index, record) in records.iter().enumerate() {
        if record.name == DEALLOC_NAME {
            for id in &record.outs {
                if !resident[*id as usize] {
                    return Err(TraceValidityError::DeallocNotResident {
                        index,
                        operand: *id,
                    });
                }
                resident[*id as usize] = false;
            }
            continue;
        }
        for id in &record.ins {
            if !resident[*id as usize] {
                return Err(TraceValidityError::InputNotResident {
                    name: record.name.clone(),
                    index,
                    operand: *id,
                });
            }
        }
        for id in &record.outs {
            resident[*id as usize] = true;
        }
    }

    for (id, live) in resident.iter().enumerate() {
        if *live != common.not_dealloc.contains(&OperandId(id as u32)) {
            return Err(TraceValidityError::ExitResidencyMismatch);
        }
    }
    Ok(())
}

fn micros_to_nanos(time: f64) -> u64 {
    (time.max(0.0) * 1000.0).round() as u64
}

fn nanos_to_micros(duration: u64) -> f64 {
    duration as f64 / 1000.0
}
