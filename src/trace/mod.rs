//! Scheduler trace access.
//!
//! The assertion core only sees a trace through [`TraceProvider`]. [`SchedTrace`]
//! is the in-memory implementation, filled either programmatically or by the
//! ftrace text parser in [`parse`].

pub mod event;
pub mod parse;

pub use event::{SchedSwitch, TaskEvent, TaskState};
pub use parse::{parse_trace_file, parse_trace_str};

use std::collections::BTreeSet;

/// Read-only view of a parsed scheduler trace.
pub trait TraceProvider {
    /// Distinct pids that ran under `execname`.
    fn pids_for_process(&self, execname: &str) -> BTreeSet<u32>;

    /// Name of `pid` as first seen in the trace.
    fn task_name(&self, pid: u32) -> Option<String>;

    /// All `sched_switch` records, ordered by timestamp.
    fn sched_switches(&self) -> &[SchedSwitch];

    /// Trace length in seconds; timestamps run from 0 to this value.
    fn duration(&self) -> f64;
}

/// A static, already-parsed trace held in memory.
#[derive(Debug, Clone, Default)]
pub struct SchedTrace {
    switches: Vec<SchedSwitch>,
    duration: f64,
}

impl SchedTrace {
    /// Records are sorted by timestamp; their relative order is kept on ties.
    pub fn new(mut switches: Vec<SchedSwitch>, duration: f64) -> Self {
        switches.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        Self { switches, duration }
    }

    /// Build a trace whose duration ends at the last switch.
    pub fn from_switches(switches: Vec<SchedSwitch>) -> Self {
        let duration = switches
            .iter()
            .map(|s| s.timestamp)
            .fold(0.0f64, f64::max);
        Self::new(switches, duration)
    }

    pub fn len(&self) -> usize {
        self.switches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.switches.is_empty()
    }

    /// CPUs with at least one switch.
    pub fn cpus(&self) -> BTreeSet<u32> {
        self.switches.iter().map(|s| s.cpu).collect()
    }
}

impl TraceProvider for SchedTrace {
    fn pids_for_process(&self, execname: &str) -> BTreeSet<u32> {
        let mut pids = BTreeSet::new();
        for s in &self.switches {
            if s.next_comm == execname {
                pids.insert(s.next_pid);
            }
            if s.prev_comm == execname {
                pids.insert(s.prev_pid);
            }
        }
        pids
    }

    fn task_name(&self, pid: u32) -> Option<String> {
        self.switches.iter().find_map(|s| {
            if s.next_pid == pid {
                Some(s.next_comm.clone())
            } else if s.prev_pid == pid {
                Some(s.prev_comm.clone())
            } else {
                None
            }
        })
    }

    fn sched_switches(&self) -> &[SchedSwitch] {
        &self.switches
    }

    fn duration(&self) -> f64 {
        self.duration
    }
}

/// Derive the switch-in/switch-out events of `pid` from the raw switches.
///
/// A switch-in (`next_pid == pid`) yields [`TaskState::Running`] on that CPU,
/// a switch-out (`prev_pid == pid`) yields [`TaskState::NotRunning`]. A switch
/// from the task to itself is not a transition and is dropped. At equal
/// timestamps switch-outs come first.
pub fn sched_triggers<T: TraceProvider + ?Sized>(trace: &T, pid: u32) -> Vec<TaskEvent> {
    let mut events: Vec<TaskEvent> = trace
        .sched_switches()
        .iter()
        .filter_map(|s| match (s.prev_pid == pid, s.next_pid == pid) {
            (false, true) => Some(TaskEvent::new(s.timestamp, s.cpu, TaskState::Running)),
            (true, false) => Some(TaskEvent::new(s.timestamp, s.cpu, TaskState::NotRunning)),
            _ => None,
        })
        .collect();

    events.sort_by(|a, b| {
        a.timestamp
            .total_cmp(&b.timestamp)
            .then_with(|| a.state.cmp(&b.state))
    });
    events
}
