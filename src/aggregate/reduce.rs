//! Per-node reductions over a task's switch series.

use crate::error::{Result, SchedError};
use crate::trace::{TaskEvent, TaskState};
use crate::window::{Window, select_window};

use serde::Serialize;
use std::collections::BTreeMap;
use std::str::FromStr;

/// A half-open span `[start, end)` during which the task was running.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Interval {
    pub start: f64,
    pub end: f64,
}

impl Interval {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    pub fn length(&self) -> f64 {
        self.end - self.start
    }

    /// The part of this interval inside `window`, if any.
    pub fn clip(&self, window: Window) -> Option<Interval> {
        let start = self.start.max(window.start());
        let end = self.end.min(window.end());
        (end > start).then_some(Interval { start, end })
    }
}

/// Anchor point for period measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Align {
    /// Measure between switch-ins.
    #[default]
    Start,
    /// Measure between switch-outs.
    End,
}

impl Align {
    pub const fn state(self) -> TaskState {
        match self {
            Self::Start => TaskState::Running,
            Self::End => TaskState::NotRunning,
        }
    }
}

impl FromStr for Align {
    type Err = SchedError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "start" => Ok(Self::Start),
            "end" => Ok(Self::End),
            other => Err(SchedError::InvalidArgument(format!(
                "align should be either start or end, got {:?}",
                other
            ))),
        }
    }
}

/// Fold the task's events into running intervals, keyed by CPU.
///
/// The task runs on at most one CPU at a time: a switch-in on another CPU
/// closes the interval still open on the previous one, and a late switch-out
/// from that CPU is then ignored. So intervals never overlap across CPUs.
/// A switch-out as the task's first event means it was already running when
/// the trace began. An interval left open is closed at `trace_end`.
pub fn running_intervals(events: &[TaskEvent], trace_end: f64) -> BTreeMap<u32, Vec<Interval>> {
    let mut out: BTreeMap<u32, Vec<Interval>> = BTreeMap::new();
    let mut open: Option<(u32, f64)> = None;

    for (i, e) in events.iter().enumerate() {
        match (e.state, open) {
            (TaskState::Running, None) => open = Some((e.cpu, e.timestamp)),
            (TaskState::Running, Some((cpu, _))) if cpu == e.cpu => {}
            (TaskState::Running, Some((cpu, start))) => {
                out.entry(cpu).or_default().push(Interval::new(start, e.timestamp));
                open = Some((e.cpu, e.timestamp));
            }
            (TaskState::NotRunning, Some((cpu, start))) if cpu == e.cpu => {
                out.entry(cpu).or_default().push(Interval::new(start, e.timestamp));
                open = None;
            }
            (TaskState::NotRunning, Some(_)) => {}
            (TaskState::NotRunning, None) if i == 0 => {
                out.entry(e.cpu).or_default().push(Interval::new(0.0, e.timestamp));
            }
            (TaskState::NotRunning, None) => {}
        }
    }
    if let Some((cpu, start)) = open {
        out.entry(cpu).or_default().push(Interval::new(start, trace_end.max(start)));
    }
    out
}

/// Union of intervals, sorted by start. Touching intervals are joined.
pub fn merge_intervals(mut intervals: Vec<Interval>) -> Vec<Interval> {
    intervals.sort_by(|a, b| a.start.total_cmp(&b.start));

    let mut merged: Vec<Interval> = Vec::with_capacity(intervals.len());
    for iv in intervals {
        match merged.last_mut() {
            Some(last) if iv.start <= last.end => last.end = last.end.max(iv.end),
            _ => merged.push(iv),
        }
    }
    merged
}

/// Total running time inside `window`, clipping intervals that cross its edges.
pub fn residency_sum(intervals: &[Interval], window: Option<Window>) -> f64 {
    match window {
        None => intervals.iter().map(Interval::length).sum(),
        Some(w) => intervals
            .iter()
            .filter_map(|iv| iv.clip(w))
            .map(|iv| iv.length())
            .sum(),
    }
}

/// First time the task entered `state` in `window`, or +inf.
pub fn first_time(series: &[TaskEvent], state: TaskState, window: Option<Window>) -> f64 {
    select_window(series, window)
        .iter()
        .find(|e| e.state == state)
        .map_or(f64::INFINITY, |e| e.timestamp)
}

/// Last time the task entered `state` in `window`, or -inf.
pub fn last_time(series: &[TaskEvent], state: TaskState, window: Option<Window>) -> f64 {
    select_window(series, window)
        .iter()
        .rev()
        .find(|e| e.state == state)
        .map_or(f64::NEG_INFINITY, |e| e.timestamp)
}

/// Sum and count of the gaps between consecutive anchor events in `window`.
pub fn period(series: &[TaskEvent], align: Align, window: Option<Window>) -> (f64, usize) {
    let anchors: Vec<f64> = select_window(series, window)
        .iter()
        .filter(|e| e.state == align.state())
        .map(|e| e.timestamp)
        .collect();

    anchors
        .windows(2)
        .fold((0.0, 0), |(sum, n), pair| (sum + (pair[1] - pair[0]), n + 1))
}

/// Running intervals clipped to `window`, for plotting.
pub fn trace_event(intervals: &[Interval], window: Option<Window>) -> Vec<Interval> {
    match window {
        None => intervals.to_vec(),
        Some(w) => intervals.iter().filter_map(|iv| iv.clip(w)).collect(),
    }
}
