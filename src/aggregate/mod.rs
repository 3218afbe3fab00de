//! Per-topology-node aggregation of a task's switch events.
//!
//! [`TaskSeries`] splits the task's events by CPU once. An [`Aggregator`] pairs
//! it with one [`Reducer`] and, for a requested level, merges the CPU series of
//! every node and reduces each node to one [`Reduced`] value. Results are
//! memoized per (level, window); the trace never changes, so nothing is evicted.

pub mod reduce;

pub use reduce::{Align, Interval};

use crate::error::{Result, SchedError};
use crate::topology::Topology;
use crate::trace::{TaskEvent, TaskState};
use crate::window::Window;

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

/// Reductions the assertion API needs. Each kind owns one cached aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reducer {
    /// Running time inside the window.
    ResidencySum,
    /// First entry into a state inside the window (+inf if none).
    FirstTime(TaskState),
    /// Last entry into a state inside the window (-inf if none).
    LastTime(TaskState),
    /// Sum and count of gaps between anchor events.
    Period(Align),
    /// The node's raw switch series.
    SwitchSeries,
    /// Running intervals clipped to the window.
    TraceEvent,
}

/// One node's reduction result.
#[derive(Debug, Clone, PartialEq)]
pub enum Reduced {
    Time(f64),
    Period { total: f64, count: usize },
    Switches(Vec<TaskEvent>),
    Intervals(Vec<Interval>),
}

/// The task's events and running intervals, split per CPU.
#[derive(Debug, Clone)]
pub struct TaskSeries {
    per_cpu: BTreeMap<u32, Vec<TaskEvent>>,
    intervals: BTreeMap<u32, Vec<Interval>>,
    trace_end: f64,
}

impl TaskSeries {
    /// `events` must be ordered by timestamp (as `sched_triggers` returns them).
    pub fn new(events: &[TaskEvent], trace_end: f64) -> Self {
        let mut per_cpu: BTreeMap<u32, Vec<TaskEvent>> = BTreeMap::new();
        for e in events {
            per_cpu.entry(e.cpu).or_default().push(*e);
        }
        Self {
            per_cpu,
            intervals: reduce::running_intervals(events, trace_end),
            trace_end,
        }
    }

    pub fn trace_end(&self) -> f64 {
        self.trace_end
    }

    /// Events on any CPU of `node`, ordered by timestamp.
    pub fn node_events(&self, node: &[u32]) -> Vec<TaskEvent> {
        let mut events: Vec<TaskEvent> = node
            .iter()
            .filter_map(|cpu| self.per_cpu.get(cpu))
            .flatten()
            .copied()
            .collect();
        events.sort_by(|a, b| {
            a.timestamp
                .total_cmp(&b.timestamp)
                .then_with(|| a.state.cmp(&b.state))
        });
        events
    }

    /// Running intervals on any CPU of `node`, merged and ordered by start.
    ///
    /// Intervals come from the task-wide fold, so CPUs never overlap and the
    /// nodes of a partitioning level add up to the task's runtime.
    pub fn node_intervals(&self, node: &[u32]) -> Vec<Interval> {
        let intervals: Vec<Interval> = node
            .iter()
            .filter_map(|cpu| self.intervals.get(cpu))
            .flatten()
            .copied()
            .collect();
        reduce::merge_intervals(intervals)
    }
}

type CacheKey = (String, Option<(u64, u64)>);

/// Applies one reducer across the nodes of a level.
#[derive(Debug)]
pub struct Aggregator {
    reducer: Reducer,
    series: Rc<TaskSeries>,
    results: RefCell<HashMap<CacheKey, Rc<Vec<Reduced>>>>,
}

impl Aggregator {
    pub fn new(reducer: Reducer, series: Rc<TaskSeries>) -> Self {
        Self {
            reducer,
            series,
            results: RefCell::new(HashMap::new()),
        }
    }

    pub fn reducer(&self) -> Reducer {
        self.reducer
    }

    /// One result per node index at `level`.
    pub fn aggregate(
        &self,
        topology: &Topology,
        level: &str,
        window: Option<Window>,
    ) -> Result<Rc<Vec<Reduced>>> {
        let key: CacheKey = (level.to_string(), window.map(|w| w.key()));
        if let Some(hit) = self.results.borrow().get(&key) {
            return Ok(Rc::clone(hit));
        }

        let nodes = topology.get_level(level)?;
        tracing::debug!(
            reducer = ?self.reducer,
            level = %level,
            nodes = nodes.len(),
            "computing aggregate"
        );

        let result: Rc<Vec<Reduced>> = Rc::new(
            nodes
                .iter()
                .map(|node| self.reduce_node(node, window))
                .collect(),
        );
        self.results.borrow_mut().insert(key, Rc::clone(&result));
        Ok(result)
    }

    fn reduce_node(&self, node: &[u32], window: Option<Window>) -> Reduced {
        match self.reducer {
            Reducer::ResidencySum => {
                let intervals = self.series.node_intervals(node);
                Reduced::Time(reduce::residency_sum(&intervals, window))
            }
            Reducer::FirstTime(state) => {
                Reduced::Time(reduce::first_time(&self.series.node_events(node), state, window))
            }
            Reducer::LastTime(state) => {
                Reduced::Time(reduce::last_time(&self.series.node_events(node), state, window))
            }
            Reducer::Period(align) => {
                let (total, count) = reduce::period(&self.series.node_events(node), align, window);
                Reduced::Period { total, count }
            }
            Reducer::SwitchSeries => {
                let events = self.series.node_events(node);
                Reduced::Switches(crate::window::select_window(&events, window).to_vec())
            }
            Reducer::TraceEvent => {
                let intervals = self.series.node_intervals(node);
                Reduced::Intervals(reduce::trace_event(&intervals, window))
            }
        }
    }

    /// Scalar results of a time-valued reducer.
    pub fn times(
        &self,
        topology: &Topology,
        level: &str,
        window: Option<Window>,
    ) -> Result<Vec<f64>> {
        self.aggregate(topology, level, window)?
            .iter()
            .map(|r| match r {
                Reduced::Time(t) => Ok(*t),
                _ => Err(self.mismatch("times")),
            })
            .collect()
    }

    /// `(total, count)` pairs of a period reducer.
    pub fn periods(
        &self,
        topology: &Topology,
        level: &str,
        window: Option<Window>,
    ) -> Result<Vec<(f64, usize)>> {
        self.aggregate(topology, level, window)?
            .iter()
            .map(|r| match r {
                Reduced::Period { total, count } => Ok((*total, *count)),
                _ => Err(self.mismatch("periods")),
            })
            .collect()
    }

    pub fn switches(
        &self,
        topology: &Topology,
        level: &str,
        window: Option<Window>,
    ) -> Result<Vec<Vec<TaskEvent>>> {
        self.aggregate(topology, level, window)?
            .iter()
            .map(|r| match r {
                Reduced::Switches(events) => Ok(events.clone()),
                _ => Err(self.mismatch("switch series")),
            })
            .collect()
    }

    pub fn intervals(
        &self,
        topology: &Topology,
        level: &str,
        window: Option<Window>,
    ) -> Result<Vec<Vec<Interval>>> {
        self.aggregate(topology, level, window)?
            .iter()
            .map(|r| match r {
                Reduced::Intervals(ivs) => Ok(ivs.clone()),
                _ => Err(self.mismatch("intervals")),
            })
            .collect()
    }

    fn mismatch(&self, wanted: &str) -> SchedError {
        SchedError::InvalidArgument(format!(
            "reducer {:?} does not produce {}",
            self.reducer, wanted
        ))
    }
}
