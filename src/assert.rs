//! Scheduler scenario assertions for a single task.
//!
//! [`SchedAssert`] verifies predefined scheduling behavior of one task in one
//! trace: where it ran, for how long, how often, and in which order it moved
//! between topology nodes. It does not compare runs against each other.

use crate::aggregate::{Aggregator, Align, Reducer, TaskSeries};
use crate::error::{Result, SchedError};
use crate::render::{EventPlot, PlotEvent};
use crate::topology::{LEVEL_ALL, LEVEL_CPU, Topology};
use crate::trace::{TaskEvent, TaskState, TraceProvider, sched_triggers};
use crate::window::{Window, select_window};

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use std::str::FromStr;

/// Which end of a window to search from when relaxing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Latest running time in the window, else before it back to the task's start.
    Left,
    /// Earliest running time in the window, else after it up to the task's end.
    Right,
}

impl FromStr for Direction {
    type Err = SchedError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "left" => Ok(Self::Left),
            "right" => Ok(Self::Right),
            other => Err(SchedError::InvalidArgument(format!(
                "direction should be either left or right, got {:?}",
                other
            ))),
        }
    }
}

pub struct SchedAssert<'a, T: TraceProvider + ?Sized> {
    trace: &'a T,
    topology: &'a Topology,
    pid: u32,
    execname: String,
    name: String,
    series: Rc<TaskSeries>,
    aggs: RefCell<HashMap<Reducer, Rc<Aggregator>>>,
}

impl<'a, T: TraceProvider + ?Sized> SchedAssert<'a, T> {
    /// Bind a task of `trace` to `topology`.
    ///
    /// One of `execname` or `pid` is mandatory. With only `execname`, exactly one
    /// pid must carry that name. With both, `pid` must be one of the name's pids.
    /// With only `pid`, the name is looked up in the trace.
    pub fn new(
        trace: &'a T,
        topology: &'a Topology,
        execname: Option<&str>,
        pid: Option<u32>,
    ) -> Result<Self> {
        let execname = execname.filter(|n| !n.is_empty());
        let (pid, execname) = resolve_task(trace, execname, pid)?;

        let events = sched_triggers(trace, pid);
        tracing::debug!(pid, execname = %execname, events = events.len(), "bound task");

        Ok(Self {
            trace,
            topology,
            pid,
            name: format!("{}-{}", execname, pid),
            execname,
            series: Rc::new(TaskSeries::new(&events, trace.duration())),
            aggs: RefCell::new(HashMap::new()),
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn execname(&self) -> &str {
        &self.execname
    }

    /// "{execname}-{pid}", used as the plot series name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn topology(&self) -> &Topology {
        self.topology
    }

    /// Memoized aggregator for `reducer`.
    fn aggregator(&self, reducer: Reducer) -> Rc<Aggregator> {
        let mut aggs = self.aggs.borrow_mut();
        Rc::clone(
            aggs.entry(reducer)
                .or_insert_with(|| Rc::new(Aggregator::new(reducer, Rc::clone(&self.series)))),
        )
    }

    /// Time the task spent running on `node` of `level`.
    ///
    /// With `percent`, the result is normalized to the task's total runtime in
    /// the same window.
    pub fn get_residency(
        &self,
        level: &str,
        node: &[u32],
        window: Option<Window>,
        percent: bool,
    ) -> Result<f64> {
        let node_index = self.topology.get_index(level, node)?;

        let agg = self.aggregator(Reducer::ResidencySum);
        let node_value = agg.times(self.topology, level, window)?[node_index];

        if !percent {
            return Ok(node_value);
        }

        let total = self.total_runtime(&agg, window)?;
        if total <= 0.0 {
            return Err(SchedError::DegenerateMetric(format!(
                "{} did not run in {}, residency percentage is undefined",
                self.name,
                describe_window(window)
            )));
        }
        Ok(node_value * 100.0 / total)
    }

    pub fn assert_residency(
        &self,
        level: &str,
        node: &[u32],
        expected_value: f64,
        operator: impl Fn(f64, f64) -> bool,
        window: Option<Window>,
        percent: bool,
    ) -> Result<bool> {
        let node_value = self.get_residency(level, node, window, percent)?;
        Ok(operator(node_value, expected_value))
    }

    fn total_runtime(&self, agg: &Aggregator, window: Option<Window>) -> Result<f64> {
        Ok(agg.times(self.topology, LEVEL_ALL, window)?.iter().sum())
    }

    /// First time the task ran on any CPU; +inf if it never ran.
    pub fn get_start_time(&self) -> Result<f64> {
        let agg = self.aggregator(Reducer::FirstTime(TaskState::Running));
        let result = agg.times(self.topology, LEVEL_ALL, None)?;
        Ok(result.into_iter().fold(f64::INFINITY, f64::min))
    }

    /// Last time the task was switched in on any CPU; -inf if it never ran.
    pub fn get_end_time(&self) -> Result<f64> {
        let agg = self.aggregator(Reducer::LastTime(TaskState::Running));
        let result = agg.times(self.topology, LEVEL_ALL, None)?;
        Ok(result.into_iter().fold(f64::NEG_INFINITY, f64::max))
    }

    /// Whether the task was switched in at least once in the trace.
    pub fn has_run(&self) -> Result<bool> {
        Ok(self.get_start_time()?.is_finite())
    }

    /// Locate a running timestamp of `series` for `window`, widening the window
    /// once when it holds none.
    ///
    /// Returns `None` when the widened window is empty as well.
    fn relax_switch_window(
        &self,
        series: &[TaskEvent],
        direction: Direction,
        window: Window,
    ) -> Result<Option<f64>> {
        let running: Vec<TaskEvent> = series.iter().copied().filter(TaskEvent::is_running).collect();

        let in_window = select_window(&running, Some(window));
        let found = match direction {
            Direction::Left => in_window.last(),
            Direction::Right => in_window.first(),
        };
        if let Some(e) = found {
            return Ok(Some(e.timestamp));
        }

        // Bounds may cross here (task never ran); selection is then empty.
        let relaxed = match direction {
            Direction::Left => select_window(
                &running,
                Some(Window::unchecked(self.get_start_time()?, window.start())),
            )
            .last(),
            Direction::Right => select_window(
                &running,
                Some(Window::unchecked(window.end(), self.get_end_time()?)),
            )
            .first(),
        };
        Ok(relaxed.map(|e| e.timestamp))
    }

    /// Whether the task switched from `from_node` to `to_node` around `window`.
    ///
    /// The latest running time on `from_node` (looking back from the window) must
    /// precede the running time on `to_node`. With `ignore_multiple`, the latest
    /// running time on `to_node` is used, tolerating several switches; without
    /// it, the earliest one at or after the window start is used.
    pub fn assert_switch(
        &self,
        level: &str,
        from_node: &[u32],
        to_node: &[u32],
        window: Window,
        ignore_multiple: bool,
    ) -> Result<bool> {
        let from_index = self.topology.get_index(level, from_node)?;
        let to_index = self.topology.get_index(level, to_node)?;

        let agg = self.aggregator(Reducer::SwitchSeries);
        let level_result = agg.switches(self.topology, level, None)?;

        let from_time = self.relax_switch_window(&level_result[from_index], Direction::Left, window)?;
        let to_direction = if ignore_multiple {
            Direction::Left
        } else {
            Direction::Right
        };
        let to_time = self.relax_switch_window(&level_result[to_index], to_direction, window)?;

        Ok(matches!((from_time, to_time), (Some(from), Some(to)) if from < to))
    }

    /// Total running time of the task.
    ///
    /// With `percent`, the result is a percentage of the window length, or of
    /// the trace duration without a window.
    pub fn get_runtime(&self, window: Option<Window>, percent: bool) -> Result<f64> {
        let agg = self.aggregator(Reducer::ResidencySum);
        let run_time = self.total_runtime(&agg, window)?;

        if !percent {
            return Ok(run_time);
        }

        let total_time = match window {
            Some(w) => w.length(),
            None => self.trace.duration(),
        };
        if total_time <= 0.0 {
            return Err(SchedError::DegenerateMetric(format!(
                "{} has zero length, runtime percentage is undefined",
                describe_window(window)
            )));
        }
        Ok(run_time * 100.0 / total_time)
    }

    pub fn assert_runtime(
        &self,
        expected_value: f64,
        operator: impl Fn(f64, f64) -> bool,
        window: Option<Window>,
        percent: bool,
    ) -> Result<bool> {
        let run_time = self.get_runtime(window, percent)?;
        Ok(operator(run_time, expected_value))
    }

    /// Mean period of the task in milliseconds.
    pub fn get_period(&self, window: Option<Window>, align: Align) -> Result<f64> {
        let agg = self.aggregator(Reducer::Period(align));
        let (total, length) = agg
            .periods(self.topology, LEVEL_ALL, window)?
            .into_iter()
            .fold((0.0, 0usize), |(t, n), (dt, dn)| (t + dt, n + dn));

        if length == 0 {
            return Err(SchedError::DegenerateMetric(format!(
                "{} has fewer than two {:?}-aligned switches in {}",
                self.name,
                align,
                describe_window(window)
            )));
        }
        Ok(total * 1000.0 / length as f64)
    }

    pub fn assert_period(
        &self,
        expected_value: f64,
        operator: impl Fn(f64, f64) -> bool,
        window: Option<Window>,
        align: Align,
    ) -> Result<bool> {
        let period = self.get_period(window, align)?;
        Ok(operator(period, expected_value))
    }

    /// Percentage of the window the task spent running.
    pub fn get_duty_cycle(&self, window: Option<Window>) -> Result<f64> {
        self.get_runtime(window, true)
    }

    pub fn assert_duty_cycle(
        &self,
        expected_value: f64,
        operator: impl Fn(f64, f64) -> bool,
        window: Option<Window>,
    ) -> Result<bool> {
        self.assert_runtime(expected_value, operator, window, true)
    }

    /// CPU the task first ran on in `window`; `None` if it never ran there.
    pub fn get_first_cpu(&self, window: Option<Window>) -> Result<Option<u32>> {
        let agg = self.aggregator(Reducer::FirstTime(TaskState::Running));
        let result = agg.times(self.topology, LEVEL_CPU, window)?;

        let first = result
            .iter()
            .enumerate()
            .filter(|(_, t)| t.is_finite())
            .min_by(|(_, a), (_, b)| a.total_cmp(b));

        match first {
            None => Ok(None),
            Some((index, _)) => Ok(self.topology.get_node(LEVEL_CPU, index)?.first().copied()),
        }
    }

    /// Whether the first CPU in `window` is one of `cpus`.
    pub fn assert_first_cpu(&self, cpus: &[u32], window: Option<Window>) -> Result<bool> {
        let first_cpu = self.get_first_cpu(window)?;
        Ok(first_cpu.is_some_and(|cpu| cpus.contains(&cpu)))
    }

    /// Running spans per node of `level`, as plot events sorted by start time.
    ///
    /// Each event's lane is `start_id` plus the node index.
    pub fn generate_events(
        &self,
        level: &str,
        start_id: usize,
        window: Option<Window>,
    ) -> Result<Vec<PlotEvent>> {
        let agg = self.aggregator(Reducer::TraceEvent);
        let result = agg.intervals(self.topology, level, window)?;

        let mut events: Vec<PlotEvent> = result
            .iter()
            .enumerate()
            .flat_map(|(idx, ivs)| {
                ivs.iter().map(move |iv| PlotEvent {
                    start: iv.start,
                    end: iv.end,
                    lane: start_id + idx,
                })
            })
            .collect();
        events.sort_by(|a, b| a.start.total_cmp(&b.start).then_with(|| a.lane.cmp(&b.lane)));
        Ok(events)
    }

    /// Plot description for this task at `level`.
    ///
    /// The x range defaults to the window, or to the whole trace.
    pub fn plot(
        &self,
        level: &str,
        window: Option<Window>,
        xlim: Option<(f64, f64)>,
    ) -> Result<EventPlot> {
        let xlim = xlim.unwrap_or_else(|| match window {
            Some(w) => (w.start(), w.end()),
            None => (0.0, self.trace.duration()),
        });

        let mut events = BTreeMap::new();
        events.insert(self.name.clone(), self.generate_events(level, 0, window)?);

        Ok(EventPlot {
            events,
            names: vec![self.name.clone()],
            lane_prefix: format!("{}: ", level.to_uppercase()),
            num_lanes: self.topology.level_span(level)?,
            xlim,
        })
    }
}

fn resolve_task<T: TraceProvider + ?Sized>(
    trace: &T,
    execname: Option<&str>,
    pid: Option<u32>,
) -> Result<(u32, String)> {
    match (execname, pid) {
        (None, None) => Err(SchedError::Config(
            "need to specify at least one of pid or execname".to_string(),
        )),
        (Some(name), None) => {
            let pids = trace.pids_for_process(name);
            let mut iter = pids.iter();
            match (iter.next(), iter.next()) {
                (Some(&pid), None) => Ok((pid, name.to_string())),
                _ => Err(SchedError::Config(format!(
                    "there should be exactly one PID {:?} for {}",
                    pids, name
                ))),
            }
        }
        (Some(name), Some(pid)) => {
            if trace.pids_for_process(name).contains(&pid) {
                Ok((pid, name.to_string()))
            } else {
                Err(SchedError::Config(format!("PID {} not mapped to {}", pid, name)))
            }
        }
        (None, Some(pid)) => trace
            .task_name(pid)
            .map(|name| (pid, name))
            .ok_or_else(|| SchedError::Config(format!("PID {} not found in trace", pid))),
    }
}

fn describe_window(window: Option<Window>) -> String {
    match window {
        Some(w) => format!("window [{}, {}]", w.start(), w.end()),
        None => "the whole trace".to_string(),
    }
}
