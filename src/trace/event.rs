use serde::Serialize;
use std::fmt;

/// A decoded `sched_switch` record.
///
/// `timestamp` is in seconds relative to the first event of the trace.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchedSwitch {
    pub timestamp: f64,
    pub cpu: u32,
    pub prev_comm: String,
    pub prev_pid: u32,
    pub prev_state: String,
    pub next_comm: String,
    pub next_pid: u32,
}

/// Whether a task is on a CPU after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    // Declared first so that, at equal timestamps, switch-outs sort first.
    NotRunning,
    Running,
}

impl TaskState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotRunning => "not_running",
            Self::Running => "running",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One switch of the task under study, in or out of `cpu`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TaskEvent {
    pub timestamp: f64,
    pub cpu: u32,
    pub state: TaskState,
}

impl TaskEvent {
    pub fn new(timestamp: f64, cpu: u32, state: TaskState) -> Self {
        Self {
            timestamp,
            cpu,
            state,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state == TaskState::Running
    }
}
