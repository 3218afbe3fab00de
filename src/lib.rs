//! Assertions over scheduler traces.
//!
//! Given a parsed `sched_switch` trace and a CPU topology, [`SchedAssert`]
//! computes per-task scheduling metrics (residency, runtime, period, duty cycle,
//! first CPU, switch ordering) and compares them against caller expectations.

pub mod aggregate;
pub mod assert;
pub mod diagnostics;
pub mod error;
pub mod expect;
pub mod render;
pub mod topology;
pub mod trace;
pub mod window;

pub use aggregate::Align;
pub use assert::{Direction, SchedAssert};
pub use error::SchedError;
pub use topology::Topology;
pub use trace::{SchedTrace, TraceProvider};
pub use window::Window;

pub type Result<T> = anyhow::Result<T>;
