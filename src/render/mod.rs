//! Event plot description and HTML rendering.

pub mod html;

pub use html::render_event_plot;

use serde::Serialize;
use std::collections::BTreeMap;

/// One running span drawn in a lane.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PlotEvent {
    pub start: f64,
    pub end: f64,
    pub lane: usize,
}

/// Everything needed to draw a lane plot of one or more tasks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventPlot {
    /// Events per series name, each sorted by start time.
    pub events: BTreeMap<String, Vec<PlotEvent>>,
    /// Series names in legend order.
    pub names: Vec<String>,
    /// Lane label prefix, e.g. "CPU: ".
    pub lane_prefix: String,
    pub num_lanes: usize,
    /// Visible x range in trace seconds.
    pub xlim: (f64, f64),
}
