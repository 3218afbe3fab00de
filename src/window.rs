//! Time windows and series selection.

use crate::error::{Result, SchedError};
use crate::trace::TaskEvent;

use serde::Serialize;
use std::str::FromStr;

/// An inclusive `[start, end]` time range in trace seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Window {
    start: f64,
    end: f64,
}

impl Window {
    pub fn new(start: f64, end: f64) -> Result<Self> {
        if start.is_nan() || end.is_nan() || start > end {
            return Err(SchedError::InvalidArgument(format!(
                "window start {} must not exceed end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// Build a window without checking bounds. A crossed window selects nothing.
    pub(crate) fn unchecked(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    pub fn start(&self) -> f64 {
        self.start
    }

    pub fn end(&self) -> f64 {
        self.end
    }

    pub fn contains(&self, t: f64) -> bool {
        t >= self.start && t <= self.end
    }

    pub fn length(&self) -> f64 {
        self.end - self.start
    }

    /// Hashable identity for result caches.
    pub(crate) fn key(&self) -> (u64, u64) {
        (self.start.to_bits(), self.end.to_bits())
    }
}

impl TryFrom<(f64, f64)> for Window {
    type Error = SchedError;

    fn try_from((start, end): (f64, f64)) -> Result<Self> {
        Self::new(start, end)
    }
}

/// Parses "start,end", e.g. "4.0,11".
impl FromStr for Window {
    type Err = SchedError;

    fn from_str(s: &str) -> Result<Self> {
        let bad = || SchedError::InvalidArgument(format!("window must be START,END: {:?}", s));
        let (start, end) = s.split_once(',').ok_or_else(bad)?;
        let start: f64 = start.trim().parse().map_err(|_| bad())?;
        let end: f64 = end.trim().parse().map_err(|_| bad())?;
        Self::new(start, end)
    }
}

/// Events of `series` with timestamps inside `window`, in their original order.
/// Without a window the series is returned whole.
pub fn select_window(series: &[TaskEvent], window: Option<Window>) -> &[TaskEvent] {
    let Some(w) = window else {
        return series;
    };
    // Series are sorted by timestamp, so the selection is one contiguous run.
    let lo = series.partition_point(|e| e.timestamp < w.start);
    let hi = series.partition_point(|e| e.timestamp <= w.end);
    if lo >= hi { &series[..0] } else { &series[lo..hi] }
}
