//! Parsing for ftrace text output (`trace-cmd report`, tracefs `trace`).

use crate::Result;
use crate::diagnostics;
use crate::trace::{SchedSwitch, SchedTrace};

use anyhow::{Context, anyhow, bail};
use regex::Regex;
use std::fs;

/// Parse an ftrace text file into a [`SchedTrace`].
pub fn parse_trace_file(path: &str) -> Result<SchedTrace> {
    let text = fs::read_to_string(path)
        .with_context(|| diagnostics::error_message(format!("read trace file {}", path)))?;
    parse_trace_str(&text, path)
}

/// Parse ftrace text. `origin` names the source in error messages.
///
/// Expected line shape:
/// <comm>-<pid> [<cpu>] <flags> <timestamp>: <event>: <payload>
///
/// Example:
/// foo-1234  [002] d..3  2287.472360: sched_switch: prev_comm=foo prev_pid=1234 prev_prio=120 prev_state=S ==> next_comm=swapper/2 next_pid=0 next_prio=120
///
/// The flags column and the trace-cmd `(tgid)` column are optional. Every event
/// line extends the trace time range; only sched_switch payloads are decoded.
/// Timestamps are shifted so the first event of any kind lands at 0.
pub fn parse_trace_str(text: &str, origin: &str) -> Result<SchedTrace> {
    // 1) comm (may contain spaces and '-'), 2) pid, 3) cpu, 4) timestamp,
    // 5) event name, 6) payload
    const EVENT_LINE_RE: &str = r#"^\s*(.+)-(\d+)\s+(?:\(\s*[\d-]+\)\s+)?\[(\d+)\]\s+(?:[^\s:]+\s+)?(\d+(?:\.\d+)?):\s+([\w:]+):\s*(.*?)\s*$"#;
    const SWITCH_RE: &str = r#"^prev_comm=(.*?) prev_pid=(\d+) prev_prio=-?\d+ prev_state=(\S+) ==> next_comm=(.*?) next_pid=(\d+) next_prio=-?\d+$"#;
    let line_re = Regex::new(EVENT_LINE_RE)?;
    let switch_re = Regex::new(SWITCH_RE)?;

    let mut first_ts: Option<f64> = None;
    let mut last_ts = 0.0f64;
    let mut skipped = 0usize;
    let mut switches: Vec<SchedSwitch> = Vec::new();

    for (lineno, line) in text.lines().enumerate() {
        let lno = lineno + 1;
        let line = line.trim_end();

        if line.trim().is_empty() || line.trim_start().starts_with('#') {
            continue;
        }

        // trace-cmd headers ("cpus=4", "CPU 3 is empty") carry no events.
        let caps = match line_re.captures(line) {
            Some(c) => c,
            None => {
                skipped += 1;
                continue;
            }
        };

        macro_rules! field {
            ($caps:expr, $idx:expr, $field:literal) => {
                $caps
                    .get($idx)
                    .ok_or_else(|| {
                        anyhow!(diagnostics::error_message(format!(
                            "trace parse error at {}:{}: missing {}",
                            origin, lno, $field
                        )))
                    })?
                    .as_str()
            };
        }

        let timestamp: f64 = field!(caps, 4, "timestamp").parse().with_context(|| {
            diagnostics::error_message(format!("bad timestamp at {}:{}", origin, lno))
        })?;
        first_ts = Some(first_ts.map_or(timestamp, |f| f.min(timestamp)));
        last_ts = last_ts.max(timestamp);

        if field!(caps, 5, "event name") != "sched_switch" {
            continue;
        }

        let cpu: u32 = field!(caps, 3, "cpu").parse()?;
        let payload = field!(caps, 6, "payload");
        let sw = match switch_re.captures(payload) {
            Some(c) => c,
            None => {
                bail!(
                    "{}",
                    diagnostics::error_message(format!(
                        "trace parse error at {}:{}: cannot parse sched_switch payload: {:?}",
                        origin, lno, payload
                    ))
                );
            }
        };

        switches.push(SchedSwitch {
            timestamp,
            cpu,
            prev_comm: field!(sw, 1, "prev_comm").to_string(),
            prev_pid: field!(sw, 2, "prev_pid").parse()?,
            prev_state: field!(sw, 3, "prev_state").to_string(),
            next_comm: field!(sw, 4, "next_comm").to_string(),
            next_pid: field!(sw, 5, "next_pid").parse()?,
        });
    }

    if switches.is_empty() {
        bail!(
            "{}",
            diagnostics::error_message(format!("no sched_switch events found in {}", origin))
        );
    }
    if skipped > 0 {
        tracing::debug!(origin, skipped, "skipped non-event lines");
    }

    let base = first_ts.unwrap_or(0.0);
    for s in &mut switches {
        s.timestamp -= base;
    }

    Ok(SchedTrace::new(switches, last_ts - base))
}
