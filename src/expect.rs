//! Expectations file (checks.json): assertions evaluated against one task.
//!
//! JSON shape:
//! {
//!   "checks": [
//!     { "metric": "residency", "level": "cluster", "node": [0, 1],
//!       "percent": true, "op": "ge", "expected": 90.0 },
//!     { "metric": "runtime", "window": [0.0, 2.5], "op": "approx",
//!       "expected": 1.2, "tolerance": 0.01 },
//!     { "metric": "period", "align": "start", "op": "le", "expected": 16.7 },
//!     { "metric": "duty_cycle", "window": [0.0, 1.0], "op": "gt", "expected": 40 },
//!     { "metric": "first_cpu", "cpus": [0, 1] },
//!     { "metric": "switch", "level": "cpu", "from": [0], "to": [2],
//!       "window": [4.0, 11.0], "ignore_multiple": false }
//!   ]
//! }
//!
//! Raw rows are validated into typed [`Check`]s up front, so a bad file fails
//! before any metric is computed.

use crate::Result;
use crate::aggregate::Align;
use crate::assert::SchedAssert;
use crate::diagnostics;
use crate::trace::TraceProvider;
use crate::window::Window;

use anyhow::{Context, anyhow, bail};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;

const DEFAULT_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Deserialize)]
pub struct ChecksSpec {
    #[serde(default)]
    pub checks: Vec<RawCheck>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Residency,
    Runtime,
    Period,
    DutyCycle,
    FirstCpu,
    Switch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Op {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Approx,
}

/// Raw check row as it appears in checks.json.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawCheck {
    pub metric: Metric,

    #[serde(default)]
    pub level: Option<String>,

    #[serde(default)]
    pub node: Option<Vec<u32>>,

    #[serde(default)]
    pub from: Option<Vec<u32>>,

    #[serde(default)]
    pub to: Option<Vec<u32>>,

    #[serde(default)]
    pub cpus: Option<Vec<u32>>,

    #[serde(default)]
    pub window: Option<[f64; 2]>,

    #[serde(default)]
    pub percent: bool,

    #[serde(default)]
    pub align: Option<String>,

    #[serde(default)]
    pub ignore_multiple: Option<bool>,

    #[serde(default)]
    pub op: Option<Op>,

    #[serde(default)]
    pub expected: Option<f64>,

    #[serde(default)]
    pub tolerance: Option<f64>,
}

/// Binary comparison between an observed metric and its expected value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Comparison {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Approx { tolerance: f64 },
}

impl Comparison {
    pub fn apply(self, observed: f64, expected: f64) -> bool {
        match self {
            Self::Lt => observed < expected,
            Self::Le => observed <= expected,
            Self::Gt => observed > expected,
            Self::Ge => observed >= expected,
            Self::Eq => observed == expected,
            Self::Approx { tolerance } => (observed - expected).abs() <= tolerance,
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lt => f.write_str("<"),
            Self::Le => f.write_str("<="),
            Self::Gt => f.write_str(">"),
            Self::Ge => f.write_str(">="),
            Self::Eq => f.write_str("=="),
            Self::Approx { tolerance } => write!(f, "~= (±{})", tolerance),
        }
    }
}

/// A validated expectation.
#[derive(Debug, Clone, PartialEq)]
pub enum Check {
    Residency {
        level: String,
        node: Vec<u32>,
        window: Option<Window>,
        percent: bool,
        cmp: Comparison,
        expected: f64,
    },
    Runtime {
        window: Option<Window>,
        percent: bool,
        cmp: Comparison,
        expected: f64,
    },
    Period {
        window: Option<Window>,
        align: Align,
        cmp: Comparison,
        expected: f64,
    },
    DutyCycle {
        window: Option<Window>,
        cmp: Comparison,
        expected: f64,
    },
    FirstCpu {
        cpus: Vec<u32>,
        window: Option<Window>,
    },
    Switch {
        level: String,
        from: Vec<u32>,
        to: Vec<u32>,
        window: Window,
        ignore_multiple: bool,
    },
}

/// Result of evaluating one check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckOutcome {
    pub index: usize,
    pub description: String,
    pub passed: bool,
    /// Observed metric, or the error that prevented computing it.
    pub detail: String,
}

impl ChecksSpec {
    /// Validate every row; errors name the offending check index.
    pub fn validate_and_build(&self) -> Result<Vec<Check>> {
        if self.checks.is_empty() {
            bail!(
                "{}",
                diagnostics::error_message("checks.json contained no checks")
            );
        }
        self.checks
            .iter()
            .enumerate()
            .map(|(i, raw)| {
                raw.validate().with_context(|| {
                    diagnostics::error_message(format!("invalid check #{} ({:?})", i, raw.metric))
                })
            })
            .collect()
    }
}

impl RawCheck {
    fn validate(&self) -> Result<Check> {
        let window = self
            .window
            .map(|[s, e]| Window::new(s, e))
            .transpose()?;

        let check = match self.metric {
            Metric::Residency => Check::Residency {
                level: required(&self.level, "level")?,
                node: required(&self.node, "node")?,
                window,
                percent: self.percent,
                cmp: self.comparison()?,
                expected: required(&self.expected, "expected")?,
            },
            Metric::Runtime => Check::Runtime {
                window,
                percent: self.percent,
                cmp: self.comparison()?,
                expected: required(&self.expected, "expected")?,
            },
            Metric::Period => Check::Period {
                window,
                align: match &self.align {
                    Some(a) => a.parse()?,
                    None => Align::default(),
                },
                cmp: self.comparison()?,
                expected: required(&self.expected, "expected")?,
            },
            Metric::DutyCycle => Check::DutyCycle {
                window,
                cmp: self.comparison()?,
                expected: required(&self.expected, "expected")?,
            },
            Metric::FirstCpu => Check::FirstCpu {
                cpus: required(&self.cpus, "cpus")?,
                window,
            },
            Metric::Switch => Check::Switch {
                level: required(&self.level, "level")?,
                from: required(&self.from, "from")?,
                to: required(&self.to, "to")?,
                window: window.ok_or_else(|| anyhow!("switch checks need a window"))?,
                ignore_multiple: self.ignore_multiple.unwrap_or(true),
            },
        };
        Ok(check)
    }

    fn comparison(&self) -> Result<Comparison> {
        let op = required(&self.op, "op")?;
        if self.tolerance.is_some() && op != Op::Approx {
            bail!("tolerance only applies to op \"approx\"");
        }
        Ok(match op {
            Op::Lt => Comparison::Lt,
            Op::Le => Comparison::Le,
            Op::Gt => Comparison::Gt,
            Op::Ge => Comparison::Ge,
            Op::Eq => Comparison::Eq,
            Op::Approx => Comparison::Approx {
                tolerance: self.tolerance.unwrap_or(DEFAULT_TOLERANCE),
            },
        })
    }
}

fn required<T: Clone>(value: &Option<T>, field: &str) -> Result<T> {
    value
        .clone()
        .ok_or_else(|| anyhow!("missing field \"{}\"", field))
}

/// Read and validate a checks.json file.
pub fn load_checks_file(path: &str) -> Result<Vec<Check>> {
    let text = fs::read_to_string(path)
        .with_context(|| diagnostics::error_message(format!("read checks file {}", path)))?;
    let spec: ChecksSpec = serde_json::from_str(&text)
        .with_context(|| diagnostics::error_message(format!("parse checks file {}", path)))?;
    spec.validate_and_build()
}

impl Check {
    pub fn describe(&self) -> String {
        match self {
            Check::Residency {
                level,
                node,
                window,
                percent,
                cmp,
                expected,
            } => format!(
                "residency {}{:?}{}{} {} {}",
                level,
                node,
                window_suffix(*window),
                if *percent { " %" } else { "" },
                cmp,
                expected
            ),
            Check::Runtime {
                window,
                percent,
                cmp,
                expected,
            } => format!(
                "runtime{}{} {} {}",
                window_suffix(*window),
                if *percent { " %" } else { "" },
                cmp,
                expected
            ),
            Check::Period {
                window,
                align,
                cmp,
                expected,
            } => format!(
                "period ({:?}){} {} {} ms",
                align,
                window_suffix(*window),
                cmp,
                expected
            ),
            Check::DutyCycle {
                window,
                cmp,
                expected,
            } => format!("duty cycle{} {} {} %", window_suffix(*window), cmp, expected),
            Check::FirstCpu { cpus, window } => {
                format!("first cpu{} in {:?}", window_suffix(*window), cpus)
            }
            Check::Switch {
                level,
                from,
                to,
                window,
                ignore_multiple,
            } => format!(
                "switch {}{:?} -> {}{:?}{}{}",
                level,
                from,
                level,
                to,
                window_suffix(Some(*window)),
                if *ignore_multiple { "" } else { " (single)" }
            ),
        }
    }

    /// Evaluate against `sched`, computing the metric once.
    ///
    /// Metric errors fail the check instead of aborting.
    pub fn evaluate<T: TraceProvider + ?Sized>(
        &self,
        index: usize,
        sched: &SchedAssert<'_, T>,
    ) -> CheckOutcome {
        let verdict: crate::error::Result<(bool, String)> = (|| match self {
            Check::Residency {
                level,
                node,
                window,
                percent,
                cmp,
                expected,
            } => {
                let observed = sched.get_residency(level, node, *window, *percent)?;
                Ok((cmp.apply(observed, *expected), format!("observed {}", observed)))
            }
            Check::Runtime {
                window,
                percent,
                cmp,
                expected,
            } => {
                let observed = sched.get_runtime(*window, *percent)?;
                Ok((cmp.apply(observed, *expected), format!("observed {}", observed)))
            }
            Check::Period {
                window,
                align,
                cmp,
                expected,
            } => {
                let observed = sched.get_period(*window, *align)?;
                Ok((cmp.apply(observed, *expected), format!("observed {} ms", observed)))
            }
            Check::DutyCycle {
                window,
                cmp,
                expected,
            } => {
                let observed = sched.get_duty_cycle(*window)?;
                Ok((cmp.apply(observed, *expected), format!("observed {} %", observed)))
            }
            Check::FirstCpu { cpus, window } => {
                Ok(match sched.get_first_cpu(*window)? {
                    Some(cpu) => (cpus.contains(&cpu), format!("observed cpu {}", cpu)),
                    None => (false, "task never ran".to_string()),
                })
            }
            Check::Switch {
                level,
                from,
                to,
                window,
                ignore_multiple,
            } => {
                let passed = sched.assert_switch(level, from, to, *window, *ignore_multiple)?;
                let detail = if passed { "switch found" } else { "no such switch" };
                Ok((passed, detail.to_string()))
            }
        })();

        let (passed, detail) = verdict.unwrap_or_else(|err| (false, err.to_string()));
        CheckOutcome {
            index,
            description: self.describe(),
            passed,
            detail,
        }
    }
}

fn window_suffix(window: Option<Window>) -> String {
    match window {
        Some(w) => format!(" in [{}, {}]", w.start(), w.end()),
        None => String::new(),
    }
}

/// Evaluate every check in order.
pub fn run_checks<T: TraceProvider + ?Sized>(
    checks: &[Check],
    sched: &SchedAssert<'_, T>,
) -> Vec<CheckOutcome> {
    checks
        .iter()
        .enumerate()
        .map(|(i, check)| check.evaluate(i, sched))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(json: &str) -> Result<Vec<Check>> {
        let spec: ChecksSpec = serde_json::from_str(json)?;
        spec.validate_and_build()
    }

    #[test]
    fn comparisons() {
        assert!(Comparison::Ge.apply(2.0, 2.0));
        assert!(!Comparison::Lt.apply(2.0, 2.0));
        assert!(Comparison::Approx { tolerance: 0.1 }.apply(1.05, 1.0));
        assert!(!Comparison::Approx { tolerance: 0.01 }.apply(1.05, 1.0));
    }

    #[test]
    fn builds_typed_checks_with_defaults() {
        let checks = parse(
            r#"{"checks": [
                {"metric": "period", "op": "approx", "expected": 10000},
                {"metric": "switch", "level": "cpu", "from": [0], "to": [2], "window": [4, 11]}
            ]}"#,
        )
        .unwrap();

        assert_eq!(
            checks,
            vec![
                Check::Period {
                    window: None,
                    align: Align::Start,
                    cmp: Comparison::Approx {
                        tolerance: DEFAULT_TOLERANCE
                    },
                    expected: 10000.0,
                },
                Check::Switch {
                    level: "cpu".into(),
                    from: vec![0],
                    to: vec![2],
                    window: Window::new(4.0, 11.0).unwrap(),
                    ignore_multiple: true,
                },
            ]
        );
    }

    #[test]
    fn outcomes_report_the_observed_metric() {
        use crate::topology::Topology;
        use crate::trace::SchedTrace;
        use crate::trace::tests::switch;

        let idle = ("swapper", 0);
        let foo = ("foo", 42);
        let trace = SchedTrace::new(
            vec![
                switch(0.0, 1, idle, foo),
                switch(5.0, 1, foo, idle),
                switch(10.0, 2, idle, foo),
                switch(15.0, 2, foo, idle),
            ],
            20.0,
        );
        let topology = Topology::from_clusters(&[vec![0, 1], vec![2, 3]]);
        let sched = SchedAssert::new(&trace, &topology, Some("foo"), None).unwrap();

        let checks = parse(
            r#"{"checks": [
                {"metric": "runtime", "op": "eq", "expected": 10},
                {"metric": "residency", "level": "cpu", "node": [2], "percent": true, "op": "lt", "expected": 50},
                {"metric": "period", "op": "approx", "expected": 10000},
                {"metric": "first_cpu", "cpus": [0, 1]},
                {"metric": "first_cpu", "cpus": [0], "window": [16, 20]}
            ]}"#,
        )
        .unwrap();
        let outcomes = run_checks(&checks, &sched);

        let summary: Vec<(bool, &str)> = outcomes
            .iter()
            .map(|o| (o.passed, o.detail.as_str()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (true, "observed 10"),
                (false, "observed 50"),
                (true, "observed 10000 ms"),
                (true, "observed cpu 1"),
                (false, "task never ran"),
            ]
        );
    }

    #[test]
    fn rejects_incomplete_rows() {
        let err = parse(r#"{"checks": [{"metric": "runtime", "op": "gt"}]}"#).unwrap_err();
        assert!(format!("{:#}", err).contains("missing field \"expected\""));

        assert!(parse(r#"{"checks": [{"metric": "switch", "level": "cpu", "from": [0], "to": [1]}]}"#).is_err());
        assert!(parse(r#"{"checks": [{"metric": "runtime", "op": "gt", "expected": 1, "window": [5, 1]}]}"#).is_err());
        assert!(parse(r#"{"checks": [{"metric": "runtime", "op": "gt", "expected": 1, "tolerance": 0.1}]}"#).is_err());
        assert!(parse(r#"{"checks": []}"#).is_err());
    }
}
