//! End-to-end checks: ftrace text in, metrics and assertions out.

use pretty_assertions::assert_eq;
use sched_assert::expect::{load_checks_file, run_checks};
use sched_assert::render::PlotEvent;
use sched_assert::topology::load_topology_file;
use sched_assert::trace::{parse_trace_file, parse_trace_str};
use sched_assert::{Align, SchedAssert, SchedError, SchedTrace, Topology, Window};

use std::fs;
use tempfile::tempdir;

const EPS: f64 = 1e-9;

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() <= EPS
}

fn switch_line(ts: f64, cpu: u32, prev: (&str, u32), next: (&str, u32)) -> String {
    format!(
        "{:>16}-{:<5} [{:03}] d..3 {:.6}: sched_switch: prev_comm={} prev_pid={} prev_prio=120 prev_state=S ==> next_comm={} next_pid={} next_prio=120",
        prev.0, prev.1, cpu, ts, prev.0, prev.1, next.0, next.1
    )
}

fn wakeup_line(ts: f64, cpu: u32) -> String {
    format!(
        "          <idle>-0     [{:03}] d.h4 {:.6}: sched_wakeup: comm=kworker pid=7 prio=120 target_cpu={:03}",
        cpu, ts, cpu
    )
}

const IDLE: (&str, u32) = ("swapper", 0);
const WORKER: (&str, u32) = ("worker", 100);

/// `worker` runs 4ms every 10ms: twice on the little cluster (cpu0), then three
/// times on the big cluster (cpu2, cpu3, cpu2). Two unrelated `foo` processes
/// share a name. The trace spans 50ms.
fn trace_text() -> String {
    let mut lines = vec![
        "# tracer: nop".to_string(),
        "#".to_string(),
        wakeup_line(1.000, 1),
    ];
    let runs = [(0.000, 0), (0.010, 0), (0.020, 2), (0.030, 3), (0.040, 2)];
    for (start, cpu) in runs {
        lines.push(switch_line(1.0 + start, cpu, IDLE, WORKER));
        lines.push(switch_line(1.0 + start + 0.004, cpu, WORKER, IDLE));
    }
    lines.push(switch_line(1.005, 1, IDLE, ("foo", 200)));
    lines.push(switch_line(1.006, 1, ("foo", 200), IDLE));
    lines.push(switch_line(1.007, 3, IDLE, ("foo", 201)));
    lines.push(switch_line(1.008, 3, ("foo", 201), IDLE));
    lines.push(wakeup_line(1.050, 1));
    lines.join("\n")
}

fn fixture() -> (SchedTrace, Topology) {
    let trace = parse_trace_str(&trace_text(), "fixture").unwrap();
    let topology = Topology::from_clusters(&[vec![0, 1], vec![2, 3]]);
    (trace, topology)
}

fn w(start: f64, end: f64) -> Option<Window> {
    Some(Window::new(start, end).unwrap())
}

#[test]
fn runtime_residency_and_duty_cycle() {
    let (trace, topology) = fixture();
    let s = SchedAssert::new(&trace, &topology, Some("worker"), None).unwrap();

    assert!(approx(s.get_runtime(None, false).unwrap(), 0.020));
    assert!(approx(s.get_runtime(None, true).unwrap(), 40.0));
    assert!(approx(s.get_residency("cluster", &[0, 1], None, false).unwrap(), 0.008));
    assert!(approx(s.get_residency("cluster", &[2, 3], None, true).unwrap(), 60.0));
    assert!(approx(s.get_residency("cpu", &[2], None, false).unwrap(), 0.008));
    assert!(approx(s.get_duty_cycle(w(0.0, 0.050)).unwrap(), 40.0));
    assert!(s
        .assert_residency("cluster", &[2, 3], 50.0, |a, b| a > b, None, true)
        .unwrap());
}

#[test]
fn residency_sums_to_runtime_across_a_partition() {
    let (trace, topology) = fixture();
    let s = SchedAssert::new(&trace, &topology, None, Some(100)).unwrap();

    for window in [None, w(0.002, 0.033), w(0.0135, 0.0145), w(0.045, 0.050)] {
        let runtime = s.get_runtime(window, false).unwrap();
        for level in ["cluster", "cpu"] {
            let total: f64 = topology
                .get_level(level)
                .unwrap()
                .iter()
                .map(|node| s.get_residency(level, node, window, false).unwrap())
                .sum();
            assert!(approx(total, runtime), "{} {:?}: {} vs {}", level, window, total, runtime);
        }
        let on_all = s.get_residency("all", &[0, 1, 2, 3], window, false).unwrap();
        assert!(approx(on_all, runtime));
        assert!(s.get_residency("cpu", &[0], window, false).unwrap() <= runtime + EPS);
    }
}

#[test]
fn widening_a_window_never_decreases_residency() {
    let (trace, topology) = fixture();
    let s = SchedAssert::new(&trace, &topology, Some("worker"), None).unwrap();

    let nested = [w(0.021, 0.022), w(0.015, 0.025), w(0.005, 0.035), w(0.0, 0.05), None];
    let mut prev_runtime = 0.0;
    let mut prev_big = 0.0;
    for window in nested {
        let runtime = s.get_runtime(window, false).unwrap();
        let big = s.get_residency("cluster", &[2, 3], window, false).unwrap();
        assert!(runtime + EPS >= prev_runtime);
        assert!(big + EPS >= prev_big);
        prev_runtime = runtime;
        prev_big = big;
    }
}

#[test]
fn getters_are_idempotent() {
    let (trace, topology) = fixture();
    let s = SchedAssert::new(&trace, &topology, Some("worker"), None).unwrap();

    let window = w(0.003, 0.027);
    assert_eq!(
        s.get_residency("cluster", &[0, 1], window, true).unwrap(),
        s.get_residency("cluster", &[0, 1], window, true).unwrap()
    );
    assert_eq!(s.get_period(None, Align::Start).unwrap(), s.get_period(None, Align::Start).unwrap());
    assert_eq!(
        s.generate_events("cpu", 0, window).unwrap(),
        s.generate_events("cpu", 0, window).unwrap()
    );
}

#[test]
fn period_and_placement() {
    let (trace, topology) = fixture();
    let s = SchedAssert::new(&trace, &topology, Some("worker"), None).unwrap();

    assert!(approx(s.get_period(None, Align::Start).unwrap(), 10.0));
    assert!(approx(s.get_period(None, Align::End).unwrap(), 10.0));
    assert!(s.assert_period(12.0, |a, b| a < b, w(0.0, 0.05), Align::Start).unwrap());
    assert!(matches!(
        s.get_period(w(0.001, 0.009), Align::Start),
        Err(SchedError::DegenerateMetric(_))
    ));

    assert_eq!(s.get_first_cpu(None).unwrap(), Some(0));
    assert_eq!(s.get_first_cpu(w(0.015, 0.05)).unwrap(), Some(2));
    assert!(approx(s.get_start_time().unwrap(), 0.0));
    assert!(approx(s.get_end_time().unwrap(), 0.040));
}

#[test]
fn switch_between_clusters() {
    let (trace, topology) = fixture();
    let s = SchedAssert::new(&trace, &topology, Some("worker"), None).unwrap();
    let window = Window::new(0.012, 0.022).unwrap();

    assert!(s.assert_switch("cluster", &[0, 1], &[2, 3], window, true).unwrap());
    assert!(s.assert_switch("cluster", &[0, 1], &[2, 3], window, false).unwrap());
    assert!(!s.assert_switch("cluster", &[2, 3], &[0, 1], window, true).unwrap());
    // Never runs on cpu1.
    assert!(!s.assert_switch("cpu", &[0], &[1], window, true).unwrap());
    assert!(matches!(
        s.assert_switch("cpu", &[0], &[9], window, true),
        Err(SchedError::UnknownNode { .. })
    ));
}

#[test]
fn shared_execname_needs_a_pid() {
    let (trace, topology) = fixture();
    assert!(matches!(
        SchedAssert::new(&trace, &topology, Some("foo"), None),
        Err(SchedError::Config(_))
    ));

    let foo = SchedAssert::new(&trace, &topology, Some("foo"), Some(201)).unwrap();
    assert_eq!(foo.get_first_cpu(None).unwrap(), Some(3));
    assert!(!foo.assert_first_cpu(&[0, 1], None).unwrap());
}

#[test]
fn events_are_sorted_across_lanes() {
    let (trace, topology) = fixture();
    let s = SchedAssert::new(&trace, &topology, Some("worker"), None).unwrap();

    let lanes: Vec<usize> = s
        .generate_events("cluster", 0, None)
        .unwrap()
        .iter()
        .map(|e: &PlotEvent| e.lane)
        .collect();
    assert_eq!(lanes, vec![0, 0, 1, 1, 1]);

    let plot = s.plot("cpu", w(0.01, 0.031), None).unwrap();
    assert_eq!(plot.names, vec!["worker-100".to_string()]);
    assert_eq!(plot.events["worker-100"].len(), 3);
    assert_eq!(plot.num_lanes, 4);
}

#[test]
fn file_inputs_and_checks_run_end_to_end() {
    let dir = tempdir().unwrap();
    let trace_path = dir.path().join("trace.txt");
    let topology_path = dir.path().join("topology.json");
    let checks_path = dir.path().join("checks.json");

    fs::write(&trace_path, trace_text()).unwrap();
    fs::write(&topology_path, r#"{"clusters": [[0, 1], [2, 3]]}"#).unwrap();
    fs::write(
        &checks_path,
        r#"{"checks": [
            {"metric": "runtime", "op": "approx", "expected": 0.02, "tolerance": 1e-9},
            {"metric": "residency", "level": "cluster", "node": [2, 3], "percent": true, "op": "ge", "expected": 59.9},
            {"metric": "period", "op": "approx", "expected": 10, "tolerance": 1e-6},
            {"metric": "duty_cycle", "window": [0, 0.05], "op": "approx", "expected": 40, "tolerance": 1e-6},
            {"metric": "first_cpu", "cpus": [0, 1]},
            {"metric": "switch", "level": "cluster", "from": [0, 1], "to": [2, 3], "window": [0.012, 0.022]}
        ]}"#,
    )
    .unwrap();

    let trace = parse_trace_file(trace_path.to_str().unwrap()).unwrap();
    let topology = load_topology_file(topology_path.to_str().unwrap()).unwrap();
    let checks = load_checks_file(checks_path.to_str().unwrap()).unwrap();

    let s = SchedAssert::new(&trace, &topology, Some("worker"), None).unwrap();
    let outcomes = run_checks(&checks, &s);
    let failed: Vec<_> = outcomes.iter().filter(|o| !o.passed).collect();
    assert!(failed.is_empty(), "{:#?}", failed);
    assert_eq!(outcomes.len(), 6);
}

#[test]
fn metric_errors_fail_checks_without_aborting() {
    let dir = tempdir().unwrap();
    let checks_path = dir.path().join("checks.json");
    fs::write(
        &checks_path,
        r#"{"checks": [
            {"metric": "residency", "level": "cpu", "node": [1], "percent": true, "window": [0.005, 0.009], "op": "eq", "expected": 0},
            {"metric": "runtime", "op": "gt", "expected": 0}
        ]}"#,
    )
    .unwrap();

    let (trace, topology) = fixture();
    let s = SchedAssert::new(&trace, &topology, Some("worker"), None).unwrap();
    let outcomes = run_checks(&load_checks_file(checks_path.to_str().unwrap()).unwrap(), &s);

    assert!(!outcomes[0].passed);
    assert!(outcomes[0].detail.contains("degenerate metric"));
    assert!(outcomes[1].passed);
}
