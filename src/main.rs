use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use tracing_subscriber::{EnvFilter, fmt};

use sched_assert::{
    Align, Result, SchedAssert, SchedError, SchedTrace, Topology, TraceProvider, Window, diagnostics,
};
use sched_assert::{expect, render, topology, trace};

#[derive(Parser)]
#[command(name = "sched-assert")]
#[command(about = "Scheduler trace assertions", long_about = None)]
struct Cli {
    /// Logging verbosity level (trace, debug, info, warn, error).
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,

    #[command(subcommand)]
    cmd: Commands,
}

/// Inputs shared by every command: the trace, the topology and the task.
#[derive(Args)]
struct TaskArgs {
    /// ftrace text output containing sched_switch events.
    #[arg(long)]
    trace: String,

    /// topology.json describing CPU levels.
    #[arg(long)]
    topology: String,

    #[arg(long)]
    pid: Option<u32>,

    #[arg(long)]
    execname: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a JSON report of the task's scheduling metrics.
    Report {
        #[command(flatten)]
        task: TaskArgs,

        /// Restrict metrics to START,END (seconds from trace start).
        #[arg(long)]
        window: Option<Window>,

        /// Level to break residency down by.
        #[arg(long, default_value = "cpu")]
        level: String,
    },
    /// Evaluate a checks.json file; fails if any check fails.
    Check {
        #[command(flatten)]
        task: TaskArgs,

        #[arg(long)]
        checks: String,
    },
    /// Print the task's running spans per node as JSON.
    Events {
        #[command(flatten)]
        task: TaskArgs,

        #[arg(long, default_value = "cpu")]
        level: String,

        #[arg(long)]
        window: Option<Window>,
    },
    /// Write an HTML lane plot of the task.
    Plot {
        #[command(flatten)]
        task: TaskArgs,

        #[arg(long, default_value = "cpu")]
        level: String,

        #[arg(long)]
        window: Option<Window>,

        #[arg(short = 'o', long)]
        out: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level)
        .with_context(|| format!("invalid log level: {}", cli.log_level))?;
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.cmd {
        Commands::Report {
            task,
            window,
            level,
        } => {
            let (trace, topology) = load_inputs(&task)?;
            let sched = bind_task(&trace, &topology, &task)?;
            let report = build_report(&sched, &level, window)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Check { task, checks } => {
            // 1) Parse + validate checks.json before touching the trace.
            let checks = expect::load_checks_file(&checks)?;

            // 2) Load inputs and bind the task.
            let (trace, topology) = load_inputs(&task)?;
            let sched = bind_task(&trace, &topology, &task)?;

            // 3) Evaluate.
            let outcomes = expect::run_checks(&checks, &sched);
            for o in &outcomes {
                println!(
                    "{} #{} {} ({})",
                    if o.passed { "PASS" } else { "FAIL" },
                    o.index,
                    o.description,
                    o.detail
                );
            }

            let failed = outcomes.iter().filter(|o| !o.passed).count();
            if failed > 0 {
                bail!(
                    "{}",
                    diagnostics::error_message(format!(
                        "{} of {} checks failed for {}",
                        failed,
                        outcomes.len(),
                        sched.name()
                    ))
                );
            }
            println!("all {} checks passed for {}", outcomes.len(), sched.name());
        }
        Commands::Events {
            task,
            level,
            window,
        } => {
            let (trace, topology) = load_inputs(&task)?;
            let sched = bind_task(&trace, &topology, &task)?;
            let events = sched.generate_events(&level, 0, window)?;
            println!("{}", serde_json::to_string_pretty(&events)?);
        }
        Commands::Plot {
            task,
            level,
            window,
            out,
        } => {
            let (trace, topology) = load_inputs(&task)?;
            let sched = bind_task(&trace, &topology, &task)?;
            let plot = sched.plot(&level, window, None)?;
            let html = render::render_event_plot(&plot)?;
            std::fs::write(&out, html)
                .with_context(|| diagnostics::error_message(format!("write {}", out)))?;
            println!("Wrote {}", out);
        }
    }

    Ok(())
}

fn load_inputs(task: &TaskArgs) -> Result<(SchedTrace, Topology)> {
    let trace = trace::parse_trace_file(&task.trace)?;
    let topology = topology::load_topology_file(&task.topology)?;

    let known = topology.cpus();
    let unknown: Vec<u32> = trace.cpus().difference(&known).copied().collect();
    if !unknown.is_empty() {
        diagnostics::warn(format!(
            "trace has events on cpus {:?} that are not in the topology; they are ignored",
            unknown
        ));
    }

    tracing::info!(
        switches = trace.len(),
        duration = trace.duration(),
        "loaded trace"
    );
    Ok((trace, topology))
}

fn bind_task<'a>(
    trace: &'a SchedTrace,
    topology: &'a Topology,
    task: &TaskArgs,
) -> Result<SchedAssert<'a, SchedTrace>> {
    SchedAssert::new(trace, topology, task.execname.as_deref(), task.pid)
        .context(diagnostics::error_message("cannot bind task"))
}

/// Metrics that cannot be computed are reported as null with a warning.
fn build_report(
    sched: &SchedAssert<'_, SchedTrace>,
    level: &str,
    window: Option<Window>,
) -> Result<serde_json::Value> {
    fn finite(v: f64) -> Option<f64> {
        v.is_finite().then_some(v)
    }
    fn or_warn(metric: &str, v: std::result::Result<f64, SchedError>) -> Option<f64> {
        v.map_err(|err| diagnostics::warn(format!("{}: {}", metric, err))).ok()
    }

    let has_run = sched.has_run()?;
    if !has_run {
        diagnostics::warn(format!("task {} never ran", sched.name()));
    }

    let span = sched.topology().level_span(level)?;
    let mut residency = Vec::with_capacity(span);
    for index in 0..span {
        let node = sched.topology().get_node(level, index)?.to_vec();
        let seconds = sched.get_residency(level, &node, window, false)?;
        let percent = or_warn("residency percent", sched.get_residency(level, &node, window, true));
        residency.push(json!({
            "node": node,
            "seconds": seconds,
            "percent": percent,
        }));
    }

    Ok(json!({
        "task": {
            "pid": sched.pid(),
            "execname": sched.execname(),
            "ran": has_run,
        },
        "window": window,
        "start_time": finite(sched.get_start_time()?),
        "end_time": finite(sched.get_end_time()?),
        "runtime": sched.get_runtime(window, false)?,
        "duty_cycle": or_warn("duty cycle", sched.get_duty_cycle(window)),
        "period_ms": or_warn("period", sched.get_period(window, Align::Start)),
        "first_cpu": sched.get_first_cpu(window)?,
        "level": level,
        "residency": residency,
    }))
}
