//! admission-sim: drive a limiter with simulated callers and report the outcome.

use std::collections::HashMap;
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use admission::{
    ENV_MAX_CONCURRENCY, ENV_POLICY, ENV_QUEUE_LIMIT, Limiter, LimiterOptions, LimiterStats,
};
use anyhow::Context;
use serde::Serialize;
use tokio::task::JoinSet;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const USAGE: &str = "\
Usage: admission-sim [options]

Options:
  --capacity <n>      Concurrent admissions [env: ADMISSION_MAX_CONCURRENCY]
  --queue-limit <n>   Waiters kept before rejecting [env: ADMISSION_QUEUE_LIMIT, default: 5000]
  --policy <p>        stack or fifo [env: ADMISSION_POLICY, default: stack]
  --callers <n>       Simulated callers [default: 100]
  --hold-ms <n>       Time each admitted caller holds its slot [default: 10]
  --timeout-ms <n>    Give up waiting after this long [default: wait forever]";

#[derive(Debug, PartialEq, Eq)]
struct SimArgs {
    /// Limiter settings given on the command line, keyed like the environment.
    overrides: HashMap<&'static str, String>,
    callers: usize,
    hold: Duration,
    timeout: Option<Duration>,
}

impl Default for SimArgs {
    fn default() -> Self {
        Self {
            overrides: HashMap::new(),
            callers: 100,
            hold: Duration::from_millis(10),
            timeout: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct SimReport {
    max_in_flight: usize,
    admitted: usize,
    rejected: usize,
    stats: LimiterStats,
}

/// Initialize tracing with ADMISSION_LOG and LOG_FORMAT support.
fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match std::env::var("ADMISSION_LOG").as_deref() {
            Ok("debug") => "debug",
            Ok("warn") | Ok("warning") => "warn",
            Ok("error") => "error",
            _ => "info",
        };
        EnvFilter::new(format!("admission={level},admission_sim={level}"))
    };

    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}

#[tokio::main]
async fn main() {
    init_tracing();

    let args: Vec<String> = std::env::args().collect();
    let sim = match parse_args(&args) {
        Ok(sim) => sim,
        Err(msg) => {
            if !msg.is_empty() {
                eprintln!("error: {msg}");
                eprintln!();
            }
            eprintln!("{USAGE}");
            process::exit(2);
        }
    };

    match run(sim).await {
        Ok(report) => match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("error: failed to serialize report: {e}");
                process::exit(1);
            }
        },
        Err(e) => {
            eprintln!("error: {e:#}");
            process::exit(1);
        }
    }
}

fn parse_args(args: &[String]) -> Result<SimArgs, String> {
    let mut sim = SimArgs::default();

    let mut i = 1; // skip argv[0]
    while i < args.len() {
        let flag = args[i].as_str();
        if flag == "--help" || flag == "-h" {
            return Err(String::new());
        }
        i += 1;
        let value = args
            .get(i)
            .ok_or_else(|| format!("{flag} requires a value"))?;
        match flag {
            "--capacity" => {
                sim.overrides.insert(ENV_MAX_CONCURRENCY, value.clone());
            }
            "--queue-limit" => {
                sim.overrides.insert(ENV_QUEUE_LIMIT, value.clone());
            }
            "--policy" => {
                sim.overrides.insert(ENV_POLICY, value.clone());
            }
            "--callers" => sim.callers = parse_number(flag, value)?,
            "--hold-ms" => sim.hold = Duration::from_millis(parse_number(flag, value)?),
            "--timeout-ms" => {
                sim.timeout = Some(Duration::from_millis(parse_number(flag, value)?));
            }
            other => return Err(format!("unknown flag: {other}")),
        }
        i += 1;
    }

    Ok(sim)
}

fn parse_number<T: std::str::FromStr>(flag: &str, value: &str) -> Result<T, String> {
    value
        .parse()
        .map_err(|_| format!("invalid value for {flag}: '{value}'"))
}

/// Command-line values win over the environment.
fn resolve_options(overrides: &HashMap<&'static str, String>) -> anyhow::Result<LimiterOptions> {
    LimiterOptions::from_lookup(|key| {
        overrides
            .get(key)
            .cloned()
            .or_else(|| std::env::var(key).ok())
    })
    .context("invalid limiter configuration")
}

async fn run(sim: SimArgs) -> anyhow::Result<SimReport> {
    let options = resolve_options(&sim.overrides)?;
    let limiter = Limiter::new(&options).context("failed to build limiter")?;
    tracing::info!(
        capacity = options.max_concurrent_requests,
        queue_limit = options.request_queue_limit,
        policy = %options.policy,
        callers = sim.callers,
        "Starting simulation"
    );

    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let mut callers = JoinSet::new();

    for caller in 0..sim.callers {
        let limiter = limiter.clone();
        let active = Arc::clone(&active);
        let peak = Arc::clone(&peak);
        let hold = sim.hold;
        let timeout = sim.timeout;

        callers.spawn(async move {
            let acquired = match timeout {
                Some(timeout) => limiter.acquire_timeout(timeout).await,
                None => limiter.acquire().await,
            };
            let permit = match acquired {
                Ok(permit) => permit,
                Err(e) => {
                    tracing::debug!(caller, error = %e, "Caller turned away");
                    return false;
                }
            };

            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(hold).await;
            active.fetch_sub(1, Ordering::SeqCst);
            drop(permit);
            true
        });
    }

    let mut admitted = 0;
    let mut rejected = 0;
    while let Some(outcome) = callers.join_next().await {
        if outcome.context("caller task failed")? {
            admitted += 1;
        } else {
            rejected += 1;
        }
    }

    let report = SimReport {
        max_in_flight: peak.load(Ordering::SeqCst),
        admitted,
        rejected,
        stats: limiter.stats(),
    };
    tracing::info!(
        admitted = report.admitted,
        rejected = report.rejected,
        max_in_flight = report.max_in_flight,
        "Simulation finished"
    );
    Ok(report)
}
