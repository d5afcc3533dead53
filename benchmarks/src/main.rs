//! SecStage Benchmark Runner
//!
//! `run-benchmarks [--json <file>]` prints one line per case. Staging cases
//! also show how many existence checks a run needed and how long it waited
//! for the stand-in tool, taken from each run's `StageOutcome`.

use anyhow::{Context, Result};
use secstage_core::StageOutcome;
use serde::Serialize;
use std::time::{Duration, Instant};

mod benchmarks;

/// Aggregated timings of one case
#[derive(Debug, Serialize)]
pub struct CaseReport {
    pub name: String,
    pub files: usize,
    pub runs: u32,
    pub mean_ms: f64,
    pub p95_ms: f64,
    /// Mean existence checks per staging run
    pub mean_polls: Option<f64>,
    /// Mean time a staging run spent waiting for the tool
    pub mean_waited_ms: Option<f64>,
}

#[derive(Debug, Serialize)]
struct Report {
    generated_at: String,
    version: &'static str,
    cases: Vec<CaseReport>,
}

/// Time `runs` calls of `f` after one warmup call. `f` returns the outcome
/// of a staging run, or `None` for cases that do not stage anything.
pub fn measure<F>(name: String, files: usize, runs: u32, mut f: F) -> CaseReport
where
    F: FnMut() -> Option<StageOutcome>,
{
    f();

    let mut elapsed_ms = Vec::with_capacity(runs as usize);
    let mut outcomes = Vec::new();
    for _ in 0..runs {
        let start = Instant::now();
        let outcome = f();
        elapsed_ms.push(millis(start.elapsed()));
        outcomes.extend(outcome);
    }
    elapsed_ms.sort_by(f64::total_cmp);

    CaseReport {
        name,
        files,
        runs,
        mean_ms: mean(elapsed_ms.iter().copied()).unwrap_or_default(),
        p95_ms: elapsed_ms
            .get(elapsed_ms.len().saturating_sub(1) * 95 / 100)
            .copied()
            .unwrap_or_default(),
        mean_polls: mean(outcomes.iter().map(|o| o.polls as f64)),
        mean_waited_ms: mean(outcomes.iter().map(|o| millis(o.waited))),
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

fn print_case(case: &CaseReport) {
    print!("  {:<36} {:>9.3} ms  p95 {:>9.3} ms", case.name, case.mean_ms, case.p95_ms);
    if let (Some(polls), Some(waited)) = (case.mean_polls, case.mean_waited_ms) {
        print!("  {:>5.1} checks, waited {:.3} ms", polls, waited);
    }
    println!();
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let json_path = args
        .iter()
        .position(|a| a == "--json")
        .and_then(|i| args.get(i + 1));

    let mut cases = benchmarks::existence::run_all();
    cases.extend(benchmarks::staging::run_all()?);

    println!("SecStage {} benchmarks", env!("CARGO_PKG_VERSION"));
    for case in &cases {
        print_case(case);
    }

    if let Some(path) = json_path {
        let report = Report {
            generated_at: chrono::Utc::now().to_rfc3339(),
            version: env!("CARGO_PKG_VERSION"),
            cases,
        };
        std::fs::write(path, serde_json::to_string_pretty(&report)?)
            .with_context(|| format!("Failed to write {}", path))?;
        println!("Report written to {}", path);
    }

    Ok(())
}
