//! Console output and artifact writing

use std::path::{Path, PathBuf};

use colored::Colorize;
use serde_json::{json, Value};

use crate::common::paths::{ensure_dir, sanitize_file_name};
use crate::common::{Error, Result};
use crate::testing::{
    BatchReport, BatchSummary, LoadTestSummary, ResultSink, ScreenshotKind, StepOutcome,
    TestDefinition, TestOutcome, TestProgress,
};

/// Prints results to stdout as tests complete
pub struct ConsoleSink {
    verbose: bool,
}

impl ConsoleSink {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl ResultSink for ConsoleSink {
    fn on_test_started(&self, test: &TestDefinition, flavor: &str) {
        if self.verbose {
            println!(
                "{} {} {}",
                "Running Test:".blue().bold(),
                test.name.white().bold(),
                format!("[{}]", flavor).dimmed()
            );
        }
    }

    fn on_test_progress(&self, test_id: &str, flavor: &str, progress: &TestProgress<'_>) {
        if self.verbose {
            println!(
                "  {} {}/{} {}",
                format!("[{}/{}]", test_id, flavor).dimmed(),
                progress.completed,
                progress.total,
                progress.step.name
            );
        }
    }

    fn on_test_completed(&self, outcome: &TestOutcome) {
        print_outcome(outcome, self.verbose);
    }

    fn on_batch_completed(&self, _outcomes: &[TestOutcome], summary: &BatchSummary) {
        print_batch_summary(summary);
    }
}

fn print_step(step: &StepOutcome, indent: &str) {
    match &step.error {
        None => println!(
            "{}{} {} {}",
            indent,
            "✓".green(),
            step.name,
            format!("({} ms)", step.duration_ms()).dimmed()
        ),
        Some(error) => println!("{}{} {}: {}", indent, "✗".red(), step.name, error.red()),
    }
}

/// One line per test, plus the step trail for failures (or always when verbose)
pub fn print_outcome(outcome: &TestOutcome, verbose: bool) {
    let label = format!("{} [{}]", outcome.name, outcome.flavor);
    let duration = format!("({} ms)", outcome.duration_ms()).dimmed();
    if outcome.passed() {
        println!("{} {} {}", "PASS".green().bold(), label.white(), duration);
    } else {
        println!("{} {} {}", "FAIL".red().bold(), label.white().bold(), duration);
    }

    if verbose || !outcome.passed() {
        for step in &outcome.steps {
            print_step(step, "    ");
        }
        if !outcome.cleanup.is_empty() {
            println!("    {}", "cleanup:".cyan());
            for step in &outcome.cleanup {
                print_step(step, "      ");
            }
        }
    }
    if let Some(error) = &outcome.error {
        println!("    {} {}", "Error:".red(), error);
    }
}

pub fn print_batch_summary(summary: &BatchSummary) {
    println!();
    let counts = format!(
        "{} passed, {} failed, {} total",
        summary.passed, summary.failed, summary.total
    );
    if summary.failed == 0 {
        println!("{} {} in {} ms", "✓".green().bold(), counts.green(), summary.duration_ms);
    } else {
        println!("{} {} in {} ms", "✗".red().bold(), counts.red(), summary.duration_ms);
    }
}

pub fn print_load_summary(test_id: &str, summary: &LoadTestSummary) {
    println!("\n{} {}", "Load Test:".blue().bold(), test_id.white().bold());
    println!("  Requests:   {}", summary.total_requests);
    println!(
        "  Succeeded:  {}",
        summary.successful_requests.to_string().green()
    );
    if summary.failed_requests > 0 {
        println!("  Failed:     {}", summary.failed_requests.to_string().red());
    } else {
        println!("  Failed:     0");
    }
    println!(
        "  Latency:    min {} ms, avg {:.1} ms, max {} ms",
        summary.min_latency_ms, summary.avg_latency_ms, summary.max_latency_ms
    );
    println!(
        "  Throughput: {:.2} req/s over {} ms",
        summary.throughput_rps, summary.duration_ms
    );
}

/// JSON document for `--output json`
pub fn batch_json(suite: Option<&str>, report: &BatchReport) -> Result<Value> {
    Ok(json!({
        "suite": suite,
        "summary": serde_json::to_value(&report.summary)?,
        "tests": serde_json::to_value(&report.outcomes)?,
    }))
}

/// Write every captured screenshot as a PNG under `dir`
pub fn write_screenshots(dir: &Path, outcomes: &[TestOutcome]) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    for outcome in outcomes {
        for (index, screenshot) in outcome.screenshots.iter().enumerate() {
            if written.is_empty() {
                ensure_dir(dir)?;
            }
            let kind = match screenshot.kind {
                ScreenshotKind::Step => "step",
                ScreenshotKind::Failure => "failure",
            };
            let name = sanitize_file_name(&format!(
                "{}-{}-{}-{}.png",
                outcome.id, outcome.flavor, index, kind
            ));
            let path = dir.join(name);
            std::fs::write(&path, &screenshot.data).map_err(|e| Error::FileRead {
                path: path.display().to_string(),
                error: e.to_string(),
            })?;
            written.push(path);
        }
    }
    Ok(written)
}
