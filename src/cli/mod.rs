//! CLI command handling
//!
//! Dispatches CLI commands to the engine and formats output.

pub mod output;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};

use crate::commands::{Commands, OutputFormat};
use crate::common::config::Config;
use crate::common::paths;
use crate::common::{Error, Result};
use crate::testing::{
    LoadTestOptions, LogSink, ResultSink, RunRegistry, Scheduler, TestDefinition, TestSuite,
};

use output::ConsoleSink;

/// Dispatch a CLI command
///
/// Returns `Ok(false)` when the command ran but something it checked failed.
pub async fn dispatch(
    command: Commands,
    config: Config,
    config_path: Option<&Path>,
    verbose: bool,
) -> Result<bool> {
    match command {
        Commands::Run {
            path,
            browsers,
            only,
            artifacts,
            max_parallel,
            output: format,
        } => {
            let mut suite = TestSuite::load(&path)?;
            suite.select(&only)?;

            let mut config = config;
            if max_parallel.is_some() {
                config.defaults.max_parallel = max_parallel;
            }
            let sink: Arc<dyn ResultSink> = match format {
                OutputFormat::Text => Arc::new(ConsoleSink::new(verbose)),
                OutputFormat::Json => Arc::new(LogSink),
            };

            let scheduler = Scheduler::builder(config).sink(sink).build()?;
            stop_on_ctrl_c(scheduler.registry().clone());

            if format == OutputFormat::Text {
                println!(
                    "{} {} ({} tests)",
                    "Running Suite:".blue().bold(),
                    suite.name.as_deref().unwrap_or("tests").white().bold(),
                    suite.tests.len()
                );
            }
            let report = scheduler.run_batch(&suite.tests, &browsers).await;
            scheduler.shutdown().await;

            let artifacts = artifacts.or_else(paths::artifacts_dir);
            if let Some(dir) = artifacts {
                let written = output::write_screenshots(&dir, &report.outcomes)?;
                if !written.is_empty() && format == OutputFormat::Text {
                    println!("Screenshots written to {}", dir.display());
                }
            }

            if format == OutputFormat::Json {
                let document = output::batch_json(suite.name.as_deref(), &report)?;
                println!("{}", serde_json::to_string_pretty(&document)?);
            }

            Ok(report.all_passed())
        }

        Commands::Load {
            path,
            test,
            concurrency,
            duration_secs,
            ramp_up_secs,
            output: format,
        } => {
            let suite = TestSuite::load(&path)?;
            let definition = pick_test(&suite, test.as_deref())?;

            let mut options = LoadTestOptions::from(&config.load);
            if let Some(concurrency) = concurrency {
                options.concurrency = concurrency;
            }
            if let Some(secs) = duration_secs {
                options.duration = Duration::from_secs(secs);
            }
            if let Some(secs) = ramp_up_secs {
                options.ramp_up = Duration::from_secs(secs);
            }

            let scheduler = Scheduler::builder(config).sink(Arc::new(LogSink)).build()?;
            stop_on_ctrl_c(scheduler.registry().clone());

            let spinner = (format == OutputFormat::Text).then(|| {
                let spinner = ProgressBar::new_spinner();
                if let Ok(style) =
                    ProgressStyle::default_spinner().template("{spinner:.cyan} {msg} [{elapsed}]")
                {
                    spinner.set_style(style);
                }
                spinner.set_message(format!(
                    "Load testing '{}' with {} workers for {} s",
                    definition.id,
                    options.concurrency,
                    options.duration.as_secs()
                ));
                spinner.enable_steady_tick(Duration::from_millis(120));
                spinner
            });

            let result = scheduler.run_load_test(definition, &options).await;
            if let Some(spinner) = spinner {
                spinner.finish_and_clear();
            }
            let summary = result?;

            match format {
                OutputFormat::Text => output::print_load_summary(&definition.id, &summary),
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
            }
            Ok(summary.failed_requests == 0)
        }

        Commands::Validate { path } => {
            let suite = TestSuite::load(&path)?;
            println!(
                "{} {} ({} tests)",
                "✓".green(),
                path.display(),
                suite.tests.len()
            );
            for test in &suite.tests {
                let kind = if test.needs_browser() { "browser" } else { "http" };
                println!(
                    "  {} {} {}",
                    test.id.white().bold(),
                    test.name,
                    format!("[{}, {} steps]", kind, test.steps.len()).dimmed()
                );
            }
            Ok(true)
        }

        Commands::Config => {
            let shown = config_path
                .map(Path::to_path_buf)
                .or_else(paths::config_path);
            match shown {
                Some(path) if path.exists() => println!("Config file: {}", path.display()),
                Some(path) => println!(
                    "Config file: {} {}",
                    path.display(),
                    "(not found, using defaults)".dimmed()
                ),
                None => println!("Config file: {}", "(no config directory)".dimmed()),
            }
            if let Some(dir) = paths::artifacts_dir() {
                println!("Artifacts:   {}", dir.display());
            }
            if let Some(dir) = paths::log_dir() {
                println!("Logs:        {}", dir.display());
            }
            println!();
            print!("{}", config.to_toml()?);
            Ok(true)
        }
    }
}

/// The test to load test: the named one, or the only one in the file
fn pick_test<'a>(suite: &'a TestSuite, id: Option<&str>) -> Result<&'a TestDefinition> {
    match id {
        Some(id) => suite
            .tests
            .iter()
            .find(|test| test.id == id)
            .ok_or_else(|| Error::Config(format!("no test with id '{}'", id))),
        None => match suite.tests.as_slice() {
            [only] => Ok(only),
            tests => Err(Error::Config(format!(
                "file holds {} tests; pick one with --test",
                tests.len()
            ))),
        },
    }
}

/// Stop every running test at its next step boundary on ctrl-c
fn stop_on_ctrl_c(registry: RunRegistry) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted; stopping after the current steps");
            registry.stop_all();
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pick_test() {
        let single = TestSuite::from_json(r#"{"id": "a", "name": "A"}"#).unwrap();
        assert_eq!(pick_test(&single, None).unwrap().id, "a");

        let many = TestSuite::from_json(r#"[{"id": "a", "name": "A"}, {"id": "b", "name": "B"}]"#)
            .unwrap();
        assert!(pick_test(&many, None).is_err());
        assert_eq!(pick_test(&many, Some("b")).unwrap().id, "b");
        assert!(pick_test(&many, Some("c")).is_err());
    }
}
