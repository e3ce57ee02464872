//! CLI command definitions
//!
//! Defines the clap commands for the runwright CLI.

use clap::{Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Run a test suite against one or more browsers
    Run {
        /// Path to the YAML or JSON test file
        path: PathBuf,

        /// Browser flavor to run UI tests on; repeat for a matrix
        /// (default: `defaults.browsers` from the config file)
        #[arg(long = "browser", short = 'b')]
        browsers: Vec<String>,

        /// Only run the tests with these ids
        #[arg(long)]
        only: Vec<String>,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        output: OutputFormat,

        /// Directory to write screenshots into
        #[arg(long)]
        artifacts: Option<PathBuf>,

        /// Upper bound on concurrently running pairings
        #[arg(long)]
        max_parallel: Option<usize>,
    },

    /// Load test the first request step of a test
    Load {
        /// Path to the YAML or JSON test file
        path: PathBuf,

        /// Id of the test to use (required when the file holds several)
        #[arg(long)]
        test: Option<String>,

        /// Number of concurrent workers
        #[arg(long)]
        concurrency: Option<usize>,

        /// Length of the run window in seconds
        #[arg(long)]
        duration_secs: Option<u64>,

        /// Window over which workers are started
        #[arg(long)]
        ramp_up_secs: Option<u64>,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        output: OutputFormat,
    },

    /// Parse and validate a test file without running it
    Validate {
        /// Path to the YAML or JSON test file
        path: PathBuf,
    },

    /// Show the effective configuration
    Config,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human readable console output
    Text,
    /// Machine readable JSON on stdout
    Json,
}
