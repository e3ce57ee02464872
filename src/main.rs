//! runwright - declarative browser and API test runner
//!
//! Runs YAML/JSON test definitions against WebDriver browsers or plain HTTP
//! endpoints and reports per-step results.

use std::path::PathBuf;

use clap::Parser;
use commands::Commands;
use runwright::common::config::Config;
use runwright::common::logging;
use runwright::{cli, commands};

#[derive(Parser)]
#[command(name = "runwright", about = "Declarative browser and API test runner")]
#[command(version, long_about = None)]
struct Cli {
    /// Configuration file (default: platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Verbose logging
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let guard = logging::init_cli(cli.verbose, cli.log_file.as_deref());

    let result = match Config::load(cli.config.as_deref()) {
        Ok(config) => cli::dispatch(cli.command, config, cli.config.as_deref(), cli.verbose).await,
        Err(e) => Err(e),
    };

    let code = match result {
        Ok(true) => 0,
        Ok(false) => 1,
        Err(e) => {
            eprintln!("Error: {e}");
            1
        }
    };

    // Flush the file log before exiting
    drop(guard);
    if code != 0 {
        std::process::exit(code);
    }
}
