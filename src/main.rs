//! Container Runner - drives the product's test pipeline inside a container
//!
//! Each invocation runs one stage (or `all`) and exits with the stage's
//! code: 0 on success, the failing command's code for fatal stage errors,
//! 1 when any suite failed.

use clap::Parser;
use colored::Colorize;
use container_runner::commands::{strip_legacy_token, Commands};
use container_runner::common::logging;
use container_runner::{HarnessConfig, Pipeline, RunContext};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "container-runner", about = "In-container test runner and proof collector")]
#[command(version, long_about = None)]
struct Cli {
    /// Configuration file (TOML); defaults to the platform config dir
    #[arg(long, global = true, env = "CONTAINER_RUNNER_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    logging::init_cli();

    let cli = Cli::parse_from(strip_legacy_token(std::env::args()));
    let stage = cli.command.stage();

    let config = match HarnessConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {} failed: {}", "❌".red(), stage, e);
            std::process::exit(e.exit_code());
        }
    };

    let pipeline = Pipeline::new(config, RunContext::from_env());
    tracing::info!(
        stage = %stage,
        distro = %pipeline.host().distro_id,
        container = %pipeline.host().container_id,
        "starting"
    );

    match pipeline.run(stage).await {
        Ok(outcome) => {
            if outcome.failed {
                eprintln!("{} {} finished with failing suites", "❌".red(), stage);
            }
            std::process::exit(outcome.exit_code());
        }
        Err(e) => {
            eprintln!("{} {} failed: {}", "❌".red(), stage, e);
            std::process::exit(e.exit_code());
        }
    }
}
