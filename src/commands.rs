//! CLI command definitions
//!
//! One subcommand per pipeline stage.

use clap::Subcommand;

use crate::pipeline::Stage;

/// Token older entrypoints put in front of the stage name
pub const LEGACY_TOKEN: &str = "internal-runner";

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    /// Check the environment and run a quick build check
    Preflight,

    /// Verify that every required package is installed
    Deps,

    /// Select the toolchain and build the product
    Build,

    /// Run every discovered suite and record its verdict
    RunSuites,

    /// Write the run summary and package the proof bundle
    Collect,

    /// Run every stage in order
    All,
}

impl Commands {
    pub fn stage(self) -> Stage {
        match self {
            Commands::Preflight => Stage::Preflight,
            Commands::Deps => Stage::Deps,
            Commands::Build => Stage::Build,
            Commands::RunSuites => Stage::RunSuites,
            Commands::Collect => Stage::Collect,
            Commands::All => Stage::All,
        }
    }
}

/// Drop every [`LEGACY_TOKEN`] after the program name, so
/// `container-runner internal-runner all` behaves like `container-runner all`
pub fn strip_legacy_token<I>(args: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    args.into_iter()
        .enumerate()
        .filter(|(i, arg)| *i == 0 || arg != LEGACY_TOKEN)
        .map(|(_, arg)| arg)
        .collect()
}
