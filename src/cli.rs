//! Command-line interface definitions.
use clap::{Parser, Subcommand};

/// Top-level CLI entry point for the scoreboard configuration migrator.
#[derive(Parser, Debug)]
#[command(
    name = "migrate",
    about = "Data migration manager for LED scoreboard configuration files",
    version
)]
pub struct Cli {
    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Options every subcommand accepts.
    #[command(flatten)]
    pub global: GlobalOpts,
}

/// Options shared across all subcommands.
#[derive(Parser, Debug, Clone, Default)]
pub struct GlobalOpts {
    /// Preview changes without writing any file
    #[arg(short = 'd', long, global = true)]
    pub dry_run: bool,

    /// Scoreboard root directory
    #[arg(long, global = true, env = "MIGRATE_ROOT")]
    pub root: Option<std::path::PathBuf>,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create missing custom configs from their schemas
    #[command(visible_alias = "i")]
    Init,
    /// Generate a new migration source file
    #[command(visible_alias = "g")]
    Generate(GenerateOpts),
    /// Apply pending migrations
    #[command(visible_alias = "u")]
    Up(StepOpts),
    /// Roll back applied migrations
    #[command(visible_alias = "d")]
    Down(StepOpts),
    /// Create a subconfig from its family's reference config
    #[command(visible_alias = "s")]
    Subconfig(SubconfigOpts),
    /// Delete all custom configs and the custom ledger
    #[command(visible_alias = "r")]
    Reset(ResetOpts),
    /// Show applied and pending migrations per config file
    #[command(visible_alias = "st")]
    Status,
    /// Print version information
    Version,
}

/// Options for the `generate` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct GenerateOpts {
    /// Name of the migration (a bare identifier, e.g. `add_weather_units`)
    pub migration_name: String,
}

/// Options for the `up` and `down` subcommands.
#[derive(Parser, Debug, Clone)]
pub struct StepOpts {
    /// Number of migrations to process (`up`: all, `down`: the latest one)
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub step: Option<u64>,
}

impl StepOpts {
    /// `--step` as a count, if given.
    #[must_use]
    pub fn step(&self) -> Option<usize> {
        self.step
            .map(|s| usize::try_from(s).unwrap_or(usize::MAX))
    }
}

/// Options for the `subconfig` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct SubconfigOpts {
    /// Subconfig to create, e.g. `coordinates/w64h32.garage.json`
    pub subconfig: String,

    /// Reference config to copy (defaults to `<name>.json`)
    #[arg(long)]
    pub reference: Option<String>,
}

/// Options for the `reset` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct ResetOpts {
    /// Do not ask for confirmation
    #[arg(short, long)]
    pub yes: bool,
}
