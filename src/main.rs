//! `migrate`: scoreboard configuration migrator.
use anyhow::Result;
use clap::Parser;
use std::sync::Arc;

use scoreboard_migrate::cli::{Cli, Command};
use scoreboard_migrate::error::MigrationError;
use scoreboard_migrate::logging::{self, Logger};
use scoreboard_migrate::{commands, interrupt};

fn main() -> Result<()> {
    let _ = enable_ansi_support::enable_ansi_support();
    let args = Cli::parse();
    let command = command_name(&args.command);
    logging::init_subscriber(args.verbose, command);
    if let Err(e) = interrupt::install() {
        tracing::warn!("failed to install Ctrl-C handler: {e}");
    }
    let log = Arc::new(Logger::new(command));

    let result = match &args.command {
        Command::Init => commands::init::run(&args.global, &log),
        Command::Generate(opts) => commands::generate::run(&args.global, opts, &log),
        Command::Up(opts) => commands::up::run(&args.global, opts, &log),
        Command::Down(opts) => commands::down::run(&args.global, opts, &log),
        Command::Subconfig(opts) => commands::subconfig::run(&args.global, opts, &log),
        Command::Reset(opts) => commands::reset::run(&args.global, opts, &log),
        Command::Status => commands::status::run(&args.global, &log),
        Command::Version => {
            commands::version::run();
            Ok(())
        }
    };

    if let Err(e) = &result
        && e.chain()
            .filter_map(|cause| cause.downcast_ref::<MigrationError>())
            .any(MigrationError::is_fatal)
    {
        log.error("the migration ledgers need attention before running again");
        log.error("inspect schema-status.json and custom-status.json in the state directory");
        log.error("if they cannot be repaired, 'migrate reset' followed by 'migrate init' starts over");
    }
    result
}

const fn command_name(command: &Command) -> &'static str {
    match command {
        Command::Init => "init",
        Command::Generate(_) => "generate",
        Command::Up(_) => "up",
        Command::Down(_) => "down",
        Command::Subconfig(_) => "subconfig",
        Command::Reset(_) => "reset",
        Command::Status => "status",
        Command::Version => "version",
    }
}
