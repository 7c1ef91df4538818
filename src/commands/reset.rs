//! Command: delete every custom config and the custom ledger.
use anyhow::{Context as _, Result};
use std::io::{BufRead as _, IsTerminal as _, Write as _};
use std::sync::Arc;

use crate::cli::{GlobalOpts, ResetOpts};
use crate::logging::Logger;

/// Run the reset command.
///
/// Without `--yes` the user is asked to confirm on an interactive terminal;
/// a non-interactive run without `--yes` is refused.
///
/// # Errors
///
/// Returns an error if the reset is not confirmed or a file cannot be
/// removed.
pub fn run(global: &GlobalOpts, opts: &ResetOpts, log: &Arc<Logger>) -> Result<()> {
    let setup = super::CommandSetup::init(global, log)?;
    let mut orchestrator = setup.orchestrator(global, log)?;

    log.warn("reset removes every custom configuration file");
    log.warn("run 'migrate init' afterwards to recreate them from the schemas");
    let confirmed = opts.yes || global.dry_run || ask("Are you sure you want to continue? (y/n) ")?;

    let removed = orchestrator.reset(confirmed)?;
    if !global.dry_run {
        for path in &removed {
            log.info(&format!("removed {path}"));
        }
    }
    Ok(())
}

fn ask(prompt: &str) -> Result<bool> {
    let stdin = std::io::stdin();
    if !stdin.is_terminal() {
        return Ok(false);
    }
    let mut stdout = std::io::stdout().lock();
    write!(stdout, "{prompt}").context("failed to write prompt")?;
    stdout.flush().context("failed to flush stdout")?;

    let mut answer = String::new();
    stdin
        .lock()
        .read_line(&mut answer)
        .context("failed to read answer")?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}
