//! Command: roll back applied migrations.
use anyhow::Result;
use std::sync::Arc;

use crate::cli::{GlobalOpts, StepOpts};
use crate::logging::Logger;

/// Run the down command.
///
/// # Errors
///
/// Returns an error if a migration is irreversible or fails, or the ledgers
/// are inconsistent.
pub fn run(global: &GlobalOpts, opts: &StepOpts, log: &Arc<Logger>) -> Result<()> {
    let setup = super::CommandSetup::init(global, log)?;
    let mut orchestrator = setup.orchestrator(global, log)?;

    let result = orchestrator.down(opts.step());
    log.print_summary();
    let reports = result?;

    let changed: usize = reports.iter().map(|r| r.changed.len()).sum();
    log.debug(&format!("{} migrations, {changed} file writes", reports.len()));
    Ok(())
}
