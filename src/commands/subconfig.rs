//! Command: create a subconfig from its family's reference.
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

use crate::cli::{GlobalOpts, SubconfigOpts};
use crate::config::ConfigPath;
use crate::logging::Logger;
use crate::orchestrator::SubconfigOutcome;

/// Run the subconfig command.
///
/// # Errors
///
/// Returns an error if the path lies outside the root, the name is not a
/// subconfig, the family is incomplete, or the subconfig exists with a
/// diverging ledger.
pub fn run(global: &GlobalOpts, opts: &SubconfigOpts, log: &Arc<Logger>) -> Result<()> {
    let setup = super::CommandSetup::init(global, log)?;
    let mut orchestrator = setup.orchestrator(global, log)?;

    let cwd = std::env::current_dir().context("cannot determine current directory")?;
    let resolve = |arg: &str| ConfigPath::from_argument(Path::new(arg), &setup.root, &cwd);
    let target = resolve(&opts.subconfig)?;
    let reference = opts.reference.as_deref().map(resolve).transpose()?;
    log.stage(&format!("Initializing subconfig {target}"));

    match orchestrator.subconfig(&target, reference.as_ref())? {
        SubconfigOutcome::Created if global.dry_run => {}
        SubconfigOutcome::Created => log.info(&format!("created {target}")),
        SubconfigOutcome::AlreadyInSync => log.info("nothing to do"),
    }
    Ok(())
}
