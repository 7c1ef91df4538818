//! Command: show migration status per config file.
use anyhow::Result;
use std::sync::Arc;

use crate::cli::GlobalOpts;
use crate::logging::Logger;

/// Run the status command.
///
/// # Errors
///
/// Returns an error if the tree cannot be listed or a ledger is corrupt.
pub fn run(global: &GlobalOpts, log: &Arc<Logger>) -> Result<()> {
    let setup = super::CommandSetup::init(global, log)?;
    let mut orchestrator = setup.orchestrator(global, log)?;

    let files = orchestrator.status()?;
    let width = files.iter().map(|f| f.path.as_str().len()).max().unwrap_or(0);

    log.stage("Migration status");
    for file in &files {
        let mut line = format!(
            "{:<width$}  {:<9}  {} applied",
            file.path.as_str(),
            file.kind.to_string(),
            file.applied
        );
        if !file.pending.is_empty() {
            line.push_str(&format!(", {} pending", file.pending.len()));
        }
        if !file.unknown.is_empty() {
            line.push_str(&format!(", {} unknown", file.unknown.len()));
        }
        log.info(&line);
        for version in &file.unknown {
            log.warn(&format!("{}: ledger holds unknown version {version}", file.path));
        }
    }

    let pending = files.iter().filter(|f| !f.pending.is_empty()).count();
    if files.is_empty() {
        log.info("no config files found");
    } else if pending == 0 {
        log.info("all config files are up to date");
    } else {
        log.info(&format!("{pending} file(s) need 'migrate up'"));
    }
    Ok(())
}
