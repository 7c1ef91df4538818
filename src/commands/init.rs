//! Command: create custom configs from their schemas.
use anyhow::Result;
use std::sync::Arc;

use crate::cli::GlobalOpts;
use crate::logging::{Logger, StepStatus};

/// Run the init command.
///
/// # Errors
///
/// Returns an error if the root cannot be resolved or the copy fails.
pub fn run(global: &GlobalOpts, log: &Arc<Logger>) -> Result<()> {
    let setup = super::CommandSetup::init(global, log)?;
    let mut orchestrator = setup.orchestrator(global, log)?;

    log.stage("Initializing config files from schemas");
    let report = orchestrator.init()?;

    let created_status = if global.dry_run {
        StepStatus::DryRun
    } else {
        StepStatus::Applied
    };
    for path in &report.created {
        log.record_step(path.as_str(), created_status, Some("created from schema"));
    }
    for path in &report.skipped {
        log.record_step(path.as_str(), StepStatus::Skipped, Some("already exists"));
    }

    if report.created.is_empty() && report.skipped.is_empty() {
        log.info("no schema files found");
    } else if !report.skipped.is_empty() {
        log.info("existing files need to be migrated with 'migrate up'");
    }

    super::finish(log)
}
