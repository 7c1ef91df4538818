//! Command: write a new migration stub.
use anyhow::{Context as _, Result};

use crate::cli::{GenerateOpts, GlobalOpts};
use crate::logging::Logger;
use crate::migrations::generate::{self, current_version};
use crate::operations::SystemFileSystemOps;
use crate::settings::Settings;

/// Run the generate command.
///
/// Works outside a scoreboard tree too; the settings then default.
///
/// # Errors
///
/// Returns an error if the name is invalid or already used, or the file
/// cannot be written.
pub fn run(global: &GlobalOpts, opts: &GenerateOpts, log: &Logger) -> Result<()> {
    let root = match super::resolve_root(global) {
        Ok(root) => root,
        Err(_) => std::env::current_dir().context("cannot determine current directory")?,
    };
    let settings = Settings::load(&root)?;
    let dir = settings.migrations_dir(&root);

    log.stage(&format!("Generating migration '{}'", opts.migration_name));
    if global.dry_run {
        generate::validate_identifier(&opts.migration_name)?;
        log.dry_run(&format!("would write into {}", dir.display()));
        return Ok(());
    }

    let generated = generate::generate(
        &SystemFileSystemOps,
        &dir,
        &opts.migration_name,
        current_version(),
    )?;
    log.info(&format!("created {}", generated.path.display()));
    log.info("rebuild to include it in the migration registry");
    Ok(())
}
