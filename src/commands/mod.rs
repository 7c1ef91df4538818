//! Subcommand handlers and the setup they share.
pub mod down;
pub mod generate;
pub mod init;
pub mod reset;
pub mod status;
pub mod subconfig;
pub mod up;
pub mod version;

use anyhow::{Context as _, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cli::GlobalOpts;
use crate::logging::{Log, Logger};
use crate::migrations::MigrationRegistry;
use crate::orchestrator::Orchestrator;
use crate::settings::{SETTINGS_FILE, Settings};

/// Shared state produced by the common command setup sequence.
///
/// Resolves the scoreboard root and loads `migrate.toml` so that each
/// command does not have to repeat the boilerplate.
#[derive(Debug)]
pub struct CommandSetup {
    /// Resolved scoreboard root.
    pub root: PathBuf,
    /// Settings loaded from the root's `migrate.toml`.
    pub settings: Settings,
}

impl CommandSetup {
    /// Resolve the root and load its settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the root cannot be determined or `migrate.toml`
    /// is invalid.
    pub fn init(global: &GlobalOpts, log: &Logger) -> Result<Self> {
        let root = resolve_root(global)?;
        log.debug(&format!("root: {}", root.display()));

        let settings = Settings::load(&root)?;
        log.debug(&format!("tracked dirs: {}", settings.tracked_dirs.join(", ")));
        log.debug(&format!("state dir: {}", settings.state_dir));

        Ok(Self { root, settings })
    }

    /// Build an orchestrator over the compiled-in migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if the compiled-in migrations are inconsistent.
    pub fn orchestrator(&self, global: &GlobalOpts, log: &Arc<Logger>) -> Result<Orchestrator> {
        let migrations = MigrationRegistry::builtin()?;
        log.run_context(
            &self.root,
            &self.settings.state_dir,
            migrations.len(),
            global.dry_run,
        );
        let log: Arc<dyn Log> = Arc::clone(log) as Arc<dyn Log>;
        Ok(Orchestrator::new(&self.root, &self.settings, migrations, log).dry_run(global.dry_run))
    }
}

/// Resolve the scoreboard root directory.
///
/// `--root` (or `MIGRATE_ROOT`) wins; otherwise the current directory is
/// used if it looks like a scoreboard tree.
///
/// # Errors
///
/// Returns an error if no root is given and the current directory holds
/// neither `migrate.toml` nor a `*.schema.json` file.
pub fn resolve_root(global: &GlobalOpts) -> Result<PathBuf> {
    if let Some(ref root) = global.root {
        if !root.is_dir() {
            anyhow::bail!("root '{}' is not a directory", root.display());
        }
        return Ok(root.clone());
    }

    let cwd = std::env::current_dir().context("cannot determine current directory")?;
    if looks_like_root(&cwd) {
        return Ok(cwd);
    }

    anyhow::bail!("cannot determine scoreboard root. Use --root or set MIGRATE_ROOT env var");
}

fn looks_like_root(dir: &Path) -> bool {
    if dir.join(SETTINGS_FILE).is_file() {
        return true;
    }
    std::fs::read_dir(dir).is_ok_and(|entries| {
        entries.filter_map(Result::ok).any(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.ends_with(".schema.json"))
        })
    })
}

/// Print the summary, and bail if any step failed.
///
/// # Errors
///
/// Returns an error if one or more steps recorded a failure.
pub fn finish(log: &Logger) -> Result<()> {
    log.print_summary();

    let count = log.failure_count();
    if count > 0 {
        anyhow::bail!("{count} step(s) failed");
    }
    Ok(())
}
