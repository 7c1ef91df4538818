//! Sequencing of `init`, `up`, `down`, `subconfig`, `reset` and `status`.
//!
//! Every step that writes files runs inside one [`Transaction`](crate::transaction::Transaction): the
//! migration body (or the copy, for `init` and `subconfig`) stages its
//! documents, the updated ledgers are staged last, and the whole set is
//! committed together.  A failing step leaves the tree exactly as the
//! previous step left it.
use anyhow::{Context as _, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use crate::config::{ConfigKind, ConfigPath, ConfigRegistry};
use crate::context::MigrationContext;
use crate::error::MigrationError;
use crate::interrupt;
use crate::logging::{Log, StepStatus};
use crate::migrations::{Migration, MigrationRegistry, Version};
use crate::operations::{FileSystemOps, SystemFileSystemOps};
use crate::settings::Settings;
use crate::state::{AppliedState, LedgerKind, StateStore};
use crate::transaction::TransactionManager;

/// Where the orchestrator is in its current operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No operation has started.
    Idle,
    /// Loading ledgers and computing targets.
    Resolving,
    /// Running a migration body or staging copies.
    Applying,
    /// Swapping staged files into place.
    Committing,
    /// The last step committed.
    Done,
    /// The last step was aborted; nothing it staged was written.
    RolledBack,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Resolving => "resolving",
            Self::Applying => "applying",
            Self::Committing => "committing",
            Self::Done => "done",
            Self::RolledBack => "rolled back",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Up,
    Down,
}

/// Outcome of one migration step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    /// Version of the migration.
    pub version: Version,
    /// Identifier of the migration.
    pub identifier: String,
    /// Files whose ledger the step updated.
    pub targets: Vec<ConfigPath>,
    /// Files whose bytes changed (or would change, in a dry run).
    pub changed: Vec<ConfigPath>,
}

/// Outcome of [`Orchestrator::init`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitReport {
    /// Custom files created from their schema.
    pub created: Vec<ConfigPath>,
    /// Custom files that already existed.
    pub skipped: Vec<ConfigPath>,
}

/// Outcome of [`Orchestrator::subconfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubconfigOutcome {
    /// The subconfig was copied from its reference.
    Created,
    /// The subconfig already existed with the reference's ledger.
    AlreadyInSync,
}

/// Migration status of one tracked file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStatus {
    /// The file.
    pub path: ConfigPath,
    /// Its kind.
    pub kind: ConfigKind,
    /// Number of versions in its ledger.
    pub applied: usize,
    /// Known migrations not yet applied to it, oldest first.
    pub pending: Vec<Version>,
    /// Ledger versions with no known migration.
    pub unknown: Vec<Version>,
}

/// Drives migration operations over one scoreboard tree.
pub struct Orchestrator {
    registry: ConfigRegistry,
    migrations: MigrationRegistry,
    store: StateStore,
    transactions: TransactionManager,
    interrupt: Arc<AtomicBool>,
    log: Arc<dyn Log>,
    dry_run: bool,
    phase: Phase,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("root", &self.registry.root())
            .field("migrations", &self.migrations.len())
            .field("dry_run", &self.dry_run)
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Create an orchestrator for the tree at `root` on the real filesystem.
    #[must_use]
    pub fn new(
        root: &Path,
        settings: &Settings,
        migrations: MigrationRegistry,
        log: Arc<dyn Log>,
    ) -> Self {
        Self::with_fs_ops(root, settings, migrations, log, Arc::new(SystemFileSystemOps))
    }

    /// Create an orchestrator with an injected [`FileSystemOps`].
    #[must_use]
    pub fn with_fs_ops(
        root: &Path,
        settings: &Settings,
        migrations: MigrationRegistry,
        log: Arc<dyn Log>,
        fs: Arc<dyn FileSystemOps>,
    ) -> Self {
        let registry = ConfigRegistry::with_fs_ops(root, settings, Arc::clone(&fs));
        let store = StateStore::new(&registry);
        let interrupt = interrupt::flag();
        let transactions =
            TransactionManager::with_fs_ops(root, fs).with_interrupt_flag(Arc::clone(&interrupt));
        Self {
            registry,
            migrations,
            store,
            transactions,
            interrupt,
            log,
            dry_run: false,
            phase: Phase::Idle,
        }
    }

    /// Abort every step before commit instead of writing.
    #[must_use]
    pub const fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Use `flag` instead of the process-wide Ctrl-C flag.
    #[must_use]
    pub fn with_interrupt_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.transactions = self.transactions.with_interrupt_flag(Arc::clone(&flag));
        self.interrupt = flag;
        self
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// The config registry.
    #[must_use]
    pub const fn registry(&self) -> &ConfigRegistry {
        &self.registry
    }

    /// The known migrations.
    #[must_use]
    pub const fn migrations(&self) -> &MigrationRegistry {
        &self.migrations
    }

    /// Load both ledgers.
    ///
    /// # Errors
    ///
    /// Returns an error if a ledger cannot be read or is corrupt.
    pub fn applied_state(&self) -> Result<AppliedState> {
        Ok(self.store.load()?)
    }

    fn set_phase(&mut self, phase: Phase) {
        if self.phase != phase {
            tracing::debug!("phase: {} -> {phase}", self.phase);
            self.phase = phase;
        }
    }

    fn check_interrupt(&self) -> Result<(), MigrationError> {
        if interrupt::is_set(&self.interrupt) {
            return Err(MigrationError::Interrupted);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // init
    // -----------------------------------------------------------------------

    /// Create every missing reference custom file from its schema, with the
    /// schema's ledger entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the tree cannot be listed or the commit fails.
    pub fn init(&mut self) -> Result<InitReport> {
        self.set_phase(Phase::Resolving);
        let mut state = self.store.load()?;
        let schemas = self.registry.tracked_of(&[ConfigKind::Schema])?;

        let mut report = InitReport::default();
        let mut txn = self.transactions.begin()?;
        self.set_phase(Phase::Applying);
        for schema in schemas {
            let reference = schema.reference_path()?;
            if self.registry.exists(&reference) {
                self.log.debug(&format!("{reference} exists"));
                report.skipped.push(reference);
                continue;
            }
            let content = txn.read(&schema)?;
            txn.stage(&reference, content)?;
            let versions = state.schema.versions(&schema).to_vec();
            state.custom.set(&reference, versions);
            report.created.push(reference);
        }

        if report.created.is_empty() {
            txn.abort();
            self.set_phase(Phase::Done);
            return Ok(report);
        }

        self.store
            .stage_ledger(&mut txn, LedgerKind::Custom, &state.custom)?;
        if self.dry_run {
            for path in &report.created {
                self.log.dry_run(&format!("would create {path}"));
            }
            txn.abort();
            self.set_phase(Phase::RolledBack);
            return Ok(report);
        }

        self.set_phase(Phase::Committing);
        let committed = txn.commit();
        self.finish(committed.map(drop))?;
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // subconfig
    // -----------------------------------------------------------------------

    /// Create the subconfig `target` as a copy of its reference.
    ///
    /// `reference` defaults to `<name>.json` next to `target`.
    ///
    /// # Errors
    ///
    /// - [`MigrationError::Family`] if `target` is not a subconfig name, the
    ///   reference belongs to another family, or the reference or schema is
    ///   missing.
    /// - [`MigrationError::SubconfigExists`] if `target` exists with a ledger
    ///   that differs from the reference's.
    pub fn subconfig(
        &mut self,
        target: &ConfigPath,
        reference: Option<&ConfigPath>,
    ) -> Result<SubconfigOutcome> {
        self.set_phase(Phase::Resolving);
        let reference = resolve_reference(target, reference)?;
        for required in [target.schema_path()?, reference.clone()] {
            if !self.registry.exists(&required) {
                return Err(MigrationError::Family {
                    path: target.to_string(),
                    reason: format!("'{required}' does not exist"),
                }
                .into());
            }
        }

        let mut state = self.store.load()?;
        let expected = state.custom.versions(&reference).to_vec();
        if self.registry.exists(target) {
            if state.custom.versions(target) == expected.as_slice() {
                self.log.info(&format!("{target} is already in sync with {reference}"));
                self.set_phase(Phase::Done);
                return Ok(SubconfigOutcome::AlreadyInSync);
            }
            return Err(MigrationError::SubconfigExists {
                path: target.to_string(),
                reference: reference.to_string(),
            }
            .into());
        }

        let mut txn = self.transactions.begin()?;
        self.set_phase(Phase::Applying);
        let content = txn.read(&reference)?;
        txn.stage(target, content)?;
        state.custom.set(target, expected);
        self.store
            .stage_ledger(&mut txn, LedgerKind::Custom, &state.custom)?;

        if self.dry_run {
            self.log.dry_run(&format!("would create {target} from {reference}"));
            txn.abort();
            self.set_phase(Phase::RolledBack);
            return Ok(SubconfigOutcome::Created);
        }

        self.set_phase(Phase::Committing);
        let committed = txn.commit();
        self.finish(committed.map(drop))?;
        Ok(SubconfigOutcome::Created)
    }

    // -----------------------------------------------------------------------
    // up / down
    // -----------------------------------------------------------------------

    /// Apply pending migrations in version order, at most `step` of them.
    ///
    /// Each migration runs in its own transaction.  The first failure stops
    /// the run; migrations committed before it stay applied.
    ///
    /// In a dry run each step is aborted after reporting what it would
    /// change, so later steps see the files as they are on disk.
    ///
    /// # Errors
    ///
    /// - [`MigrationError::StateCorruption`] if a target already holds a
    ///   later version.
    /// - [`MigrationError::Interrupted`] if Ctrl-C was received.
    /// - Any error raised by a migration body or the commit.
    pub fn up(&mut self, step: Option<usize>) -> Result<Vec<StepReport>> {
        self.set_phase(Phase::Resolving);
        let mut state = self.store.load()?;
        let tracked = self.registry.tracked_files()?;
        let limit = step.unwrap_or(usize::MAX);

        let mut overlay = HashMap::new();
        let mut reports = Vec::new();
        let migrations = self.migrations.clone();
        for migration in migrations.iter() {
            if reports.len() >= limit {
                break;
            }
            self.check_interrupt()?;

            let targets = pending_targets(&state, &tracked, migration.version())?;
            if targets.is_empty() {
                self.log
                    .debug(&format!("{}: nothing to apply", migration.label()));
                continue;
            }
            reports.push(self.run_step(
                migration,
                Direction::Up,
                targets,
                &mut state,
                &mut overlay,
            )?);
        }

        if reports.is_empty() {
            self.log.info("all migrations are applied");
        }
        self.set_phase(Phase::Done);
        Ok(reports)
    }

    /// Roll back the most recently applied migrations, `step` of them
    /// (default 1).
    ///
    /// # Errors
    ///
    /// - [`MigrationError::StateCorruption`] if a ledger holds an unknown
    ///   version or the version is not the trailing entry of a target.
    /// - [`MigrationError::IrreversibleMigration`] if the migration has no
    ///   `down`.
    /// - Any error raised by a migration body or the commit.
    pub fn down(&mut self, step: Option<usize>) -> Result<Vec<StepReport>> {
        self.set_phase(Phase::Resolving);
        let mut state = self.store.load()?;
        let migrations = self.migrations.clone();

        let mut overlay = HashMap::new();
        let mut reports = Vec::new();
        for _ in 0..step.unwrap_or(1) {
            self.check_interrupt()?;

            let Some(version) = state.latest_version() else {
                self.log.info("no applied migrations to roll back");
                break;
            };
            let migration = migrations.get(version).ok_or_else(|| {
                MigrationError::StateCorruption {
                    ledger: "schema/custom".to_string(),
                    path: state
                        .paths_with(version)
                        .first()
                        .map(ToString::to_string)
                        .unwrap_or_default(),
                    reason: format!("applied version {version} has no known migration"),
                }
            })?;
            if !migration.is_reversible() {
                self.set_phase(Phase::RolledBack);
                return Err(migration.irreversible().into());
            }

            let targets = state.paths_with(version);
            reports.push(self.run_step(
                migration,
                Direction::Down,
                targets,
                &mut state,
                &mut overlay,
            )?);
        }

        self.set_phase(Phase::Done);
        Ok(reports)
    }

    /// Run one migration over `targets` in its own transaction.
    ///
    /// On success `state` reflects the new ledgers, also in a dry run so the
    /// next step is computed as if this one had been applied.  In a dry run
    /// the documents this step would write are added to `overlay`, which the
    /// next step reads in place of disk.
    fn run_step(
        &mut self,
        migration: &Migration,
        direction: Direction,
        targets: Vec<ConfigPath>,
        state: &mut AppliedState,
        overlay: &mut HashMap<ConfigPath, Value>,
    ) -> Result<StepReport> {
        let label = migration.label();
        let verb = match direction {
            Direction::Up => "Applying",
            Direction::Down => "Rolling back",
        };
        self.log
            .stage(&format!("{verb} {label} ({} files)", targets.len()));

        let mut next = state.clone();
        for target in &targets {
            match direction {
                Direction::Up => next.record(target, migration.version())?,
                Direction::Down => next.rollback(target, migration.version())?,
            }
        }

        let mut txn = self.transactions.begin()?;
        txn.overlay(overlay.iter().map(|(path, doc)| (path.clone(), doc.clone())));
        self.set_phase(Phase::Applying);
        let outcome = {
            let mut ctx = MigrationContext::new(&mut txn, &self.registry)
                .with_targets(targets.iter().cloned());
            match direction {
                Direction::Up => migration.run_up(&mut ctx),
                Direction::Down => migration.run_down(&mut ctx),
            }
        };
        if let Err(e) = outcome {
            txn.abort();
            return Err(self.fail_step(&label, e));
        }
        if let Err(e) = self.store.stage(&mut txn, &next) {
            txn.abort();
            return Err(self.fail_step(&label, e.into()));
        }

        let changed = if self.dry_run {
            let changed = txn.changed_paths();
            overlay.extend(txn.abort_with_staged());
            let changed = changed.map_err(|e| self.fail_step(&label, e.into()))?;
            for path in &changed {
                self.log.dry_run(&format!("would write {path}"));
            }
            self.log.record_step(
                &label,
                StepStatus::DryRun,
                Some(&format!("{} files", changed.len())),
            );
            self.set_phase(Phase::RolledBack);
            changed
        } else {
            self.set_phase(Phase::Committing);
            let changed = txn.commit().map_err(|e| self.fail_step(&label, e.into()))?;
            let status = match direction {
                Direction::Up => StepStatus::Applied,
                Direction::Down => StepStatus::RolledBack,
            };
            self.log
                .record_step(&label, status, Some(&format!("{} files", changed.len())));
            self.set_phase(Phase::Done);
            changed
        };

        *state = next;
        Ok(StepReport {
            version: migration.version(),
            identifier: migration.identifier().to_string(),
            targets,
            changed,
        })
    }

    fn fail_step(&mut self, label: &str, error: anyhow::Error) -> anyhow::Error {
        self.set_phase(Phase::RolledBack);
        self.log.error(&format!("{label}: {error:#}"));
        self.log
            .record_step(label, StepStatus::Failed, Some(&format!("{error:#}")));
        error.context(format!("migration {label} failed"))
    }

    fn finish(&mut self, committed: Result<(), MigrationError>) -> Result<()> {
        match committed {
            Ok(()) => {
                self.set_phase(Phase::Done);
                Ok(())
            }
            Err(e) => {
                self.set_phase(Phase::RolledBack);
                Err(e.into())
            }
        }
    }

    // -----------------------------------------------------------------------
    // reset / status
    // -----------------------------------------------------------------------

    /// Delete every custom file and the custom ledger.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::ResetNotConfirmed`] unless `confirmed`, or an
    /// error if a file cannot be removed.
    pub fn reset(&mut self, confirmed: bool) -> Result<Vec<ConfigPath>> {
        if !confirmed {
            return Err(MigrationError::ResetNotConfirmed.into());
        }
        self.set_phase(Phase::Resolving);
        if self.dry_run {
            let customs = self
                .registry
                .tracked_of(&[ConfigKind::Reference, ConfigKind::Subconfig])?;
            for path in &customs {
                self.log.dry_run(&format!("would remove {path}"));
            }
            self.log.dry_run(&format!(
                "would remove {}",
                self.store.path(LedgerKind::Custom)
            ));
            self.set_phase(Phase::Done);
            return Ok(customs);
        }

        self.set_phase(Phase::Committing);
        let removed = self
            .store
            .reset(&self.registry)
            .context("reset stopped partway; run it again to finish")?;
        self.set_phase(Phase::Done);
        Ok(removed)
    }

    /// Migration status of every tracked file, sorted by path.
    ///
    /// # Errors
    ///
    /// Returns an error if the tree cannot be listed or a ledger is corrupt.
    pub fn status(&mut self) -> Result<Vec<FileStatus>> {
        self.set_phase(Phase::Resolving);
        let state = self.store.load()?;
        let mut out = Vec::new();
        for path in self.registry.tracked_files()? {
            let kind = path.kind()?;
            let applied = state.versions(&path)?;
            out.push(FileStatus {
                kind,
                applied: applied.len(),
                pending: self
                    .migrations
                    .pending(applied)
                    .map(Migration::version)
                    .collect(),
                unknown: applied
                    .iter()
                    .copied()
                    .filter(|v| self.migrations.get(*v).is_none())
                    .collect(),
                path,
            });
        }
        self.set_phase(Phase::Done);
        Ok(out)
    }
}

/// The reference for a new subconfig: `explicit`, or `<name>.json` next to
/// `target`.
fn resolve_reference(
    target: &ConfigPath,
    explicit: Option<&ConfigPath>,
) -> Result<ConfigPath, MigrationError> {
    if target.kind()? != ConfigKind::Subconfig {
        return Err(MigrationError::Family {
            path: target.to_string(),
            reason: "subconfigs must be named <name>.<subname>.json".to_string(),
        });
    }
    let inferred = target.reference_path()?;
    match explicit {
        None => Ok(inferred),
        Some(reference) if *reference == inferred => Ok(inferred),
        Some(reference) => Err(MigrationError::Family {
            path: target.to_string(),
            reason: format!("'{reference}' is not the reference of this family; expected '{inferred}'"),
        }),
    }
}

/// Tracked files that still need `version`.
fn pending_targets(
    state: &AppliedState,
    tracked: &[ConfigPath],
    version: Version,
) -> Result<Vec<ConfigPath>, MigrationError> {
    let mut targets = Vec::new();
    for path in tracked {
        let applied = state.versions(path)?;
        if applied.contains(&version) {
            continue;
        }
        if let Some(&last) = applied.last()
            && last > version
        {
            return Err(MigrationError::StateCorruption {
                ledger: LedgerKind::for_path(path)?.to_string(),
                path: path.to_string(),
                reason: format!("{version} is pending but {last} is already applied"),
            });
        }
        targets.push(path.clone());
    }
    Ok(targets)
}
