//! Applied-migration ledgers.
//!
//! Two JSON files under the state directory record, per config path, the
//! versions applied to it in order:
//!
//! ```json
//! {
//!   "coordinates/w64h32.schema.json": [1764053783, 1764056138]
//! }
//! ```
//!
//! `schema-status.json` covers schema files and is meant to be committed with
//! them; `custom-status.json` covers the user's custom files and stays local.
//! Ledgers are only ever written through a [`Transaction`], staged after the
//! config files they describe.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{ConfigKind, ConfigPath, ConfigRegistry};
use crate::error::MigrationError;
use crate::migrations::Version;
use crate::operations::FileSystemOps;
use crate::transaction::Transaction;

/// Which of the two ledgers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LedgerKind {
    /// `schema-status.json`.
    Schema,
    /// `custom-status.json`.
    Custom,
}

impl LedgerKind {
    /// The ledger that tracks files of `kind`.
    #[must_use]
    pub const fn for_kind(kind: ConfigKind) -> Self {
        if kind.is_schema() {
            Self::Schema
        } else {
            Self::Custom
        }
    }

    /// The ledger that tracks `path`.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::Family`] if `path` is not a config name.
    pub fn for_path(path: &ConfigPath) -> Result<Self, MigrationError> {
        Ok(Self::for_kind(path.kind()?))
    }
}

impl fmt::Display for LedgerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Schema => "schema",
            Self::Custom => "custom",
        })
    }
}

/// Mapping from config path to the ordered versions applied to it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ledger(BTreeMap<ConfigPath, Vec<Version>>);

impl Ledger {
    /// Versions applied to `path`, oldest first.
    #[must_use]
    pub fn versions(&self, path: &ConfigPath) -> &[Version] {
        self.0.get(path).map_or(&[], Vec::as_slice)
    }

    /// Whether `version` has been applied to `path`.
    #[must_use]
    pub fn contains(&self, path: &ConfigPath, version: Version) -> bool {
        self.versions(path).contains(&version)
    }

    /// The most recent version applied to `path`.
    #[must_use]
    pub fn last(&self, path: &ConfigPath) -> Option<Version> {
        self.versions(path).last().copied()
    }

    /// The highest version applied to any path.
    #[must_use]
    pub fn latest(&self) -> Option<Version> {
        self.0.values().filter_map(|v| v.last().copied()).max()
    }

    /// Paths with at least one applied version.
    pub fn paths(&self) -> impl Iterator<Item = &ConfigPath> {
        self.0.keys()
    }

    /// Whether the ledger has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Append `version` to `path`'s sequence.
    pub fn record(&mut self, path: &ConfigPath, version: Version) {
        self.0.entry(path.clone()).or_default().push(version);
    }

    /// Remove `version` from the end of `path`'s sequence.
    ///
    /// An emptied entry is dropped from the ledger.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::StateCorruption`] if the trailing entry is
    /// not `version`.
    pub fn rollback(
        &mut self,
        kind: LedgerKind,
        path: &ConfigPath,
        version: Version,
    ) -> Result<(), MigrationError> {
        let last = self.last(path);
        if last != Some(version) {
            return Err(MigrationError::StateCorruption {
                ledger: kind.to_string(),
                path: path.to_string(),
                reason: match last {
                    Some(last) => {
                        format!("last applied version is {last}, cannot roll back {version}")
                    }
                    None => format!("no versions recorded, cannot roll back {version}"),
                },
            });
        }
        if let Some(versions) = self.0.get_mut(path) {
            versions.pop();
            if versions.is_empty() {
                self.0.remove(path);
            }
        }
        Ok(())
    }

    /// Replace `path`'s sequence; an empty sequence removes the entry.
    pub fn set(&mut self, path: &ConfigPath, versions: Vec<Version>) {
        if versions.is_empty() {
            self.0.remove(path);
        } else {
            self.0.insert(path.clone(), versions);
        }
    }
}

/// Both ledgers, as loaded at the start of an operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppliedState {
    /// Ledger for schema files.
    pub schema: Ledger,
    /// Ledger for custom files.
    pub custom: Ledger,
}

impl AppliedState {
    /// The ledger of the given kind.
    #[must_use]
    pub const fn ledger(&self, kind: LedgerKind) -> &Ledger {
        match kind {
            LedgerKind::Schema => &self.schema,
            LedgerKind::Custom => &self.custom,
        }
    }

    /// Mutable access to the ledger of the given kind.
    pub const fn ledger_mut(&mut self, kind: LedgerKind) -> &mut Ledger {
        match kind {
            LedgerKind::Schema => &mut self.schema,
            LedgerKind::Custom => &mut self.custom,
        }
    }

    /// Versions applied to `path`, looked up in the right ledger.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::Family`] if `path` is not a config name.
    pub fn versions(&self, path: &ConfigPath) -> Result<&[Version], MigrationError> {
        Ok(self.ledger(LedgerKind::for_path(path)?).versions(path))
    }

    /// `record` on the right ledger for `path`.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::Family`] if `path` is not a config name.
    pub fn record(&mut self, path: &ConfigPath, version: Version) -> Result<(), MigrationError> {
        self.ledger_mut(LedgerKind::for_path(path)?).record(path, version);
        Ok(())
    }

    /// `rollback` on the right ledger for `path`.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::StateCorruption`] if the trailing entry is
    /// not `version`.
    pub fn rollback(&mut self, path: &ConfigPath, version: Version) -> Result<(), MigrationError> {
        let kind = LedgerKind::for_path(path)?;
        self.ledger_mut(kind).rollback(kind, path, version)
    }

    /// Highest version applied to any file in either ledger.
    #[must_use]
    pub fn latest_version(&self) -> Option<Version> {
        self.schema.latest().max(self.custom.latest())
    }

    /// Every path in either ledger that has `version` applied.
    #[must_use]
    pub fn paths_with(&self, version: Version) -> Vec<ConfigPath> {
        let mut out: Vec<ConfigPath> = self
            .schema
            .paths()
            .chain(self.custom.paths())
            .filter(|p| {
                self.schema.contains(p, version) || self.custom.contains(p, version)
            })
            .cloned()
            .collect();
        out.sort();
        out.dedup();
        out
    }
}

/// Loads and stages the two ledger files.
#[derive(Debug, Clone)]
pub struct StateStore {
    root: PathBuf,
    schema_path: ConfigPath,
    custom_path: ConfigPath,
    fs: Arc<dyn FileSystemOps>,
}

impl StateStore {
    /// Create a store for the ledgers of `registry`'s root.
    #[must_use]
    pub fn new(registry: &ConfigRegistry) -> Self {
        Self {
            root: registry.root().to_path_buf(),
            schema_path: registry.schema_ledger_path(),
            custom_path: registry.custom_ledger_path(),
            fs: Arc::clone(registry.fs()),
        }
    }

    /// Path of the ledger file of the given kind.
    #[must_use]
    pub const fn path(&self, kind: LedgerKind) -> &ConfigPath {
        match kind {
            LedgerKind::Schema => &self.schema_path,
            LedgerKind::Custom => &self.custom_path,
        }
    }

    /// Load both ledgers; a missing file is an empty ledger.
    ///
    /// # Errors
    ///
    /// Returns an error if a ledger exists but cannot be read or parsed.
    pub fn load(&self) -> Result<AppliedState, MigrationError> {
        Ok(AppliedState {
            schema: self.load_ledger(LedgerKind::Schema)?,
            custom: self.load_ledger(LedgerKind::Custom)?,
        })
    }

    fn load_ledger(&self, kind: LedgerKind) -> Result<Ledger, MigrationError> {
        let path = self.path(kind);
        let abs = path.to_path(&self.root);
        if !self.fs.exists(&abs) {
            return Ok(Ledger::default());
        }
        let bytes = self.fs.read(&abs).map_err(|e| MigrationError::io(path, e))?;
        let ledger: Ledger =
            serde_json::from_slice(&bytes).map_err(|source| MigrationError::Json {
                path: path.to_string(),
                source,
            })?;
        for (file, versions) in &ledger.0 {
            if versions.windows(2).any(|w| matches!(w, [a, b] if a >= b)) {
                return Err(MigrationError::StateCorruption {
                    ledger: kind.to_string(),
                    path: file.to_string(),
                    reason: "versions are not strictly ascending".to_string(),
                });
            }
        }
        tracing::debug!("loaded {kind} ledger from {path} ({} entries)", ledger.0.len());
        Ok(ledger)
    }

    /// Stage both ledgers into `txn`.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction is closed.
    pub fn stage(&self, txn: &mut Transaction, state: &AppliedState) -> Result<(), MigrationError> {
        self.stage_ledger(txn, LedgerKind::Schema, &state.schema)?;
        self.stage_ledger(txn, LedgerKind::Custom, &state.custom)
    }

    /// Stage one ledger into `txn`.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction is closed.
    pub fn stage_ledger(
        &self,
        txn: &mut Transaction,
        kind: LedgerKind,
        ledger: &Ledger,
    ) -> Result<(), MigrationError> {
        let path = self.path(kind);
        let value = serde_json::to_value(ledger).map_err(|source| MigrationError::Json {
            path: path.to_string(),
            source,
        })?;
        txn.stage(path, value)
    }

    /// Delete every custom config file, then the custom ledger.
    ///
    /// Schema files and the schema ledger are left alone.  Returns the
    /// removed config paths.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be removed; files removed before the
    /// failure stay removed and the custom ledger is kept.
    pub fn reset(&self, registry: &ConfigRegistry) -> Result<Vec<ConfigPath>, MigrationError> {
        let customs = registry.tracked_of(&[ConfigKind::Reference, ConfigKind::Subconfig])?;
        for path in &customs {
            let abs = path.to_path(&self.root);
            self.fs.remove(&abs).map_err(|e| MigrationError::io(path, e))?;
            tracing::debug!("removed {path}");
        }
        let ledger = self.custom_path.to_path(&self.root);
        if self.fs.exists(&ledger) {
            self.fs
                .remove(&ledger)
                .map_err(|e| MigrationError::io(&self.custom_path, e))?;
            tracing::debug!("removed {}", self.custom_path);
        }
        Ok(customs)
    }
}
