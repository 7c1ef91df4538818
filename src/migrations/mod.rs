//! Migration definitions and the registry that orders them.
//!
//! A migration is a plain record: a version, an identifier and a pair of
//! function pointers.  The migrations shipped with this crate live one per
//! file under `src/migrate/` as `<version>_<identifier>.rs`; `build.rs`
//! turns that directory into [`crate::migrate::builtin_migrations`].
pub mod generate;
pub mod registry;
pub mod source;

pub use registry::MigrationRegistry;

use std::fmt;

use crate::context::MigrationContext;
use crate::error::MigrationError;

/// A migration version: the UNIX timestamp at which it was generated.
pub type Version = u64;

/// Body of a migration direction.
pub type MigrationFn = fn(&mut MigrationContext<'_>) -> anyhow::Result<()>;

/// One schema change and, optionally, its inverse.
#[derive(Clone)]
pub struct Migration {
    version: Version,
    identifier: String,
    up: MigrationFn,
    down: Option<MigrationFn>,
}

impl Migration {
    /// An irreversible migration.
    #[must_use]
    pub fn new(version: Version, identifier: impl Into<String>, up: MigrationFn) -> Self {
        Self {
            version,
            identifier: identifier.into(),
            up,
            down: None,
        }
    }

    /// Attach the inverse of `up`.
    #[must_use]
    pub fn with_down(mut self, down: MigrationFn) -> Self {
        self.down = Some(down);
        self
    }

    /// Global ordering key.
    #[must_use]
    pub const fn version(&self) -> Version {
        self.version
    }

    /// Human-readable name.
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Whether a `down` is defined.
    #[must_use]
    pub const fn is_reversible(&self) -> bool {
        self.down.is_some()
    }

    /// `<version>_<identifier>`, the form used in file names and logs.
    #[must_use]
    pub fn label(&self) -> String {
        format!("{}_{}", self.version, self.identifier)
    }

    /// Run the forward direction.
    ///
    /// # Errors
    ///
    /// Propagates whatever the migration body returns.
    pub fn run_up(&self, ctx: &mut MigrationContext<'_>) -> anyhow::Result<()> {
        (self.up)(ctx)
    }

    /// Run the reverse direction.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::IrreversibleMigration`] if no `down` is
    /// defined, otherwise whatever the migration body returns.
    pub fn run_down(&self, ctx: &mut MigrationContext<'_>) -> anyhow::Result<()> {
        match self.down {
            Some(down) => down(ctx),
            None => Err(self.irreversible().into()),
        }
    }

    pub(crate) fn irreversible(&self) -> MigrationError {
        MigrationError::IrreversibleMigration {
            version: self.version,
            identifier: self.identifier.clone(),
        }
    }
}

impl fmt::Debug for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migration")
            .field("version", &self.version)
            .field("identifier", &self.identifier)
            .field("reversible", &self.is_reversible())
            .finish()
    }
}

impl fmt::Display for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.identifier, self.version)
    }
}
