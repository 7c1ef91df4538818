//! Ordered, validated set of migrations.
use std::collections::HashSet;

use super::{Migration, Version};
use crate::error::MigrationError;

/// Migrations sorted by ascending version, with unique versions and
/// identifiers.
#[derive(Debug, Clone, Default)]
pub struct MigrationRegistry {
    migrations: Vec<Migration>,
}

impl MigrationRegistry {
    /// Validate and sort `migrations`.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::DuplicateMigration`] if two migrations share
    /// a version or an identifier.
    pub fn new(mut migrations: Vec<Migration>) -> Result<Self, MigrationError> {
        let mut versions = HashSet::new();
        let mut identifiers = HashSet::new();
        for migration in &migrations {
            if !versions.insert(migration.version()) {
                return Err(MigrationError::DuplicateMigration(format!(
                    "version {}",
                    migration.version()
                )));
            }
            if !identifiers.insert(migration.identifier()) {
                return Err(MigrationError::DuplicateMigration(format!(
                    "identifier '{}'",
                    migration.identifier()
                )));
            }
        }
        migrations.sort_by_key(Migration::version);
        Ok(Self { migrations })
    }

    /// The migrations compiled into this binary.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::DuplicateMigration`] if `src/migrate/`
    /// holds two sources with the same identifier.
    pub fn builtin() -> Result<Self, MigrationError> {
        Self::new(crate::migrate::builtin_migrations())
    }

    /// All migrations, oldest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Migration> {
        self.migrations.iter()
    }

    /// Number of migrations.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.migrations.len()
    }

    /// Whether there are no migrations.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    /// The migration with `version`.
    #[must_use]
    pub fn get(&self, version: Version) -> Option<&Migration> {
        self.migrations
            .binary_search_by_key(&version, Migration::version)
            .ok()
            .and_then(|i| self.migrations.get(i))
    }

    /// Whether a migration named `identifier` exists.
    #[must_use]
    pub fn contains_identifier(&self, identifier: &str) -> bool {
        self.migrations.iter().any(|m| m.identifier() == identifier)
    }

    /// Highest known version.
    #[must_use]
    pub fn latest_version(&self) -> Option<Version> {
        self.migrations.last().map(Migration::version)
    }

    /// Migrations not present in `applied`, oldest first.
    pub fn pending<'a>(&'a self, applied: &'a [Version]) -> impl Iterator<Item = &'a Migration> {
        self.migrations
            .iter()
            .filter(move |m| !applied.contains(&m.version()))
    }
}
