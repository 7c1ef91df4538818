//! Domain-specific error types for the migration engine.
//!
//! This module provides a structured error hierarchy using [`thiserror`].
//! Library modules return typed errors ([`MigrationError`],
//! [`SettingsError`]) while migration bodies and command handlers at the CLI
//! boundary work with [`anyhow::Error`] via the standard `?` operator.
//!
//! # Error taxonomy
//!
//! ```text
//! MigrationError
//! ├── key helpers    : KeyAlreadyExists, MissingParent, MissingKey,
//! │                    DestinationExists, NotAnObject, InvalidKeypath
//! ├── families       : Family, SubconfigExists
//! ├── transactions   : TransactionInProgress, TransactionNotOpen,
//! │                    TransactionFailed, CommitFailed, Interrupted
//! ├── migrations     : IrreversibleMigration, InvalidIdentifier,
//! │                    DuplicateMigration
//! ├── ledgers        : StateCorruption
//! ├── commands       : ResetNotConfirmed
//! └── I/O            : Io, Json
//! ```

use thiserror::Error;

use crate::migrations::Version;

/// Errors raised by the migration engine.
///
/// Everything raised inside a migration's `up`/`down` aborts the enclosing
/// transaction; see [`MigrationError::is_fatal`] for the kinds that require
/// operator intervention.
#[derive(Error, Debug)]
pub enum MigrationError {
    /// `add_key` found a value already present at the leaf.
    #[error("<{path}> keypath '{key}' already exists")]
    KeyAlreadyExists {
        /// Config file the helper was applied to.
        path: String,
        /// Keypath that was being added.
        key: String,
    },

    /// An intermediate segment of the keypath is absent.
    #[error("<{path}> parent of keypath '{key}' does not exist")]
    MissingParent {
        /// Config file the helper was applied to.
        path: String,
        /// Keypath whose parent is missing.
        key: String,
    },

    /// The source leaf of a move or rename is absent.
    #[error("<{path}> keypath '{key}' does not exist")]
    MissingKey {
        /// Config file the helper was applied to.
        path: String,
        /// Keypath that was expected to exist.
        key: String,
    },

    /// The destination of a move or rename already holds a value.
    #[error("<{path}> destination keypath '{key}' already exists")]
    DestinationExists {
        /// Config file the helper was applied to.
        path: String,
        /// Destination keypath.
        key: String,
    },

    /// A keypath segment resolved to a non-object value.
    #[error("<{path}> segment '{segment}' of keypath '{key}' is not an object")]
    NotAnObject {
        /// Config file the helper was applied to.
        path: String,
        /// Full keypath.
        key: String,
        /// Segment holding the non-object value.
        segment: String,
    },

    /// The keypath string is malformed (empty, or has empty segments).
    #[error("invalid keypath '{0}'")]
    InvalidKeypath(String),

    /// A schema/custom/subconfig relationship could not be resolved.
    #[error("cannot resolve config family for '{path}': {reason}")]
    Family {
        /// Path that was being resolved.
        path: String,
        /// Why resolution failed.
        reason: String,
    },

    /// A subconfig already exists with a migration history that differs from
    /// its reference.
    #[error(
        "subconfig '{path}' already exists and its migration history differs from '{reference}'; remove it and try again"
    )]
    SubconfigExists {
        /// Existing subconfig path.
        path: String,
        /// Reference custom file.
        reference: String,
    },

    /// A transaction was started while another one is open.
    #[error("a transaction is already in progress; nested transactions are not supported")]
    TransactionInProgress,

    /// A transaction was used after it was committed or aborted.
    #[error("transaction is not open")]
    TransactionNotOpen,

    /// A scope holding a document for update unwound; the transaction can
    /// only be aborted.
    #[error("transaction was marked failed and cannot be committed")]
    TransactionFailed,

    /// Swapping a staged file into place failed; already-swapped files were
    /// restored.
    #[error("commit failed on {path}: {source}")]
    CommitFailed {
        /// File whose swap failed.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// An interrupt arrived before the commit swap phase started.
    #[error("interrupted before commit; no files were changed")]
    Interrupted,

    /// A migration without a `down` step was asked to roll back.
    #[error("migration {version} ({identifier}) is irreversible")]
    IrreversibleMigration {
        /// Version of the migration.
        version: Version,
        /// Identifier of the migration.
        identifier: String,
    },

    /// A ledger disagrees with the migration being applied or undone.
    #[error("{ledger} ledger is inconsistent for '{path}': {reason}")]
    StateCorruption {
        /// Which ledger (`schema` or `custom`).
        ledger: String,
        /// Config path whose entry is inconsistent.
        path: String,
        /// Human-readable description of the mismatch.
        reason: String,
    },

    /// A migration name is not a valid bare identifier.
    #[error("migration name '{0}' must be a valid identifier")]
    InvalidIdentifier(String),

    /// Two migrations share a version or identifier.
    #[error("duplicate migration {0}")]
    DuplicateMigration(String),

    /// Refused to reset without explicit confirmation.
    #[error("reset requires explicit confirmation")]
    ResetNotConfirmed,

    /// An I/O error occurred while reading or writing a file.
    #[error("IO error on {path}: {source}")]
    Io {
        /// Path of the file.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A config or ledger file is not valid JSON.
    #[error("invalid JSON in {path}: {source}")]
    Json {
        /// Path of the file.
        path: String,
        /// Underlying parse error.
        source: serde_json::Error,
    },
}

impl MigrationError {
    /// Whether this error is a non-recoverable process condition that needs
    /// an operator to inspect the ledgers (and possibly `reset`).
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::TransactionInProgress | Self::StateCorruption { .. }
        )
    }

    pub(crate) fn io(path: impl std::fmt::Display, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_string(),
            source,
        }
    }
}

/// Errors that arise from loading `migrate.toml`.
#[derive(Error, Debug)]
pub enum SettingsError {
    /// The settings file could not be read.
    #[error("IO error reading settings file {path}: {source}")]
    Io {
        /// Path to the file that could not be read.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The settings file is not valid TOML for the expected shape.
    #[error("Invalid TOML in {path}: {message}")]
    InvalidSyntax {
        /// Path to the settings file.
        path: String,
        /// Parser message.
        message: String,
    },

    /// A configured directory escapes the root.
    #[error("Invalid setting '{key}': {message}")]
    InvalidValue {
        /// Setting name.
        key: String,
        /// Why it is invalid.
        message: String,
    },
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use std::io;

    // -----------------------------------------------------------------------
    // MigrationError
    // -----------------------------------------------------------------------

    #[test]
    fn key_already_exists_display_names_path_and_key() {
        let e = MigrationError::KeyAlreadyExists {
            path: "config.json".to_string(),
            key: "weather.pregame".to_string(),
        };
        assert_eq!(
            e.to_string(),
            "<config.json> keypath 'weather.pregame' already exists"
        );
    }

    #[test]
    fn missing_parent_display() {
        let e = MigrationError::MissingParent {
            path: "coordinates/w64h32.json".to_string(),
            key: "teams.name.full".to_string(),
        };
        assert_eq!(
            e.to_string(),
            "<coordinates/w64h32.json> parent of keypath 'teams.name.full' does not exist"
        );
    }

    #[test]
    fn irreversible_display() {
        let e = MigrationError::IrreversibleMigration {
            version: 1_764_053_783,
            identifier: "v8_config_to_v9".to_string(),
        };
        assert_eq!(
            e.to_string(),
            "migration 1764053783 (v8_config_to_v9) is irreversible"
        );
    }

    #[test]
    fn state_corruption_display() {
        let e = MigrationError::StateCorruption {
            ledger: "custom".to_string(),
            path: "config.json".to_string(),
            reason: "last applied version is 2, expected 3".to_string(),
        };
        assert!(e.to_string().contains("custom ledger"));
        assert!(e.to_string().contains("config.json"));
    }

    #[test]
    fn commit_failed_has_source() {
        use std::error::Error as StdError;
        let e = MigrationError::CommitFailed {
            path: "config.json".to_string(),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(e.source().is_some());
    }

    #[test]
    fn fatal_kinds() {
        assert!(MigrationError::TransactionInProgress.is_fatal());
        assert!(
            MigrationError::StateCorruption {
                ledger: "schema".to_string(),
                path: "config.schema.json".to_string(),
                reason: "x".to_string(),
            }
            .is_fatal()
        );
        assert!(!MigrationError::TransactionFailed.is_fatal());
        assert!(
            !MigrationError::KeyAlreadyExists {
                path: "a.json".to_string(),
                key: "k".to_string(),
            }
            .is_fatal()
        );
    }

    // -----------------------------------------------------------------------
    // SettingsError
    // -----------------------------------------------------------------------

    #[test]
    fn settings_error_invalid_syntax_display() {
        let e = SettingsError::InvalidSyntax {
            path: "migrate.toml".to_string(),
            message: "expected `=`".to_string(),
        };
        assert_eq!(e.to_string(), "Invalid TOML in migrate.toml: expected `=`");
    }

    #[test]
    fn settings_error_io_display() {
        let e = SettingsError::Io {
            path: "/repo/migrate.toml".to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, "no such file"),
        };
        assert!(e.to_string().contains("/repo/migrate.toml"));
    }

    // -----------------------------------------------------------------------
    // Send + Sync bounds and anyhow conversion
    // -----------------------------------------------------------------------

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn all_error_types_are_send_sync() {
        assert_send_sync::<MigrationError>();
        assert_send_sync::<SettingsError>();
    }

    #[test]
    fn migration_error_round_trips_through_anyhow() {
        let e: anyhow::Error = MigrationError::TransactionInProgress.into();
        assert!(matches!(
            e.downcast_ref::<MigrationError>(),
            Some(MigrationError::TransactionInProgress)
        ));
    }
}
