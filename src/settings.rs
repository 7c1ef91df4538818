//! Engine settings loaded from an optional `migrate.toml` at the root.
//!
//! ```toml
//! tracked_dirs = [".", "colors", "coordinates"]
//! ignore = ["emulator_config.json"]
//! state_dir = "migrations"
//! migrations_dir = "migrator/src/migrate"
//! ```
//!
//! Every key is optional; a missing file yields [`Settings::default`].
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::path::{Component, Path, PathBuf};

use crate::error::SettingsError;

/// Name of the settings file looked up in the root directory.
pub const SETTINGS_FILE: &str = "migrate.toml";

/// Name of the schema ledger file inside the state directory.
pub const SCHEMA_LEDGER_FILE: &str = "schema-status.json";

/// Name of the custom ledger file inside the state directory.
pub const CUSTOM_LEDGER_FILE: &str = "custom-status.json";

/// Resolved engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Root-relative directories scanned for config files (not recursive).
    pub tracked_dirs: Vec<String>,
    /// File names never treated as managed configs.
    pub ignore: Vec<String>,
    /// Root-relative directory holding the two ledger files.
    pub state_dir: String,
    /// Directory `generate` writes migration sources into.  Relative paths
    /// resolve against the root; unset means this crate's `src/migrate/`.
    pub migrations_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tracked_dirs: vec![".".into(), "colors".into(), "coordinates".into()],
            ignore: vec!["emulator_config.json".into()],
            state_dir: "migrations".into(),
            migrations_dir: None,
        }
    }
}

impl Settings {
    /// Load `migrate.toml` from `root`, falling back to defaults when absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed, or if
    /// a configured directory escapes the root.
    pub fn load(root: &Path) -> Result<Self, SettingsError> {
        let settings: Self = load_config(&root.join(SETTINGS_FILE))?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), SettingsError> {
        for dir in self.tracked_dirs.iter().chain(std::iter::once(&self.state_dir)) {
            let escapes = Path::new(dir)
                .components()
                .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)));
            if escapes {
                return Err(SettingsError::InvalidValue {
                    key: if *dir == self.state_dir {
                        "state_dir".into()
                    } else {
                        "tracked_dirs".into()
                    },
                    message: format!("'{dir}' must be a relative path inside the root"),
                });
            }
        }
        Ok(())
    }

    /// Directory that `generate` writes new migration sources into.
    #[must_use]
    pub fn migrations_dir(&self, root: &Path) -> PathBuf {
        self.migrations_dir.as_ref().map_or_else(
            || Path::new(env!("CARGO_MANIFEST_DIR")).join("src").join("migrate"),
            |dir| root.join(dir),
        )
    }
}

/// Deserialize a TOML file into `T`, or `T`'s empty-document value when the
/// file does not exist.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_config<T: DeserializeOwned>(path: &Path) -> Result<T, SettingsError> {
    let content = if path.exists() {
        std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.display().to_string(),
            source,
        })?
    } else {
        String::new()
    };

    toml::from_str(&content).map_err(|e| SettingsError::InvalidSyntax {
        path: path.display().to_string(),
        message: e.message().to_string(),
    })
}
