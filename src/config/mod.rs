//! Config registry: classifies JSON config paths and resolves families.
//!
//! Every managed file lives under a tracked directory and is named
//! `<name>.schema.json` (schema), `<name>.json` (reference custom file) or
//! `<name>.<subname>.json` (subconfig).  The three together form a family
//! keyed by `<dir>/<name>`.
pub mod keypath;

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::error::MigrationError;
use crate::operations::{FileSystemOps, SystemFileSystemOps};
use crate::settings::{CUSTOM_LEDGER_FILE, SCHEMA_LEDGER_FILE, Settings};

const JSON_EXT: &str = ".json";
const SCHEMA_SUFFIX: &str = ".schema";

/// Root-relative, forward-slash path identifying a config file.
///
/// This is the key used in both ledgers.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigPath(String);

impl ConfigPath {
    /// Normalize `path` to forward slashes without a leading `./`.
    pub fn new(path: impl AsRef<str>) -> Self {
        let mut normalized = path.as_ref().replace('\\', "/");
        while let Some(rest) = normalized.strip_prefix("./") {
            normalized = rest.to_string();
        }
        Self(normalized)
    }

    /// Interpret a path given on the command line.
    ///
    /// Absolute paths must lie under `root`.  Relative paths are taken from
    /// `cwd` when it is inside `root`, and from `root` otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::Family`] if the path resolves outside
    /// `root`, to `root` itself, or is not valid UTF-8.
    pub fn from_argument(arg: &Path, root: &Path, cwd: &Path) -> Result<Self, MigrationError> {
        let root = lexical(&cwd.join(root));
        let cwd = lexical(cwd);
        let resolved = if arg.is_absolute() {
            lexical(arg)
        } else if cwd.starts_with(&root) {
            lexical(&cwd.join(arg))
        } else {
            lexical(&root.join(arg))
        };
        let outside = || MigrationError::Family {
            path: arg.display().to_string(),
            reason: format!("not a file under '{}'", root.display()),
        };
        let relative = resolved.strip_prefix(&root).map_err(|_| outside())?;
        let parts = relative
            .components()
            .map(|part| part.as_os_str().to_str())
            .collect::<Option<Vec<_>>>()
            .filter(|parts| !parts.is_empty())
            .ok_or_else(outside)?;
        Ok(Self::new(parts.join("/")))
    }

    /// Join a root-relative directory and a file name.
    #[must_use]
    pub fn in_dir(dir: &str, file_name: &str) -> Self {
        let dir = dir.trim_end_matches('/');
        if dir.is_empty() || dir == "." {
            Self::new(file_name)
        } else {
            Self::new(format!("{dir}/{file_name}"))
        }
    }

    /// The path as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The final path component.
    #[must_use]
    pub fn file_name(&self) -> &str {
        self.0.rsplit_once('/').map_or(self.0.as_str(), |(_, name)| name)
    }

    /// The directory portion, `"."` for files at the root.
    #[must_use]
    pub fn parent(&self) -> &str {
        self.0.rsplit_once('/').map_or(".", |(dir, _)| dir)
    }

    /// A file with `file_name` in the same directory.
    #[must_use]
    pub fn sibling(&self, file_name: &str) -> Self {
        Self::in_dir(self.parent(), file_name)
    }

    /// The absolute filesystem path under `root`.
    #[must_use]
    pub fn to_path(&self, root: &Path) -> PathBuf {
        self.0.split('/').fold(root.to_path_buf(), |acc, part| acc.join(part))
    }

    /// Classify this path.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::Family`] if the file name is not a JSON
    /// config name.
    pub fn kind(&self) -> Result<ConfigKind, MigrationError> {
        let stem = self.stem()?;
        if let Some(name) = stem.strip_suffix(SCHEMA_SUFFIX) {
            if name.is_empty() || name.contains('.') {
                return Err(self.family_error("schema files must be named <name>.schema.json"));
            }
            return Ok(ConfigKind::Schema);
        }
        Ok(if stem.contains('.') {
            ConfigKind::Subconfig
        } else {
            ConfigKind::Reference
        })
    }

    /// The family name: the file name up to its first `.`.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::Family`] if the file name is not a JSON
    /// config name.
    pub fn family_name(&self) -> Result<&str, MigrationError> {
        let stem = self.stem()?;
        Ok(stem.split_once('.').map_or(stem, |(name, _)| name))
    }

    /// `<dir>/<name>.schema.json` for this file's family.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::Family`] if the file name is not a JSON
    /// config name.
    pub fn schema_path(&self) -> Result<Self, MigrationError> {
        Ok(self.sibling(&format!("{}{SCHEMA_SUFFIX}{JSON_EXT}", self.family_name()?)))
    }

    /// `<dir>/<name>.json` for this file's family.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::Family`] if the file name is not a JSON
    /// config name.
    pub fn reference_path(&self) -> Result<Self, MigrationError> {
        Ok(self.sibling(&format!("{}{JSON_EXT}", self.family_name()?)))
    }

    fn stem(&self) -> Result<&str, MigrationError> {
        self.file_name()
            .strip_suffix(JSON_EXT)
            .filter(|stem| !stem.is_empty() && !stem.starts_with('.'))
            .ok_or_else(|| self.family_error("not a JSON config file name"))
    }

    fn family_error(&self, reason: &str) -> MigrationError {
        MigrationError::Family {
            path: self.0.clone(),
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for ConfigPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConfigPath {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

impl From<String> for ConfigPath {
    fn from(path: String) -> Self {
        Self::new(path)
    }
}

impl AsRef<str> for ConfigPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Resolve `.` and `..` without touching the filesystem.
fn lexical(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

/// What role a config file plays in its family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKind {
    /// `<name>.schema.json`, tracked in the schema ledger.
    Schema,
    /// `<name>.json`, the default custom file.
    Reference,
    /// `<name>.<subname>.json`, an alternate custom file.
    Subconfig,
}

impl ConfigKind {
    /// Schema files use the schema ledger, everything else the custom one.
    #[must_use]
    pub const fn is_schema(self) -> bool {
        matches!(self, Self::Schema)
    }
}

impl fmt::Display for ConfigKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Schema => "schema",
            Self::Reference => "custom",
            Self::Subconfig => "subconfig",
        })
    }
}

/// A classified config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigFile {
    /// Identity of the file.
    pub path: ConfigPath,
    /// Its role in the family.
    pub kind: ConfigKind,
}

impl ConfigFile {
    /// Classify `path`.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::Family`] if the path is not a config name.
    pub fn classify(path: impl Into<ConfigPath>) -> Result<Self, MigrationError> {
        let path = path.into();
        let kind = path.kind()?;
        Ok(Self { path, kind })
    }
}

/// Resolves config files and families under one root directory.
#[derive(Debug, Clone)]
pub struct ConfigRegistry {
    root: PathBuf,
    tracked_dirs: Vec<String>,
    ignore: Vec<String>,
    state_dir: String,
    fs: Arc<dyn FileSystemOps>,
}

impl ConfigRegistry {
    /// Create a registry over `root` using the real filesystem.
    #[must_use]
    pub fn new(root: &Path, settings: &Settings) -> Self {
        Self::with_fs_ops(root, settings, Arc::new(SystemFileSystemOps))
    }

    /// Create a registry with an injected [`FileSystemOps`].
    #[must_use]
    pub fn with_fs_ops(root: &Path, settings: &Settings, fs: Arc<dyn FileSystemOps>) -> Self {
        Self {
            root: root.to_path_buf(),
            tracked_dirs: settings.tracked_dirs.clone(),
            ignore: settings.ignore.clone(),
            state_dir: settings.state_dir.clone(),
            fs,
        }
    }

    /// The root directory all config paths are relative to.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The filesystem backend shared with transactions and the state store.
    #[must_use]
    pub fn fs(&self) -> &Arc<dyn FileSystemOps> {
        &self.fs
    }

    /// Whether `path` exists on disk.
    #[must_use]
    pub fn exists(&self, path: &ConfigPath) -> bool {
        self.fs.exists(&path.to_path(&self.root))
    }

    /// Location of the schema ledger.
    #[must_use]
    pub fn schema_ledger_path(&self) -> ConfigPath {
        ConfigPath::in_dir(&self.state_dir, SCHEMA_LEDGER_FILE)
    }

    /// Location of the custom ledger.
    #[must_use]
    pub fn custom_ledger_path(&self) -> ConfigPath {
        ConfigPath::in_dir(&self.state_dir, CUSTOM_LEDGER_FILE)
    }

    /// Resolve `path` into the concrete files a helper should touch.
    ///
    /// | `path`     | `expand_schema` | result                                  |
    /// |------------|-----------------|-----------------------------------------|
    /// | schema     | `true`          | reference + subconfigs on disk          |
    /// | schema     | `false`         | the schema itself                       |
    /// | reference  | either          | the reference + its subconfigs on disk  |
    /// | subconfig  | either          | the subconfig itself (may not exist)    |
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::Family`] if `path` is not a config name or
    /// its family has no schema file.
    pub fn configs(
        &self,
        path: &ConfigPath,
        expand_schema: bool,
    ) -> Result<Vec<ConfigPath>, MigrationError> {
        let kind = path.kind()?;
        let schema = path.schema_path()?;
        if !self.exists(&schema) {
            return Err(MigrationError::Family {
                path: path.to_string(),
                reason: format!("schema file '{schema}' does not exist"),
            });
        }

        match kind {
            ConfigKind::Schema if !expand_schema => Ok(vec![path.clone()]),
            ConfigKind::Schema => {
                let reference = path.reference_path()?;
                let mut out = Vec::new();
                if self.exists(&reference) {
                    out.push(reference.clone());
                }
                out.extend(self.subconfigs(&reference)?);
                Ok(out)
            }
            ConfigKind::Reference => {
                let mut out = vec![path.clone()];
                out.extend(self.subconfigs(path)?);
                Ok(out)
            }
            ConfigKind::Subconfig => Ok(vec![path.clone()]),
        }
    }

    /// Subconfigs of `reference`'s family present on disk, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the family directory cannot be listed.
    pub fn subconfigs(&self, reference: &ConfigPath) -> Result<Vec<ConfigPath>, MigrationError> {
        let family = reference.family_name()?;
        let dir = reference.parent();
        let mut out: Vec<ConfigPath> = self
            .list_dir(dir)?
            .into_iter()
            .filter(|candidate| {
                candidate.kind().is_ok_and(|k| k == ConfigKind::Subconfig)
                    && candidate.family_name().is_ok_and(|name| name == family)
            })
            .collect();
        out.sort();
        Ok(out)
    }

    /// Every config file under the tracked directories, sorted by path.
    ///
    /// Ignored names and the ledger files are excluded.
    ///
    /// # Errors
    ///
    /// Returns an error if a tracked directory cannot be listed.
    pub fn tracked_files(&self) -> Result<Vec<ConfigPath>, MigrationError> {
        let ledgers = [self.schema_ledger_path(), self.custom_ledger_path()];
        let mut out = BTreeSet::new();
        for dir in &self.tracked_dirs {
            for path in self.list_dir(dir)? {
                if path.kind().is_ok() && !ledgers.contains(&path) {
                    out.insert(path);
                }
            }
        }
        Ok(out.into_iter().collect())
    }

    /// Tracked files of the given kinds, sorted by path.
    ///
    /// # Errors
    ///
    /// Returns an error if a tracked directory cannot be listed.
    pub fn tracked_of(&self, kinds: &[ConfigKind]) -> Result<Vec<ConfigPath>, MigrationError> {
        Ok(self
            .tracked_files()?
            .into_iter()
            .filter(|p| p.kind().is_ok_and(|k| kinds.contains(&k)))
            .collect())
    }

    /// JSON files directly inside the root-relative `dir`, skipping ignored
    /// names.  A missing directory is empty.
    fn list_dir(&self, dir: &str) -> Result<Vec<ConfigPath>, MigrationError> {
        let abs = ConfigPath::new(dir).to_path(&self.root);
        if !self.fs.exists(&abs) {
            return Ok(Vec::new());
        }
        let entries = self
            .fs
            .read_dir(&abs)
            .map_err(|e| MigrationError::io(abs.display(), e))?;

        Ok(entries
            .into_iter()
            .filter(|entry| self.fs.is_file(entry))
            .filter_map(|entry| {
                let name = entry.file_name()?.to_str()?;
                let keep = name.ends_with(JSON_EXT) && !self.ignore.iter().any(|i| i == name);
                keep.then(|| ConfigPath::in_dir(dir, name))
            })
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::fs;

    fn repo(files: &[&str]) -> (tempfile::TempDir, ConfigRegistry) {
        let dir = tempfile::tempdir().unwrap();
        for file in files {
            let path = dir.path().join(file);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, "{}\n").unwrap();
        }
        let registry = ConfigRegistry::new(dir.path(), &Settings::default());
        (dir, registry)
    }

    fn paths(list: &[ConfigPath]) -> Vec<&str> {
        list.iter().map(ConfigPath::as_str).collect()
    }

    // -----------------------------------------------------------------------
    // ConfigPath
    // -----------------------------------------------------------------------

    #[test]
    fn config_path_normalizes_separators() {
        assert_eq!(ConfigPath::new("./coordinates\\w64h32.json").as_str(), "coordinates/w64h32.json");
        assert_eq!(ConfigPath::in_dir(".", "config.json").as_str(), "config.json");
        assert_eq!(ConfigPath::in_dir("colors/", "teams.json").as_str(), "colors/teams.json");
    }

    #[cfg(unix)]
    #[test]
    fn arguments_resolve_against_root_and_cwd() {
        let root = Path::new("/srv/scoreboard");
        let arg = |a: &str, cwd: &str| ConfigPath::from_argument(Path::new(a), root, Path::new(cwd));

        let absolute = arg("/srv/scoreboard/coordinates/w64h32.garage.json", "/tmp").unwrap();
        assert_eq!(absolute.as_str(), "coordinates/w64h32.garage.json");

        let from_subdir = arg("w64h32.garage.json", "/srv/scoreboard/coordinates").unwrap();
        assert_eq!(from_subdir.as_str(), "coordinates/w64h32.garage.json");

        let from_elsewhere = arg("./coordinates/w64h32.garage.json", "/home/user").unwrap();
        assert_eq!(from_elsewhere.as_str(), "coordinates/w64h32.garage.json");

        let dotted = arg("../config.garage.json", "/srv/scoreboard/coordinates").unwrap();
        assert_eq!(dotted.as_str(), "config.garage.json");
    }

    #[cfg(unix)]
    #[test]
    fn arguments_outside_root_are_family_errors() {
        let root = Path::new("/srv/scoreboard");
        let arg = |a: &str, cwd: &str| ConfigPath::from_argument(Path::new(a), root, Path::new(cwd));

        for err in [
            arg("/etc/config.garage.json", "/srv/scoreboard").unwrap_err(),
            arg("../config.garage.json", "/srv/scoreboard").unwrap_err(),
            arg(".", "/srv/scoreboard").unwrap_err(),
        ] {
            assert!(matches!(err, MigrationError::Family { .. }), "{err}");
        }
    }

    #[cfg(unix)]
    #[test]
    fn relative_root_is_taken_from_cwd() {
        let root = Path::new("scoreboard");
        let cwd = Path::new("/srv");
        let arg = |a: &str| ConfigPath::from_argument(Path::new(a), root, cwd).unwrap();
        assert_eq!(arg("config.garage.json").as_str(), "config.garage.json");
        assert_eq!(arg("/srv/scoreboard/config.garage.json").as_str(), "config.garage.json");
    }

    #[test]
    fn classify_by_file_name() {
        let kind = |p: &str| ConfigPath::new(p).kind().unwrap();
        assert_eq!(kind("config.schema.json"), ConfigKind::Schema);
        assert_eq!(kind("config.json"), ConfigKind::Reference);
        assert_eq!(kind("config.test.json"), ConfigKind::Subconfig);
        assert_eq!(kind("coordinates/w64h32.alt.json"), ConfigKind::Subconfig);
    }

    #[test]
    fn classify_rejects_non_config_names() {
        for bad in ["config.yaml", ".json", "a.b.schema.json", ".hidden.json"] {
            assert!(
                matches!(ConfigPath::new(bad).kind(), Err(MigrationError::Family { .. })),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn family_paths_are_siblings() {
        let sub = ConfigPath::new("coordinates/w64h32.alt.json");
        assert_eq!(sub.family_name().unwrap(), "w64h32");
        assert_eq!(sub.schema_path().unwrap().as_str(), "coordinates/w64h32.schema.json");
        assert_eq!(sub.reference_path().unwrap().as_str(), "coordinates/w64h32.json");
    }

    #[test]
    fn to_path_joins_components() {
        let p = ConfigPath::new("colors/teams.json").to_path(Path::new("/repo"));
        assert_eq!(p, PathBuf::from("/repo/colors/teams.json"));
    }

    // -----------------------------------------------------------------------
    // configs()
    // -----------------------------------------------------------------------

    const FAMILY: &[&str] = &[
        "config.schema.json",
        "config.json",
        "config.custom.json",
        "config.test.json",
        "other.schema.json",
    ];

    #[test]
    fn schema_expands_to_customs_without_schema() {
        let (_dir, reg) = repo(FAMILY);
        let out = reg.configs(&"config.schema.json".into(), true).unwrap();
        assert_eq!(paths(&out), ["config.json", "config.custom.json", "config.test.json"]);
    }

    #[test]
    fn schema_without_expansion_is_itself() {
        let (_dir, reg) = repo(FAMILY);
        let out = reg.configs(&"config.schema.json".into(), false).unwrap();
        assert_eq!(paths(&out), ["config.schema.json"]);
    }

    #[test]
    fn reference_propagates_regardless_of_expand() {
        let (_dir, reg) = repo(FAMILY);
        for expand in [true, false] {
            let out = reg.configs(&"config.json".into(), expand).unwrap();
            assert_eq!(paths(&out), ["config.json", "config.custom.json", "config.test.json"]);
        }
    }

    #[test]
    fn new_subconfig_resolves_to_itself() {
        let (_dir, reg) = repo(FAMILY);
        let out = reg.configs(&"config.new.json".into(), true).unwrap();
        assert_eq!(paths(&out), ["config.new.json"]);
    }

    #[test]
    fn missing_schema_is_family_error() {
        let (_dir, reg) = repo(&["lonely.json", "lonely.alt.json"]);
        for p in ["lonely.json", "lonely.alt.json", "lonely.schema.json"] {
            assert!(matches!(
                reg.configs(&p.into(), true),
                Err(MigrationError::Family { .. })
            ));
        }
    }

    #[test]
    fn subconfigs_stay_in_their_directory() {
        let (_dir, reg) = repo(&[
            "coordinates/w64h32.schema.json",
            "coordinates/w64h32.json",
            "coordinates/w64h32.big.json",
            "w64h32.stray.json",
        ]);
        let out = reg.configs(&"coordinates/w64h32.schema.json".into(), true).unwrap();
        assert_eq!(paths(&out), ["coordinates/w64h32.json", "coordinates/w64h32.big.json"]);
    }

    // -----------------------------------------------------------------------
    // tracked_files()
    // -----------------------------------------------------------------------

    #[test]
    fn tracked_files_skip_ignored_and_ledgers() {
        let (_dir, reg) = repo(&[
            "config.schema.json",
            "config.json",
            "emulator_config.json",
            "notes.txt",
            "colors/teams.schema.json",
            "coordinates/w64h32.schema.json",
            "migrations/schema-status.json",
            "migrations/custom-status.json",
            "untracked/elsewhere.json",
        ]);
        let out = reg.tracked_files().unwrap();
        assert_eq!(
            paths(&out),
            [
                "colors/teams.schema.json",
                "config.json",
                "config.schema.json",
                "coordinates/w64h32.schema.json",
            ]
        );
    }

    #[test]
    fn tracked_of_filters_kinds() {
        let (_dir, reg) = repo(FAMILY);
        let schemas = reg.tracked_of(&[ConfigKind::Schema]).unwrap();
        assert_eq!(paths(&schemas), ["config.schema.json", "other.schema.json"]);
    }

    #[test]
    fn ledger_paths_live_in_state_dir() {
        let (_dir, reg) = repo(&[]);
        assert_eq!(reg.schema_ledger_path().as_str(), "migrations/schema-status.json");
        assert_eq!(reg.custom_ledger_path().as_str(), "migrations/custom-status.json");
    }
}
