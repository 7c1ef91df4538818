//! Migration stub generation.
//!
//! `migrate generate <name>` writes `<version>_<name>.rs` into the migrations
//! source directory.  The next build picks it up through `build.rs`.
use std::path::{Path, PathBuf};

use super::{Version, source};
use crate::error::MigrationError;
use crate::operations::FileSystemOps;

/// Strict and reserved keywords, which cannot name a migration.
const KEYWORDS: &[&str] = &[
    "abstract", "as", "async", "await", "become", "box", "break", "const", "continue", "crate",
    "do", "dyn", "else", "enum", "extern", "false", "final", "fn", "for", "gen", "if", "impl",
    "in", "let", "loop", "macro", "match", "mod", "move", "mut", "override", "priv", "pub", "ref",
    "return", "self", "Self", "static", "struct", "super", "trait", "true", "try", "type",
    "typeof", "unsafe", "unsized", "use", "virtual", "where", "while", "yield",
];

/// A freshly written migration source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedMigration {
    /// Version assigned to the migration.
    pub version: Version,
    /// Identifier as given on the command line.
    pub identifier: String,
    /// Path of the new source file.
    pub path: PathBuf,
}

/// Reject anything that is not a bare identifier.
///
/// # Errors
///
/// Returns [`MigrationError::InvalidIdentifier`] for empty names, names
/// with characters outside `[A-Za-z0-9_]`, names starting with a digit,
/// `_`, and keywords.
pub fn validate_identifier(identifier: &str) -> Result<(), MigrationError> {
    let mut chars = identifier.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && identifier != "_"
        && !KEYWORDS.contains(&identifier);
    if valid {
        Ok(())
    } else {
        Err(MigrationError::InvalidIdentifier(identifier.to_string()))
    }
}

/// The current UNIX timestamp.
#[must_use]
pub fn current_version() -> Version {
    Version::try_from(chrono::Utc::now().timestamp()).unwrap_or_default()
}

/// `now`, or one past the newest existing version when the clock is not
/// ahead of it.
#[must_use]
pub fn next_version(now: Version, existing: impl IntoIterator<Item = Version>) -> Version {
    existing
        .into_iter()
        .max()
        .map_or(now, |latest| now.max(latest.saturating_add(1)))
}

/// `(version, identifier)` of every migration source in `dir`.
///
/// A missing directory has no sources.
///
/// # Errors
///
/// Returns an error if `dir` exists but cannot be listed.
pub fn scan_sources(
    fs: &dyn FileSystemOps,
    dir: &Path,
) -> Result<Vec<(Version, String)>, MigrationError> {
    if !fs.exists(dir) {
        return Ok(Vec::new());
    }
    let mut sources: Vec<(Version, String)> = fs
        .read_dir(dir)
        .map_err(|e| MigrationError::io(dir.display(), e))?
        .iter()
        .filter(|path| path.extension().is_some_and(|ext| ext == "rs"))
        .filter_map(|path| {
            let (version, identifier) = source::parse_file_stem(path.file_stem()?.to_str()?)?;
            Some((version, identifier.to_string()))
        })
        .collect();
    sources.sort();
    Ok(sources)
}

/// Source text of a new migration.
#[must_use]
pub fn render(version: Version, identifier: &str) -> String {
    format!(
        r#"//! {identifier}
use crate::context::MigrationContext;
use crate::error::MigrationError;

pub fn up(_ctx: &mut MigrationContext<'_>) -> anyhow::Result<()> {{
    anyhow::bail!("migration {version}_{identifier} is not implemented")
}}

pub fn down(_ctx: &mut MigrationContext<'_>) -> anyhow::Result<()> {{
    Err(MigrationError::IrreversibleMigration {{
        version: {version},
        identifier: "{identifier}".to_string(),
    }}
    .into())
}}
"#
    )
}

/// Write a new migration stub for `identifier` into `dir`.
///
/// # Errors
///
/// - [`MigrationError::InvalidIdentifier`] if `identifier` is not a bare
///   identifier.
/// - [`MigrationError::DuplicateMigration`] if a source with that identifier
///   already exists.
/// - [`MigrationError::Io`] if the file cannot be written.
pub fn generate(
    fs: &dyn FileSystemOps,
    dir: &Path,
    identifier: &str,
    now: Version,
) -> Result<GeneratedMigration, MigrationError> {
    validate_identifier(identifier)?;

    let sources = scan_sources(fs, dir)?;
    if sources.iter().any(|(_, existing)| existing == identifier) {
        return Err(MigrationError::DuplicateMigration(format!(
            "identifier '{identifier}'"
        )));
    }

    let version = next_version(now, sources.iter().map(|(v, _)| *v));
    let path = dir.join(format!("{version}_{identifier}.rs"));
    let tmp = fs
        .write_temp(&path, render(version, identifier).as_bytes())
        .map_err(|e| MigrationError::io(path.display(), e))?;
    fs.rename(&tmp, &path)
        .map_err(|e| MigrationError::io(path.display(), e))?;
    tracing::debug!("wrote {}", path.display());

    Ok(GeneratedMigration {
        version,
        identifier: identifier.to_string(),
        path,
    })
}
