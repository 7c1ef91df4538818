//! Reading migration source files: `<version>_<identifier>.rs`.
//!
//! Shared with `build.rs`, which includes this file by path, so it depends on
//! `std` only.

/// Split a source file stem into `(version, identifier)`.
///
/// `None` unless the version is an unsigned integer and the identifier
/// is made of `[A-Za-z0-9_]` without a leading digit.
#[must_use]
pub fn parse_file_stem(stem: &str) -> Option<(u64, &str)> {
    let (version, identifier) = stem.split_once('_')?;
    let version = version.parse().ok()?;
    let mut chars = identifier.chars();
    let is_ident = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    is_ident.then_some((version, identifier))
}

/// Whether the source text defines a top-level `pub fn down`.
///
/// Only unindented lines outside block comments count; a line comment never
/// starts with `pub`.  Whitespace before the parameter list or generics is
/// allowed.
#[must_use]
pub fn defines_down(text: &str) -> bool {
    let mut in_block_comment = false;
    for line in text.lines() {
        if in_block_comment {
            in_block_comment = !line.contains("*/");
            continue;
        }
        if line.trim_start().starts_with("/*") {
            in_block_comment = !line.contains("*/");
            continue;
        }
        let declares_down = line
            .strip_prefix("pub fn down")
            .is_some_and(|rest| rest.trim_start().starts_with(['(', '<']));
        if declares_down {
            return true;
        }
    }
    false
}
