//! Dot-delimited keypaths into nested JSON objects.
//!
//! A keypath such as `teams.name.full` addresses the value at
//! `doc["teams"]["name"]["full"]`.  Only objects are traversed; arrays and
//! scalars in an intermediate position are reported as
//! [`MigrationError::NotAnObject`].
use serde_json::{Map, Value};
use std::fmt;

use crate::error::MigrationError;

const SEP: char = '.';

/// A parsed, non-empty keypath.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Keypath {
    segments: Vec<String>,
}

impl Keypath {
    /// Parse `raw`, rejecting empty keypaths and empty segments.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::InvalidKeypath`] for `""`, `"a..b"`, `".a"`
    /// and similar.
    pub fn parse(raw: &str) -> Result<Self, MigrationError> {
        let segments: Vec<String> = raw.split(SEP).map(str::to_string).collect();
        if segments.iter().any(String::is_empty) {
            return Err(MigrationError::InvalidKeypath(raw.to_string()));
        }
        Ok(Self { segments })
    }

    /// All segments, root first.
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// The last segment.
    #[must_use]
    pub fn leaf(&self) -> &str {
        self.segments.last().map_or("", String::as_str)
    }

    /// Segments leading to the leaf.
    #[must_use]
    pub fn parents(&self) -> &[String] {
        self.segments
            .split_last()
            .map_or(&[], |(_, parents)| parents)
    }

    /// The same keypath with its last segment replaced by `name`.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::InvalidKeypath`] if `name` is empty or
    /// contains a separator.
    pub fn with_leaf(&self, name: &str) -> Result<Self, MigrationError> {
        if name.is_empty() || name.contains(SEP) {
            return Err(MigrationError::InvalidKeypath(name.to_string()));
        }
        let mut segments = self.parents().to_vec();
        segments.push(name.to_string());
        Ok(Self { segments })
    }

    /// Whether both keypaths share the same parent object.
    #[must_use]
    pub fn is_sibling_of(&self, other: &Self) -> bool {
        self.parents() == other.parents()
    }
}

impl fmt::Display for Keypath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}

impl std::str::FromStr for Keypath {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn not_an_object(file: &str, key: &Keypath, depth: usize) -> MigrationError {
    let segment = depth
        .checked_sub(1)
        .and_then(|i| key.segments().get(i))
        .map_or_else(|| "<root>".to_string(), Clone::clone);
    MigrationError::NotAnObject {
        path: file.to_string(),
        key: key.to_string(),
        segment,
    }
}

/// Look up the value at `key`.
///
/// A missing ancestor or leaf yields `Ok(None)`.
///
/// # Errors
///
/// Returns [`MigrationError::NotAnObject`] if an intermediate value is not an
/// object.
pub fn get<'v>(
    doc: &'v Value,
    key: &Keypath,
    file: &str,
) -> Result<Option<&'v Value>, MigrationError> {
    let mut current = doc;
    for (depth, segment) in key.segments().iter().enumerate() {
        let Value::Object(map) = current else {
            return Err(not_an_object(file, key, depth));
        };
        match map.get(segment) {
            Some(next) => current = next,
            None => return Ok(None),
        }
    }
    Ok(Some(current))
}

/// Return the object that holds the leaf of `key`.
///
/// With `create_parents`, missing intermediate objects are inserted.
///
/// # Errors
///
/// Returns [`MigrationError::MissingParent`] if an intermediate is absent and
/// `create_parents` is false, or [`MigrationError::NotAnObject`] if one is
/// not an object.
pub fn parent_mut<'v>(
    doc: &'v mut Value,
    key: &Keypath,
    file: &str,
    create_parents: bool,
) -> Result<&'v mut Map<String, Value>, MigrationError> {
    let mut current = doc;
    for (depth, segment) in key.parents().iter().enumerate() {
        let Value::Object(map) = current else {
            return Err(not_an_object(file, key, depth));
        };
        if !map.contains_key(segment) {
            if !create_parents {
                return Err(MigrationError::MissingParent {
                    path: file.to_string(),
                    key: key.to_string(),
                });
            }
            map.insert(segment.clone(), Value::Object(Map::new()));
        }
        current = map
            .get_mut(segment)
            .ok_or_else(|| MigrationError::MissingParent {
                path: file.to_string(),
                key: key.to_string(),
            })?;
    }
    match current {
        Value::Object(map) => Ok(map),
        _ => Err(not_an_object(file, key, key.parents().len())),
    }
}

/// Remove and return the value at `key`; a missing ancestor or leaf is
/// `Ok(None)`.
///
/// # Errors
///
/// Returns [`MigrationError::NotAnObject`] if an intermediate value is not an
/// object.
pub fn remove(doc: &mut Value, key: &Keypath, file: &str) -> Result<Option<Value>, MigrationError> {
    if get(doc, key, file)?.is_none() {
        return Ok(None);
    }
    let parent = parent_mut(doc, key, file, false)?;
    Ok(parent.shift_remove(key.leaf()))
}

/// Rename the key `from` to `to` inside `map`, keeping its position.
pub(crate) fn rename_in_place(map: &mut Map<String, Value>, from: &str, to: &str) {
    let entries = std::mem::take(map);
    for (name, value) in entries {
        if name == from {
            map.insert(to.to_string(), value);
        } else {
            map.insert(name, value);
        }
    }
}
