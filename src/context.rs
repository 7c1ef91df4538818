//! The API migrations are written against.
//!
//! A [`MigrationContext`] wraps the open [`Transaction`] of one migration
//! step.  Every helper resolves its file argument through
//! [`ConfigRegistry::configs`], so editing `config.json` also edits every
//! `config.*.json` subconfig, and editing `config.schema.json` edits the
//! custom files of that family.  When the orchestrator restricts a step to
//! the files that still need it, resolution is filtered to those targets.
//!
//! ```ignore
//! pub fn up(ctx: &mut MigrationContext<'_>) -> anyhow::Result<()> {
//!     ctx.add_key("config.json", "weather.pregame", true)?;
//!     ctx.rename_key("coordinates/w64h32.json", "teams.runs", "line_score")?;
//!     Ok(())
//! }
//! ```
//!
//! Each helper computes the new document of every resolved file before
//! staging any of them: it either succeeds on all of them or changes none.
use serde_json::Value;
use std::collections::BTreeSet;

use crate::config::keypath::{self, Keypath};
use crate::config::{ConfigPath, ConfigRegistry};
use crate::error::MigrationError;
use crate::transaction::{Transaction, UpdateGuard};

/// Options shared by the key helpers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyOptions {
    /// Create missing intermediate objects (`add_key`/`overwrite_key` only).
    pub create_parents: bool,
    /// Resolve a schema path to its custom files instead of the schema.
    pub expand_schema: bool,
}

impl Default for KeyOptions {
    fn default() -> Self {
        Self {
            create_parents: true,
            expand_schema: true,
        }
    }
}

impl KeyOptions {
    /// Address the schema file itself rather than its custom files.
    #[must_use]
    pub const fn schema_only() -> Self {
        Self {
            create_parents: true,
            expand_schema: false,
        }
    }

    /// Fail with `MissingParent` instead of creating intermediates.
    #[must_use]
    pub const fn without_parents(mut self) -> Self {
        self.create_parents = false;
        self
    }
}

/// Handle passed to a migration's `up` and `down`.
#[derive(Debug)]
pub struct MigrationContext<'a> {
    txn: &'a mut Transaction,
    registry: &'a ConfigRegistry,
    targets: Option<BTreeSet<ConfigPath>>,
}

impl<'a> MigrationContext<'a> {
    /// Bind a context to an open transaction.
    pub const fn new(txn: &'a mut Transaction, registry: &'a ConfigRegistry) -> Self {
        Self {
            txn,
            registry,
            targets: None,
        }
    }

    /// Restrict every resolution to `targets`.
    #[must_use]
    pub fn with_targets(mut self, targets: impl IntoIterator<Item = ConfigPath>) -> Self {
        self.targets = Some(targets.into_iter().collect());
        self
    }

    /// The target filter, if any.
    #[must_use]
    pub const fn targets(&self) -> Option<&BTreeSet<ConfigPath>> {
        self.targets.as_ref()
    }

    /// The registry files are resolved against.
    #[must_use]
    pub const fn registry(&self) -> &ConfigRegistry {
        self.registry
    }

    /// The underlying transaction.
    pub const fn transaction(&mut self) -> &mut Transaction {
        self.txn
    }

    // -----------------------------------------------------------------------
    // Resolution and transaction shadows
    // -----------------------------------------------------------------------

    /// Files `file` resolves to, filtered to the targets.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::Family`] if the family cannot be resolved.
    pub fn configs(
        &self,
        file: impl AsRef<str>,
        expand_schema: bool,
    ) -> Result<Vec<ConfigPath>, MigrationError> {
        let resolved = self
            .registry
            .configs(&ConfigPath::new(file.as_ref()), expand_schema)?;
        Ok(match &self.targets {
            Some(targets) => resolved
                .into_iter()
                .filter(|p| targets.contains(p))
                .collect(),
            None => resolved,
        })
    }

    /// Current content of `file` within the transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn read(&mut self, file: impl AsRef<str>) -> Result<Value, MigrationError> {
        self.txn.read(&ConfigPath::new(file.as_ref()))
    }

    /// Stage new content for `file`.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction is closed.
    pub fn stage(&mut self, file: impl AsRef<str>, content: Value) -> Result<(), MigrationError> {
        self.txn.stage(&ConfigPath::new(file.as_ref()), content)
    }

    /// Scoped mutable access to `file`; see [`Transaction::load_for_update`].
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_for_update(
        &mut self,
        file: impl AsRef<str>,
    ) -> Result<UpdateGuard<'_>, MigrationError> {
        self.txn.load_for_update(&ConfigPath::new(file.as_ref()))
    }

    /// Closure form of [`load_for_update`](Self::load_for_update); see
    /// [`Transaction::update`].
    ///
    /// # Errors
    ///
    /// Returns the error from reading the file or from `f`.
    pub fn update<F, E>(&mut self, file: impl AsRef<str>, f: F) -> Result<(), E>
    where
        F: FnOnce(&mut Value) -> Result<(), E>,
        E: From<MigrationError>,
    {
        self.txn.update(&ConfigPath::new(file.as_ref()), f)
    }

    // -----------------------------------------------------------------------
    // Key helpers
    // -----------------------------------------------------------------------

    /// Add `key` with `value` to every file `file` resolves to.
    ///
    /// # Errors
    ///
    /// [`MigrationError::KeyAlreadyExists`] if any file already has the key.
    pub fn add_key(
        &mut self,
        file: impl AsRef<str>,
        key: &str,
        value: impl Into<Value>,
    ) -> Result<(), MigrationError> {
        self.add_key_with(file, key, value, KeyOptions::default())
    }

    /// [`add_key`](Self::add_key) with explicit options.
    ///
    /// # Errors
    ///
    /// [`MigrationError::KeyAlreadyExists`] if any file already has the key;
    /// [`MigrationError::MissingParent`] if an intermediate is absent and
    /// `create_parents` is off.
    pub fn add_key_with(
        &mut self,
        file: impl AsRef<str>,
        key: &str,
        value: impl Into<Value>,
        opts: KeyOptions,
    ) -> Result<(), MigrationError> {
        let key = Keypath::parse(key)?;
        let value = value.into();
        self.apply(file.as_ref(), opts.expand_schema, |path, doc| {
            let parent = keypath::parent_mut(doc, &key, path.as_str(), opts.create_parents)?;
            if parent.contains_key(key.leaf()) {
                return Err(MigrationError::KeyAlreadyExists {
                    path: path.to_string(),
                    key: key.to_string(),
                });
            }
            parent.insert(key.leaf().to_string(), value.clone());
            Ok(())
        })
    }

    /// Set `key` to `value` in every file `file` resolves to, replacing any
    /// existing value.
    ///
    /// # Errors
    ///
    /// [`MigrationError::NotAnObject`] if an intermediate is not an object.
    pub fn overwrite_key(
        &mut self,
        file: impl AsRef<str>,
        key: &str,
        value: impl Into<Value>,
    ) -> Result<(), MigrationError> {
        self.overwrite_key_with(file, key, value, KeyOptions::default())
    }

    /// [`overwrite_key`](Self::overwrite_key) with explicit options.
    ///
    /// # Errors
    ///
    /// [`MigrationError::MissingParent`] if an intermediate is absent and
    /// `create_parents` is off.
    pub fn overwrite_key_with(
        &mut self,
        file: impl AsRef<str>,
        key: &str,
        value: impl Into<Value>,
        opts: KeyOptions,
    ) -> Result<(), MigrationError> {
        let key = Keypath::parse(key)?;
        let value = value.into();
        self.apply(file.as_ref(), opts.expand_schema, |path, doc| {
            keypath::parent_mut(doc, &key, path.as_str(), opts.create_parents)?
                .insert(key.leaf().to_string(), value.clone());
            Ok(())
        })
    }

    /// Delete `key` wherever present.  A missing key is not an error.
    ///
    /// # Errors
    ///
    /// [`MigrationError::NotAnObject`] if an intermediate is not an object.
    pub fn remove_key(&mut self, file: impl AsRef<str>, key: &str) -> Result<(), MigrationError> {
        self.remove_key_with(file, key, KeyOptions::default())
    }

    /// [`remove_key`](Self::remove_key) with explicit options.
    ///
    /// # Errors
    ///
    /// [`MigrationError::NotAnObject`] if an intermediate is not an object.
    pub fn remove_key_with(
        &mut self,
        file: impl AsRef<str>,
        key: &str,
        opts: KeyOptions,
    ) -> Result<(), MigrationError> {
        let key = Keypath::parse(key)?;
        self.apply(file.as_ref(), opts.expand_schema, |path, doc| {
            keypath::remove(doc, &key, path.as_str()).map(drop)
        })
    }

    /// Move the subtree at `src` to `dst` (both full keypaths).
    ///
    /// # Errors
    ///
    /// - [`MigrationError::MissingParent`] if an intermediate of `src` or the
    ///   parent of `dst` is absent.
    /// - [`MigrationError::MissingKey`] if `src` itself is absent.
    /// - [`MigrationError::DestinationExists`] if `dst` holds a value.
    pub fn move_key(
        &mut self,
        file: impl AsRef<str>,
        src: &str,
        dst: &str,
    ) -> Result<(), MigrationError> {
        self.move_key_with(file, src, dst, KeyOptions::default())
    }

    /// [`move_key`](Self::move_key) with explicit options.
    ///
    /// # Errors
    ///
    /// See [`move_key`](Self::move_key).
    pub fn move_key_with(
        &mut self,
        file: impl AsRef<str>,
        src: &str,
        dst: &str,
        opts: KeyOptions,
    ) -> Result<(), MigrationError> {
        let src = Keypath::parse(src)?;
        let dst = Keypath::parse(dst)?;
        if dst.segments().starts_with(src.segments()) && dst != src {
            return Err(MigrationError::InvalidKeypath(format!(
                "cannot move '{src}' into '{dst}'"
            )));
        }
        self.apply(file.as_ref(), opts.expand_schema, |path, doc| {
            move_value(doc, &src, &dst, path)
        })
    }

    /// Rename the last segment of `src` to `new_name`, keeping its position
    /// among its siblings.
    ///
    /// # Errors
    ///
    /// Same as [`move_key`](Self::move_key).
    pub fn rename_key(
        &mut self,
        file: impl AsRef<str>,
        src: &str,
        new_name: &str,
    ) -> Result<(), MigrationError> {
        self.rename_key_with(file, src, new_name, KeyOptions::default())
    }

    /// [`rename_key`](Self::rename_key) with explicit options.
    ///
    /// # Errors
    ///
    /// Same as [`move_key`](Self::move_key).
    pub fn rename_key_with(
        &mut self,
        file: impl AsRef<str>,
        src: &str,
        new_name: &str,
        opts: KeyOptions,
    ) -> Result<(), MigrationError> {
        let dst = Keypath::parse(src)?.with_leaf(new_name)?.to_string();
        self.move_key_with(file, src, &dst, opts)
    }

    /// Run `edit` on every resolved file, then stage the changed ones.
    fn apply<F>(&mut self, file: &str, expand_schema: bool, mut edit: F) -> Result<(), MigrationError>
    where
        F: FnMut(&ConfigPath, &mut Value) -> Result<(), MigrationError>,
    {
        let paths = self.configs(file, expand_schema)?;
        let mut updated = Vec::with_capacity(paths.len());
        for path in paths {
            let original = self.txn.read(&path)?;
            let mut doc = original.clone();
            edit(&path, &mut doc)?;
            if doc != original {
                updated.push((path, doc));
            }
        }
        for (path, doc) in updated {
            tracing::debug!("staged {path}");
            self.txn.stage(&path, doc)?;
        }
        Ok(())
    }
}

fn move_value(
    doc: &mut Value,
    src: &Keypath,
    dst: &Keypath,
    file: &ConfigPath,
) -> Result<(), MigrationError> {
    if !keypath::parent_mut(doc, src, file.as_str(), false)?.contains_key(src.leaf()) {
        return Err(MigrationError::MissingKey {
            path: file.to_string(),
            key: src.to_string(),
        });
    }
    if keypath::parent_mut(doc, dst, file.as_str(), false)?.contains_key(dst.leaf()) {
        return Err(MigrationError::DestinationExists {
            path: file.to_string(),
            key: dst.to_string(),
        });
    }

    if src.is_sibling_of(dst) {
        let parent = keypath::parent_mut(doc, src, file.as_str(), false)?;
        keypath::rename_in_place(parent, src.leaf(), dst.leaf());
        return Ok(());
    }

    let value = keypath::remove(doc, src, file.as_str())?.ok_or_else(|| {
        MigrationError::MissingKey {
            path: file.to_string(),
            key: src.to_string(),
        }
    })?;
    keypath::parent_mut(doc, dst, file.as_str(), false)?.insert(dst.leaf().to_string(), value);
    Ok(())
}
