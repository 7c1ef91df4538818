//! All-or-nothing file mutation.
//!
//! A [`Transaction`] keeps every staged document in memory.  Nothing touches
//! the filesystem until [`Transaction::commit`], which
//!
//! 1. serializes every staged document and drops the ones that are
//!    byte-identical to what is on disk,
//! 2. writes each remaining document to a hidden temporary sibling,
//! 3. renames the temporaries over their targets in staging order.
//!
//! If any rename fails, the files already swapped in are restored from the
//! bytes read in step 1 (or removed if they did not exist) and the leftover
//! temporaries are deleted.
use serde_json::Value;
use std::cell::Cell;
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use crate::config::ConfigPath;
use crate::error::MigrationError;
use crate::interrupt;
use crate::operations::{FileSystemOps, SystemFileSystemOps};

/// Lifecycle of a [`Transaction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Accepting reads and stages.
    Open,
    /// Every staged file was swapped into place.
    Committed,
    /// Staged content was discarded.
    Aborted,
}

/// Hands out transactions, at most one open at a time.
#[derive(Debug, Clone)]
pub struct TransactionManager {
    root: PathBuf,
    fs: Arc<dyn FileSystemOps>,
    interrupt: Arc<AtomicBool>,
    open: Rc<Cell<bool>>,
}

impl TransactionManager {
    /// Create a manager for files under `root` using the real filesystem.
    #[must_use]
    pub fn new(root: &Path) -> Self {
        Self::with_fs_ops(root, Arc::new(SystemFileSystemOps))
    }

    /// Create a manager with an injected [`FileSystemOps`].
    #[must_use]
    pub fn with_fs_ops(root: &Path, fs: Arc<dyn FileSystemOps>) -> Self {
        Self {
            root: root.to_path_buf(),
            fs,
            interrupt: interrupt::flag(),
            open: Rc::new(Cell::new(false)),
        }
    }

    /// Use `flag` instead of the process-wide Ctrl-C flag.
    #[must_use]
    pub fn with_interrupt_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = flag;
        self
    }

    /// Whether a transaction from this manager is currently open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.get()
    }

    /// Open a new transaction.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::TransactionInProgress`] if one is already
    /// open.
    pub fn begin(&self) -> Result<Transaction, MigrationError> {
        if self.open.replace(true) {
            return Err(MigrationError::TransactionInProgress);
        }
        tracing::debug!("transaction opened");
        Ok(Transaction {
            root: self.root.clone(),
            fs: Arc::clone(&self.fs),
            interrupt: Arc::clone(&self.interrupt),
            open: Rc::clone(&self.open),
            state: TransactionState::Open,
            failed: false,
            staged: Vec::new(),
            loaded: HashMap::new(),
        })
    }
}

/// One staged file write, ready for the swap phase.
#[derive(Debug)]
struct PendingWrite {
    path: ConfigPath,
    target: PathBuf,
    bytes: Vec<u8>,
    original: Option<Vec<u8>>,
}

/// An in-memory staging area for JSON documents.
///
/// Dropping an open transaction aborts it.
#[derive(Debug)]
pub struct Transaction {
    root: PathBuf,
    fs: Arc<dyn FileSystemOps>,
    interrupt: Arc<AtomicBool>,
    open: Rc<Cell<bool>>,
    state: TransactionState,
    failed: bool,
    staged: Vec<(ConfigPath, Value)>,
    loaded: HashMap<ConfigPath, Value>,
}

impl Transaction {
    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> TransactionState {
        self.state
    }

    /// Whether a failed update scope poisoned this transaction.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        self.failed
    }

    /// Poison the transaction so it can only be aborted.
    pub fn mark_failed(&mut self) {
        self.failed = true;
    }

    /// Whether `path` exists on disk, in the overlay or has been staged.
    #[must_use]
    pub fn exists(&self, path: &ConfigPath) -> bool {
        self.is_staged(path)
            || self.loaded.contains_key(path)
            || self.fs.exists(&path.to_path(&self.root))
    }

    /// Read `docs` in place of the files on disk.
    ///
    /// Used by dry runs to carry what earlier aborted steps would have
    /// written into the next step.  Overlaid documents are not staged.
    pub fn overlay(&mut self, docs: impl IntoIterator<Item = (ConfigPath, Value)>) {
        self.loaded.extend(docs);
    }

    /// Whether `path` has staged content.
    #[must_use]
    pub fn is_staged(&self, path: &ConfigPath) -> bool {
        self.staged.iter().any(|(p, _)| p == path)
    }

    /// Staged paths in staging order.
    pub fn staged_paths(&self) -> impl Iterator<Item = &ConfigPath> {
        self.staged.iter().map(|(p, _)| p)
    }

    /// The staged content of `path`, or else its committed content.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction is closed or the file cannot be
    /// read or parsed.
    pub fn read(&mut self, path: &ConfigPath) -> Result<Value, MigrationError> {
        self.ensure_open()?;
        if let Some((_, doc)) = self.staged.iter().find(|(p, _)| p == path) {
            return Ok(doc.clone());
        }
        if let Some(doc) = self.loaded.get(path) {
            return Ok(doc.clone());
        }
        let doc = self.load_from_disk(path)?;
        self.loaded.insert(path.clone(), doc.clone());
        Ok(doc)
    }

    /// Record `content` as the new content of `path`, replacing anything
    /// staged for it earlier.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::TransactionNotOpen`] after commit or abort.
    pub fn stage(&mut self, path: &ConfigPath, content: Value) -> Result<(), MigrationError> {
        self.ensure_open()?;
        if let Some(slot) = self.staged.iter_mut().find(|(p, _)| p == path) {
            slot.1 = content;
        } else {
            self.staged.push((path.clone(), content));
        }
        Ok(())
    }

    /// Load `path` for in-place editing.
    ///
    /// The returned guard re-stages the document when it goes out of scope.
    /// If the scope unwinds the transaction is marked failed instead.  An
    /// early `return` still stages whatever was edited so far; use
    /// [`update`](Self::update) when the edit can fail halfway.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be read.
    pub fn load_for_update(&mut self, path: &ConfigPath) -> Result<UpdateGuard<'_>, MigrationError> {
        let doc = self.read(path)?;
        Ok(UpdateGuard {
            txn: self,
            path: path.clone(),
            doc,
        })
    }

    /// Edit `path` through `f`, staging the result only if `f` succeeds.
    ///
    /// A failing `f` marks the transaction failed.
    ///
    /// # Errors
    ///
    /// Returns the error from reading the document or from `f`.
    pub fn update<F, E>(&mut self, path: &ConfigPath, f: F) -> Result<(), E>
    where
        F: FnOnce(&mut Value) -> Result<(), E>,
        E: From<MigrationError>,
    {
        let mut doc = self.read(path)?;
        match f(&mut doc) {
            Ok(()) => {
                self.stage(path, doc)?;
                Ok(())
            }
            Err(e) => {
                self.failed = true;
                Err(e)
            }
        }
    }

    /// Staged paths whose serialized content differs from disk.
    ///
    /// # Errors
    ///
    /// Returns an error if a target cannot be read.
    pub fn changed_paths(&self) -> Result<Vec<ConfigPath>, MigrationError> {
        Ok(self
            .pending_writes()?
            .into_iter()
            .map(|w| w.path)
            .collect())
    }

    /// Swap every changed staged file into place and return their paths.
    ///
    /// # Errors
    ///
    /// - [`MigrationError::TransactionFailed`] if an update scope failed.
    /// - [`MigrationError::Interrupted`] if Ctrl-C arrived before the swap
    ///   phase.
    /// - [`MigrationError::CommitFailed`] if a temporary write or a rename
    ///   failed; the filesystem is left as it was before the commit.
    pub fn commit(mut self) -> Result<Vec<ConfigPath>, MigrationError> {
        self.ensure_open()?;
        if self.failed {
            return Err(MigrationError::TransactionFailed);
        }
        let writes = self.pending_writes()?;

        let mut temps = Vec::with_capacity(writes.len());
        for write in &writes {
            match self.fs.write_temp(&write.target, &write.bytes) {
                Ok(tmp) => temps.push(tmp),
                Err(source) => {
                    self.remove_temps(temps.iter());
                    return Err(MigrationError::CommitFailed {
                        path: write.path.to_string(),
                        source,
                    });
                }
            }
        }

        if interrupt::is_set(&self.interrupt) {
            self.remove_temps(temps.iter());
            return Err(MigrationError::Interrupted);
        }

        let _swap = interrupt::swap_phase();
        for (swapped, (write, tmp)) in writes.iter().zip(&temps).enumerate() {
            if let Err(source) = self.fs.rename(tmp, &write.target) {
                tracing::debug!("rename onto {} failed, restoring {swapped} file(s)", write.path);
                self.restore(writes.iter().take(swapped));
                self.remove_temps(temps.iter().skip(swapped));
                return Err(MigrationError::CommitFailed {
                    path: write.path.to_string(),
                    source,
                });
            }
        }

        tracing::debug!("transaction committed ({} file(s) written)", writes.len());
        self.finish(TransactionState::Committed);
        Ok(writes.into_iter().map(|w| w.path).collect())
    }

    /// Discard all staged content.
    pub fn abort(mut self) {
        tracing::debug!("transaction aborted");
        self.finish(TransactionState::Aborted);
    }

    /// Abort, handing back the staged documents in staging order.
    pub fn abort_with_staged(mut self) -> Vec<(ConfigPath, Value)> {
        let staged = std::mem::take(&mut self.staged);
        self.abort();
        staged
    }

    fn ensure_open(&self) -> Result<(), MigrationError> {
        if self.state == TransactionState::Open {
            Ok(())
        } else {
            Err(MigrationError::TransactionNotOpen)
        }
    }

    fn finish(&mut self, state: TransactionState) {
        self.state = state;
        self.staged.clear();
        self.loaded.clear();
        self.open.set(false);
    }

    fn load_from_disk(&self, path: &ConfigPath) -> Result<Value, MigrationError> {
        let bytes = self
            .fs
            .read(&path.to_path(&self.root))
            .map_err(|e| MigrationError::io(path, e))?;
        serde_json::from_slice(&bytes).map_err(|source| MigrationError::Json {
            path: path.to_string(),
            source,
        })
    }

    fn pending_writes(&self) -> Result<Vec<PendingWrite>, MigrationError> {
        let mut writes = Vec::new();
        for (path, doc) in &self.staged {
            let bytes = to_canonical_bytes(path, doc)?;
            let target = path.to_path(&self.root);
            let original = if self.fs.exists(&target) {
                Some(
                    self.fs
                        .read(&target)
                        .map_err(|e| MigrationError::io(path, e))?,
                )
            } else {
                None
            };
            if original.as_deref() == Some(bytes.as_slice()) {
                continue;
            }
            writes.push(PendingWrite {
                path: path.clone(),
                target,
                bytes,
                original,
            });
        }
        Ok(writes)
    }

    /// Put already-swapped files back the way they were.
    fn restore<'w>(&self, swapped: impl Iterator<Item = &'w PendingWrite>) {
        for write in swapped {
            let result = match &write.original {
                Some(bytes) => self
                    .fs
                    .write_temp(&write.target, bytes)
                    .and_then(|tmp| self.fs.rename(&tmp, &write.target)),
                None => self.fs.remove(&write.target),
            };
            if let Err(e) = result {
                tracing::error!("failed to restore {}: {e}", write.path);
            }
        }
    }

    fn remove_temps<'p>(&self, temps: impl Iterator<Item = &'p PathBuf>) {
        for tmp in temps {
            self.fs.remove(tmp).ok();
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.state == TransactionState::Open {
            tracing::debug!("transaction dropped while open; aborting");
            self.finish(TransactionState::Aborted);
        }
    }
}

/// Serialize `doc` the way every managed file is written: two-space
/// indentation and a trailing newline.
///
/// # Errors
///
/// Returns [`MigrationError::Json`] if serialization fails.
pub fn to_canonical_bytes(path: &ConfigPath, doc: &Value) -> Result<Vec<u8>, MigrationError> {
    let mut bytes = serde_json::to_vec_pretty(doc).map_err(|source| MigrationError::Json {
        path: path.to_string(),
        source,
    })?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Scoped mutable access to one document of a [`Transaction`].
///
/// Re-stages the document on drop.
#[derive(Debug)]
pub struct UpdateGuard<'t> {
    txn: &'t mut Transaction,
    path: ConfigPath,
    doc: Value,
}

impl UpdateGuard<'_> {
    /// Drop the edits and mark the transaction failed.
    pub fn discard(self) {
        self.txn.failed = true;
    }
}

impl Deref for UpdateGuard<'_> {
    type Target = Value;

    fn deref(&self) -> &Value {
        &self.doc
    }
}

impl DerefMut for UpdateGuard<'_> {
    fn deref_mut(&mut self) -> &mut Value {
        &mut self.doc
    }
}

impl Drop for UpdateGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.txn.failed = true;
            return;
        }
        if self.txn.failed {
            return;
        }
        let doc = std::mem::take(&mut self.doc);
        if let Err(e) = self.txn.stage(&self.path, doc) {
            tracing::warn!("could not stage {}: {e}", self.path);
            self.txn.failed = true;
        }
    }
}
