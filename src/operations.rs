//! Filesystem operation abstractions for dependency injection.
//!
//! Provides the [`FileSystemOps`] trait so that the config registry, the
//! state store and the transaction commit can be unit-tested against
//! injected failures.  Production code uses [`SystemFileSystemOps`].

use std::io::{self, Write as _};
use std::path::{Path, PathBuf};

/// Abstraction over the filesystem calls made by the engine.
///
/// Every write goes through [`write_temp`](Self::write_temp) followed by
/// [`rename`](Self::rename), so a target is either fully replaced or left
/// untouched.
pub trait FileSystemOps: Send + Sync + std::fmt::Debug {
    /// Returns `true` if `path` exists on the filesystem.
    fn exists(&self, path: &Path) -> bool;

    /// Returns `true` if `path` is a regular file.
    fn is_file(&self, path: &Path) -> bool;

    /// Returns the immediate child paths inside `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if `path` cannot be opened or read as a directory.
    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>>;

    /// Read the full contents of the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Write `contents` to a new temporary file next to `target` and return
    /// its path.  The data is flushed to disk before returning.
    ///
    /// Missing parent directories of `target` are created.
    ///
    /// # Errors
    ///
    /// Returns an error if the temporary file cannot be created or written.
    fn write_temp(&self, target: &Path, contents: &[u8]) -> io::Result<PathBuf>;

    /// Atomically replace `to` with `from`.
    ///
    /// # Errors
    ///
    /// Returns an error if the rename fails.
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Remove the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if removal fails.
    fn remove(&self, path: &Path) -> io::Result<()>;
}

/// Production [`FileSystemOps`] implementation that delegates to [`std::fs`].
#[derive(Debug, Default)]
pub struct SystemFileSystemOps;

impl FileSystemOps for SystemFileSystemOps {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        std::fs::read_dir(path)?
            .map(|e| e.map(|entry| entry.path()))
            .collect()
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        std::fs::read(path)
    }

    fn write_temp(&self, target: &Path, contents: &[u8]) -> io::Result<PathBuf> {
        let parent = target
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent)?;

        let name = target
            .file_name()
            .map_or_else(|| "config".into(), |n| n.to_string_lossy());
        let mut tmp = tempfile::Builder::new()
            .prefix(&format!(".{name}."))
            .suffix(".txn")
            .tempfile_in(parent)?;
        tmp.write_all(contents)?;
        tmp.as_file().sync_all()?;

        let (_file, path) = tmp.keep().map_err(|e| e.error)?;
        Ok(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        std::fs::rename(from, to)
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_file(path)
    }
}

/// Test [`FileSystemOps`] that behaves like the real filesystem but fails
/// every rename onto a file with the configured name.
///
/// Used to exercise the commit rollback path.
#[cfg(test)]
#[derive(Debug)]
pub struct FailingRenameOps {
    inner: SystemFileSystemOps,
    fail_on: String,
    failures: std::sync::atomic::AtomicUsize,
    renames_outside_swap: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl FailingRenameOps {
    /// Fail renames whose destination file name equals `file_name`.
    #[must_use]
    pub fn new(file_name: &str) -> Self {
        Self {
            inner: SystemFileSystemOps,
            fail_on: file_name.to_string(),
            failures: std::sync::atomic::AtomicUsize::new(0),
            renames_outside_swap: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Number of renames that were made to fail.
    pub fn failures(&self) -> usize {
        self.failures.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Number of renames attempted while no commit was in its swap phase.
    pub fn renames_outside_swap(&self) -> usize {
        self.renames_outside_swap
            .load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
impl FileSystemOps for FailingRenameOps {
    fn exists(&self, path: &Path) -> bool {
        self.inner.exists(path)
    }

    fn is_file(&self, path: &Path) -> bool {
        self.inner.is_file(path)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        self.inner.read_dir(path)
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.inner.read(path)
    }

    fn write_temp(&self, target: &Path, contents: &[u8]) -> io::Result<PathBuf> {
        self.inner.write_temp(target, contents)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        if !crate::interrupt::is_swapping() {
            self.renames_outside_swap
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }
        if to.file_name().is_some_and(|n| n == self.fail_on.as_str()) {
            self.failures
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            return Err(io::Error::other("injected rename failure"));
        }
        self.inner.rename(from, to)
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        self.inner.remove(path)
    }
}
