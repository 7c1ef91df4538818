// Shared helpers for integration tests.
//
// Provides a temporary-directory-backed scoreboard tree and a fluent builder
// so each integration test can set up an isolated environment without
// repeating filesystem boilerplate.
//
// Used by all integration test binaries that declare `mod common;`.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use scoreboard_migrate::config::ConfigPath;
use scoreboard_migrate::logging::{Log, Logger};
use scoreboard_migrate::migrations::{Migration, MigrationRegistry};
use scoreboard_migrate::operations::{FileSystemOps, SystemFileSystemOps};
use scoreboard_migrate::orchestrator::Orchestrator;
use scoreboard_migrate::settings::Settings;
use scoreboard_migrate::transaction::to_canonical_bytes;
use serde_json::Value;

/// A logger that only records steps; no subscriber is installed in tests.
pub fn quiet_log() -> Arc<dyn Log> {
    Arc::new(Logger::with_log_file(None))
}

/// An isolated scoreboard tree backed by a [`tempfile::TempDir`].
pub struct TestRepo {
    /// Temporary directory containing the tree.
    pub root: tempfile::TempDir,
}

impl TestRepo {
    /// Path to the tree root.
    pub fn path(&self) -> &Path {
        self.root.path()
    }

    /// Parse the JSON file at the root-relative `name`.
    pub fn read_json(&self, name: &str) -> Value {
        serde_json::from_slice(&self.read_bytes(name)).expect("parse json")
    }

    /// Raw bytes of the root-relative `name`.
    pub fn read_bytes(&self, name: &str) -> Vec<u8> {
        std::fs::read(self.path().join(name)).expect("read file")
    }

    /// Whether the root-relative `name` exists.
    pub fn exists(&self, name: &str) -> bool {
        self.path().join(name).exists()
    }

    /// Write `doc` canonically to the root-relative `name`.
    pub fn write_json(&self, name: &str, doc: &Value) {
        let path = self.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent");
        }
        let bytes = to_canonical_bytes(&ConfigPath::new(name), doc).expect("serialize");
        std::fs::write(path, bytes).expect("write json");
    }

    /// Every file under the root with its bytes, keyed by relative path.
    pub fn files(&self) -> BTreeMap<String, Vec<u8>> {
        let mut out = BTreeMap::new();
        collect(self.path(), self.path(), &mut out);
        out
    }

    /// An orchestrator over `migrations` with a private interrupt flag.
    pub fn orchestrator(&self, migrations: Vec<Migration>) -> Orchestrator {
        self.orchestrator_with_fs(migrations, Arc::new(SystemFileSystemOps))
    }

    /// Like [`orchestrator`](Self::orchestrator) with an injected filesystem.
    pub fn orchestrator_with_fs(
        &self,
        migrations: Vec<Migration>,
        fs: Arc<dyn FileSystemOps>,
    ) -> Orchestrator {
        let registry = MigrationRegistry::new(migrations).expect("valid migrations");
        Orchestrator::with_fs_ops(self.path(), &Settings::default(), registry, quiet_log(), fs)
            .with_interrupt_flag(Arc::new(AtomicBool::new(false)))
    }

    /// An orchestrator over the compiled-in migrations.
    pub fn builtin_orchestrator(&self) -> Orchestrator {
        let registry = MigrationRegistry::builtin().expect("builtin migrations");
        Orchestrator::new(self.path(), &Settings::default(), registry, quiet_log())
            .with_interrupt_flag(Arc::new(AtomicBool::new(false)))
    }
}

fn collect(root: &Path, dir: &Path, out: &mut BTreeMap<String, Vec<u8>>) {
    for entry in std::fs::read_dir(dir).expect("read dir") {
        let path = entry.expect("dir entry").path();
        if path.is_dir() {
            collect(root, &path, out);
        } else {
            let rel = path
                .strip_prefix(root)
                .expect("under root")
                .to_string_lossy()
                .replace('\\', "/");
            out.insert(rel, std::fs::read(&path).expect("read file"));
        }
    }
}

/// Fluent builder for [`TestRepo`].
pub struct TestRepoBuilder {
    repo: TestRepo,
}

impl TestRepoBuilder {
    /// Begin building an empty tree.
    pub fn new() -> Self {
        Self {
            repo: TestRepo {
                root: tempfile::tempdir().expect("create temp dir"),
            },
        }
    }

    /// Add a JSON file at the root-relative `name`.
    pub fn with_json(self, name: &str, doc: Value) -> Self {
        self.repo.write_json(name, &doc);
        self
    }

    /// Add the family of the reference `name`: schema and reference with the
    /// same content.
    pub fn with_family(self, name: &str, doc: Value) -> Self {
        let schema = name.replace(".json", ".schema.json");
        self.with_json(&schema, doc.clone()).with_json(name, doc)
    }

    /// Add a raw file at the root-relative `name`.
    pub fn with_file(self, name: &str, content: &str) -> Self {
        let path = self.repo.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent");
        }
        std::fs::write(path, content).expect("write file");
        self
    }

    /// Finish building and return the tree.
    pub fn build(self) -> TestRepo {
        self.repo
    }
}

/// Filesystem that fails every rename onto a file named `file_name`.
#[derive(Debug)]
pub struct FailingRename {
    file_name: String,
    inner: SystemFileSystemOps,
}

impl FailingRename {
    pub fn new(file_name: &str) -> Self {
        Self {
            file_name: file_name.to_string(),
            inner: SystemFileSystemOps,
        }
    }
}

impl FileSystemOps for FailingRename {
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
        if to.file_name().is_some_and(|n| n == self.file_name.as_str()) {
            return Err(io::Error::other("injected rename failure"));
        }
        self.inner.rename(from, to)
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        self.inner.remove(path)
    }
}
