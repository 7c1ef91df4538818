//! Stamps the build version and generates the compiled-in migration list.
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::Command;

#[path = "src/migrations/source.rs"]
mod source;

fn main() {
    stamp_version();
    generate_migration_registry();
}

/// Prefer `MIGRATE_VERSION` if set (e.g., by a release workflow), otherwise
/// fall back to git describe for local development builds.
fn stamp_version() {
    if let Ok(version) = std::env::var("MIGRATE_VERSION") {
        println!("cargo:rustc-env=MIGRATE_VERSION={version}");
    } else if let Ok(output) = Command::new("git")
        .args(["describe", "--tags", "--always", "--dirty"])
        .output()
        && output.status.success()
    {
        let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
        println!("cargo:rustc-env=MIGRATE_VERSION={version}");
    }

    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/");
    println!("cargo:rerun-if-env-changed=MIGRATE_VERSION");
}

/// A migration source file named `<version>_<identifier>.rs`.
struct Source {
    version: u64,
    identifier: String,
    path: PathBuf,
    has_down: bool,
}

/// Scan `src/migrate/` and emit one module per migration source plus a
/// `builtin_migrations()` factory listing them in version order.
fn generate_migration_registry() {
    let manifest_dir = PathBuf::from(std::env::var("CARGO_MANIFEST_DIR").unwrap_or_default());
    let migrate_dir = manifest_dir.join("src").join("migrate");
    println!("cargo:rerun-if-changed={}", migrate_dir.display());
    println!("cargo:rerun-if-changed=src/migrations/source.rs");

    let mut sources = scan(&migrate_dir);
    sources.sort_by_key(|s| s.version);

    let mut out = String::from("// @generated by build.rs from src/migrate/\n\n");
    for source in &sources {
        let module = module_name(source);
        let path = source.path.to_string_lossy().into_owned();
        let _ = writeln!(out, "#[path = {path:?}]\nmod {module};\n");
    }

    out.push_str("/// Migrations compiled into this binary, in version order.\n");
    out.push_str("pub fn builtin_migrations() -> Vec<crate::migrations::Migration> {\n");
    out.push_str("    vec![\n");
    for source in &sources {
        let module = module_name(source);
        let _ = write!(
            out,
            "        crate::migrations::Migration::new({}, {:?}, {module}::up)",
            source.version, source.identifier
        );
        if source.has_down {
            let _ = write!(out, ".with_down({module}::down)");
        }
        out.push_str(",\n");
    }
    out.push_str("    ]\n}\n");

    let out_dir = PathBuf::from(std::env::var("OUT_DIR").unwrap_or_default());
    if let Err(e) = std::fs::write(out_dir.join("builtin_migrations.rs"), out) {
        println!("cargo:warning=failed to write migration registry: {e}");
    }
}

fn module_name(source: &Source) -> String {
    format!("m{}_{}", source.version, source.identifier)
}

fn scan(dir: &Path) -> Vec<Source> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };

    entries
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("rs") {
                return None;
            }
            let stem = path.file_stem()?.to_str()?;
            if stem == "mod" {
                return None;
            }
            let Some((version, identifier)) = source::parse_file_stem(stem) else {
                println!("cargo:warning=skipping migration source {}", path.display());
                return None;
            };
            let identifier = identifier.to_string();
            let text = std::fs::read_to_string(&path).unwrap_or_default();
            let has_down = source::defines_down(&text);
            if !has_down && text.contains("fn down") {
                println!(
                    "cargo:warning={} mentions `fn down` but defines no top-level `pub fn down`; it is built as irreversible",
                    path.display()
                );
            }
            Some(Source {
                version,
                identifier,
                path,
                has_down,
            })
        })
        .collect()
}
