//! Command: print version information.

/// Print the migrator version to stdout.
#[allow(clippy::print_stdout)]
pub fn run() {
    let version = option_env!("MIGRATE_VERSION").unwrap_or(env!("CARGO_PKG_VERSION"));
    println!("scoreboard-migrate {version}");
}
