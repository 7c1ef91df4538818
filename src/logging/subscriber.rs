//! Tracing subscriber for `migrate`: a colored console layer and a per-command
//! log file under `$XDG_CACHE_HOME/scoreboard-migrate/`.
//!
//! Besides plain messages the file receives two structured records that the
//! console never shows:
//!
//! - [`RUN_TARGET`] events become the run header (root, state directory,
//!   known migrations, mode);
//! - [`STEP_TARGET`] events become one line per migration step.
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::field::{Field, Visit};

/// Stage headers.
pub(super) const STAGE_TARGET: &str = "migrate::stage";
/// Actions a dry run skipped.
pub(super) const DRY_RUN_TARGET: &str = "migrate::dry_run";
/// Run context, written once per run.
pub(super) const RUN_TARGET: &str = "migrate::run";
/// Migration step results.
pub(super) const STEP_TARGET: &str = "migrate::step";

const LOG_DIR: &str = "scoreboard-migrate";
const RULE: &str = "------------------------------------------------------------";

/// `<cache>/scoreboard-migrate/<command>.log`, creating the directory.
///
/// The cache is `$XDG_CACHE_HOME`, else `~/.cache`.
pub(super) fn log_file_path(command: &str) -> Option<PathBuf> {
    let cache = std::env::var_os("XDG_CACHE_HOME")
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var_os("HOME")
                .or_else(|| std::env::var_os("USERPROFILE"))
                .map(|home| PathBuf::from(home).join(".cache"))
        })?;
    let dir = cache.join(LOG_DIR);
    fs::create_dir_all(&dir).ok()?;
    Some(dir.join(format!("{command}.log")))
}

/// Drop terminal escape sequences: CSI sequences up to their final byte, and
/// the single character after any other ESC.
fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some((text, escape)) = rest.split_once('\x1b') {
        out.push_str(text);
        rest = match escape.strip_prefix('[') {
            Some(csi) => csi
                .char_indices()
                .find(|(_, c)| ('@'..='~').contains(c))
                .map_or("", |(end, c)| csi.get(end + c.len_utf8()..).unwrap_or("")),
            None => {
                let mut chars = escape.chars();
                chars.next();
                chars.as_str()
            }
        };
    }
    out.push_str(rest);
    out
}

/// The fields of one event: its message plus any named values.
#[derive(Debug, Default)]
struct EventFields {
    message: String,
    values: Vec<(&'static str, String)>,
}

impl EventFields {
    fn of(event: &tracing::Event<'_>) -> Self {
        let mut fields = Self::default();
        event.record(&mut fields);
        fields
    }

    fn get(&self, name: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.as_str())
    }
}

impl Visit for EventFields {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let value = format!("{value:?}");
        if field.name() == "message" {
            self.message = value;
        } else {
            self.values.push((field.name(), value));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.values.push((field.name(), value.to_string()));
        }
    }
}

/// Render a run-context event as the block under the file header.
fn run_block(fields: &EventFields) -> String {
    let mode = if fields.get("dry_run") == Some("true") {
        "dry run"
    } else {
        "apply"
    };
    format!(
        "root:       {}\nstate dir:  {}\nmigrations: {} known\nmode:       {mode}\n{RULE}",
        fields.get("root").unwrap_or("?"),
        fields.get("state_dir").unwrap_or("?"),
        fields.get("migrations").unwrap_or("?"),
    )
}

/// Render a step event as `step <status> <label> (<detail>)`.
fn step_line(ts: &str, fields: &EventFields) -> String {
    let status = fields.get("status").unwrap_or("?");
    let label = fields.get("step").unwrap_or("?");
    let detail = fields
        .get("detail")
        .map_or_else(String::new, |d| format!(" ({})", strip_ansi(d)));
    format!("[{ts}] step {status:<11} {label}{detail}")
}

/// Appends every event, timestamped and without escape codes, to the
/// command's log file.
#[derive(Debug)]
pub(super) struct FileLayer {
    file: Mutex<fs::File>,
}

impl FileLayer {
    /// Truncate the log file for `command` and write the run header.
    ///
    /// `None` if the cache directory or the file is unavailable.
    pub(super) fn new(command: &str) -> Option<Self> {
        Self::at(&log_file_path(command)?, command)
    }

    pub(super) fn at(path: &Path, command: &str) -> Option<Self> {
        let version =
            option_env!("MIGRATE_VERSION").unwrap_or(concat!("dev-", env!("CARGO_PKG_VERSION")));
        let started = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
        let header = format!("{RULE}\nmigrate {command} ({version}) started {started}\n{RULE}\n");
        fs::write(path, header).ok()?;
        let file = fs::OpenOptions::new().append(true).open(path).ok()?;
        Some(Self {
            file: Mutex::new(file),
        })
    }
}

impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for FileLayer {
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let metadata = event.metadata();
        let fields = EventFields::of(event);
        let ts = chrono::Utc::now().format("%H:%M:%S").to_string();
        let msg = strip_ansi(&fields.message);

        let line = match (*metadata.level(), metadata.target()) {
            (_, RUN_TARGET) => run_block(&fields),
            (_, STEP_TARGET) => step_line(&ts, &fields),
            (_, STAGE_TARGET) => format!("[{ts}] ==> {msg}"),
            (_, DRY_RUN_TARGET) => format!("[{ts}]     [dry run] {msg}"),
            (tracing::Level::ERROR, _) => format!("[{ts}]     [error] {msg}"),
            (tracing::Level::WARN, _) => format!("[{ts}]     [warn] {msg}"),
            (tracing::Level::DEBUG | tracing::Level::TRACE, _) => {
                format!("[{ts}]     [debug] {msg}")
            }
            _ => format!("[{ts}]     {msg}"),
        };

        if let Ok(mut file) = self.file.lock() {
            writeln!(file, "{line}").ok();
        }
    }
}

/// Console output: bold stage arrows, tagged warnings and errors, dimmed
/// debug lines.
struct ConsoleFormat;

impl<S, N> tracing_subscriber::fmt::FormatEvent<S, N> for ConsoleFormat
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    N: for<'a> tracing_subscriber::fmt::FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &tracing_subscriber::fmt::FmtContext<'_, S, N>,
        mut writer: tracing_subscriber::fmt::format::Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let metadata = event.metadata();
        let msg = EventFields::of(event).message;
        match (*metadata.level(), metadata.target()) {
            (tracing::Level::ERROR, _) => writeln!(writer, "\x1b[31mERROR\x1b[0m {msg}"),
            (tracing::Level::WARN, _) => writeln!(writer, "\x1b[33mWARN\x1b[0m  {msg}"),
            (_, STAGE_TARGET) => writeln!(writer, "\x1b[1;34m==>\x1b[0m \x1b[1m{msg}\x1b[0m"),
            (_, DRY_RUN_TARGET) => writeln!(writer, "  \x1b[33m[DRY RUN]\x1b[0m {msg}"),
            (tracing::Level::INFO, _) => writeln!(writer, "  {msg}"),
            _ => writeln!(writer, "  \x1b[2m{msg}\x1b[0m"),
        }
    }
}

/// Install the global subscriber for `command`.
///
/// Warnings and errors go to stderr, everything else at or above the console
/// level to stdout.  The log file records every event down to `DEBUG`.
/// Call once, before anything logs.
pub fn init_subscriber(verbose: bool, command: &str) {
    use tracing_subscriber::fmt::writer::MakeWriterExt as _;
    use tracing_subscriber::{
        Layer as _, filter::LevelFilter, filter::filter_fn, fmt, layer::SubscriberExt as _,
        util::SubscriberInitExt as _,
    };

    let console_level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let console_filter = filter_fn(move |metadata| {
        !matches!(metadata.target(), RUN_TARGET | STEP_TARGET) && *metadata.level() <= console_level
    });

    let writer = std::io::stderr
        .with_max_level(tracing::Level::WARN)
        .and(std::io::stdout.with_min_level(tracing::Level::INFO));
    let console_layer = fmt::layer()
        .event_format(ConsoleFormat)
        .with_writer(writer)
        .with_filter(console_filter);

    let file_layer = FileLayer::new(command).map(|layer| layer.with_filter(LevelFilter::DEBUG));

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .init();
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use tracing_subscriber::{Layer as _, filter::LevelFilter, layer::SubscriberExt as _};

    fn with_file_layer(f: impl FnOnce()) -> String {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("up.log");
        let layer = FileLayer::at(&path, "up").expect("file layer");
        let subscriber = tracing_subscriber::registry().with(layer.with_filter(LevelFilter::DEBUG));
        tracing::subscriber::with_default(subscriber, f);
        fs::read_to_string(&path).unwrap()
    }

    #[test]
    fn header_names_the_command() {
        let contents = with_file_layer(|| {});
        assert!(contents.contains("migrate up ("));
    }

    #[test]
    fn run_context_becomes_header_block() {
        let contents = with_file_layer(|| {
            tracing::info!(
                target: RUN_TARGET,
                root = "/srv/scoreboard",
                state_dir = "migrations",
                migrations = 2_usize,
                dry_run = true,
                "run context"
            );
        });
        assert!(contents.contains("root:       /srv/scoreboard"));
        assert!(contents.contains("state dir:  migrations"));
        assert!(contents.contains("migrations: 2 known"));
        assert!(contents.contains("mode:       dry run"));
        assert!(!contents.contains("run context"));
    }

    #[test]
    fn steps_get_their_own_lines() {
        let contents = with_file_layer(|| {
            tracing::info!(target: STEP_TARGET, step = "10_add_x", status = "applied", detail = "2 files");
            tracing::info!(target: STEP_TARGET, step = "20_rename_x", status = "failed");
        });
        assert!(contents.contains("step applied     10_add_x (2 files)"));
        assert!(contents.contains("step failed      20_rename_x\n"));
    }

    #[test]
    fn events_are_tagged_by_level_and_target() {
        let contents = with_file_layer(|| {
            tracing::info!(target: STAGE_TARGET, "Applying");
            tracing::warn!("careful");
            tracing::error!("\x1b[31mbroken\x1b[0m");
        });
        assert!(contents.contains("==> Applying"));
        assert!(contents.contains("[warn] careful"));
        assert!(contents.contains("[error] broken"));
    }

    #[test]
    fn strip_ansi_drops_escapes() {
        assert_eq!(strip_ansi("\x1b[1;34m==>\x1b[0m \x1b[1mstage\x1b[0m"), "==> stage");
        assert_eq!(strip_ansi("\x1b[2;5Hat\x1b[Kend"), "atend");
        assert_eq!(strip_ansi("\x1bMx ✓"), "x ✓");
        assert_eq!(strip_ansi("plain"), "plain");
    }

    #[test]
    fn log_file_is_per_command() {
        if let Some(path) = log_file_path("down") {
            assert!(path.ends_with("scoreboard-migrate/down.log"));
        }
    }
}
