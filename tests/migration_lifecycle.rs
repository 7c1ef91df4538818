#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::wildcard_imports,
    clippy::indexing_slicing
)]
//! Integration tests for `init`, `up` and `down`.
//!
//! These drive the orchestrator against temporary scoreboard trees with
//! migrations defined in this file, and check what lands on disk.

mod common;

use std::cell::RefCell;
use std::sync::Arc;

use common::{FailingRename, TestRepo, TestRepoBuilder};
use scoreboard_migrate::config::{ConfigPath, ConfigRegistry};
use scoreboard_migrate::context::MigrationContext;
use scoreboard_migrate::error::MigrationError;
use scoreboard_migrate::migrations::Migration;
use scoreboard_migrate::orchestrator::Phase;
use scoreboard_migrate::settings::Settings;
use scoreboard_migrate::transaction::TransactionManager;
use serde_json::json;

fn versions(repo: &TestRepo, path: &str) -> Vec<u64> {
    let orchestrator = repo.orchestrator(vec![]);
    let state = orchestrator.applied_state().unwrap();
    state.versions(&ConfigPath::new(path)).unwrap().to_vec()
}

fn error_of(err: &anyhow::Error) -> &MigrationError {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<MigrationError>())
        .expect("a MigrationError in the chain")
}

// ---------------------------------------------------------------------------
// Migrations used below
// ---------------------------------------------------------------------------

fn add_x(ctx: &mut MigrationContext<'_>) -> anyhow::Result<()> {
    ctx.add_key("config.json", "x", 1)?;
    Ok(())
}

fn rename_x_to_y(ctx: &mut MigrationContext<'_>) -> anyhow::Result<()> {
    ctx.rename_key("config.json", "x", "y")?;
    Ok(())
}

fn remove_x(ctx: &mut MigrationContext<'_>) -> anyhow::Result<()> {
    ctx.remove_key("config.json", "x")?;
    Ok(())
}

fn set_x_2(ctx: &mut MigrationContext<'_>) -> anyhow::Result<()> {
    ctx.overwrite_key("config.json", "x", 2)?;
    Ok(())
}

fn set_x_1(ctx: &mut MigrationContext<'_>) -> anyhow::Result<()> {
    ctx.overwrite_key("config.json", "x", 1)?;
    Ok(())
}

fn add_k(ctx: &mut MigrationContext<'_>) -> anyhow::Result<()> {
    ctx.add_key("config.json", "k", 1)?;
    Ok(())
}

fn restructure(ctx: &mut MigrationContext<'_>) -> anyhow::Result<()> {
    ctx.move_key("config.schema.json", "pregame_weather", "weather.pregame")?;
    ctx.rename_key("coordinates/w64h32.schema.json", "teams.runs", "line_score")?;
    ctx.add_key("coordinates/w64h32.schema.json", "teams.name.full", true)?;
    Ok(())
}

fn unrestructure(ctx: &mut MigrationContext<'_>) -> anyhow::Result<()> {
    ctx.remove_key("coordinates/w64h32.schema.json", "teams.name.full")?;
    ctx.rename_key("coordinates/w64h32.schema.json", "teams.line_score", "runs")?;
    ctx.move_key("config.schema.json", "weather.pregame", "pregame_weather")?;
    Ok(())
}

fn touch_both_then_fail(ctx: &mut MigrationContext<'_>) -> anyhow::Result<()> {
    ctx.add_key("config.json", "a_was_here", true)?;
    ctx.add_key("coordinates/w64h32.json", "b_was_here", true)?;
    anyhow::bail!("failed after touching two files")
}

thread_local! {
    static CALLS: RefCell<Vec<&'static str>> = const { RefCell::new(Vec::new()) };
}

fn note(call: &'static str) {
    CALLS.with(|calls| calls.borrow_mut().push(call));
}

fn up_10(_: &mut MigrationContext<'_>) -> anyhow::Result<()> {
    note("up 10");
    Ok(())
}

fn down_10(_: &mut MigrationContext<'_>) -> anyhow::Result<()> {
    note("down 10");
    Ok(())
}

fn up_20(_: &mut MigrationContext<'_>) -> anyhow::Result<()> {
    note("up 20");
    Ok(())
}

fn down_20(_: &mut MigrationContext<'_>) -> anyhow::Result<()> {
    note("down 20");
    Ok(())
}

fn scoreboard() -> TestRepo {
    TestRepoBuilder::new()
        .with_json(
            "config.schema.json",
            json!({"weather": {"units": "imperial"}, "pregame_weather": true}),
        )
        .with_json(
            "config.json",
            json!({"weather": {"units": "metric"}, "pregame_weather": false}),
        )
        .with_json(
            "coordinates/w64h32.schema.json",
            json!({"teams": {"runs": {"x": 1}, "name": {}}}),
        )
        .with_json(
            "coordinates/w64h32.json",
            json!({"teams": {"runs": {"x": 2}, "name": {}}}),
        )
        .build()
}

// ---------------------------------------------------------------------------
// init
// ---------------------------------------------------------------------------

#[test]
fn init_creates_missing_customs_with_schema_ledger() {
    let repo = TestRepoBuilder::new()
        .with_json("config.schema.json", json!({"a": 1}))
        .with_json("colors/teams.schema.json", json!({"red": [255, 0, 0]}))
        .with_json("colors/scoreboard.schema.json", json!({"bg": 0}))
        .with_json("colors/scoreboard.json", json!({"bg": 7}))
        .with_json("migrations/schema-status.json", json!({"config.schema.json": [5]}))
        .build();

    let report = repo.orchestrator(vec![]).init().unwrap();
    let created: Vec<&str> = report.created.iter().map(ConfigPath::as_str).collect();
    let skipped: Vec<&str> = report.skipped.iter().map(ConfigPath::as_str).collect();
    assert_eq!(created, ["colors/teams.json", "config.json"]);
    assert_eq!(skipped, ["colors/scoreboard.json"]);

    assert_eq!(repo.read_json("config.json"), json!({"a": 1}));
    assert_eq!(repo.read_json("colors/scoreboard.json"), json!({"bg": 7}));
    assert_eq!(versions(&repo, "config.json"), [5]);
    assert!(versions(&repo, "colors/teams.json").is_empty());
}

#[test]
fn init_twice_equals_init_once() {
    let repo = TestRepoBuilder::new()
        .with_json("config.schema.json", json!({"a": 1}))
        .with_json("coordinates/w32h32.schema.json", json!({"b": 2}))
        .with_json("migrations/schema-status.json", json!({"config.schema.json": [5]}))
        .build();

    repo.orchestrator(vec![]).init().unwrap();
    let once = repo.files();
    let report = repo.orchestrator(vec![]).init().unwrap();
    assert!(report.created.is_empty());
    assert_eq!(repo.files(), once);
}

// ---------------------------------------------------------------------------
// up / down
// ---------------------------------------------------------------------------

#[test]
fn up_then_down_is_byte_identical() {
    let repo = scoreboard();
    let before = repo.files();
    let migration = Migration::new(10, "restructure", restructure).with_down(unrestructure);

    let mut orchestrator = repo.orchestrator(vec![migration.clone()]);
    orchestrator.up(None).unwrap();
    assert_eq!(repo.read_json("config.json")["weather"]["pregame"], json!(false));
    assert_eq!(
        repo.read_json("coordinates/w64h32.json")["teams"]["line_score"],
        json!({"x": 2})
    );

    orchestrator.down(None).unwrap();
    let mut after = repo.files();
    // Emptied ledgers remain as `{}`.
    assert_eq!(after.remove("migrations/schema-status.json").unwrap(), b"{}\n");
    assert_eq!(after.remove("migrations/custom-status.json").unwrap(), b"{}\n");
    assert_eq!(after, before);
}

#[test]
fn failing_up_changes_nothing() {
    let repo = scoreboard();
    let before = repo.files();
    let mut orchestrator =
        repo.orchestrator(vec![Migration::new(10, "touch_both", touch_both_then_fail)]);

    let err = orchestrator.up(None).unwrap_err();
    assert!(format!("{err:#}").contains("failed after touching two files"));
    assert_eq!(orchestrator.phase(), Phase::RolledBack);
    assert_eq!(repo.files(), before);
}

#[test]
fn failed_rename_restores_swapped_files() {
    let repo = scoreboard();
    let before = repo.files();
    let mut orchestrator = repo.orchestrator_with_fs(
        vec![Migration::new(10, "restructure", restructure)],
        Arc::new(FailingRename::new("w64h32.json")),
    );

    let err = orchestrator.up(None).unwrap_err();
    assert!(matches!(error_of(&err), MigrationError::CommitFailed { .. }));
    assert_eq!(repo.files(), before);
}

#[test]
fn add_key_reaches_whole_family_but_not_schema() {
    let repo = TestRepoBuilder::new()
        .with_family("config.json", json!({}))
        .with_json("config.custom.json", json!({}))
        .with_json("config.test.json", json!({}))
        .build();
    repo.orchestrator(vec![Migration::new(10, "add_k", add_k)])
        .up(None)
        .unwrap();

    for file in ["config.json", "config.custom.json", "config.test.json"] {
        assert_eq!(repo.read_json(file)["k"], json!(1), "{file}");
        assert_eq!(versions(&repo, file), [10], "{file}");
    }
    assert!(repo.read_json("config.schema.json").get("k").is_none());
    assert_eq!(versions(&repo, "config.schema.json"), [10]);
}

#[test]
fn migrations_run_in_version_order() {
    let repo = TestRepoBuilder::new().with_family("config.json", json!({})).build();
    let migrations = vec![
        Migration::new(20, "second", up_20).with_down(down_20),
        Migration::new(10, "first", up_10).with_down(down_10),
    ];
    let mut orchestrator = repo.orchestrator(migrations);

    CALLS.with(|calls| calls.borrow_mut().clear());
    orchestrator.up(None).unwrap();
    orchestrator.down(Some(2)).unwrap();
    let calls = CALLS.with(|calls| calls.borrow().clone());
    assert_eq!(calls, ["up 10", "up 20", "down 20", "down 10"]);
}

#[test]
fn step_limits_how_many_migrations_run() {
    let repo = TestRepoBuilder::new().with_family("config.json", json!({})).build();
    let migrations = vec![
        Migration::new(10, "first", up_10),
        Migration::new(20, "second", up_20),
    ];
    let mut orchestrator = repo.orchestrator(migrations);

    let reports = orchestrator.up(Some(1)).unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(versions(&repo, "config.json"), [10]);
    orchestrator.up(Some(1)).unwrap();
    assert_eq!(versions(&repo, "config.json"), [10, 20]);
}

#[test]
fn overwrite_scenario_with_direct_add_key() {
    let repo = TestRepoBuilder::new().with_family("config.json", json!({})).build();
    let migrations = vec![
        Migration::new(1, "v1", add_x).with_down(remove_x),
        Migration::new(2, "v2", set_x_2).with_down(set_x_1),
    ];
    let mut orchestrator = repo.orchestrator(migrations);

    orchestrator.up(None).unwrap();
    assert_eq!(repo.read_json("config.json")["x"], json!(2));
    assert_eq!(versions(&repo, "config.json"), [1, 2]);

    orchestrator.down(None).unwrap();
    assert_eq!(repo.read_json("config.json")["x"], json!(1));
    assert_eq!(versions(&repo, "config.json"), [1]);

    let registry = ConfigRegistry::new(repo.path(), &Settings::default());
    let manager = TransactionManager::new(repo.path());
    let mut txn = manager.begin().unwrap();
    let err = MigrationContext::new(&mut txn, &registry)
        .add_key("config.json", "x", 3)
        .unwrap_err();
    assert!(matches!(err, MigrationError::KeyAlreadyExists { .. }));
    txn.abort();
    assert_eq!(repo.read_json("config.json")["x"], json!(1));
}

#[test]
fn irreversible_down_leaves_state() {
    let repo = TestRepoBuilder::new().with_family("config.json", json!({})).build();
    let mut orchestrator = repo.orchestrator(vec![Migration::new(10, "add_x", add_x)]);
    orchestrator.up(None).unwrap();
    let applied = repo.files();

    let err = orchestrator.down(None).unwrap_err();
    assert!(matches!(
        error_of(&err),
        MigrationError::IrreversibleMigration { version: 10, .. }
    ));
    assert_eq!(repo.files(), applied);
}

#[test]
fn unknown_applied_version_is_corruption() {
    let repo = TestRepoBuilder::new()
        .with_family("config.json", json!({}))
        .with_json("migrations/custom-status.json", json!({"config.json": [99]}))
        .build();
    let err = repo.orchestrator(vec![]).down(None).unwrap_err();
    let error = error_of(&err);
    assert!(matches!(error, MigrationError::StateCorruption { .. }));
    assert!(error.is_fatal());
}

#[test]
fn dry_run_reports_without_writing() {
    let repo = scoreboard();
    let before = repo.files();
    let mut orchestrator = repo
        .orchestrator(vec![Migration::new(10, "restructure", restructure)])
        .dry_run(true);

    let reports = orchestrator.up(None).unwrap();
    let changed: Vec<&str> = reports[0].changed.iter().map(ConfigPath::as_str).collect();
    assert!(changed.contains(&"config.json"));
    assert!(changed.contains(&"coordinates/w64h32.json"));
    assert_eq!(repo.files(), before);
}

#[test]
fn dry_run_chains_dependent_migrations() {
    let repo = TestRepoBuilder::new().with_family("config.json", json!({})).build();
    let before = repo.files();
    let migrations = || {
        vec![
            Migration::new(10, "add_x", add_x),
            Migration::new(20, "rename_x", rename_x_to_y),
        ]
    };

    let reports = repo.orchestrator(migrations()).dry_run(true).up(None).unwrap();
    assert_eq!(reports.len(), 2);
    assert!(reports[1].changed.contains(&ConfigPath::new("config.json")));
    assert_eq!(repo.files(), before);

    let reports = repo.orchestrator(migrations()).up(None).unwrap();
    assert_eq!(reports.len(), 2);
    assert_eq!(repo.read_json("config.json"), json!({"y": 1}));
}
