//! Scoreboard configuration migrator.
//!
//! Versions the JSON configuration tree of an LED-matrix scoreboard: schema
//! files (`<name>.schema.json`) ship with the project, custom files
//! (`<name>.json`, `<name>.<subname>.json`) belong to the user, and
//! migrations evolve both in lockstep.  Every step is all-or-nothing.
//!
//! The public API is organised into layers:
//!
//! - **[`config`]**: file naming, families and keypaths
//! - **[`transaction`]**: staged, atomically committed JSON writes
//! - **[`context`]**: the key helpers migrations are written with
//! - **[`migrations`]**: migration records, ordering and stub generation
//! - **[`state`]**: the per-file applied-version ledgers
//! - **[`orchestrator`]**: `init`, `up`, `down`, `subconfig`, `reset`, `status`
//! - **[`commands`]**: CLI subcommand handlers
#![deny(clippy::or_fun_call)]
#![deny(clippy::bool_to_int_with_if)]

pub mod cli;
pub mod commands;
pub mod config;
pub mod context;
pub mod error;
pub mod interrupt;
pub mod logging;
pub mod migrate;
pub mod migrations;
pub mod operations;
pub mod orchestrator;
pub mod settings;
pub mod state;
pub mod transaction;
