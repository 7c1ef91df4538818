//! Migrations shipped with the scoreboard, one `<version>_<identifier>.rs`
//! file each.  The module list and [`builtin_migrations`] are generated by
//! `build.rs`.
#![allow(missing_docs)]

use crate::config::ConfigPath;
use crate::context::MigrationContext;
use crate::error::MigrationError;

include!(concat!(env!("OUT_DIR"), "/builtin_migrations.rs"));

/// A schema file together with the custom files of its family, filtered to
/// the migration's targets.
pub(crate) fn family(
    ctx: &MigrationContext<'_>,
    schema: &str,
) -> Result<Vec<ConfigPath>, MigrationError> {
    let mut paths = ctx.configs(schema, false)?;
    paths.extend(ctx.configs(schema, true)?);
    Ok(paths)
}
