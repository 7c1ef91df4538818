//! Coordinates: v8 layout to v9.
//!
//! Adds the team-name display options and renames `teams.runs` to
//! `teams.line_score`, lifting the `runs_hits_errors` block into it.
use serde_json::{Map, Value};

use super::family;
use crate::config::ConfigPath;
use crate::context::{KeyOptions, MigrationContext};
use crate::error::MigrationError;

/// Every coordinates layout with its default for `teams.name.full`.
const LAYOUTS: [(&str, bool); 6] = [
    ("coordinates/w32h32.schema.json", false),
    ("coordinates/w64h32.schema.json", true),
    ("coordinates/w64h64.schema.json", true),
    ("coordinates/w128h32.schema.json", true),
    ("coordinates/w128h64.schema.json", true),
    ("coordinates/w192h64.schema.json", true),
];

/// `runs_hits_errors.<from>` becomes `line_score.<to>`.
const LIFTED: [(&str, &str); 3] = [
    ("show", "show_hits_and_errors"),
    ("compress_digits", "compress_digits"),
    ("spacing", "spacing"),
];

pub fn up(ctx: &mut MigrationContext<'_>) -> anyhow::Result<()> {
    for (schema, full_names) in layouts(ctx) {
        for_family(ctx, schema, |ctx, opts| {
            ctx.add_key_with(schema, "teams.name.full", full_names, opts)?;
            ctx.add_key_with(schema, "teams.name.shorten_on_high_line_score", true, opts)?;
            ctx.rename_key_with(schema, "teams.runs", "line_score", opts)
        })?;
        for path in family(ctx, schema)? {
            ctx.update(&path, lift_runs_hits_errors)?;
        }
    }
    Ok(())
}

pub fn down(ctx: &mut MigrationContext<'_>) -> anyhow::Result<()> {
    for (schema, _) in layouts(ctx) {
        for_family(ctx, schema, |ctx, opts| {
            ctx.remove_key_with(schema, "teams.name.full", opts)?;
            ctx.remove_key_with(schema, "teams.name.shorten_on_high_line_score", opts)?;
            ctx.rename_key_with(schema, "teams.line_score", "runs", opts)
        })?;
        for path in family(ctx, schema)? {
            ctx.update(&path, nest_runs_hits_errors)?;
        }
    }
    Ok(())
}

/// Layouts present in the tree.
fn layouts(ctx: &MigrationContext<'_>) -> Vec<(&'static str, bool)> {
    LAYOUTS
        .into_iter()
        .filter(|(schema, _)| ctx.registry().exists(&ConfigPath::new(schema)))
        .collect()
}

/// Apply `edit` to the schema file, then to its custom files.
fn for_family<F>(
    ctx: &mut MigrationContext<'_>,
    schema: &str,
    mut edit: F,
) -> Result<(), MigrationError>
where
    F: FnMut(&mut MigrationContext<'_>, KeyOptions) -> Result<(), MigrationError>,
{
    edit(ctx, KeyOptions::schema_only())?;
    edit(ctx, KeyOptions::default())
}

fn lift_runs_hits_errors(doc: &mut Value) -> Result<(), MigrationError> {
    let Some(line_score) = object_at(doc, "/teams/line_score") else {
        return Ok(());
    };
    let Some(Value::Object(mut rhe)) = line_score.shift_remove("runs_hits_errors") else {
        return Ok(());
    };
    for (from, to) in LIFTED {
        if let Some(value) = rhe.shift_remove(from) {
            line_score.insert(to.to_string(), value);
        }
    }
    Ok(())
}

fn nest_runs_hits_errors(doc: &mut Value) -> Result<(), MigrationError> {
    let Some(runs) = object_at(doc, "/teams/runs") else {
        return Ok(());
    };
    let mut rhe = Map::new();
    for (from, to) in LIFTED {
        if let Some(value) = runs.shift_remove(to) {
            rhe.insert(from.to_string(), value);
        }
    }
    if !rhe.is_empty() {
        runs.insert("runs_hits_errors".to_string(), Value::Object(rhe));
    }
    Ok(())
}

fn object_at<'v>(doc: &'v mut Value, pointer: &str) -> Option<&'v mut Map<String, Value>> {
    doc.pointer_mut(pointer).and_then(Value::as_object_mut)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn v8_teams() -> Value {
        json!({
            "teams": {
                "runs": {
                    "position": {"x": 1, "y": 2},
                    "runs_hits_errors": {"show": true, "compress_digits": false, "spacing": 3}
                }
            }
        })
    }

    #[test]
    fn lift_flattens_block() {
        let mut doc = json!({"teams": {"line_score": v8_teams()["teams"]["runs"].clone()}});
        lift_runs_hits_errors(&mut doc).unwrap();
        assert_eq!(
            doc,
            json!({"teams": {"line_score": {
                "position": {"x": 1, "y": 2},
                "show_hits_and_errors": true,
                "compress_digits": false,
                "spacing": 3
            }}})
        );
    }

    #[test]
    fn nest_inverts_lift() {
        let original = v8_teams();
        let mut doc = original.clone();
        let runs = doc["teams"]["runs"].take();
        doc["teams"] = json!({"line_score": runs});
        lift_runs_hits_errors(&mut doc).unwrap();

        let line_score = doc["teams"]["line_score"].take();
        doc["teams"] = json!({"runs": line_score});
        nest_runs_hits_errors(&mut doc).unwrap();

        assert_eq!(
            serde_json::to_string(&doc).unwrap(),
            serde_json::to_string(&original).unwrap()
        );
    }

    #[test]
    fn missing_blocks_are_ignored() {
        let mut doc = json!({"teams": {}});
        lift_runs_hits_errors(&mut doc).unwrap();
        nest_runs_hits_errors(&mut doc).unwrap();
        assert_eq!(doc, json!({"teams": {}}));
    }
}
