//! Main config: v8 layout to v9.
//!
//! - `pregame_weather` moves to `weather.pregame`
//! - the team-name switches are dropped (coordinates own them now)
//! - `preferred_game_delay_multiplier` is folded into `sync_delay_seconds`
//!
//! Deleted keys cannot be recovered, so there is no `down`.
use serde_json::{Map, Value};

use super::family;
use crate::context::MigrationContext;
use crate::error::MigrationError;

const SCHEMA: &str = "config.schema.json";

pub fn up(ctx: &mut MigrationContext<'_>) -> anyhow::Result<()> {
    for path in family(ctx, SCHEMA)? {
        ctx.update(&path, |doc| -> Result<(), MigrationError> {
            if let Some(content) = doc.as_object_mut() {
                upgrade(content);
            }
            Ok(())
        })?;
    }
    Ok(())
}

fn upgrade(content: &mut Map<String, Value>) {
    if let Some(pregame) = content.shift_remove("pregame_weather") {
        let weather = content
            .entry("weather")
            .or_insert_with(|| Value::Object(Map::new()));
        if let Some(weather) = weather.as_object_mut() {
            weather.insert("pregame".to_string(), pregame);
        }
    }

    content.shift_remove("full_team_names");
    content.shift_remove("short_team_names_for_runs_hits");

    if let Some(multiplier) = content.shift_remove("preferred_game_delay_multiplier")
        && let Some(delay) = content
            .get("api_refresh_rate")
            .and_then(|rate| scale(rate, &multiplier))
    {
        content.insert("sync_delay_seconds".to_string(), delay);
    }
}

/// `rate * multiplier`, kept integral when both are integers.
fn scale(rate: &Value, multiplier: &Value) -> Option<Value> {
    if let (Some(r), Some(m)) = (rate.as_i64(), multiplier.as_i64()) {
        return r.checked_mul(m).map(Value::from);
    }
    let product = rate.as_f64()? * multiplier.as_f64()?;
    serde_json::Number::from_f64(product).map(Value::Number)
}
