use anyhow::{Context, Result};
use ckp_core::OutputFormat;
use serde_json::json;
use tracing::info;

use crate::context::AppContext;
use crate::output::print_json;

pub(crate) fn handle_config_show(ctx: &AppContext) -> Result<()> {
    match ctx.format {
        OutputFormat::Json => print_json(&ctx.settings),
        OutputFormat::Text => {
            for key in ctx.settings.keys() {
                let value = ctx.settings.get(&key)?;
                println!("{key} = {}", format_value(&value));
            }
            Ok(())
        }
    }
}

/// Get one value by dotted key path from the effective settings.
pub(crate) fn handle_config_get(ctx: &AppContext, key: &str) -> Result<()> {
    let value = ctx.settings.get(key)?;
    match ctx.format {
        OutputFormat::Json => print_json(&value),
        OutputFormat::Text => {
            println!("{}", format_value(&value));
            Ok(())
        }
    }
}

/// Set one value and save. Nothing is written if the value is rejected.
pub(crate) fn handle_config_set(ctx: &AppContext, key: &str, raw: &str) -> Result<()> {
    let mut settings = ctx.settings.clone();
    settings.set(key, raw)?;
    let path = ctx.paths.config_path();
    settings
        .save(path)
        .with_context(|| format!("Failed to save settings to {}", path.display()))?;
    info!(key, path = %path.display(), "Updated setting");

    let value = settings.get(key)?;
    match ctx.format {
        OutputFormat::Json => print_json(&json!({ "key": key, "value": value })),
        OutputFormat::Text => {
            println!("{key} = {}", format_value(&value));
            Ok(())
        }
    }
}

pub(crate) fn handle_config_path(ctx: &AppContext) -> Result<()> {
    let path = ctx.paths.config_path();
    match ctx.format {
        OutputFormat::Json => print_json(&json!({
            "path": path,
            "exists": path.exists(),
        })),
        OutputFormat::Text => {
            println!("{}", path.display());
            Ok(())
        }
    }
}

/// Strings print bare; everything else as compact JSON.
fn format_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
