//! Show the effective configuration.

use crate::cli::commands::Context;
use crate::config::global_config_path;
use crate::error::Result;
use colored::Colorize;

/// Execute `osync config`.
///
/// # Errors
///
/// Returns an error if the registry cannot be built or JSON serialization fails.
pub fn execute(ctx: &Context) -> Result<()> {
    let config = &ctx.config;
    let registry = config.build_registry()?;

    if ctx.json {
        let output = serde_json::json!({
            "database": ctx.db_path,
            "config_file": global_config_path(),
            "config": config,
            "entity_types": registry.entity_types().collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string(&output)?);
        return Ok(());
    }

    println!("{}", "Configuration".bold().underline());
    println!();
    println!("  Database:       {}", ctx.db_path.display());
    match &config.remote_url {
        Some(url) => println!("  Remote:         {url}"),
        None => println!("  Remote:         {}", "none (local-only)".dimmed()),
    }
    println!("  Auto-sync:      {}", if config.enable_auto_sync { "on" } else { "off" });
    println!("  Interval:       {}s", config.sync_interval_secs);
    println!("  Batch size:     {}", config.batch_size);
    println!("  Max retries:    {}", config.max_retries);
    println!(
        "  Backoff:        {}s (max {}s)",
        config.retry_backoff_secs, config.max_backoff_secs
    );
    println!("  Retention:      {}h", config.completed_retention_hours);
    println!();
    println!("{}", "Entities:".blue().bold());
    for entity_type in registry.entity_types() {
        if let Ok(schema) = registry.get(entity_type) {
            println!("  {entity_type:<12} → {}", schema.remote_name);
        }
    }
    Ok(())
}
