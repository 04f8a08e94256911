//! Cache management commands
//!
//! These inspect the on-disk snapshot the server writes; they never talk to
//! a running server.

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tabled::Tabled;

use crate::cache::{describe_entries, remove_snapshot, CacheKeyStatus, CacheSnapshot};
use crate::cli::{CacheCommand, OutputFormat};
use crate::config::RuntimeContext;
use crate::output::{print_output, print_table};

pub fn run(ctx: &RuntimeContext, command: CacheCommand) -> Result<()> {
    match command {
        CacheCommand::Status => status(ctx),
        CacheCommand::Clear => clear(ctx),
        CacheCommand::Path => path(ctx),
    }
}

#[derive(Debug, Serialize, Tabled)]
struct KeyRow {
    #[tabled(rename = "Key")]
    key: String,
    #[tabled(rename = "Age")]
    age: String,
    #[tabled(rename = "Status")]
    freshness: String,
}

impl From<CacheKeyStatus> for KeyRow {
    fn from(status: CacheKeyStatus) -> Self {
        Self {
            key: status.key,
            age: format_duration(status.age_secs),
            freshness: status.freshness.to_string(),
        }
    }
}

fn status(ctx: &RuntimeContext) -> Result<()> {
    let path = ctx.snapshot_path()?;
    if !path.exists() {
        if !ctx.global.quiet {
            println!("No cache snapshot at {}", path.display());
        }
        return Ok(());
    }

    let snapshot = CacheSnapshot::read(&path)?;
    let policy = ctx.cache_policy()?;
    let entries = describe_entries(&snapshot.entries, &policy, Utc::now());

    match ctx.output_format() {
        OutputFormat::Json | OutputFormat::Yaml => print_output(
            ctx,
            &json!({
                "path": path.display().to_string(),
                "server_url": snapshot.server_url,
                "saved_at": snapshot.saved_at,
                "entries": entries,
            }),
        ),
        _ => {
            println!("Snapshot: {}", path.display());
            println!("Server: {}", snapshot.server_url);
            println!("Saved: {}", snapshot.saved_at.to_rfc3339());
            println!();
            let rows: Vec<KeyRow> = entries.into_iter().map(KeyRow::from).collect();
            print_table(ctx, &rows)
        }
    }
}

fn clear(ctx: &RuntimeContext) -> Result<()> {
    let path = ctx.snapshot_path()?;
    let removed = remove_snapshot(&path)?;

    if !ctx.global.quiet {
        if removed {
            println!("Cache cleared: {}", path.display());
        } else {
            println!("No cache snapshot at {}", path.display());
        }
    }
    Ok(())
}

fn path(ctx: &RuntimeContext) -> Result<()> {
    let path = ctx.snapshot_path()?;

    match ctx.output_format() {
        OutputFormat::Json | OutputFormat::Yaml => {
            print_output(ctx, &json!({ "path": path.display().to_string() }))
        }
        _ => {
            println!("{}", path.display());
            Ok(())
        }
    }
}

fn format_duration(secs: u64) -> String {
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else if secs < 86400 {
        format!("{}h", secs / 3600)
    } else {
        format!("{}d", secs / 86400)
    }
}
