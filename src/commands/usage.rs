//! Usage inspection commands

use anyhow::{Context, Result};
use chrono::Local;
use serde::Serialize;
use serde_json::json;
use tabled::Tabled;

use crate::cli::UsageCommand;
use crate::config::RuntimeContext;
use crate::output::{print_output, print_table};
use crate::ranking::RankedEntity;

use super::{one_shot_dashboard, open_usage_log};

pub async fn run(ctx: &RuntimeContext, command: UsageCommand) -> Result<()> {
    match command {
        UsageCommand::Now => now(ctx).await,
        UsageCommand::Count => count(ctx).await,
    }
}

#[derive(Debug, Serialize, Tabled)]
struct RankRow {
    #[tabled(rename = "#")]
    rank: usize,
    #[tabled(rename = "Entity")]
    entity_id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Activations")]
    count: u64,
}

fn rank_rows(ranked: Vec<RankedEntity>) -> Vec<RankRow> {
    ranked
        .into_iter()
        .enumerate()
        .map(|(i, r)| RankRow {
            rank: i + 1,
            entity_id: r.entity_id,
            name: r.name,
            count: r.count,
        })
        .collect()
}

async fn now(ctx: &RuntimeContext) -> Result<()> {
    let dashboard = one_shot_dashboard(ctx).await?;
    let ranked = dashboard.most_used(Local::now().naive_local()).await;

    if ranked.is_empty() {
        log::info!("No activations recorded around this time of day");
    }
    print_table(ctx, &rank_rows(ranked))
}

async fn count(ctx: &RuntimeContext) -> Result<()> {
    let usage = open_usage_log(ctx).await?;
    let total = tokio::task::spawn_blocking(move || usage.count())
        .await
        .context("counting activations")??;

    print_output(
        ctx,
        &json!({
            "activations": total,
            "database": ctx.database_path()?.display().to_string(),
        }),
    )
}
