//! Command implementations

pub mod activate;
pub mod cache;
pub mod completions;
pub mod config;
pub mod serve;
pub mod usage;

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::cache::RefreshingCache;
use crate::config::RuntimeContext;
use crate::dashboard::Dashboard;
use crate::gateway::HassGateway;
use crate::usage::UsageLog;

/// Open the usage database off the async runtime
async fn open_usage_log(ctx: &RuntimeContext) -> Result<Arc<UsageLog>> {
    let path = ctx.database_path()?;
    let usage = tokio::task::spawn_blocking(move || UsageLog::open(&path))
        .await
        .context("opening usage log")??;
    Ok(Arc::new(usage))
}

/// A dashboard for one-shot commands: memory-only cache, no background tasks
async fn one_shot_dashboard(ctx: &RuntimeContext) -> Result<Arc<Dashboard>> {
    let gateway = HassGateway::new(ctx.hass_settings()?)?;
    let usage = open_usage_log(ctx).await?;
    let cache = Arc::new(RefreshingCache::new(ctx.cache_policy()?, ctx.refresh_queue()));
    Ok(Arc::new(Dashboard::new(
        gateway,
        usage,
        cache,
        ctx.ranking_settings(),
    )))
}
