//! Dashboard server command

use std::sync::Arc;

use anyhow::Result;

use crate::cache::RefreshingCache;
use crate::cli::ServeArgs;
use crate::config::RuntimeContext;
use crate::dashboard::Dashboard;
use crate::gateway::HassGateway;
use crate::server;

use super::open_usage_log;

pub async fn run(ctx: &RuntimeContext, args: ServeArgs) -> Result<()> {
    let gateway = HassGateway::new(ctx.hass_settings()?)?;
    let usage = open_usage_log(ctx).await?;

    let policy = ctx.cache_policy()?;
    log::debug!(
        "Cache entries go stale after {} and expire after {}",
        humantime::format_duration(policy.stale_after()),
        humantime::format_duration(policy.max_age()),
    );
    let cache = Arc::new(
        RefreshingCache::new(policy, ctx.refresh_queue())
            .with_snapshot(ctx.snapshot_path()?, gateway.server_url()),
    );
    let persister = cache.spawn_persister(ctx.persist_debounce()?);

    log::info!("Using Home Assistant at {}", gateway.server_url());
    let dashboard = Arc::new(Dashboard::new(
        gateway,
        usage,
        Arc::clone(&cache),
        ctx.ranking_settings(),
    ));
    let worker = dashboard.spawn_refresh_worker();

    let result = server::serve(&ctx.listen_addr(&args), dashboard).await;

    for task in [worker, persister].into_iter().flatten() {
        task.abort();
    }
    let flushed = Arc::clone(&cache);
    match tokio::task::spawn_blocking(move || flushed.flush()).await {
        Ok(Ok(())) => log::debug!("Cache snapshot written"),
        Ok(Err(err)) => log::warn!("Failed to write cache snapshot on shutdown: {err:#}"),
        Err(err) => log::error!("Cache flush task failed: {err}"),
    }

    result
}
