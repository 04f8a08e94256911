//! HTTP surface of the dashboard

mod handlers;
mod html;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::routing::get;
use axum::Router;

use crate::dashboard::Dashboard;

/// Build the router; the dashboard is the only shared state
pub fn router(dashboard: Arc<Dashboard>) -> Router {
    Router::new()
        .route("/", get(handlers::index))
        .route("/area/{area_id}", get(handlers::area))
        .route("/activate/{entity_id}", get(handlers::activate))
        .route("/api/data", get(handlers::data))
        .route("/api/refresh-cache", get(handlers::refresh_cache))
        .route("/health", get(handlers::health))
        .with_state(dashboard)
}

/// Serve until Ctrl+C
pub async fn serve(addr: &str, dashboard: Arc<Dashboard>) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    log::info!("Dashboard listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router(dashboard))
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                log::error!("Failed to listen for Ctrl+C: {err}");
                std::future::pending::<()>().await;
            }
            log::info!("Received Ctrl+C, shutting down");
        })
        .await
        .context("serving HTTP")
}
