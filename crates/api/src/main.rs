//! Calsync - calendar delta sync service
//!
//! Runs the webhook receiver and the cron scheduler until Ctrl-C.

use std::sync::Arc;

use anyhow::Context;
use calsync_app::utils::logging::{init_tracing, LogFormat};
use calsync_app::AppContext;
use calsync_infra::config;
use calsync_infra::http::{webhook_router, WebhookState};
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env before the subscriber so RUST_LOG from the file applies
    let dotenv = dotenvy::dotenv();
    init_tracing(LogFormat::from_env())?;
    match dotenv {
        Ok(path) => info!(path = %path.display(), "loaded .env"),
        Err(e) => debug!(error = %e, "no .env file loaded"),
    }

    let config = config::load().context("failed to load configuration")?;
    let ctx = AppContext::new(config).context("failed to initialise application context")?;

    match ctx.orchestrator.sync_all().await {
        Ok(dispatched) => info!(dispatched, "startup sync finished"),
        Err(e) => warn!(error = %e, "startup sync failed"),
    }
    match ctx.channels.renew_expiring().await {
        Ok(summary) => info!(
            queued = summary.queued,
            still_valid = summary.still_valid,
            failed = summary.failed,
            "webhook channel renewals queued"
        ),
        Err(e) => warn!(error = %e, "webhook channel setup failed"),
    }

    let mut scheduler = ctx.scheduler();
    if ctx.config.sync.enabled {
        scheduler.start().await.context("failed to start sync scheduler")?;
    } else {
        info!("periodic sync disabled");
    }

    let bind_addr = ctx.config.webhook.bind_addr.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind webhook receiver on {bind_addr}"))?;
    info!(addr = %listener.local_addr()?, "webhook receiver listening");

    let app = webhook_router(WebhookState { handler: Arc::clone(&ctx.webhooks) });
    if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await {
        error!(error = %e, "webhook receiver stopped with error");
    }

    if scheduler.is_running() {
        if let Err(e) = scheduler.stop().await {
            warn!(error = %e, "sync scheduler did not stop cleanly");
        }
    }
    ctx.shutdown().await.context("job queue did not drain")?;

    info!("calsync stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(e) => error!(error = %e, "failed to listen for shutdown signal"),
    }
}
