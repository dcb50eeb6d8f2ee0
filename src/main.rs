//! stream-orchestrator: control-plane service for live-stream agents.
//!
//! Accepts job-creation requests, matches pending jobs to connected worker
//! agents, drives each job through its lifecycle against an external
//! broadcast platform, and monitors stream health — restarting failed
//! streams with bounded retries.

use std::sync::Arc;

use stream_orchestrator::config::Config;
use stream_orchestrator::logging::init_logging;
use stream_orchestrator::services::ServiceContainer;
use tracing::{info, warn};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;

    let (logging_config, _guard) = init_logging(&config.log_dir)?;
    stream_orchestrator::panic_hook::install(logging_config.log_dir());

    info!("starting stream-orchestrator v{}", env!("CARGO_PKG_VERSION"));

    let container = Arc::new(ServiceContainer::new(config, logging_config)?);

    container.start_background_tasks();
    container.start_api_server().await?;

    info!("stream-orchestrator started successfully");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received SIGINT, initiating shutdown");
        }
        _ = wait_for_sigterm() => {
            info!("received SIGTERM, initiating shutdown");
        }
    }

    container.shutdown().await;
    info!("stream-orchestrator shutdown complete");

    Ok(())
}

/// Wait for SIGTERM (Unix only).
#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{SignalKind, signal};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(error) => {
            warn!(%error, "failed to register SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}

/// No SIGTERM outside Unix; ctrl_c above is the only shutdown trigger.
#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await;
}
