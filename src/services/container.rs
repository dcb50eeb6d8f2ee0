//! Service container: wires `Config`, `AgentRegistry`, `JobStore`,
//! `BroadcastClient`, the HTTP/WS surface, and the two background loops
//! (Scheduler, Stream Health Monitor) into one process, and owns the
//! cancellation token that drains all of it on shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::Result;
use crate::api::server::{ApiServer, ApiServerConfig, AppState};
use crate::broadcast::{BroadcastClient, MockBroadcastClient, YoutubeBroadcastClient};
use crate::config::Config;
use crate::jobs::JobStore;
use crate::logging::LoggingConfig;
use crate::monitor::health_monitor::HealthMonitor;
use crate::registry::AgentRegistry;

/// Default deadline for in-flight external-platform calls during shutdown
/// (§5 "Cancellation and shutdown": in-flight calls may complete with a
/// short deadline, but nothing blocks shutdown indefinitely).
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Owns every long-lived service and background task for one orchestrator
/// process. There is no persisted state to hydrate on startup (§5, §9 open
/// question on persistence) — the Agent Registry and Job Store start empty
/// and are rebuilt purely from agent `hello`s and HTTP job creation.
pub struct ServiceContainer {
    pub config: Arc<Config>,
    pub state: AppState,
    health_monitor: Arc<HealthMonitor>,
    api_server_config: ApiServerConfig,
    cancellation_token: CancellationToken,
}

impl ServiceContainer {
    pub fn new(config: Config, logging_config: Arc<LoggingConfig>) -> Result<Self> {
        let config = Arc::new(config);

        let registry = Arc::new(AgentRegistry::with_capacity(config.ui_ws_broadcast_capacity));
        let jobs = Arc::new(JobStore::with_capacity(config.ui_ws_broadcast_capacity));

        let broadcast: Arc<dyn BroadcastClient> = if config.disable_youtube_api {
            info!("DISABLE_YOUTUBE_API set, using mock broadcast client");
            Arc::new(MockBroadcastClient::new())
        } else {
            Arc::new(YoutubeBroadcastClient::new(config.youtube.clone())?)
        };

        let state = AppState::new(
            config.clone(),
            registry.clone(),
            jobs.clone(),
            broadcast.clone(),
            logging_config,
        );

        let health_monitor = Arc::new(HealthMonitor::new(
            jobs,
            registry,
            broadcast,
            config.stream_health_interval_ms,
            config.stream_inactive_grace_ms,
            config.restart_backoffs_ms.clone(),
            config.stop_grace_ms,
        ));

        Ok(Self {
            api_server_config: ApiServerConfig::from_config(&config),
            config,
            state,
            health_monitor,
            cancellation_token: CancellationToken::new(),
        })
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Starts the Scheduler loop and the Stream Health Monitor loop (§4.2,
    /// §4.4); both are single-flight and re-armed on their own interval.
    /// Also starts the daily log retention sweep.
    pub fn start_background_tasks(&self) {
        self.state
            .scheduler
            .clone()
            .spawn(self.cancellation_token.child_token());
        self.health_monitor
            .clone()
            .spawn(self.cancellation_token.child_token());
        self.state
            .logging_config
            .start_retention_cleanup(self.cancellation_token.child_token());
        info!("scheduler, stream health monitor, and log retention cleanup started");
    }

    /// Builds and runs the HTTP/WS surface (§6) in the background. Returns
    /// once the listener is bound; the server itself runs until the
    /// container's cancellation token fires.
    pub async fn start_api_server(&self) -> Result<()> {
        let server = ApiServer::new(self.api_server_config.clone(), self.state.clone());
        let linked = self.cancellation_token.clone();
        let server_cancel = server.cancel_token();
        tokio::spawn(async move {
            linked.cancelled().await;
            server_cancel.cancel();
        });

        tokio::spawn(async move {
            if let Err(error) = server.run().await {
                tracing::error!(%error, "api server exited with an error");
            }
        });

        Ok(())
    }

    /// Cancels every background task and closes every agent socket with a
    /// normal close code (§5 "Cancellation and shutdown"). No state is
    /// flushed anywhere — the model is in-memory by design.
    pub async fn shutdown(&self) {
        self.shutdown_with_timeout(DEFAULT_SHUTDOWN_TIMEOUT).await
    }

    pub async fn shutdown_with_timeout(&self, timeout: Duration) {
        info!("shutting down orchestrator");
        self.cancellation_token.cancel();

        for agent in self.state.registry.list() {
            if let Some(sender) = self.state.registry.current_sender(&agent.agent_id) {
                let _ = sender.send(axum::extract::ws::Message::Close(None));
            }
        }

        if tokio::time::timeout(timeout, tokio::time::sleep(Duration::from_millis(100)))
            .await
            .is_err()
        {
            warn!("shutdown timeout reached, forcing exit");
        }

        info!("orchestrator shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_builds_with_mock_broadcast_client() {
        let config = Config::for_tests();
        let logging_config = crate::logging::shared_test_config();
        let container = ServiceContainer::new(config, logging_config);
        assert!(container.is_ok());
    }
}
