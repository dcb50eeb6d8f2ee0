//! Stream Health Monitor (§4.4): a single-flight periodic loop that polls
//! the broadcast platform for every `RUNNING` job, restarts stalled streams
//! up to a fixed backoff table, and reaps jobs whose broadcast ended
//! upstream.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::broadcast::BroadcastClient;
use crate::domain::{JobError, JobStatus};
use crate::jobs::{JobNote, JobNoteKind, SharedJobStore};
use crate::registry::{AgentDispatcher, SharedAgentRegistry};

pub struct HealthMonitor {
    jobs: SharedJobStore,
    registry: SharedAgentRegistry,
    dispatcher: AgentDispatcher,
    broadcast: Arc<dyn BroadcastClient>,
    interval: Duration,
    inactive_grace: chrono::Duration,
    restart_backoffs_ms: Vec<u64>,
    stop_grace_ms: u64,
    running: AtomicBool,
}

impl HealthMonitor {
    pub fn new(
        jobs: SharedJobStore,
        registry: SharedAgentRegistry,
        broadcast: Arc<dyn BroadcastClient>,
        interval_ms: u64,
        inactive_grace_ms: u64,
        restart_backoffs_ms: Vec<u64>,
        stop_grace_ms: u64,
    ) -> Self {
        let dispatcher = AgentDispatcher::new(registry.clone());
        Self {
            jobs,
            registry,
            dispatcher,
            broadcast,
            interval: Duration::from_millis(interval_ms),
            inactive_grace: chrono::Duration::milliseconds(inactive_grace_ms as i64),
            restart_backoffs_ms,
            stop_grace_ms,
            running: AtomicBool::new(false),
        }
    }

    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => self.tick().await,
                    _ = cancel.cancelled() => break,
                }
            }
            info!("stream health monitor stopped");
        })
    }

    async fn tick(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        self.sweep_running_jobs().await;
        self.running.store(false, Ordering::SeqCst);
    }

    async fn sweep_running_jobs(&self) {
        for job in self.jobs.running() {
            if job.stream_metadata.is_paused || job.health.pending_restart {
                continue;
            }
            let (Some(broadcast_id), Some(stream_id)) = (
                job.stream_metadata.broadcast.broadcast_id.clone(),
                job.stream_metadata.broadcast.stream_id.clone(),
            ) else {
                continue;
            };

            let status = match self
                .broadcast
                .get_broadcast_and_stream_status(&broadcast_id, &stream_id)
                .await
            {
                Ok(status) => status,
                Err(error) => {
                    warn!(job_id = %job.job_id, %error, "failed to poll broadcast status");
                    continue;
                }
            };

            if status.ended() {
                self.handle_ended(&job.job_id, job.agent_id.as_deref(), &broadcast_id)
                    .await;
                continue;
            }

            if status.inactive() {
                self.handle_inactive(&job.job_id, job.agent_id.as_deref()).await;
            } else if self.jobs.get(&job.job_id).map(|j| j.health.first_inactive_at.is_some()).unwrap_or(false) {
                // Stream recovered on its own before the grace period elapsed.
                self.jobs.update(&job.job_id, |j| j.health.clear_inactivity());
            }
        }
    }

    async fn handle_ended(&self, job_id: &str, agent_id: Option<&str>, broadcast_id: &str) {
        if let Some(agent_id) = agent_id {
            self.dispatcher
                .send_job_stop(agent_id, job_id, "broadcast_ended", self.stop_grace_ms);
        }
        if let Err(error) = self.broadcast.end_broadcast(broadcast_id).await {
            warn!(job_id = %job_id, %error, "end_broadcast failed for an already-ended broadcast");
        }
        self.jobs.update(job_id, |j| {
            j.ended_at = Some(Utc::now());
            j.set_status(JobStatus::Stopped);
        });
        if let Some(agent_id) = agent_id {
            self.registry.clear_job(agent_id);
        }
        self.jobs.emit_note(JobNote::new(
            job_id,
            JobNoteKind::BroadcastCompleted,
            "broadcast ended upstream",
        ));
    }

    async fn handle_inactive(&self, job_id: &str, agent_id: Option<&str>) {
        let Some(job) = self.jobs.get(job_id) else { return };
        if job.health.pending_restart {
            return;
        }

        let first_inactive_at = match job.health.first_inactive_at {
            Some(at) => at,
            None => {
                self.jobs
                    .update(job_id, |j| j.health.first_inactive_at = Some(Utc::now()));
                return;
            }
        };

        if Utc::now() - first_inactive_at < self.inactive_grace {
            return;
        }

        let attempts = job.health.attempts as usize;
        if attempts >= self.restart_backoffs_ms.len() {
            self.jobs.update(job_id, |j| j.fail(JobError::STREAM_RESTART_EXCEEDED, "stream inactivity exceeded restart budget"));
            if let Some(broadcast_id) = job.stream_metadata.broadcast.broadcast_id.as_deref() {
                let _ = self.broadcast.end_broadcast(broadcast_id).await;
            }
            if let Some(agent_id) = agent_id {
                self.registry.clear_job(agent_id);
            }
            return;
        }

        let backoff_ms = self.restart_backoffs_ms[attempts];
        let reachable = agent_id
            .map(|id| self.registry.is_reachable(id))
            .unwrap_or(false);

        if reachable {
            let agent_id = agent_id.expect("reachable implies Some");
            // §4.4 step 8b: dispatch the stop and wait for the matching
            // `AgentJobStopped` (handled in the websocket layer) to reset the
            // job to `PENDING` — never force it through on a timer, or a slow
            // ack could race a scheduler rebind while the old agent is still
            // mid-stop.
            self.jobs.update(job_id, |j| {
                j.health.pending_restart = true;
                j.health.next_restart_at = Some(Utc::now() + chrono::Duration::milliseconds(backoff_ms as i64));
                j.health.attempts += 1;
                j.set_status(JobStatus::Stopping);
            });
            self.dispatcher
                .send_job_stop(agent_id, job_id, "stream_inactive_restart", self.stop_grace_ms);
        } else {
            // §4.4 step 8a: agent unreachable, rebind immediately rather than
            // waiting for an ack that will never arrive.
            self.jobs.update(job_id, |j| {
                j.health.attempts += 1;
                j.health.reset_for_restart();
                j.agent_id = None;
                j.started_at = None;
                j.ended_at = None;
                j.error = None;
                j.stream_metadata.is_paused = false;
                j.set_status(JobStatus::Pending);
            });
            if let Some(agent_id) = agent_id {
                self.registry.clear_job(agent_id);
            }
        }

        self.jobs.emit_note(JobNote::new(
            job_id,
            JobNoteKind::RestartRequested,
            format!("stream inactive, restart {}/{} scheduled", attempts + 1, self.restart_backoffs_ms.len()),
        ));
        if !reachable {
            self.jobs.emit_note(JobNote::new(
                job_id,
                JobNoteKind::RestartReady,
                "agent unreachable, queued for reassignment immediately",
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::{BroadcastStatus, MockBroadcastClient};
    use crate::domain::{AgentCapabilities, BroadcastHandles, InlineConfig, RestartPolicy, StreamMetadata};
    use crate::jobs::JobStore;
    use crate::registry::AgentRegistry;
    use axum::extract::ws::Message;
    use tokio::sync::mpsc;

    fn running_job(job_id: &str, agent_id: Option<&str>) -> crate::domain::StreamingJob {
        let mut metadata = StreamMetadata::default();
        metadata.broadcast = BroadcastHandles {
            broadcast_id: Some("b1".to_string()),
            stream_id: Some("s1".to_string()),
            ..Default::default()
        };
        let mut job = crate::domain::StreamingJob::new(
            job_id.to_string(),
            InlineConfig::Inline { inline_config: serde_json::json!({}) },
            None,
            RestartPolicy::Never,
            "tester".to_string(),
            metadata,
        );
        job.agent_id = agent_id.map(str::to_string);
        job.set_status(JobStatus::Running);
        job
    }

    fn monitor(jobs: SharedJobStore, registry: SharedAgentRegistry, broadcast: Arc<MockBroadcastClient>) -> HealthMonitor {
        let dispatcher = AgentDispatcher::new(registry.clone());
        HealthMonitor {
            jobs,
            registry,
            dispatcher,
            broadcast,
            interval: Duration::from_millis(15_000),
            inactive_grace: chrono::Duration::milliseconds(0),
            restart_backoffs_ms: vec![5_000, 15_000, 45_000],
            stop_grace_ms: 10_000,
            running: AtomicBool::new(false),
        }
    }

    #[tokio::test]
    async fn inactive_stream_with_reachable_agent_dispatches_stop_without_forcing_pending() {
        let jobs = Arc::new(JobStore::new());
        let registry = Arc::new(AgentRegistry::new());
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        registry.handle_hello(
            "agent-1",
            None,
            "worker-1".into(),
            "1.0.0".into(),
            AgentCapabilities::default(),
            false,
            tx,
        );
        registry.bind_job("agent-1", "job-1");

        jobs.insert(running_job("job-1", Some("agent-1")));

        let broadcast = Arc::new(MockBroadcastClient::new());
        broadcast.set_status(
            "b1",
            BroadcastStatus {
                life_cycle_status: Some("ready".to_string()),
                actual_end_time: None,
                stream_status: Some("inactive".to_string()),
            },
        );

        let monitor = monitor(jobs.clone(), registry.clone(), broadcast);
        // First tick only starts the grace period (firstInactiveAt).
        monitor.sweep_running_jobs().await;
        assert_eq!(jobs.get("job-1").unwrap().status, JobStatus::Running);
        // Second tick: grace period (0ms in this test) has elapsed.
        monitor.sweep_running_jobs().await;

        let job = jobs.get("job-1").unwrap();
        assert_eq!(job.status, JobStatus::Stopping);
        assert!(job.health.pending_restart);
        assert_eq!(job.agent_id.as_deref(), Some("agent-1"));
        assert!(rx.try_recv().is_ok(), "expected a job.stop frame dispatched to the agent");
    }

    #[tokio::test]
    async fn inactive_stream_with_unreachable_agent_is_rebound_immediately() {
        let jobs = Arc::new(JobStore::new());
        let registry = Arc::new(AgentRegistry::new());
        // No hello, so "agent-1" has no live socket on file.
        jobs.insert(running_job("job-1", Some("agent-1")));

        let broadcast = Arc::new(MockBroadcastClient::new());
        broadcast.set_status(
            "b1",
            BroadcastStatus {
                life_cycle_status: Some("ready".to_string()),
                actual_end_time: None,
                stream_status: Some("inactive".to_string()),
            },
        );

        let monitor = monitor(jobs.clone(), registry, broadcast);
        monitor.sweep_running_jobs().await;
        monitor.sweep_running_jobs().await;

        let job = jobs.get("job-1").unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.agent_id.is_none());
        assert!(!job.health.pending_restart);
        assert_eq!(job.health.attempts, 1);
    }

    #[tokio::test]
    async fn restart_budget_exhaustion_fails_job_and_ends_broadcast() {
        let jobs = Arc::new(JobStore::new());
        let registry = Arc::new(AgentRegistry::new());
        let mut job = running_job("job-1", None);
        job.health.attempts = 3; // already at the backoff table length
        jobs.insert(job);

        let broadcast = Arc::new(MockBroadcastClient::new());
        broadcast.set_status(
            "b1",
            BroadcastStatus {
                life_cycle_status: Some("ready".to_string()),
                actual_end_time: None,
                stream_status: Some("inactive".to_string()),
            },
        );

        let monitor = monitor(jobs.clone(), registry, broadcast.clone());
        monitor.sweep_running_jobs().await;
        monitor.sweep_running_jobs().await;

        let job = jobs.get("job-1").unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.unwrap().code, JobError::STREAM_RESTART_EXCEEDED);
        assert_eq!(broadcast.end_call_count("b1"), 1);
    }

    #[tokio::test]
    async fn ended_broadcast_stops_job_and_clears_agent() {
        let jobs = Arc::new(JobStore::new());
        let registry = Arc::new(AgentRegistry::new());
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        registry.handle_hello(
            "agent-1",
            None,
            "worker-1".into(),
            "1.0.0".into(),
            AgentCapabilities::default(),
            false,
            tx,
        );
        registry.bind_job("agent-1", "job-1");
        jobs.insert(running_job("job-1", Some("agent-1")));

        let broadcast = Arc::new(MockBroadcastClient::new());
        broadcast.set_status(
            "b1",
            BroadcastStatus {
                life_cycle_status: Some("complete".to_string()),
                actual_end_time: Some(Utc::now()),
                stream_status: Some("inactive".to_string()),
            },
        );

        let monitor = monitor(jobs.clone(), registry.clone(), broadcast.clone());
        monitor.sweep_running_jobs().await;

        let job = jobs.get("job-1").unwrap();
        assert_eq!(job.status, JobStatus::Stopped);
        assert_eq!(broadcast.end_call_count("b1"), 1);
        assert!(registry.get("agent-1").unwrap().current_job_id.is_none());
        assert!(rx.try_recv().is_ok(), "expected a job.stop frame for the ended broadcast");
    }
}
