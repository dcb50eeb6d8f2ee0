//! Scheduler (§4.2): a single-flight periodic loop that binds the oldest
//! `PENDING` job to an idle agent, dispatches `orchestrator.assign.start`,
//! and reverts the binding if the agent never acknowledges within the TTL.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::{AgentState, JobStatus};
use crate::jobs::SharedJobStore;
use crate::registry::{AgentDispatcher, SharedAgentRegistry};

pub struct Scheduler {
    jobs: SharedJobStore,
    registry: SharedAgentRegistry,
    dispatcher: AgentDispatcher,
    interval: Duration,
    ack_ttl_ms: u64,
    running: AtomicBool,
}

impl Scheduler {
    /// Takes the dispatcher rather than constructing its own, so the ack
    /// waiters it registers are the same table an `agent.assign.ack` arriving
    /// on the websocket handler resolves against.
    pub fn new(
        jobs: SharedJobStore,
        registry: SharedAgentRegistry,
        dispatcher: AgentDispatcher,
        interval_ms: u64,
        ack_ttl_ms: u64,
    ) -> Self {
        Self {
            jobs,
            registry,
            dispatcher,
            interval: Duration::from_millis(interval_ms),
            ack_ttl_ms,
            running: AtomicBool::new(false),
        }
    }

    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => self.tick(),
                    _ = cancel.cancelled() => break,
                }
            }
            info!("scheduler stopped");
        })
    }

    /// Binds as many `PENDING` jobs to idle agents as currently possible;
    /// re-armed every tick rather than left running, so a slow dispatch
    /// attempt never overlaps the next tick (single-flight guard). Exposed
    /// so the `/agent` hello handler and the job-creation route can "kick"
    /// the scheduler on demand (§4.1 step 7, §4.2) instead of waiting out
    /// the periodic interval.
    pub fn tick(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        loop {
            let Some(job) = self.jobs.oldest_pending() else {
                break;
            };
            let Some(agent_id) = self.registry.reserve_idle_agent() else {
                break;
            };

            self.registry.bind_job(&agent_id, &job.job_id);
            let assigned = self.jobs.update(&job.job_id, |j| {
                j.agent_id = Some(agent_id.clone());
                j.set_status(JobStatus::Assigned);
            });
            let Some(assigned) = assigned else {
                self.registry.clear_job(&agent_id);
                continue;
            };

            let expires_at = Utc::now() + chrono::Duration::milliseconds(self.ack_ttl_ms as i64);
            if !self
                .dispatcher
                .send_assign_start(&agent_id, &assigned, expires_at)
            {
                warn!(agent_id = %agent_id, job_id = %job.job_id, "assign.start dispatch failed, reverting");
                self.revert(&job.job_id, &agent_id);
                // The socket is gone; stop treating the agent as reservable.
                self.registry.set_state(&agent_id, AgentState::Offline);
                continue;
            }

            debug!(agent_id = %agent_id, job_id = %job.job_id, "job assigned, awaiting ack");
            let ack_rx = self.dispatcher.register_ack_waiter(&job.job_id);
            self.spawn_ack_watchdog(job.job_id.clone(), agent_id.clone(), expires_at, ack_rx);
        }

        self.running.store(false, Ordering::SeqCst);
    }

    fn revert(&self, job_id: &str, agent_id: &str) {
        self.jobs.update(job_id, |j| {
            j.agent_id = None;
            j.set_status(JobStatus::Pending);
        });
        self.registry.clear_job(agent_id);
    }

    /// Races the `agent.assign.ack` against the TTL (§4.2 step 5): accepted
    /// moves the job to `ACCEPTED` and the agent to `STARTING`; a reject, a
    /// dropped channel (socket died), or a bare timeout all revert.
    fn spawn_ack_watchdog(
        &self,
        job_id: String,
        agent_id: String,
        expires_at: chrono::DateTime<Utc>,
        ack_rx: tokio::sync::oneshot::Receiver<crate::domain::AssignAckPayload>,
    ) {
        let jobs = self.jobs.clone();
        let registry = self.registry.clone();
        let dispatcher = self.dispatcher.clone();
        tokio::spawn(async move {
            let remaining = (expires_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            let outcome = tokio::time::timeout(remaining, ack_rx).await;

            match outcome {
                Ok(Ok(ack)) if ack.accepted => {
                    jobs.update(&job_id, |j| j.set_status(JobStatus::Accepted));
                    registry.update(&agent_id, |a| {
                        a.current_job_id = Some(job_id.clone());
                        a.state = AgentState::Starting;
                    });
                }
                Ok(Ok(ack)) => {
                    warn!(job_id = %job_id, agent_id = %agent_id, reason = ?ack.reason, "assign.ack rejected, reverting to pending");
                    jobs.update(&job_id, |j| {
                        j.agent_id = None;
                        j.set_status(JobStatus::Pending);
                    });
                    registry.clear_job(&agent_id);
                }
                _ => {
                    dispatcher.cancel_ack_waiter(&job_id);
                    if jobs.get(&job_id).map(|j| j.status) == Some(JobStatus::Assigned) {
                        warn!(job_id = %job_id, agent_id = %agent_id, "assign.ack TTL expired, reverting to pending");
                        jobs.update(&job_id, |j| {
                            j.agent_id = None;
                            j.set_status(JobStatus::Pending);
                        });
                        registry.clear_job(&agent_id);
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AgentCapabilities, InlineConfig, RestartPolicy, StreamMetadata};
    use crate::jobs::JobStore;
    use crate::registry::AgentRegistry;
    use axum::extract::ws::Message;
    use tokio::sync::mpsc;

    fn sample_job(job_id: &str) -> crate::domain::StreamingJob {
        let mut job = crate::domain::StreamingJob::new(
            job_id.to_string(),
            InlineConfig::Inline { inline_config: serde_json::json!({}) },
            None,
            RestartPolicy::Never,
            "tester".to_string(),
            StreamMetadata::default(),
        );
        job.set_status(JobStatus::Pending);
        job
    }

    #[tokio::test]
    async fn tick_binds_pending_job_to_idle_agent() {
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
        jobs.insert(sample_job("job-1"));

        let dispatcher = AgentDispatcher::new(registry.clone());
        let scheduler = Scheduler::new(jobs.clone(), registry.clone(), dispatcher, 10, 5_000);
        scheduler.tick();

        let job = jobs.get("job-1").unwrap();
        assert_eq!(job.status, JobStatus::Assigned);
        assert_eq!(job.agent_id.as_deref(), Some("agent-1"));
        assert!(rx.try_recv().is_ok(), "expected an assign.start frame");
    }

    #[tokio::test]
    async fn tick_is_a_noop_with_no_idle_agents() {
        let jobs = Arc::new(JobStore::new());
        let registry = Arc::new(AgentRegistry::new());
        jobs.insert(sample_job("job-1"));

        let dispatcher = AgentDispatcher::new(registry.clone());
        let scheduler = Scheduler::new(jobs.clone(), registry, dispatcher, 10, 5_000);
        scheduler.tick();

        assert_eq!(jobs.get("job-1").unwrap().status, JobStatus::Pending);
    }
}
