//! Thin send path from orchestrator components (scheduler, health monitor,
//! metadata debouncer) to a specific agent's socket, without those
//! components needing to know about axum or the websocket handler.

use std::sync::Arc;

use axum::extract::ws::Message;
use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::AgentRegistry;
use crate::domain::{
    AgentEnvelope, AssignAckPayload, AssignStartPayload, JobStopPayload, MutePayload,
    OrchestratorMessageType, PausePayload, RebootPayload, StreamingJob,
};

/// Wraps an `AgentRegistry` with the envelope-construction logic shared by
/// every orchestrator-initiated message, and the correlation table that lets
/// `agent.assign.ack` resolve the Scheduler's pending watchdog directly
/// instead of the watchdog only ever learning about a reject via TTL expiry.
#[derive(Clone)]
pub struct AgentDispatcher {
    registry: Arc<AgentRegistry>,
    ack_waiters: Arc<DashMap<String, oneshot::Sender<AssignAckPayload>>>,
}

impl AgentDispatcher {
    pub fn new(registry: Arc<AgentRegistry>) -> Self {
        Self {
            registry,
            ack_waiters: Arc::new(DashMap::new()),
        }
    }

    /// Registers interest in the next `agent.assign.ack` for `job_id`. Must
    /// be called before the corresponding `assign.start` is sent, so a very
    /// fast ack can never race ahead of the waiter being in place.
    pub fn register_ack_waiter(&self, job_id: &str) -> oneshot::Receiver<AssignAckPayload> {
        let (tx, rx) = oneshot::channel();
        self.ack_waiters.insert(job_id.to_string(), tx);
        rx
    }

    /// Resolves a pending ack waiter for `job_id`, if one is registered.
    /// Returns `false` if nothing was waiting (ack arrived after the TTL
    /// watchdog already gave up and removed it).
    pub fn resolve_ack(&self, job_id: &str, payload: AssignAckPayload) -> bool {
        match self.ack_waiters.remove(job_id) {
            Some((_, tx)) => tx.send(payload).is_ok(),
            None => false,
        }
    }

    /// Drops a waiter without resolving it, e.g. once its TTL has expired.
    pub fn cancel_ack_waiter(&self, job_id: &str) {
        self.ack_waiters.remove(job_id);
    }

    fn send(&self, agent_id: &str, envelope: AgentEnvelope) -> bool {
        let Some(sender) = self.registry.current_sender(agent_id) else {
            debug!(agent_id = %agent_id, kind = envelope.kind, "no live socket to dispatch to");
            return false;
        };
        let text = match serde_json::to_string(&envelope) {
            Ok(t) => t,
            Err(error) => {
                warn!(agent_id = %agent_id, %error, "failed to serialize outbound envelope");
                return false;
            }
        };
        sender.send(Message::Text(text.into())).is_ok()
    }

    /// `orchestrator.assign.start` (§4.2 step 4).
    pub fn send_assign_start(&self, agent_id: &str, job: &StreamingJob, expires_at: chrono::DateTime<chrono::Utc>) -> bool {
        let payload = AssignStartPayload {
            job_id: job.job_id.clone(),
            idempotency_key: job.idempotency_key.clone(),
            config: serde_json::to_value(&job.config).unwrap_or(serde_json::Value::Null),
            expires_at,
            metadata: job.stream_metadata.stream_context.clone(),
            stream_metadata: job.stream_metadata.clone(),
        };
        let envelope = AgentEnvelope::new(
            OrchestratorMessageType::AssignStart.as_str(),
            serde_json::to_value(payload).unwrap_or(serde_json::Value::Null),
        )
        .with_agent_id(agent_id);
        self.send(agent_id, envelope)
    }

    /// `orchestrator.job.stop` (§4.4 restart cycle, §6 stop/cancel routes).
    pub fn send_job_stop(&self, agent_id: &str, job_id: &str, reason: &str, deadline_ms: u64) -> bool {
        let payload = JobStopPayload {
            job_id: job_id.to_string(),
            reason: reason.to_string(),
            deadline_ms,
        };
        let envelope = AgentEnvelope::new(
            OrchestratorMessageType::JobStop.as_str(),
            serde_json::to_value(payload).unwrap_or(serde_json::Value::Null),
        )
        .with_agent_id(agent_id);
        self.send(agent_id, envelope)
    }

    /// `orchestrator.job.mute` (§6 mute route).
    pub fn send_mute(&self, agent_id: &str, job_id: &str, muted: bool) -> bool {
        let payload = MutePayload {
            job_id: job_id.to_string(),
            muted,
        };
        let envelope = AgentEnvelope::new(
            OrchestratorMessageType::Mute.as_str(),
            serde_json::to_value(payload).unwrap_or(serde_json::Value::Null),
        )
        .with_agent_id(agent_id);
        self.send(agent_id, envelope)
    }

    /// `orchestrator.job.pause` (§6 pause route).
    pub fn send_pause(&self, agent_id: &str, job_id: &str, paused: bool) -> bool {
        let payload = PausePayload {
            job_id: job_id.to_string(),
            paused,
        };
        let envelope = AgentEnvelope::new(
            OrchestratorMessageType::Pause.as_str(),
            serde_json::to_value(payload).unwrap_or(serde_json::Value::Null),
        )
        .with_agent_id(agent_id);
        self.send(agent_id, envelope)
    }

    /// `orchestrator.agent.reboot` (§6 reboot/reboot-all routes). Returns
    /// `false` if the agent has no live socket to dispatch to.
    pub fn send_reboot(&self, agent_id: &str, reason: Option<String>) -> bool {
        let envelope = AgentEnvelope::new(
            OrchestratorMessageType::Reboot.as_str(),
            serde_json::to_value(RebootPayload { reason }).unwrap_or(serde_json::Value::Null),
        )
        .with_agent_id(agent_id);
        self.send(agent_id, envelope)
    }
}
