//! Wire envelope for the `/agent` WebSocket protocol (§6).
//!
//! Every message, in both directions, is a typed envelope:
//! `{type, msgId, correlationId?, ts, agentId?, payload}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Message types an agent may send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentMessageType {
    #[serde(rename = "agent.hello")]
    Hello,
    #[serde(rename = "agent.heartbeat")]
    Heartbeat,
    #[serde(rename = "agent.assign.ack")]
    AssignAck,
    #[serde(rename = "agent.job.update")]
    JobUpdate,
    #[serde(rename = "agent.job.stopped")]
    JobStopped,
    #[serde(rename = "agent.error")]
    Error,
    #[serde(rename = "agent.mute.ack")]
    MuteAck,
    #[serde(rename = "agent.pause.ack")]
    PauseAck,
}

impl AgentMessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentMessageType::Hello => "agent.hello",
            AgentMessageType::Heartbeat => "agent.heartbeat",
            AgentMessageType::AssignAck => "agent.assign.ack",
            AgentMessageType::JobUpdate => "agent.job.update",
            AgentMessageType::JobStopped => "agent.job.stopped",
            AgentMessageType::Error => "agent.error",
            AgentMessageType::MuteAck => "agent.mute.ack",
            AgentMessageType::PauseAck => "agent.pause.ack",
        }
    }
}

/// Message types the orchestrator may send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrchestratorMessageType {
    #[serde(rename = "orchestrator.hello.ok")]
    HelloOk,
    #[serde(rename = "orchestrator.assign.start")]
    AssignStart,
    #[serde(rename = "orchestrator.job.stop")]
    JobStop,
    #[serde(rename = "orchestrator.job.mute")]
    Mute,
    #[serde(rename = "orchestrator.job.pause")]
    Pause,
    #[serde(rename = "orchestrator.agent.reboot")]
    Reboot,
}

impl OrchestratorMessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            OrchestratorMessageType::HelloOk => "orchestrator.hello.ok",
            OrchestratorMessageType::AssignStart => "orchestrator.assign.start",
            OrchestratorMessageType::JobStop => "orchestrator.job.stop",
            OrchestratorMessageType::Mute => "orchestrator.job.mute",
            OrchestratorMessageType::Pause => "orchestrator.job.pause",
            OrchestratorMessageType::Reboot => "orchestrator.agent.reboot",
        }
    }
}

/// Generic typed envelope. `payload` is kept as a raw `serde_json::Value`
/// and decoded per `type` by the handler, the same way the teacher's
/// protocol-buffer `WsMessage` envelope keeps a `oneof` payload decoded by
/// the caller rather than by serde itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub msg_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
    pub ts: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    pub payload: serde_json::Value,
}

impl AgentEnvelope {
    pub fn new(kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            msg_id: Uuid::new_v4(),
            correlation_id: None,
            ts: Utc::now(),
            agent_id: None,
            payload,
        }
    }

    pub fn with_correlation(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn with_agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }
}

/// Payload for `orchestrator.hello.ok`: the timing parameters the agent
/// must respect (§4.1 step 6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloOkPayload {
    pub heartbeat_interval_ms: u64,
    pub heartbeat_timeout_ms: u64,
    pub stop_grace_ms: u64,
    pub kill_after_ms: u64,
}

/// Payload for `orchestrator.assign.start`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignStartPayload {
    pub job_id: String,
    pub idempotency_key: Option<String>,
    pub config: serde_json::Value,
    pub expires_at: DateTime<Utc>,
    pub metadata: serde_json::Value,
    pub stream_metadata: crate::domain::StreamMetadata,
}

/// Payload for a server-initiated `orchestrator.job.stop`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStopPayload {
    pub job_id: String,
    pub reason: String,
    pub deadline_ms: u64,
}

/// Payload for `orchestrator.job.mute`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutePayload {
    pub job_id: String,
    pub muted: bool,
}

/// Payload for `orchestrator.job.pause`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PausePayload {
    pub job_id: String,
    pub paused: bool,
}

/// Payload for `agent.mute.ack` / `agent.pause.ack`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MuteOrPauseAckPayload {
    pub job_id: String,
    pub accepted: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Payload for `agent.hello`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloPayload {
    pub agent_id: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub capabilities: crate::domain::AgentCapabilities,
    #[serde(default)]
    pub drain: bool,
    #[serde(default)]
    pub active_job: Option<String>,
    pub auth: HelloAuth,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloAuth {
    pub token: String,
}

/// Payload for `agent.assign.ack`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignAckPayload {
    pub job_id: String,
    pub accepted: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Payload for `agent.job.update` / `agent.job.stopped`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobUpdatePayload {
    pub job_id: String,
    pub status: crate::domain::JobStatus,
    #[serde(default)]
    pub error: Option<crate::domain::JobError>,
}

/// Payload for `orchestrator.agent.reboot` (§6 `/v1/agents/:id/reboot`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RebootPayload {
    pub reason: Option<String>,
}

/// Payload for `agent.error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentErrorPayload {
    pub message: String,
    #[serde(default)]
    pub job_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_round_trips_through_json() {
        let env = AgentEnvelope::new("agent.heartbeat", serde_json::json!({})).with_agent_id("a1");
        let json = serde_json::to_string(&env).unwrap();
        let back: AgentEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind, "agent.heartbeat");
        assert_eq!(back.agent_id.as_deref(), Some("a1"));
    }

    #[test]
    fn hello_payload_decodes_from_object() {
        let raw = serde_json::json!({
            "agentId": "a1",
            "name": "worker-1",
            "version": "1.0.0",
            "capabilities": {"slots": 2},
            "drain": false,
            "auth": {"token": "T"}
        });
        let hello: HelloPayload = serde_json::from_value(raw).unwrap();
        assert_eq!(hello.agent_id, "a1");
        assert_eq!(hello.capabilities.slots, 2);
        assert_eq!(hello.auth.token, "T");
    }
}
