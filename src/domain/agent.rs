//! Agent entity: a remote worker process that holds a WebSocket to the
//! orchestrator and runs at most one stream at a time.

use std::collections::HashMap;

use axum::extract::ws::Message;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Declared worker capacity/capability. Advertised for observability; the
/// core scheduler does not filter on it (see design note on capability-aware
/// scheduling).
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct AgentCapabilities {
    pub slots: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_resolution: Option<String>,
}

impl Default for AgentCapabilities {
    fn default() -> Self {
        Self {
            slots: 1,
            max_resolution: None,
        }
    }
}

/// Agent lifecycle state. See `§4.1` legal-transition table; enforcement
/// lives in `crate::registry::AgentRegistry`, not on this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum AgentState {
    Offline,
    Idle,
    Reserved,
    Starting,
    Running,
    Stopping,
    Error,
    Draining,
}

impl AgentState {
    pub fn is_assignable(self, drain: bool) -> bool {
        matches!(self, AgentState::Idle) && !drain
    }
}

/// A live (or formerly live) socket bound to an agent, versioned so a stale
/// close callback from a replaced connection cannot demote the current one.
///
/// Design note "socket replacement": the close handler captures the version
/// it observed at registration time and only acts if `AgentRegistry` still
/// reports that version as current.
#[derive(Clone)]
pub struct AgentSocket {
    pub version: u64,
    pub sender: mpsc::UnboundedSender<Message>,
}

impl std::fmt::Debug for AgentSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentSocket")
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// An agent known to the orchestrator. Created on first authenticated hello;
/// never deleted — it transitions to `Offline` instead.
#[derive(Debug, Clone)]
pub struct Agent {
    pub agent_id: String,
    pub name: String,
    pub version: String,
    pub capabilities: AgentCapabilities,
    pub drain: bool,
    pub meta: HashMap<String, serde_json::Value>,
    pub last_error: Option<String>,
    pub remote_addr: Option<String>,

    pub state: AgentState,
    pub socket: Option<AgentSocket>,
    pub current_job_id: Option<String>,
    pub last_seen_at: DateTime<Utc>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Agent {
    pub fn new(agent_id: String, remote_addr: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            agent_id,
            name: String::new(),
            version: String::new(),
            capabilities: AgentCapabilities::default(),
            drain: false,
            meta: HashMap::new(),
            last_error: None,
            remote_addr,
            state: AgentState::Idle,
            socket: None,
            current_job_id: None,
            last_seen_at: now,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.last_seen_at = Utc::now();
        self.updated_at = self.last_seen_at;
    }

    /// A snapshot shape for UI fanout / HTTP listing, decoupled from the
    /// runtime socket handle (which is not serializable and not the UI's
    /// business).
    pub fn to_view(&self) -> AgentView {
        AgentView {
            agent_id: self.agent_id.clone(),
            name: self.name.clone(),
            version: self.version.clone(),
            capabilities: self.capabilities.clone(),
            drain: self.drain,
            meta: self.meta.clone(),
            last_error: self.last_error.clone(),
            remote_addr: self.remote_addr.clone(),
            state: self.state,
            current_job_id: self.current_job_id.clone(),
            last_seen_at: self.last_seen_at,
            connected: self.socket.is_some(),
        }
    }
}

/// Read-only, serializable projection of an `Agent` for HTTP/WS consumers.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct AgentView {
    pub agent_id: String,
    pub name: String,
    pub version: String,
    pub capabilities: AgentCapabilities,
    pub drain: bool,
    pub meta: HashMap<String, serde_json::Value>,
    pub last_error: Option<String>,
    pub remote_addr: Option<String>,
    pub state: AgentState,
    pub current_job_id: Option<String>,
    pub last_seen_at: DateTime<Utc>,
    pub connected: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_agent_starts_idle_with_no_job() {
        let agent = Agent::new("a1".into(), Some("127.0.0.1".into()));
        assert_eq!(agent.state, AgentState::Idle);
        assert!(agent.current_job_id.is_none());
        assert!(agent.socket.is_none());
    }

    #[test]
    fn idle_non_draining_is_assignable() {
        assert!(AgentState::Idle.is_assignable(false));
        assert!(!AgentState::Idle.is_assignable(true));
        assert!(!AgentState::Running.is_assignable(false));
    }
}
