//! Agent Registry (§3, §4.1): the exclusive owner of every `Agent` and its
//! live socket, enforcing the legal state-transition table and broadcasting
//! change events for UI fanout.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::ws::Message;
use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use crate::domain::{Agent, AgentCapabilities, AgentSocket, AgentState, AgentView};

mod dispatch;
pub use dispatch::AgentDispatcher;

const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Everything the websocket handler needs to know right after a hello is
/// accepted: the resulting view, whether this is a brand-new agent, and the
/// previous socket (if any) that must now be closed as superseded.
pub struct HelloOutcome {
    pub view: AgentView,
    pub is_new: bool,
    pub superseded_socket: Option<AgentSocket>,
    /// `current_job_id` the agent held under its *previous* connection, used
    /// by the caller to decide whether the agent's now-stale `activeJob`
    /// needs reconciling against the job store (§4.1 reconnection step 4).
    pub previous_job_id: Option<String>,
}

/// In-memory agent directory. Agents are created on first hello and never
/// removed — they transition to `OFFLINE` instead.
pub struct AgentRegistry {
    agents: DashMap<String, Agent>,
    next_socket_version: AtomicU64,
    events: broadcast::Sender<AgentView>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity);
        Self {
            agents: DashMap::new(),
            next_socket_version: AtomicU64::new(1),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentView> {
        self.events.subscribe()
    }

    /// Handle an `agent.hello` (§4.1 steps 1-6): create the agent on first
    /// contact, update its declared identity, mint a fresh socket version,
    /// and return anything that was superseded.
    pub fn handle_hello(
        &self,
        agent_id: &str,
        remote_addr: Option<String>,
        name: String,
        version: String,
        capabilities: AgentCapabilities,
        drain: bool,
        sender: mpsc::UnboundedSender<Message>,
    ) -> HelloOutcome {
        let socket_version = self.next_socket_version.fetch_add(1, Ordering::SeqCst);
        let new_socket = AgentSocket {
            version: socket_version,
            sender,
        };

        let mut is_new = false;
        let mut superseded_socket = None;
        let mut previous_job_id = None;

        let mut entry = self.agents.entry(agent_id.to_string()).or_insert_with(|| {
            is_new = true;
            Agent::new(agent_id.to_string(), remote_addr.clone())
        });

        if !is_new {
            superseded_socket = entry.socket.take();
            previous_job_id = entry.current_job_id.clone();
        }

        let was_error = entry.state == AgentState::Error;

        entry.name = name;
        entry.version = version;
        entry.capabilities = capabilities;
        entry.drain = drain;
        entry.remote_addr = remote_addr;
        entry.socket = Some(new_socket);
        // §4.1 state table: "hello (new or reconnected): * → IDLE unless in
        // ERROR" — a fresh socket does not absolve an agent of its last
        // reported error; that stays until an operator or a later state
        // change clears it. A reconnecting agent with no job and no prior
        // error resumes idle; one reporting an active job is reconciled by
        // the caller before the state is overwritten, so default to the
        // job-bearing states here only when we already know of one.
        if !was_error {
            entry.last_error = None;
            entry.state = if entry.current_job_id.is_some() {
                AgentState::Running
            } else {
                AgentState::Idle
            };
        }
        entry.touch();

        debug!(agent_id = %agent_id, is_new, socket_version, "agent hello processed");

        let view = entry.to_view();
        drop(entry);
        self.publish_view(&view);

        HelloOutcome {
            view,
            is_new,
            superseded_socket,
            previous_job_id,
        }
    }

    /// A duplicate `agent.hello` arriving on the connection that already
    /// wired the current socket: updates declared identity fields but never
    /// touches the socket reference (§4.1 step 3, "no-op on socket wiring").
    pub fn update_identity(
        &self,
        agent_id: &str,
        name: String,
        version: String,
        capabilities: AgentCapabilities,
        drain: bool,
    ) -> Option<AgentView> {
        self.update(agent_id, |a| {
            a.name = name;
            a.version = version;
            a.capabilities = capabilities;
            a.drain = drain;
            a.touch();
        })
    }

    fn publish_view(&self, view: &AgentView) {
        let _ = self.events.send(view.clone());
    }

    pub fn get(&self, agent_id: &str) -> Option<Agent> {
        self.agents.get(agent_id).map(|e| e.value().clone())
    }

    pub fn list(&self) -> Vec<AgentView> {
        self.agents.iter().map(|e| e.value().to_view()).collect()
    }

    /// The socket version currently on file for `agent_id`, used by a close
    /// callback to decide whether it is still the current connection.
    pub fn current_socket_version(&self, agent_id: &str) -> Option<u64> {
        self.agents
            .get(agent_id)
            .and_then(|e| e.socket.as_ref().map(|s| s.version))
    }

    pub fn current_sender(&self, agent_id: &str) -> Option<mpsc::UnboundedSender<Message>> {
        self.agents
            .get(agent_id)
            .and_then(|e| e.socket.as_ref().map(|s| s.sender.clone()))
    }

    /// Mutate an agent under its entry guard and publish the resulting view.
    pub fn update<F>(&self, agent_id: &str, f: F) -> Option<AgentView>
    where
        F: FnOnce(&mut Agent),
    {
        let mut entry = self.agents.get_mut(agent_id)?;
        f(&mut entry);
        entry.updated_at = chrono::Utc::now();
        let view = entry.to_view();
        drop(entry);
        self.publish_view(&view);
        Some(view)
    }

    pub fn touch(&self, agent_id: &str) {
        if let Some(mut entry) = self.agents.get_mut(agent_id) {
            entry.touch();
        }
    }

    pub fn set_state(&self, agent_id: &str, state: AgentState) -> Option<AgentView> {
        self.update(agent_id, |a| a.state = state)
    }

    pub fn bind_job(&self, agent_id: &str, job_id: &str) -> Option<AgentView> {
        self.update(agent_id, |a| {
            a.current_job_id = Some(job_id.to_string());
            a.state = AgentState::Reserved;
        })
    }

    pub fn clear_job(&self, agent_id: &str) -> Option<AgentView> {
        self.update(agent_id, |a| {
            a.current_job_id = None;
            if a.state != AgentState::Offline && a.state != AgentState::Draining {
                a.state = AgentState::Idle;
            }
        })
    }

    pub fn set_drain(&self, agent_id: &str, drain: bool) -> Option<AgentView> {
        self.update(agent_id, |a| {
            a.drain = drain;
            if drain && a.state == AgentState::Idle {
                a.state = AgentState::Draining;
            } else if !drain && a.state == AgentState::Draining {
                a.state = AgentState::Idle;
            }
        })
    }

    pub fn set_meta(&self, agent_id: &str, meta: HashMap<String, serde_json::Value>) -> Option<AgentView> {
        self.update(agent_id, |a| a.meta = meta)
    }

    pub fn set_last_error(&self, agent_id: &str, message: impl Into<String>) -> Option<AgentView> {
        let message = message.into();
        self.update(agent_id, |a| {
            a.last_error = Some(message.clone());
            a.state = AgentState::Error;
        })
    }

    /// Heartbeat loss or socket close (§4.1 step 9, §4.4 heartbeat loss):
    /// only acts if `socket_version` still matches the one on file, so a
    /// stale close from a superseded connection is a no-op.
    pub fn mark_offline_if_current(&self, agent_id: &str, socket_version: u64) -> Option<AgentView> {
        let mut entry = self.agents.get_mut(agent_id)?;
        match entry.socket.as_ref() {
            Some(socket) if socket.version == socket_version => {
                entry.socket = None;
                entry.state = AgentState::Offline;
                entry.updated_at = chrono::Utc::now();
                let view = entry.to_view();
                drop(entry);
                self.publish_view(&view);
                Some(view)
            }
            _ => {
                debug!(agent_id = %agent_id, "ignoring stale socket-close for superseded connection");
                None
            }
        }
    }

    /// An `IDLE`, non-draining, connected agent for the scheduler to reserve
    /// (§4.2 step 1). Arbitrary among ties; callers should not rely on order.
    pub fn reserve_idle_agent(&self) -> Option<String> {
        for entry in self.agents.iter() {
            let agent = entry.value();
            if agent.state.is_assignable(agent.drain) && agent.socket.is_some() {
                return Some(agent.agent_id.clone());
            }
        }
        None
    }

    /// All agents whose current socket version is not `socket_version`
    /// (i.e. every other connection), used only in tests/diagnostics.
    pub fn connected_count(&self) -> usize {
        self.agents.iter().filter(|e| e.value().socket.is_some()).count()
    }

    /// Whether `agent_id` currently has a live socket on file. Used by the
    /// health monitor to distinguish a genuinely unreachable agent (§4.4
    /// step 8a, put the job straight back to `PENDING`) from one that is
    /// still connected and must be given a `job.stop` and awaited via
    /// `AgentJobStopped` (§4.4 step 8b).
    pub fn is_reachable(&self, agent_id: &str) -> bool {
        self.agents
            .get(agent_id)
            .map(|e| e.socket.is_some())
            .unwrap_or(false)
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedAgentRegistry = Arc<AgentRegistry>;

/// Closes a superseded socket by dropping its sender, which ends the peer
/// websocket's write task; logs instead of failing if already closed.
pub fn close_superseded(socket: AgentSocket) {
    if socket.sender.send(Message::Close(None)).is_err() {
        warn!(socket_version = socket.version, "superseded socket already closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender() -> (mpsc::UnboundedSender<Message>, mpsc::UnboundedReceiver<Message>) {
        mpsc::unbounded_channel()
    }

    #[test]
    fn hello_creates_new_idle_agent() {
        let registry = AgentRegistry::new();
        let (tx, _rx) = sender();
        let outcome = registry.handle_hello(
            "a1",
            Some("127.0.0.1".into()),
            "worker-1".into(),
            "1.0.0".into(),
            AgentCapabilities::default(),
            false,
            tx,
        );
        assert!(outcome.is_new);
        assert!(outcome.superseded_socket.is_none());
        assert_eq!(outcome.view.state, AgentState::Idle);
    }

    #[test]
    fn reconnect_supersedes_previous_socket() {
        let registry = AgentRegistry::new();
        let (tx1, _rx1) = sender();
        registry.handle_hello(
            "a1",
            None,
            "worker-1".into(),
            "1.0.0".into(),
            AgentCapabilities::default(),
            false,
            tx1,
        );

        let (tx2, _rx2) = sender();
        let outcome = registry.handle_hello(
            "a1",
            None,
            "worker-1".into(),
            "1.0.1".into(),
            AgentCapabilities::default(),
            false,
            tx2,
        );
        assert!(!outcome.is_new);
        assert!(outcome.superseded_socket.is_some());
    }

    #[test]
    fn reconnect_preserves_error_state() {
        let registry = AgentRegistry::new();
        let (tx1, _rx1) = sender();
        registry.handle_hello(
            "a1",
            None,
            "worker-1".into(),
            "1.0.0".into(),
            AgentCapabilities::default(),
            false,
            tx1,
        );
        registry.set_last_error("a1", "encoder crashed");
        assert_eq!(registry.get("a1").unwrap().state, AgentState::Error);

        let (tx2, _rx2) = sender();
        let outcome = registry.handle_hello(
            "a1",
            None,
            "worker-1".into(),
            "1.0.1".into(),
            AgentCapabilities::default(),
            false,
            tx2,
        );
        assert_eq!(outcome.view.state, AgentState::Error);
        assert_eq!(registry.get("a1").unwrap().state, AgentState::Error);
        assert!(registry.reserve_idle_agent().is_none());
    }

    #[test]
    fn stale_close_is_ignored_after_reconnect() {
        let registry = AgentRegistry::new();
        let (tx1, _rx1) = sender();
        let first = registry.handle_hello(
            "a1",
            None,
            "worker-1".into(),
            "1.0.0".into(),
            AgentCapabilities::default(),
            false,
            tx1,
        );
        let stale_version = registry.current_socket_version("a1").unwrap();
        assert_eq!(first.view.state, AgentState::Idle);

        let (tx2, _rx2) = sender();
        registry.handle_hello(
            "a1",
            None,
            "worker-1".into(),
            "1.0.0".into(),
            AgentCapabilities::default(),
            false,
            tx2,
        );

        assert!(registry.mark_offline_if_current("a1", stale_version).is_none());
        assert_eq!(registry.get("a1").unwrap().state, AgentState::Idle);
    }

    #[test]
    fn reserve_idle_agent_skips_draining_and_disconnected() {
        let registry = AgentRegistry::new();
        let (tx, _rx) = sender();
        registry.handle_hello(
            "a1",
            None,
            "worker-1".into(),
            "1.0.0".into(),
            AgentCapabilities::default(),
            true,
            tx,
        );
        assert!(registry.reserve_idle_agent().is_none());

        let (tx2, _rx2) = sender();
        registry.handle_hello(
            "a2",
            None,
            "worker-2".into(),
            "1.0.0".into(),
            AgentCapabilities::default(),
            false,
            tx2,
        );
        assert_eq!(registry.reserve_idle_agent().as_deref(), Some("a2"));
    }
}
