//! `/agent` — the authenticated agent protocol (§4.1): one logical actor per
//! connection, matching the teacher's `download_progress_ws` shape (split
//! socket, a forwarding task fed by an unbounded channel, a `select!` event
//! loop) but keyed on a typed JSON envelope instead of protobuf frames.

use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::api::server::AppState;
use crate::broadcast::end_broadcast_if_present;
use crate::domain::{
    AgentEnvelope, AgentErrorPayload, AgentMessageType, AgentState, AssignAckPayload,
    HelloOkPayload, HelloPayload, JobError, JobStatus, JobUpdatePayload, MuteOrPauseAckPayload,
    OrchestratorMessageType, StreamingJob,
};
use crate::jobs::{JobNote, JobNoteKind};

pub async fn agent_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, addr))
}

/// Per-connection actor state. `agent_id`/`socket_version` are only `Some`
/// once a `hello` has registered this connection's socket.
struct Session {
    agent_id: Option<String>,
    socket_version: Option<u64>,
}

async fn handle_socket(socket: WebSocket, state: AppState, remote_addr: SocketAddr) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    let mut session = Session {
        agent_id: None,
        socket_version: None,
    };

    // Armed for real once a hello registers the socket; until then this is
    // just a placeholder deadline the `select!` guard keeps disabled.
    let deadline = tokio::time::sleep(Duration::from_secs(3600));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            () = &mut deadline, if session.agent_id.is_some() => {
                warn!(agent_id = ?session.agent_id, "agent heartbeat timed out");
                break;
            }
            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<AgentEnvelope>(&text) {
                            Ok(envelope) => {
                                if !handle_envelope(&state, &tx, &mut session, &remote_addr, envelope).await {
                                    break;
                                }
                                deadline
                                    .as_mut()
                                    .reset(Instant::now() + Duration::from_millis(state.config.heartbeat_timeout_ms) + Duration::from_secs(1));
                            }
                            Err(error) => {
                                debug!(%error, "dropping malformed agent frame");
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // ping/pong/binary: no protocol meaning here
                    Some(Err(error)) => {
                        debug!(%error, "agent websocket error");
                        break;
                    }
                }
            }
        }
    }

    if let (Some(agent_id), Some(socket_version)) = (session.agent_id.clone(), session.socket_version) {
        handle_agent_offline(&state, &agent_id, socket_version).await;
    }
    writer.abort();
}

/// Dispatches one decoded envelope. Returns `false` when the connection
/// should close (bad auth).
async fn handle_envelope(
    state: &AppState,
    tx: &mpsc::UnboundedSender<Message>,
    session: &mut Session,
    remote_addr: &SocketAddr,
    envelope: AgentEnvelope,
) -> bool {
    let kind = envelope.kind.as_str();

    if kind == AgentMessageType::Hello.as_str() {
        return handle_hello(state, tx, session, remote_addr, envelope).await;
    }

    let Some(agent_id) = session.agent_id.clone() else {
        debug!(kind, "agent frame received before hello, dropping");
        return true;
    };

    state.registry.touch(&agent_id);

    if kind == AgentMessageType::Heartbeat.as_str() {
        // touch() above already updated lastSeenAt; nothing else to do.
    } else if kind == AgentMessageType::AssignAck.as_str() {
        match serde_json::from_value::<AssignAckPayload>(envelope.payload) {
            Ok(payload) => {
                let job_id = payload.job_id.clone();
                state.dispatcher.resolve_ack(&job_id, payload);
            }
            Err(error) => debug!(%error, "malformed assign.ack payload"),
        }
    } else if kind == AgentMessageType::JobUpdate.as_str() {
        match serde_json::from_value::<JobUpdatePayload>(envelope.payload) {
            Ok(payload) => handle_job_update(state, &agent_id, payload).await,
            Err(error) => debug!(%error, "malformed job.update payload"),
        }
    } else if kind == AgentMessageType::JobStopped.as_str() {
        match serde_json::from_value::<JobUpdatePayload>(envelope.payload) {
            Ok(payload) => handle_job_stopped(state, &agent_id, payload).await,
            Err(error) => debug!(%error, "malformed job.stopped payload"),
        }
    } else if kind == AgentMessageType::MuteAck.as_str() {
        match serde_json::from_value::<MuteOrPauseAckPayload>(envelope.payload) {
            Ok(payload) if payload.accepted => {
                state.jobs.update(&payload.job_id, |j| j.stream_metadata.is_muted = true);
            }
            Ok(payload) => {
                state.jobs.emit_note(JobNote::new(
                    &payload.job_id,
                    JobNoteKind::MuteFailed,
                    payload.reason.unwrap_or_else(|| "mute rejected by agent".to_string()),
                ));
            }
            Err(error) => debug!(%error, "malformed mute.ack payload"),
        }
    } else if kind == AgentMessageType::PauseAck.as_str() {
        match serde_json::from_value::<MuteOrPauseAckPayload>(envelope.payload) {
            Ok(payload) if payload.accepted => {
                state.jobs.update(&payload.job_id, |j| j.stream_metadata.is_paused = true);
            }
            Ok(payload) => {
                state.jobs.emit_note(JobNote::new(
                    &payload.job_id,
                    JobNoteKind::PauseFailed,
                    payload.reason.unwrap_or_else(|| "pause rejected by agent".to_string()),
                ));
            }
            Err(error) => debug!(%error, "malformed pause.ack payload"),
        }
    } else if kind == AgentMessageType::Error.as_str() {
        match serde_json::from_value::<AgentErrorPayload>(envelope.payload) {
            Ok(payload) => {
                warn!(agent_id = %agent_id, message = %payload.message, "agent reported error");
                state.registry.set_last_error(&agent_id, payload.message);
            }
            Err(error) => debug!(%error, "malformed agent.error payload"),
        }
    } else {
        debug!(kind, "unrecognized agent message kind, dropping");
    }

    true
}

/// `agent.hello` (§4.1 steps 1-7): authenticates, registers or re-identifies
/// the socket, reconciles a reported `activeJob`, replies `hello.ok`, and
/// kicks the scheduler.
async fn handle_hello(
    state: &AppState,
    tx: &mpsc::UnboundedSender<Message>,
    session: &mut Session,
    remote_addr: &SocketAddr,
    envelope: AgentEnvelope,
) -> bool {
    let payload = match serde_json::from_value::<HelloPayload>(envelope.payload) {
        Ok(p) => p,
        Err(error) => {
            debug!(%error, "malformed hello payload");
            return true;
        }
    };

    if payload.auth.token != state.config.agent_token {
        warn!(agent_id = %payload.agent_id, "agent hello rejected: bad token");
        let _ = tx.send(Message::Close(Some(CloseFrame {
            code: 4001,
            reason: "invalid agent token".into(),
        })));
        return false;
    }

    let already_identified = session.agent_id.as_deref() == Some(payload.agent_id.as_str());

    if already_identified {
        state.registry.update_identity(
            &payload.agent_id,
            payload.name,
            payload.version,
            payload.capabilities,
            payload.drain,
        );
        return true;
    }

    let outcome = state.registry.handle_hello(
        &payload.agent_id,
        Some(remote_addr.ip().to_string()),
        payload.name,
        payload.version,
        payload.capabilities,
        payload.drain,
        tx.clone(),
    );

    if let Some(superseded) = outcome.superseded_socket {
        crate::registry::close_superseded(superseded);
    }

    if let Some(active_job_id) = payload.active_job {
        reconcile_active_job(state, &payload.agent_id, &active_job_id);
    } else if let Some(previous_job_id) = outcome.previous_job_id {
        // The agent reconnected without claiming an active job it used to
        // hold; leave the job's record alone (the health monitor or an
        // operator stop will settle it), it just no longer owns the agent.
        debug!(agent_id = %payload.agent_id, previous_job_id, "agent reconnected without reporting its prior job");
    }

    session.agent_id = Some(payload.agent_id.clone());
    session.socket_version = state.registry.current_socket_version(&payload.agent_id);

    info!(agent_id = %payload.agent_id, is_new = outcome.is_new, "agent hello accepted");

    let timings = state.config.agent_timings();
    let ok = AgentEnvelope::new(
        OrchestratorMessageType::HelloOk.as_str(),
        serde_json::to_value(HelloOkPayload {
            heartbeat_interval_ms: timings.heartbeat_interval_ms,
            heartbeat_timeout_ms: timings.heartbeat_timeout_ms,
            stop_grace_ms: timings.stop_grace_ms,
            kill_after_ms: timings.kill_after_ms,
        })
        .unwrap_or(serde_json::Value::Null),
    )
    .with_agent_id(&payload.agent_id);
    if let Ok(text) = serde_json::to_string(&ok) {
        let _ = tx.send(Message::Text(text.into()));
    }

    state.scheduler.tick();
    true
}

/// §4.1 step 5: bind an agent-reported `activeJob` to a known job, or
/// materialize a recovered one (design note "recovered jobs").
fn reconcile_active_job(state: &AppState, agent_id: &str, job_id: &str) {
    if state.jobs.get(job_id).is_some() {
        state.jobs.update(job_id, |j| {
            j.agent_id = Some(agent_id.to_string());
            if !j.status.is_terminal() {
                j.set_status(JobStatus::Running);
            }
        });
    } else {
        state.jobs.insert(StreamingJob::recovered(job_id.to_string(), agent_id.to_string()));
    }
    state.registry.update(agent_id, |a| {
        a.current_job_id = Some(job_id.to_string());
        a.state = AgentState::Running;
    });
}

async fn handle_job_update(state: &AppState, agent_id: &str, payload: JobUpdatePayload) {
    let Some(job) = state.jobs.get(&payload.job_id) else {
        debug!(job_id = %payload.job_id, "job.update for unknown job, dropping");
        return;
    };
    if job.agent_id.as_deref() != Some(agent_id) {
        debug!(job_id = %payload.job_id, agent_id, "job.update from non-owning agent, dropping");
        return;
    }

    state.jobs.update(&payload.job_id, |j| {
        let became_running = payload.status == JobStatus::Running && j.started_at.is_none();
        j.error = payload.error.clone();
        j.set_status(payload.status);
        if became_running {
            j.started_at = Some(chrono::Utc::now());
        }
    });

    if payload.status == JobStatus::Running {
        state.registry.update(agent_id, |a| a.state = AgentState::Running);
    }
}

/// `agent.job.stopped` (§4.1 step "job updates", §4.4 restart cycle).
async fn handle_job_stopped(state: &AppState, agent_id: &str, payload: JobUpdatePayload) {
    let Some(job) = state.jobs.get(&payload.job_id) else {
        debug!(job_id = %payload.job_id, "job.stopped for unknown job, dropping");
        return;
    };
    if job.agent_id.as_deref() != Some(agent_id) {
        debug!(job_id = %payload.job_id, agent_id, "job.stopped from non-owning agent, dropping");
        return;
    }

    if job.health.pending_restart {
        state.jobs.update(&payload.job_id, |j| {
            j.health.reset_for_restart();
            j.agent_id = None;
            j.started_at = None;
            j.ended_at = None;
            j.error = None;
            j.stream_metadata.is_paused = false;
            j.set_status(JobStatus::Pending);
        });
        state.registry.clear_job(agent_id);
        state.jobs.emit_note(JobNote::new(
            &payload.job_id,
            JobNoteKind::RestartReady,
            "agent confirmed stop, queued for reassignment",
        ));
        return;
    }

    end_broadcast_if_present(state.broadcast.as_ref(), &job).await;
    state.metadata.cancel(&payload.job_id);
    state.jobs.update(&payload.job_id, |j| {
        j.error = payload.error.clone();
        j.ended_at = Some(chrono::Utc::now());
        j.set_status(payload.status);
    });

    let drain = state.registry.get(agent_id).map(|a| a.drain).unwrap_or(false);
    state.registry.clear_job(agent_id);
    if drain {
        state.registry.set_state(agent_id, AgentState::Draining);
    }

    let kind = if payload.status == JobStatus::Failed {
        JobNoteKind::BroadcastFailed
    } else {
        JobNoteKind::BroadcastCompleted
    };
    state.jobs.emit_note(JobNote::new(&payload.job_id, kind, "agent reported job stopped"));
}

/// Heartbeat timeout or socket close (§4.1 "heartbeats"/"close event"). A
/// no-op if `socket_version` is no longer current (superseded connection).
async fn handle_agent_offline(state: &AppState, agent_id: &str, socket_version: u64) {
    if state.registry.mark_offline_if_current(agent_id, socket_version).is_none() {
        debug!(agent_id, "ignoring close/timeout on a superseded agent socket");
        return;
    }

    for job in state.jobs.jobs_for_agent(agent_id) {
        if !matches!(job.status, JobStatus::Running | JobStatus::Starting | JobStatus::Stopping) {
            continue;
        }
        state.jobs.update(&job.job_id, |j| j.set_status(JobStatus::Unknown));

        let jobs = state.jobs.clone();
        let broadcast = state.broadcast.clone();
        let job_id = job.job_id.clone();
        let grace_ms = state.config.heartbeat_timeout_ms;
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(grace_ms)).await;
            let Some(job) = jobs.get(&job_id) else { return };
            if job.status != JobStatus::Unknown {
                return;
            }
            end_broadcast_if_present(broadcast.as_ref(), &job).await;
            jobs.update(&job_id, |j| j.fail(JobError::AGENT_OFFLINE, "agent went offline"));
        });
    }
}
