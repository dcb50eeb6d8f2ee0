//! `/ui` — internal fanout (§4.7): snapshot on connect, then every agent
//! change, job change, and job note, pushed as they happen. Unauthenticated
//! by design (§1 non-goals: "authenticating UI clients").

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;

use crate::api::server::AppState;
use crate::domain::{AgentView, StreamingJob};
use crate::jobs::JobNote;

pub fn router() -> Router<AppState> {
    Router::new().route("/ui", get(ui_ws))
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum UiEvent {
    Snapshot { agents: Vec<AgentView>, jobs: Vec<StreamingJob> },
    AgentUpdated { agent: AgentView },
    JobUpdated { job: StreamingJob },
    JobNote { note: JobNote },
}

async fn ui_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn send_event(sender: &mut SplitSink<WebSocket, Message>, event: &UiEvent) -> bool {
    let Ok(text) = serde_json::to_string(event) else {
        return true;
    };
    sender.send(Message::Text(text.into())).await.is_ok()
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    let snapshot = UiEvent::Snapshot {
        agents: state.registry.list(),
        jobs: state.jobs.list(),
    };
    if !send_event(&mut sender, &snapshot).await {
        return;
    }

    let mut agent_rx = state.registry.subscribe();
    let mut job_rx = state.jobs.subscribe_jobs();
    let mut note_rx = state.jobs.subscribe_notes();

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(error)) => { debug!(%error, "ui websocket error"); break; }
                    _ => {} // read-only channel: inbound frames carry no protocol meaning
                }
            }
            event = agent_rx.recv() => {
                match event {
                    Ok(agent) => {
                        if !send_event(&mut sender, &UiEvent::AgentUpdated { agent }).await {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(n)) => debug!(n, "ui agent feed lagged, skipping ahead"),
                    Err(RecvError::Closed) => break,
                }
            }
            event = job_rx.recv() => {
                match event {
                    Ok(job) => {
                        if !send_event(&mut sender, &UiEvent::JobUpdated { job }).await {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(n)) => debug!(n, "ui job feed lagged, skipping ahead"),
                    Err(RecvError::Closed) => break,
                }
            }
            event = note_rx.recv() => {
                match event {
                    Ok(note) => {
                        if !send_event(&mut sender, &UiEvent::JobNote { note }).await {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(n)) => debug!(n, "ui note feed lagged, skipping ahead"),
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }
}
