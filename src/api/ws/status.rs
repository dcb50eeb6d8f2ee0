//! `/status-ws` — the public, unauthenticated projection of active streams
//! (§4.7), served alongside `GET /status`. Rebuilt and rebroadcast in full
//! on every job change rather than diffed, since the projection is small and
//! this keeps a slow/lagged subscriber from ever seeing a torn update.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;

use crate::api::routes::status::active_projection;
use crate::api::server::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/status-ws", get(status_ws))
}

async fn status_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn send_snapshot(sender: &mut SplitSink<WebSocket, Message>, state: &AppState) -> bool {
    let payload = active_projection(&state.jobs.list());
    let Ok(text) = serde_json::to_string(&payload) else {
        return true;
    };
    sender.send(Message::Text(text.into())).await.is_ok()
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    if !send_snapshot(&mut sender, &state).await {
        return;
    }

    let mut job_rx = state.jobs.subscribe_jobs();

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(error)) => { debug!(%error, "status websocket error"); break; }
                    _ => {}
                }
            }
            event = job_rx.recv() => {
                match event {
                    Ok(_) => {
                        if !send_snapshot(&mut sender, &state).await {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(n)) => debug!(n, "status feed lagged, rebuilding anyway"),
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }
}
