//! `/v1/agents` — read-only listing, drain/meta control, and reboot (§6).
//! Reachable only through the agent-plane router (IP-trust gated when
//! enabled).

use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;

use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::domain::AgentView;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/agents", get(list_agents))
        .route("/v1/agents/{agent_id}", get(get_agent))
        .route("/v1/agents/{agent_id}/drain", post(set_drain))
        .route("/v1/agents/{agent_id}/meta", put(set_meta))
        .route("/v1/agents/{agent_id}/reboot", post(reboot_agent))
        .route("/v1/agents/reboot-all", post(reboot_all_agents))
}

#[utoipa::path(
    get,
    path = "/v1/agents",
    tag = "agents",
    responses((status = 200, description = "Every known agent", body = [AgentView]))
)]
pub async fn list_agents(State(state): State<AppState>) -> Json<Vec<AgentView>> {
    Json(state.registry.list())
}

#[utoipa::path(
    get,
    path = "/v1/agents/{agent_id}",
    tag = "agents",
    params(("agent_id" = String, Path, description = "Agent id")),
    responses(
        (status = 200, description = "Agent view", body = AgentView),
        (status = 404, description = "No such agent")
    )
)]
pub async fn get_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> ApiResult<Json<AgentView>> {
    state
        .registry
        .get(&agent_id)
        .map(|a| Json(a.to_view()))
        .ok_or_else(|| ApiError::not_found(format!("agent '{agent_id}' not found")))
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct SetDrainRequest {
    pub drain: bool,
}

/// Toggles drain mode: a draining agent finishes its current job (if any)
/// but is no longer reservable by the scheduler (§4.1, §4.2).
#[utoipa::path(
    post,
    path = "/v1/agents/{agent_id}/drain",
    tag = "agents",
    params(("agent_id" = String, Path, description = "Agent id")),
    request_body = SetDrainRequest,
    responses(
        (status = 200, description = "Agent drain flag updated", body = AgentView),
        (status = 404, description = "No such agent")
    )
)]
pub async fn set_drain(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Json(body): Json<SetDrainRequest>,
) -> ApiResult<Json<AgentView>> {
    state
        .registry
        .set_drain(&agent_id, body.drain)
        .ok_or_else(|| ApiError::not_found(format!("agent '{agent_id}' not found")))
        .map(Json)
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct SetMetaRequest {
    pub meta: HashMap<String, serde_json::Value>,
}

#[utoipa::path(
    put,
    path = "/v1/agents/{agent_id}/meta",
    tag = "agents",
    params(("agent_id" = String, Path, description = "Agent id")),
    request_body = SetMetaRequest,
    responses(
        (status = 200, description = "Agent metadata replaced", body = AgentView),
        (status = 404, description = "No such agent")
    )
)]
pub async fn set_meta(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Json(body): Json<SetMetaRequest>,
) -> ApiResult<Json<AgentView>> {
    state
        .registry
        .set_meta(&agent_id, body.meta)
        .ok_or_else(|| ApiError::not_found(format!("agent '{agent_id}' not found")))
        .map(Json)
}

#[derive(Debug, Default, Deserialize, utoipa::ToSchema)]
pub struct RebootRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

/// `POST /v1/agents/:id/reboot` (202/404/500): best-effort, fire-and-forget
/// dispatch — the agent process decides how to honor it.
#[utoipa::path(
    post,
    path = "/v1/agents/{agent_id}/reboot",
    tag = "agents",
    params(("agent_id" = String, Path, description = "Agent id")),
    request_body = RebootRequest,
    responses(
        (status = 202, description = "Reboot dispatched"),
        (status = 404, description = "No such agent"),
        (status = 500, description = "Agent has no live socket")
    )
)]
pub async fn reboot_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    body: Option<Json<RebootRequest>>,
) -> ApiResult<StatusCode> {
    if state.registry.get(&agent_id).is_none() {
        return Err(ApiError::not_found(format!("agent '{agent_id}' not found")));
    }
    let reason = body.map(|Json(b)| b.reason).unwrap_or(None);
    if state.dispatcher.send_reboot(&agent_id, reason) {
        Ok(StatusCode::ACCEPTED)
    } else {
        Err(ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "AGENT_UNREACHABLE",
            format!("agent '{agent_id}' has no live socket"),
        ))
    }
}

/// `POST /v1/agents/reboot-all` (202): dispatches to every currently
/// connected agent; unreachable ones are silently skipped (this is a
/// best-effort broadcast, not a transactional operation).
#[utoipa::path(
    post,
    path = "/v1/agents/reboot-all",
    tag = "agents",
    request_body = RebootRequest,
    responses((status = 202, description = "Reboot dispatched to every connected agent"))
)]
pub async fn reboot_all_agents(
    State(state): State<AppState>,
    body: Option<Json<RebootRequest>>,
) -> StatusCode {
    let reason = body.map(|Json(b)| b.reason).unwrap_or(None);
    for agent in state.registry.list() {
        state.dispatcher.send_reboot(&agent.agent_id, reason.clone());
    }
    StatusCode::ACCEPTED
}
