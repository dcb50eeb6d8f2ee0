//! HTTP + websocket route tree (§6).

pub mod agents;
pub mod config;
pub mod health;
pub mod jobs;
pub mod oauth;
pub mod status;

use axum::Router;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::api::middleware::require_trusted_network;
use crate::api::openapi::ApiDoc;
use crate::api::server::AppState;
use crate::api::ws;

/// Assembles the full router: public routes open to any caller, and the
/// rest of the control plane (agent websocket/management, job CRUD,
/// config, OAuth, and the internal UI websocket) gated behind
/// `require_trusted_network` when the operator has enabled that
/// restriction (§6, design note "agent network trust"). Only
/// `/`, `/status`, `/healthz` and `/status-ws` are unconditionally
/// reachable, per §6's explicit public-endpoint list. Interactive API
/// docs are served at `/api/docs`, the raw OpenAPI document at
/// `/api/docs/openapi.json`.
pub fn create_router(state: AppState) -> Router {
    let control_plane = Router::new()
        .route("/agent", axum::routing::get(ws::agent::agent_ws))
        .merge(agents::router())
        .merge(jobs::router())
        .merge(config::router())
        .merge(oauth::router())
        .merge(ws::ui::router())
        .merge(SwaggerUi::new("/api/docs").url("/api/docs/openapi.json", ApiDoc::openapi()));

    let control_plane = if state.config.enable_public_access_restrictions {
        control_plane.layer(axum::middleware::from_fn(require_trusted_network))
    } else {
        control_plane
    };

    Router::new()
        .merge(health::router())
        .merge(status::router())
        .merge(ws::status::router())
        .merge(control_plane)
        .with_state(state)
}
