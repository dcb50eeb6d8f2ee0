//! `GET /healthz` — unauthenticated liveness probe (§6).

use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::api::server::AppState;

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct HealthzResponse {
    pub ok: bool,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/healthz", get(healthz))
}

#[utoipa::path(
    get,
    path = "/healthz",
    tag = "health",
    responses((status = 200, description = "Process is up", body = HealthzResponse))
)]
pub async fn healthz() -> Json<HealthzResponse> {
    Json(HealthzResponse { ok: true })
}
