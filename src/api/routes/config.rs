//! `/v1/config/*` — operator-tunable broadcast defaults (§6). Backed by
//! `AppState::runtime_config`, not `Config`, since these change at runtime.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::broadcast::StreamPrivacy;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/v1/config/stream-privacy",
            get(get_stream_privacy).put(set_stream_privacy),
        )
        .route(
            "/v1/config/alternate-colors",
            get(get_alternate_colors).put(set_alternate_colors),
        )
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct StreamPrivacyResponse {
    pub privacy: StreamPrivacy,
}

#[utoipa::path(
    get,
    path = "/v1/config/stream-privacy",
    tag = "config",
    responses((status = 200, description = "Current default stream privacy", body = StreamPrivacyResponse))
)]
pub async fn get_stream_privacy(State(state): State<AppState>) -> Json<StreamPrivacyResponse> {
    Json(StreamPrivacyResponse {
        privacy: state.runtime_config.stream_privacy(),
    })
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct SetStreamPrivacyRequest {
    pub privacy: String,
}

#[utoipa::path(
    put,
    path = "/v1/config/stream-privacy",
    tag = "config",
    request_body = SetStreamPrivacyRequest,
    responses(
        (status = 200, description = "Default stream privacy updated", body = StreamPrivacyResponse),
        (status = 400, description = "Unrecognized privacy value")
    )
)]
pub async fn set_stream_privacy(
    State(state): State<AppState>,
    Json(body): Json<SetStreamPrivacyRequest>,
) -> ApiResult<Json<StreamPrivacyResponse>> {
    let privacy: StreamPrivacy = body
        .privacy
        .parse()
        .map_err(|_| ApiError::bad_request(format!("invalid privacy value: {}", body.privacy)))?;
    state.runtime_config.set_stream_privacy(privacy);
    Ok(Json(StreamPrivacyResponse { privacy }))
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AlternateColorsResponse {
    pub alternate_colors: bool,
}

#[utoipa::path(
    get,
    path = "/v1/config/alternate-colors",
    tag = "config",
    responses((status = 200, description = "Current alternate-colors flag", body = AlternateColorsResponse))
)]
pub async fn get_alternate_colors(State(state): State<AppState>) -> Json<AlternateColorsResponse> {
    Json(AlternateColorsResponse {
        alternate_colors: state.runtime_config.alternate_colors(),
    })
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SetAlternateColorsRequest {
    pub alternate_colors: bool,
}

#[utoipa::path(
    put,
    path = "/v1/config/alternate-colors",
    tag = "config",
    request_body = SetAlternateColorsRequest,
    responses((status = 200, description = "Alternate-colors flag updated", body = AlternateColorsResponse))
)]
pub async fn set_alternate_colors(
    State(state): State<AppState>,
    Json(body): Json<SetAlternateColorsRequest>,
) -> Json<AlternateColorsResponse> {
    state.runtime_config.set_alternate_colors(body.alternate_colors);
    Json(AlternateColorsResponse {
        alternate_colors: body.alternate_colors,
    })
}
