//! `/oauth/*` — helper endpoints around the broadcast platform's OAuth
//! refresh token (§4.6, §6). A thin wrapper: this process never stores
//! anything beyond the in-memory token the `BroadcastClient` holds.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Redirect;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;

const AUTH_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
const SCOPE: &str = "https://www.googleapis.com/auth/youtube";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/oauth/status", get(status))
        .route("/oauth/auth-url", get(auth_url))
        .route("/oauth/token", post(exchange_token).delete(revoke_token))
        .route("/oauth/callback", get(callback))
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OAuthStatusResponse {
    pub connected: bool,
}

#[utoipa::path(
    get,
    path = "/oauth/status",
    tag = "oauth",
    responses((status = 200, description = "Whether a refresh token is currently installed", body = OAuthStatusResponse))
)]
pub async fn status(State(state): State<AppState>) -> Json<OAuthStatusResponse> {
    Json(OAuthStatusResponse {
        connected: state.config.youtube.refresh_token.is_some(),
    })
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct AuthUrlResponse {
    pub url: String,
}

#[utoipa::path(
    get,
    path = "/oauth/auth-url",
    tag = "oauth",
    responses(
        (status = 200, description = "Google consent-screen URL to redirect the operator to", body = AuthUrlResponse),
        (status = 500, description = "YOUTUBE_CLIENT_ID is not configured")
    )
)]
pub async fn auth_url(State(state): State<AppState>) -> ApiResult<Json<AuthUrlResponse>> {
    let client_id = state
        .config
        .youtube
        .client_id
        .as_deref()
        .ok_or_else(|| ApiError::internal("YOUTUBE_CLIENT_ID is not configured"))?;

    let url = url::Url::parse_with_params(
        AUTH_ENDPOINT,
        &[
            ("client_id", client_id),
            ("redirect_uri", state.config.oauth_redirect_uri.as_str()),
            ("response_type", "code"),
            ("scope", SCOPE),
            ("access_type", "offline"),
            ("prompt", "consent"),
        ],
    )
    .map_err(|e| ApiError::internal(format!("failed to build auth url: {e}")))?;

    Ok(Json(AuthUrlResponse { url: url.to_string() }))
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct ExchangeTokenRequest {
    pub code: String,
}

/// Exchanges an authorization code for a refresh token and installs it on
/// the live `BroadcastClient`, replacing whatever token it held before.
async fn exchange_code(state: &AppState, code: &str) -> crate::Result<()> {
    let client_id = state
        .config
        .youtube
        .client_id
        .as_deref()
        .ok_or_else(|| crate::Error::config("YOUTUBE_CLIENT_ID is not configured"))?;
    let client_secret = state
        .config
        .youtube
        .client_secret
        .as_deref()
        .ok_or_else(|| crate::Error::config("YOUTUBE_CLIENT_SECRET is not configured"))?;

    let http = reqwest::Client::new();
    let response = http
        .post(TOKEN_ENDPOINT)
        .form(&[
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("redirect_uri", state.config.oauth_redirect_uri.as_str()),
            ("code", code),
            ("grant_type", "authorization_code"),
        ])
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(crate::Error::Other(format!(
            "YouTube API error: token exchange returned {status}: {body}"
        )));
    }

    let body: serde_json::Value = response.json().await?;
    let refresh_token = body
        .get("refresh_token")
        .and_then(|v| v.as_str())
        .ok_or_else(|| {
            crate::Error::Other(
                "YouTube API error: token response missing refresh_token (re-consent required)".to_string(),
            )
        })?
        .to_string();

    state.broadcast.update_refresh_token(refresh_token).await
}

#[utoipa::path(
    post,
    path = "/oauth/token",
    tag = "oauth",
    request_body = ExchangeTokenRequest,
    responses(
        (status = 200, description = "Authorization code exchanged and refresh token installed"),
        (status = 500, description = "Exchange with the broadcast platform failed")
    )
)]
pub async fn exchange_token(
    State(state): State<AppState>,
    Json(body): Json<ExchangeTokenRequest>,
) -> ApiResult<StatusCode> {
    exchange_code(&state, &body.code).await?;
    Ok(StatusCode::OK)
}

#[utoipa::path(
    delete,
    path = "/oauth/token",
    tag = "oauth",
    responses((status = 204, description = "Refresh token cleared"))
)]
pub async fn revoke_token(State(state): State<AppState>) -> ApiResult<StatusCode> {
    state.broadcast.update_refresh_token(String::new()).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub error: Option<String>,
}

/// `GET /oauth/callback`: the redirect target Google sends the browser back
/// to after consent; always redirects onward to the UI, carrying success or
/// failure as a query string rather than rendering anything itself.
#[utoipa::path(
    get,
    path = "/oauth/callback",
    tag = "oauth",
    params(CallbackQuery),
    responses((status = 302, description = "Redirects back to the UI with an oauth query parameter"))
)]
pub async fn callback(State(state): State<AppState>, Query(query): Query<CallbackQuery>) -> Redirect {
    let base = state.config.ui_base_url.trim_end_matches('/');
    if let Some(error) = query.error {
        return Redirect::to(&format!("{base}/?oauth=error&reason={error}"));
    }
    let Some(code) = query.code else {
        return Redirect::to(&format!("{base}/?oauth=error&reason=missing_code"));
    };

    match exchange_code(&state, &code).await {
        Ok(()) => Redirect::to(&format!("{base}/?oauth=connected")),
        Err(error) => {
            tracing::warn!(%error, "oauth callback token exchange failed");
            Redirect::to(&format!("{base}/?oauth=error&reason=exchange_failed"))
        }
    }
}
