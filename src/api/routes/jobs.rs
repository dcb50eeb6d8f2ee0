//! `/v1/jobs` — job creation, inspection, and lifecycle control (§6).

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::broadcast::{end_broadcast_if_present, BroadcastMetadataPatch, StreamPrivacy};
use crate::domain::{InlineConfig, JobError, JobStatus, RestartPolicy, StreamMetadata, StreamingJob};
use crate::jobs::{JobNote, JobNoteKind};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/jobs", get(list_jobs).post(create_job))
        .route("/v1/jobs/{job_id}", get(get_job))
        .route("/v1/jobs/{job_id}/stop", post(stop_job))
        .route("/v1/jobs/{job_id}/dismiss", post(dismiss_job))
        .route(
            "/v1/jobs/{job_id}/metadata",
            get(get_metadata).put(update_metadata),
        )
        .route("/v1/jobs/{job_id}/mute", post(mute_job))
        .route("/v1/jobs/{job_id}/unmute", post(unmute_job))
        .route("/v1/jobs/{job_id}/pause", post(pause_job))
        .route("/v1/jobs/{job_id}/unpause", post(unpause_job))
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobRequest {
    #[serde(default)]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub template_id: Option<String>,
    #[serde(default)]
    pub inline_config: Option<serde_json::Value>,
    #[serde(default)]
    pub restart_policy: RestartPolicy,
    pub requested_by: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub privacy: Option<StreamPrivacy>,
    #[serde(default)]
    pub stream_context: serde_json::Value,
}

/// Title/description synthesis (§4.2 step b): custom strings take priority;
/// otherwise derive from the requester's free-form `streamContext` (the
/// `team1 vs team2` / `sheet N` vocabulary the public projection also reads,
/// see `api::routes::status::context_str`); otherwise a bare default.
fn synthesize_metadata(
    job_id: &str,
    title: Option<String>,
    description: Option<String>,
    stream_context: &serde_json::Value,
) -> (String, String) {
    let context_str = |key: &str| -> Option<String> {
        stream_context.get(key).and_then(|v| v.as_str()).map(str::to_string)
    };
    let team1 = context_str("team1");
    let team2 = context_str("team2");
    let sheet = context_str("sheet");

    let title = title.or_else(|| match (&team1, &team2) {
        (Some(t1), Some(t2)) => Some(format!("{t1} vs {t2}")),
        _ => None,
    }).unwrap_or_else(|| format!("Stream {job_id}"));

    let description = description.or_else(|| sheet.map(|s| format!("Sheet {s}"))).unwrap_or_default();

    (title, description)
}

/// `POST /v1/jobs` (§3, §4.2 creation rules, §4.3): idempotent on
/// `idempotencyKey` (200 on a live hit), 422 when neither or both of
/// `templateId`/`inlineConfig` are given, 429 when the job-creation limiter
/// rejects. Provisions the broadcast+stream up front so the handles can ride
/// along in `orchestrator.assign.start` later; a broadcast-side failure does
/// not reject the HTTP call — the job is created `FAILED` instead (§4.2).
#[utoipa::path(
    post,
    path = "/v1/jobs",
    tag = "jobs",
    request_body = CreateJobRequest,
    responses(
        (status = 200, description = "Idempotency key matched a live job", body = StreamingJob),
        (status = 201, description = "Job created (possibly already FAILED, see status)", body = StreamingJob),
        (status = 422, description = "Neither or both of templateId/inlineConfig were given"),
        (status = 429, description = "Job creation rate limit exceeded")
    )
)]
pub async fn create_job(
    State(state): State<AppState>,
    Json(body): Json<CreateJobRequest>,
) -> ApiResult<(StatusCode, Json<StreamingJob>)> {
    if let Some(key) = body.idempotency_key.as_deref() {
        if let Some(existing) = state.jobs.find_live_by_idempotency_key(key) {
            return Ok((StatusCode::OK, Json(existing)));
        }
    }

    let config = match (body.template_id, body.inline_config) {
        (Some(template_id), None) => InlineConfig::Template { template_id },
        (None, Some(inline_config)) => InlineConfig::Inline { inline_config },
        _ => {
            return Err(ApiError::validation(
                "exactly one of templateId or inlineConfig must be set",
            ))
        }
    };

    if !state.job_rate_limiter.try_acquire() {
        return Err(ApiError::from(crate::Error::JobCreationRateLimit));
    }

    let job_id = Uuid::new_v4().to_string();
    let (title, description) = synthesize_metadata(&job_id, body.title.clone(), body.description.clone(), &body.stream_context);
    let privacy = body.privacy.unwrap_or_else(|| state.runtime_config.stream_privacy());

    let mut stream_metadata = StreamMetadata {
        title: Some(title.clone()),
        description: Some(description.clone()),
        stream_context: body.stream_context,
        ..Default::default()
    };

    let mut job = StreamingJob::new(
        job_id,
        config,
        body.idempotency_key,
        body.restart_policy,
        body.requested_by,
        StreamMetadata::default(),
    );

    if !state.broadcast_rate_limiter.would_admit() {
        job.stream_metadata = stream_metadata;
        job.fail(JobError::RATE_LIMIT_EXCEEDED, "broadcast creation rate limit exceeded");
        state.jobs.insert(job.clone());
        return Ok((StatusCode::CREATED, Json(job)));
    }

    match state
        .broadcast
        .create_live_broadcast(&title, &description, privacy)
        .await
    {
        Ok(created) => {
            state.broadcast_rate_limiter.record();
            stream_metadata.broadcast.broadcast_id = Some(created.broadcast_id);
            stream_metadata.broadcast.stream_id = Some(created.stream_id);
            stream_metadata.broadcast.stream_key = Some(created.stream_key);
            stream_metadata.broadcast.stream_url = Some(created.stream_url);
            stream_metadata.broadcast.privacy_status = Some(created.privacy_status);
            stream_metadata.broadcast.scheduled_start_time = Some(created.scheduled_start_time);
            stream_metadata.broadcast.channel_id = Some(created.channel_id);
            stream_metadata.broadcast.video_id = Some(created.video_id);
            job.stream_metadata = stream_metadata;
            job.set_status(JobStatus::Pending);
        }
        Err(error) => {
            tracing::warn!(job_id = %job.job_id, %error, "broadcast setup failed at job creation");
            job.stream_metadata = stream_metadata;
            job.fail(JobError::YOUTUBE_SETUP_FAILED, error.to_string());
        }
    }

    state.jobs.insert(job.clone());
    state.scheduler.tick();
    Ok((StatusCode::CREATED, Json(job)))
}

#[utoipa::path(
    get,
    path = "/v1/jobs",
    tag = "jobs",
    responses((status = 200, description = "Every known job", body = [StreamingJob]))
)]
pub async fn list_jobs(State(state): State<AppState>) -> Json<Vec<StreamingJob>> {
    Json(state.jobs.list())
}

#[utoipa::path(
    get,
    path = "/v1/jobs/{job_id}",
    tag = "jobs",
    params(("job_id" = String, Path, description = "Job id")),
    responses(
        (status = 200, description = "Job record", body = StreamingJob),
        (status = 404, description = "No such job")
    )
)]
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<StreamingJob>> {
    state
        .jobs
        .get(&job_id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("job '{job_id}' not found")))
}

/// `POST /v1/jobs/{id}/stop` (202/404, §4.2 termination rules): a job with no
/// agent bound yet is canceled outright (ending its broadcast); one bound to
/// an unreachable agent is marked `UNKNOWN` for the health monitor to settle;
/// otherwise a graceful `orchestrator.job.stop` is dispatched and the job
/// moves to `STOPPING`. Idempotent on an already-terminal job.
#[utoipa::path(
    post,
    path = "/v1/jobs/{job_id}/stop",
    tag = "jobs",
    params(("job_id" = String, Path, description = "Job id")),
    responses(
        (status = 202, description = "Stop initiated or already terminal", body = StreamingJob),
        (status = 404, description = "No such job")
    )
)]
pub async fn stop_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<(StatusCode, Json<StreamingJob>)> {
    let job = state
        .jobs
        .get(&job_id)
        .ok_or_else(|| ApiError::not_found(format!("job '{job_id}' not found")))?;

    if job.status.is_terminal() {
        return Ok((StatusCode::ACCEPTED, Json(job)));
    }

    let updated = match job.agent_id.as_deref() {
        None => {
            end_broadcast_if_present(state.broadcast.as_ref(), &job).await;
            state.metadata.cancel(&job_id);
            state
                .jobs
                .update(&job_id, |j| {
                    j.ended_at = Some(chrono::Utc::now());
                    j.set_status(JobStatus::Canceled);
                })
                .expect("job existed above")
        }
        Some(agent_id) if state.registry.current_sender(agent_id).is_none() => state
            .jobs
            .update(&job_id, |j| j.set_status(JobStatus::Unknown))
            .expect("job existed above"),
        Some(agent_id) => {
            state
                .dispatcher
                .send_job_stop(agent_id, &job_id, "user_requested", state.config.stop_grace_ms);
            state.registry.set_state(agent_id, crate::domain::AgentState::Stopping);
            state
                .jobs
                .update(&job_id, |j| j.set_status(JobStatus::Stopping))
                .expect("job existed above")
        }
    };

    state
        .jobs
        .emit_note(JobNote::new(&job_id, JobNoteKind::Stopped, "stop requested by operator"));
    Ok((StatusCode::ACCEPTED, Json(updated)))
}

/// `POST /v1/jobs/{id}/dismiss` (200/404, §4.2): unconditionally terminal —
/// ends the broadcast, drops any pending metadata update, and clears the
/// agent binding so it returns to idle.
#[utoipa::path(
    post,
    path = "/v1/jobs/{job_id}/dismiss",
    tag = "jobs",
    params(("job_id" = String, Path, description = "Job id")),
    responses(
        (status = 200, description = "Job dismissed", body = StreamingJob),
        (status = 404, description = "No such job")
    )
)]
pub async fn dismiss_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<StreamingJob>> {
    let job = state
        .jobs
        .get(&job_id)
        .ok_or_else(|| ApiError::not_found(format!("job '{job_id}' not found")))?;

    end_broadcast_if_present(state.broadcast.as_ref(), &job).await;
    state.metadata.cancel(&job_id);

    if let Some(agent_id) = job.agent_id.as_deref() {
        state.registry.clear_job(agent_id);
    }

    let updated = state
        .jobs
        .update(&job_id, |j| {
            j.ended_at = Some(chrono::Utc::now());
            j.set_status(JobStatus::Dismissed);
        })
        .expect("job existed above");
    Ok(Json(updated))
}

#[utoipa::path(
    get,
    path = "/v1/jobs/{job_id}/metadata",
    tag = "jobs",
    params(("job_id" = String, Path, description = "Job id")),
    responses(
        (status = 200, description = "Stream metadata", body = StreamMetadata),
        (status = 404, description = "No such job")
    )
)]
pub async fn get_metadata(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<StreamMetadata>> {
    state
        .jobs
        .get(&job_id)
        .map(|j| Json(j.stream_metadata))
        .ok_or_else(|| ApiError::not_found(format!("job '{job_id}' not found")))
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct UpdateMetadataRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// `PUT /v1/jobs/{id}/metadata` (§4.5): the job record updates immediately;
/// the outbound `updateBroadcast` call is debounced.
#[utoipa::path(
    put,
    path = "/v1/jobs/{job_id}/metadata",
    tag = "jobs",
    params(("job_id" = String, Path, description = "Job id")),
    request_body = UpdateMetadataRequest,
    responses(
        (status = 200, description = "Metadata updated, broadcast push debounced", body = StreamingJob),
        (status = 404, description = "No such job"),
        (status = 409, description = "Job has no associated broadcast yet")
    )
)]
pub async fn update_metadata(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Json(body): Json<UpdateMetadataRequest>,
) -> ApiResult<Json<StreamingJob>> {
    let job = state
        .jobs
        .get(&job_id)
        .ok_or_else(|| ApiError::not_found(format!("job '{job_id}' not found")))?;

    let Some(broadcast_id) = job.stream_metadata.broadcast.broadcast_id.clone() else {
        return Err(ApiError::conflict("job has no associated broadcast yet"));
    };

    let title = body.title.clone();
    let description = body.description.clone();
    let updated = state
        .jobs
        .update(&job_id, |j| {
            if let Some(title) = title.clone() {
                j.stream_metadata.title = Some(title);
            }
            if let Some(description) = description.clone() {
                j.stream_metadata.description = Some(description);
            }
        })
        .expect("job existed above");

    // §4.5: only a job actively starting/running propagates to the external
    // platform; a record update before then (or after a terminal transition)
    // stays local until the stream is actually live.
    if matches!(job.status, JobStatus::Starting | JobStatus::Running) {
        state.metadata.queue(
            job_id,
            broadcast_id,
            BroadcastMetadataPatch {
                title: body.title,
                description: body.description,
            },
        );
    }

    Ok(Json(updated))
}

/// Shared path for the four mute/unmute/pause/unpause routes: 409 if the job
/// has no live agent to receive the command, 202 on successful dispatch.
async fn dispatch_flag_change(
    state: &AppState,
    job_id: &str,
    muted: Option<bool>,
    paused: Option<bool>,
    failure_kind: JobNoteKind,
) -> ApiResult<StatusCode> {
    let job = state
        .jobs
        .get(job_id)
        .ok_or_else(|| ApiError::not_found(format!("job '{job_id}' not found")))?;
    let Some(agent_id) = job.agent_id.clone() else {
        return Err(ApiError::conflict("job is not bound to an agent"));
    };

    let sent = match (muted, paused) {
        (Some(muted), None) => state.dispatcher.send_mute(&agent_id, job_id, muted),
        (None, Some(paused)) => state.dispatcher.send_pause(&agent_id, job_id, paused),
        _ => unreachable!("dispatch_flag_change called with both or neither flag set"),
    };

    if !sent {
        state
            .jobs
            .emit_note(JobNote::new(job_id, failure_kind, "agent unreachable"));
        return Err(ApiError::conflict("agent is not currently connected"));
    }

    // §4.1: "Mute/pause ack messages update the corresponding flags" — the
    // agent's `mute.ack`/`pause.ack` (accepted only, see `api::ws::agent`) is
    // the sole writer of `is_muted`/`is_paused`. Dispatch only requests the
    // change; writing it here optimistically would leave a stale `true` on
    // record if the agent rejects it.
    Ok(StatusCode::ACCEPTED)
}

#[utoipa::path(
    post,
    path = "/v1/jobs/{job_id}/mute",
    tag = "jobs",
    params(("job_id" = String, Path, description = "Job id")),
    responses(
        (status = 202, description = "Mute dispatched to the bound agent"),
        (status = 404, description = "No such job"),
        (status = 409, description = "No agent bound, or agent unreachable")
    )
)]
pub async fn mute_job(State(state): State<AppState>, Path(job_id): Path<String>) -> ApiResult<StatusCode> {
    dispatch_flag_change(&state, &job_id, Some(true), None, JobNoteKind::MuteFailed).await
}

#[utoipa::path(
    post,
    path = "/v1/jobs/{job_id}/unmute",
    tag = "jobs",
    params(("job_id" = String, Path, description = "Job id")),
    responses(
        (status = 202, description = "Unmute dispatched to the bound agent"),
        (status = 404, description = "No such job"),
        (status = 409, description = "No agent bound, or agent unreachable")
    )
)]
pub async fn unmute_job(State(state): State<AppState>, Path(job_id): Path<String>) -> ApiResult<StatusCode> {
    dispatch_flag_change(&state, &job_id, Some(false), None, JobNoteKind::UnmuteFailed).await
}

#[utoipa::path(
    post,
    path = "/v1/jobs/{job_id}/pause",
    tag = "jobs",
    params(("job_id" = String, Path, description = "Job id")),
    responses(
        (status = 202, description = "Pause dispatched to the bound agent"),
        (status = 404, description = "No such job"),
        (status = 409, description = "No agent bound, or agent unreachable")
    )
)]
pub async fn pause_job(State(state): State<AppState>, Path(job_id): Path<String>) -> ApiResult<StatusCode> {
    dispatch_flag_change(&state, &job_id, None, Some(true), JobNoteKind::PauseFailed).await
}

#[utoipa::path(
    post,
    path = "/v1/jobs/{job_id}/unpause",
    tag = "jobs",
    params(("job_id" = String, Path, description = "Job id")),
    responses(
        (status = 202, description = "Unpause dispatched to the bound agent"),
        (status = 404, description = "No such job"),
        (status = 409, description = "No agent bound, or agent unreachable")
    )
)]
pub async fn unpause_job(State(state): State<AppState>, Path(job_id): Path<String>) -> ApiResult<StatusCode> {
    dispatch_flag_change(&state, &job_id, None, Some(false), JobNoteKind::UnpauseFailed).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_title_and_description_take_priority() {
        let (title, description) = synthesize_metadata(
            "j1",
            Some("custom title".into()),
            Some("custom description".into()),
            &serde_json::json!({"team1": "Canada", "team2": "Scotland", "sheet": "3"}),
        );
        assert_eq!(title, "custom title");
        assert_eq!(description, "custom description");
    }

    #[test]
    fn derives_from_stream_context_when_not_given() {
        let (title, description) = synthesize_metadata(
            "j1",
            None,
            None,
            &serde_json::json!({"team1": "Canada", "team2": "Scotland", "sheet": "3"}),
        );
        assert_eq!(title, "Canada vs Scotland");
        assert_eq!(description, "Sheet 3");
    }

    #[test]
    fn falls_back_to_bare_default_with_no_context() {
        let (title, description) = synthesize_metadata("j1", None, None, &serde_json::Value::Null);
        assert_eq!(title, "Stream j1");
        assert_eq!(description, "");
    }

    /// §4.1: dispatching a mute request is not the same as the agent
    /// accepting it — only `agent.mute.ack{accepted:true}` (handled in
    /// `api::ws::agent`) may flip `is_muted`. A rejected or still-pending
    /// ack must never leave the record showing a mute that never happened.
    #[tokio::test]
    async fn mute_dispatch_does_not_optimistically_set_the_flag() {
        use crate::broadcast::MockBroadcastClient;
        use crate::domain::{AgentCapabilities, InlineConfig, RestartPolicy, StreamMetadata};
        use crate::jobs::JobStore;
        use crate::registry::AgentRegistry;
        use axum::extract::ws::Message as WsMessage;
        use std::sync::Arc;
        use tokio::sync::mpsc;

        let registry = Arc::new(AgentRegistry::new());
        let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
        registry.handle_hello(
            "agent-1",
            None,
            "worker-1".into(),
            "1.0.0".into(),
            AgentCapabilities::default(),
            false,
            tx,
        );

        let jobs = Arc::new(JobStore::new());
        let mut job = StreamingJob::new(
            "job-1".to_string(),
            InlineConfig::Inline { inline_config: serde_json::json!({}) },
            None,
            RestartPolicy::Never,
            "tester".to_string(),
            StreamMetadata::default(),
        );
        job.agent_id = Some("agent-1".to_string());
        job.set_status(JobStatus::Running);
        jobs.insert(job);

        let config = Arc::new(crate::config::Config::for_tests());
        let logging_config = crate::logging::shared_test_config();
        let broadcast: Arc<dyn crate::broadcast::BroadcastClient> = Arc::new(MockBroadcastClient::new());
        let state = AppState::new(config, registry, jobs.clone(), broadcast, logging_config);

        let status = dispatch_flag_change(&state, "job-1", Some(true), None, JobNoteKind::MuteFailed)
            .await
            .unwrap();
        assert_eq!(status, StatusCode::ACCEPTED);
        assert!(rx.try_recv().is_ok(), "expected a mute frame dispatched to the agent");

        // No ack has arrived yet — the flag must still read false.
        assert!(!jobs.get("job-1").unwrap().stream_metadata.is_muted);
    }
}
