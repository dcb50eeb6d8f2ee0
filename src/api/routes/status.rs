//! `GET /status` — the unauthenticated public projection of active streams
//! (§4.7). Also backs the `/status-ws` broadcast in `api::ws::status`.

use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::api::server::AppState;
use crate::domain::StreamingJob;

/// Public-facing projection of a job, deliberately narrower than
/// `StreamingJob` — no agent ids, no internal ids beyond what a viewer panel
/// needs to render (§4.7).
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PublicStatusEntry {
    pub sheet: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub public_link: Option<String>,
    pub admin_link: Option<String>,
    pub thumbnail: Option<String>,
    pub start_time: Option<chrono::DateTime<chrono::Utc>>,
    pub team1: Option<String>,
    pub team2: Option<String>,
}

/// Pulls `sheet`/`team1`/`team2` out of a job's free-form `streamContext`, the
/// only place the requester's own vocabulary survives into the job record.
fn context_str(job: &StreamingJob, key: &str) -> Option<String> {
    job.stream_metadata
        .stream_context
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

/// Projects one job into its public view (§4.7). `publicLink`/`thumbnail` are
/// derived from the platform `videoId`, when a broadcast has been created.
pub fn project(job: &StreamingJob) -> PublicStatusEntry {
    let video_id = job.stream_metadata.broadcast.video_id.as_deref();
    PublicStatusEntry {
        sheet: context_str(job, "sheet"),
        title: job.stream_metadata.title.clone(),
        description: job.stream_metadata.description.clone(),
        public_link: video_id.map(|id| format!("https://www.youtube.com/watch?v={id}")),
        admin_link: Some(format!("/v1/jobs/{}", job.job_id)),
        thumbnail: video_id.map(|id| format!("https://i.ytimg.com/vi/{id}/hqdefault.jpg")),
        start_time: job.started_at,
        team1: context_str(job, "team1"),
        team2: context_str(job, "team2"),
    }
}

/// Every job currently in a publicly active status (§4.7), projected.
pub fn active_projection(jobs: &[StreamingJob]) -> Vec<PublicStatusEntry> {
    jobs.iter()
        .filter(|j| j.status.is_publicly_active())
        .map(project)
        .collect()
}

pub fn router() -> Router<AppState> {
    Router::new().route("/status", get(get_status))
}

#[utoipa::path(
    get,
    path = "/status",
    tag = "status",
    responses((status = 200, description = "Publicly active streams", body = [PublicStatusEntry]))
)]
pub async fn get_status(axum::extract::State(state): axum::extract::State<AppState>) -> Json<Vec<PublicStatusEntry>> {
    Json(active_projection(&state.jobs.list()))
}
