//! OpenAPI documentation: aggregates every annotated route into one
//! `utoipa::OpenApi` document, served as interactive Swagger UI (§6).

use utoipa::OpenApi;

use crate::api::error::ApiErrorResponse;
use crate::api::routes::agents::{RebootRequest, SetDrainRequest, SetMetaRequest};
use crate::api::routes::config::{
    AlternateColorsResponse, SetAlternateColorsRequest, SetStreamPrivacyRequest, StreamPrivacyResponse,
};
use crate::api::routes::health::HealthzResponse;
use crate::api::routes::jobs::{CreateJobRequest, UpdateMetadataRequest};
use crate::api::routes::oauth::{AuthUrlResponse, ExchangeTokenRequest, OAuthStatusResponse};
use crate::api::routes::status::PublicStatusEntry;
use crate::broadcast::StreamPrivacy;
use crate::domain::{
    AgentCapabilities, AgentView, BroadcastHandles, InlineConfig, JobError, JobHealth, JobStatus,
    RestartPolicy, StreamMetadata, StreamingJob,
};
use crate::jobs::{JobNote, JobNoteKind};

/// OpenAPI documentation for the orchestrator's HTTP surface. Agent-plane
/// websocket endpoints (`/agent`) and the internal fanouts (`/ui`,
/// `/status-ws`) are not representable as request/response pairs and are
/// documented in prose in `§6`/`§4.1` instead.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "stream-orchestrator API",
        version = "0.1.0",
        description = "Control-plane API for live-stream agents: job lifecycle, agent registry, and broadcast-platform OAuth.",
        license(name = "MIT OR Apache-2.0")
    ),
    tags(
        (name = "health", description = "Liveness probe"),
        (name = "jobs", description = "Job creation, inspection, and lifecycle control"),
        (name = "agents", description = "Agent registry read/control endpoints"),
        (name = "config", description = "Operator-tunable broadcast defaults"),
        (name = "oauth", description = "Broadcast-platform OAuth helper endpoints"),
        (name = "status", description = "Public, unauthenticated stream status projection")
    ),
    paths(
        crate::api::routes::health::healthz,
        crate::api::routes::jobs::create_job,
        crate::api::routes::jobs::list_jobs,
        crate::api::routes::jobs::get_job,
        crate::api::routes::jobs::stop_job,
        crate::api::routes::jobs::dismiss_job,
        crate::api::routes::jobs::get_metadata,
        crate::api::routes::jobs::update_metadata,
        crate::api::routes::jobs::mute_job,
        crate::api::routes::jobs::unmute_job,
        crate::api::routes::jobs::pause_job,
        crate::api::routes::jobs::unpause_job,
        crate::api::routes::agents::list_agents,
        crate::api::routes::agents::get_agent,
        crate::api::routes::agents::set_drain,
        crate::api::routes::agents::set_meta,
        crate::api::routes::agents::reboot_agent,
        crate::api::routes::agents::reboot_all_agents,
        crate::api::routes::config::get_stream_privacy,
        crate::api::routes::config::set_stream_privacy,
        crate::api::routes::config::get_alternate_colors,
        crate::api::routes::config::set_alternate_colors,
        crate::api::routes::oauth::status,
        crate::api::routes::oauth::auth_url,
        crate::api::routes::oauth::exchange_token,
        crate::api::routes::oauth::revoke_token,
        crate::api::routes::oauth::callback,
        crate::api::routes::status::get_status,
    ),
    components(
        schemas(
            ApiErrorResponse,
            HealthzResponse,
            CreateJobRequest,
            UpdateMetadataRequest,
            StreamingJob,
            StreamMetadata,
            JobStatus,
            JobError,
            RestartPolicy,
            InlineConfig,
            JobHealth,
            BroadcastHandles,
            StreamPrivacy,
            JobNote,
            JobNoteKind,
            AgentView,
            AgentCapabilities,
            SetDrainRequest,
            SetMetaRequest,
            RebootRequest,
            StreamPrivacyResponse,
            SetStreamPrivacyRequest,
            AlternateColorsResponse,
            SetAlternateColorsRequest,
            OAuthStatusResponse,
            AuthUrlResponse,
            ExchangeTokenRequest,
            PublicStatusEntry,
        )
    )
)]
pub struct ApiDoc;
