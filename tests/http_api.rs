//! End-to-end HTTP surface tests driving the full `axum::Router` in-process
//! via `tower::ServiceExt::oneshot`, against the mock broadcast client —
//! covering the literal scenarios of job creation, idempotency, and rate
//! limiting (§8) that don't require a live agent connection.

use std::sync::{Arc, OnceLock};

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use stream_orchestrator::api::routes::create_router;
use stream_orchestrator::api::server::AppState;
use stream_orchestrator::broadcast::{BroadcastClient, MockBroadcastClient, StreamPrivacy};
use stream_orchestrator::config::{Config, YoutubeOAuthConfig};
use stream_orchestrator::jobs::JobStore;
use stream_orchestrator::logging::LoggingConfig;
use stream_orchestrator::registry::AgentRegistry;

fn test_config() -> Config {
    Config {
        bind_address: "127.0.0.1".to_string(),
        port: 0,
        agent_token: "T".to_string(),
        heartbeat_interval_ms: 3_000,
        heartbeat_timeout_ms: 10_000,
        stop_grace_ms: 10_000,
        kill_after_ms: 5_000,
        stream_health_interval_ms: 15_000,
        stream_inactive_grace_ms: 30_000,
        restart_backoffs_ms: vec![5_000, 15_000, 45_000],
        assign_ack_ttl_ms: 5_000,
        metadata_debounce_ms: 10_000,
        broadcast_rate_limit_window_ms: 600_000,
        broadcast_rate_limit_max: 10,
        job_rate_limit_burst: 5,
        job_rate_limit_interval_ms: 2_000,
        scheduler_interval_ms: 500,
        ui_ws_broadcast_capacity: 256,
        disable_youtube_api: true,
        enable_public_access_restrictions: false,
        default_stream_privacy: StreamPrivacy::default(),
        youtube: YoutubeOAuthConfig::default(),
        oauth_redirect_uri: "http://localhost:8080/oauth/callback".to_string(),
        ui_base_url: "/".to_string(),
        log_dir: "logs".to_string(),
    }
}

/// `init_logging` sets the process-wide default subscriber once; every test
/// in this binary shares that single call.
fn shared_logging_config() -> Arc<LoggingConfig> {
    static CONFIG: OnceLock<Arc<LoggingConfig>> = OnceLock::new();
    CONFIG
        .get_or_init(|| {
            let dir = std::env::temp_dir().join("stream-orchestrator-http-api-tests");
            let (config, guard) =
                stream_orchestrator::logging::init_logging(dir.to_str().unwrap())
                    .expect("logging init must succeed once per process");
            std::mem::forget(guard);
            config
        })
        .clone()
}

fn test_app() -> (axum::Router, AppState) {
    let config = Arc::new(test_config());
    let registry = Arc::new(AgentRegistry::with_capacity(config.ui_ws_broadcast_capacity));
    let jobs = Arc::new(JobStore::with_capacity(config.ui_ws_broadcast_capacity));
    let broadcast: Arc<dyn BroadcastClient> = Arc::new(MockBroadcastClient::new());
    let state = AppState::new(config, registry, jobs, broadcast, shared_logging_config());
    (create_router(state.clone()), state)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn create_job_request(idempotency_key: Option<&str>) -> Request<Body> {
    let body = json!({
        "requestedBy": "operator",
        "inlineConfig": {"resolution": "1080p"},
        "idempotencyKey": idempotency_key,
    });
    Request::builder()
        .method("POST")
        .uri("/v1/jobs")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn healthz_reports_ok() {
    let (app, _state) = test_app();
    let response = app
        .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({"ok": true}));
}

#[tokio::test]
async fn create_job_requires_exactly_one_config_source() {
    let (app, _state) = test_app();
    let body = json!({"requestedBy": "operator"});
    let request = Request::builder()
        .method("POST")
        .uri("/v1/jobs")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn create_job_provisions_a_broadcast_and_moves_to_pending() {
    let (app, _state) = test_app();
    let response = app.oneshot(create_job_request(None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let job = body_json(response).await;
    assert_eq!(job["status"], "PENDING");
    assert!(job["stream_metadata"]["broadcast"]["broadcast_id"].is_string());
}

#[tokio::test]
async fn duplicate_idempotency_key_returns_the_same_job() {
    let (app, _state) = test_app();
    let first = app
        .clone()
        .oneshot(create_job_request(Some("dup-key")))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::CREATED);
    let first_job = body_json(first).await;

    let second = app
        .clone()
        .oneshot(create_job_request(Some("dup-key")))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    let second_job = body_json(second).await;

    assert_eq!(first_job["job_id"], second_job["job_id"]);
}

#[tokio::test]
async fn broadcast_rate_limit_fails_the_eleventh_job_in_a_window() {
    let (app, state) = test_app();

    // The job-creation limiter only bursts 5 before requiring 2s spacing;
    // exhaust the broadcast limiter directly so 11 jobs can be posted
    // without waiting on the job-creation interval.
    for _ in 0..10 {
        state.broadcast_rate_limiter.record();
    }

    let response = app.oneshot(create_job_request(None)).await.unwrap();
    // The HTTP call still succeeds (broadcast failure doesn't reject the
    // request, §4.2) but the job itself is created already FAILED.
    assert_eq!(response.status(), StatusCode::CREATED);
    let job = body_json(response).await;
    assert_eq!(job["status"], "FAILED");
    assert_eq!(job["error"]["code"], "RATE_LIMIT_EXCEEDED");
}


#[tokio::test]
async fn get_job_404s_for_an_unknown_id() {
    let (app, _state) = test_app();
    let response = app
        .oneshot(
            Request::builder()
                .uri("/v1/jobs/does-not-exist")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn stop_job_with_no_agent_is_canceled_and_ends_the_broadcast() {
    let (app, _state) = test_app();
    let created = app.clone().oneshot(create_job_request(None)).await.unwrap();
    let job = body_json(created).await;
    let job_id = job["job_id"].as_str().unwrap().to_string();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/v1/jobs/{job_id}/stop"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let stopped = body_json(response).await;
    assert_eq!(stopped["status"], "CANCELED");
}

#[tokio::test]
async fn metadata_update_before_running_does_not_queue_a_broadcast_push() {
    let (app, state) = test_app();
    let created = app.clone().oneshot(create_job_request(None)).await.unwrap();
    let job = body_json(created).await;
    let job_id = job["job_id"].as_str().unwrap().to_string();
    assert_eq!(job["status"], "PENDING");

    let response = app
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri(format!("/v1/jobs/{job_id}/metadata"))
                .header("content-type", "application/json")
                .body(Body::from(json!({"title": "new title"}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let updated = body_json(response).await;
    // The local record still reflects the edit immediately.
    assert_eq!(updated["stream_metadata"]["title"], "new title");
    // But §4.5 only propagates to the platform once the job is
    // STARTING/RUNNING — a PENDING job has nothing queued.
    assert_eq!(state.metadata.pending_job_count(), 0);
}

#[tokio::test]
async fn title_and_description_derive_from_stream_context_when_not_given() {
    let (app, _state) = test_app();
    let body = json!({
        "requestedBy": "operator",
        "inlineConfig": {"resolution": "1080p"},
        "streamContext": {"team1": "Canada", "team2": "Scotland", "sheet": "3"},
    });
    let request = Request::builder()
        .method("POST")
        .uri("/v1/jobs")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let job = body_json(response).await;
    assert_eq!(job["stream_metadata"]["title"], "Canada vs Scotland");
    assert_eq!(job["stream_metadata"]["description"], "Sheet 3");
}

#[tokio::test]
async fn status_endpoint_omits_non_public_jobs() {
    let (app, _state) = test_app();
    // A freshly created job sits at PENDING, which is publicly active.
    let created = app.clone().oneshot(create_job_request(None)).await.unwrap();
    assert_eq!(created.status(), StatusCode::CREATED);

    let response = app
        .oneshot(Request::builder().uri("/status").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let entries = body_json(response).await;
    assert!(entries.as_array().unwrap().len() >= 1);
}
