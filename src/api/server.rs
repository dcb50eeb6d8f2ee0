//! API server assembly: shared state, router construction, CORS/tracing
//! middleware, and graceful shutdown — following the teacher's `ApiServer`
//! shape almost verbatim, with the service set replaced.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::Request;
use axum::Router;
use parking_lot::RwLock;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::Span;

use crate::api::routes;
use crate::broadcast::{BroadcastClient, StreamPrivacy};
use crate::config::Config;
use crate::jobs::SharedJobStore;
use crate::logging::LoggingConfig;
use crate::metadata::MetadataDebouncer;
use crate::monitor::{BurstIntervalLimiter, SlidingWindowLimiter};
use crate::registry::{AgentDispatcher, SharedAgentRegistry};
use crate::scheduler::Scheduler;
use crate::{Error, Result};

/// Operator-tunable broadcast defaults exposed under `/v1/config/*` (§6);
/// not part of `Config` because these change at runtime, not at startup.
pub struct RuntimeConfig {
    pub stream_privacy: RwLock<StreamPrivacy>,
    pub alternate_colors: AtomicBool,
}

impl RuntimeConfig {
    pub fn new(default_privacy: StreamPrivacy, default_alternate_colors: bool) -> Self {
        Self {
            stream_privacy: RwLock::new(default_privacy),
            alternate_colors: AtomicBool::new(default_alternate_colors),
        }
    }

    pub fn stream_privacy(&self) -> StreamPrivacy {
        *self.stream_privacy.read()
    }

    pub fn set_stream_privacy(&self, privacy: StreamPrivacy) {
        *self.stream_privacy.write() = privacy;
    }

    pub fn alternate_colors(&self) -> bool {
        self.alternate_colors.load(Ordering::Relaxed)
    }

    pub fn set_alternate_colors(&self, value: bool) {
        self.alternate_colors.store(value, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub enable_cors: bool,
}

impl ApiServerConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            bind_address: config.bind_address.clone(),
            port: config.port,
            enable_cors: true,
        }
    }
}

/// Shared application state, cloned cheaply (everything inside is an `Arc`)
/// into every handler.
#[derive(Clone)]
pub struct AppState {
    pub start_time: Instant,
    pub config: Arc<Config>,
    pub registry: SharedAgentRegistry,
    pub jobs: SharedJobStore,
    pub dispatcher: AgentDispatcher,
    pub broadcast: Arc<dyn BroadcastClient>,
    pub broadcast_rate_limiter: Arc<SlidingWindowLimiter>,
    pub job_rate_limiter: Arc<BurstIntervalLimiter>,
    pub metadata: MetadataDebouncer,
    pub logging_config: Arc<LoggingConfig>,
    pub runtime_config: Arc<RuntimeConfig>,
    pub scheduler: Arc<Scheduler>,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        registry: SharedAgentRegistry,
        jobs: SharedJobStore,
        broadcast: Arc<dyn BroadcastClient>,
        logging_config: Arc<LoggingConfig>,
    ) -> Self {
        let broadcast_rate_limiter = Arc::new(SlidingWindowLimiter::new(
            Duration::from_millis(config.broadcast_rate_limit_window_ms),
            config.broadcast_rate_limit_max,
        ));
        let job_rate_limiter = Arc::new(BurstIntervalLimiter::new(
            config.job_rate_limit_burst,
            Duration::from_millis(config.job_rate_limit_interval_ms),
        ));
        let metadata = MetadataDebouncer::new(broadcast.clone(), config.metadata_debounce_ms);
        let dispatcher = AgentDispatcher::new(registry.clone());
        let runtime_config = Arc::new(RuntimeConfig::new(config.default_stream_privacy, false));
        let scheduler = Arc::new(Scheduler::new(
            jobs.clone(),
            registry.clone(),
            dispatcher.clone(),
            config.scheduler_interval_ms,
            config.assign_ack_ttl_ms,
        ));

        Self {
            start_time: Instant::now(),
            config,
            registry,
            jobs,
            dispatcher,
            broadcast,
            broadcast_rate_limiter,
            job_rate_limiter,
            metadata,
            logging_config,
            runtime_config,
            scheduler,
        }
    }
}

/// Owns the listener lifecycle; everything else lives in `AppState`.
pub struct ApiServer {
    config: ApiServerConfig,
    state: AppState,
    cancel_token: CancellationToken,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig, state: AppState) -> Self {
        Self {
            config,
            state,
            cancel_token: CancellationToken::new(),
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    fn build_router(&self) -> Router {
        let mut router = routes::create_router(self.state.clone());

        if self.config.enable_cors {
            let cors = CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any);
            router = router.layer(cors);
        }

        router = router.layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &Request| {
                    if req.uri().path() == "/healthz" {
                        Span::none()
                    } else {
                        use tower_http::trace::MakeSpan;
                        let mut make_span =
                            tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO);
                        make_span.make_span(req)
                    }
                })
                .on_response(
                    |res: &axum::http::Response<_>, latency: Duration, span: &Span| {
                        if span.is_disabled() {
                            return;
                        }
                        use tower_http::trace::OnResponse;
                        tower_http::trace::DefaultOnResponse::new()
                            .level(tracing::Level::INFO)
                            .on_response(res, latency, span);
                    },
                )
                .on_failure(
                    |class: tower_http::classify::ServerErrorsFailureClass,
                     latency: Duration,
                     span: &Span| {
                        if span.is_disabled() {
                            return;
                        }
                        use tower_http::trace::OnFailure;
                        tower_http::trace::DefaultOnFailure::new()
                            .level(tracing::Level::ERROR)
                            .on_failure(class, latency, span);
                    },
                ),
        );
        router
    }

    pub async fn run(&self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.bind_address, self.config.port)
            .parse()
            .map_err(|e| Error::config(format!("invalid bind address: {e}")))?;

        let router = self.build_router();
        let listener = TcpListener::bind(addr).await?;

        tracing::info!(%addr, "api server listening");

        let cancel_token = self.cancel_token.clone();
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            cancel_token.cancelled().await;
            tracing::info!("api server shutting down");
        })
        .await?;

        Ok(())
    }

    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }
}
