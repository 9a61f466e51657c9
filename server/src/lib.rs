pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod validation;
pub mod ws;

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method},
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_governor::{governor::GovernorConfigBuilder, key_extractor::GlobalKeyExtractor, GovernorLayer};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};
use tts_core::{InferenceBackend, TtsEngine};

use crate::config::ServerConfig;
use crate::metrics::AppMetrics;

pub struct AppState<B: InferenceBackend> {
    pub engine: Arc<TtsEngine<B>>,
    pub metrics: Arc<AppMetrics>,
    pub config: Arc<ServerConfig>,
    /// Voice used when a request names none.
    pub default_voice: Arc<str>,
    pub started: Instant,
}

impl<B: InferenceBackend> Clone for AppState<B> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            metrics: Arc::clone(&self.metrics),
            config: Arc::clone(&self.config),
            default_voice: Arc::clone(&self.default_voice),
            started: self.started,
        }
    }
}

impl<B: InferenceBackend> AppState<B> {
    pub fn new(engine: Arc<TtsEngine<B>>, config: ServerConfig) -> Self {
        let default_voice = config.fallback_voice(engine.resolver().catalog());
        Self {
            engine,
            metrics: Arc::new(AppMetrics::new()),
            config: Arc::new(config),
            default_voice: default_voice.into(),
            started: Instant::now(),
        }
    }

    pub fn voice_or_default(&self, voice: Option<&str>) -> String {
        voice
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(&*self.default_voice)
            .to_string()
    }
}

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let methods = [Method::GET, Method::POST, Method::OPTIONS];
    let origins: Vec<HeaderValue> = config
        .cors_allowed_origins
        .iter()
        .flatten()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    let layer = CorsLayer::new()
        .allow_methods(methods)
        .allow_headers(Any)
        .allow_credentials(false);
    if origins.is_empty() {
        warn!("CORS_ALLOWED_ORIGINS not set, allowing all origins");
        layer.allow_origin(Any)
    } else {
        info!("CORS configured for {} origin(s)", origins.len());
        layer.allow_origin(AllowOrigin::list(origins))
    }
}

/// Assemble the HTTP surface with its middleware stack.
pub fn build_router<B: InferenceBackend>(state: AppState<B>) -> anyhow::Result<Router> {
    let config = Arc::clone(&state.config);

    // One token every 60_000 / limit ms, bursting up to the per-minute limit.
    let per_minute = config.rate_limit_per_minute.max(1);
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_millisecond((60_000 / u64::from(per_minute)).max(1))
            .burst_size(per_minute)
            .key_extractor(GlobalKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("invalid rate limit configuration"))?,
    );
    info!("Rate limiting: {} requests per minute", per_minute);

    let middleware_stack = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(GovernorLayer::new(governor_conf))
        .layer(TimeoutLayer::new(config.request_timeout()))
        .layer(cors_layer(&config))
        .into_inner();

    let upload = post(handlers::upload_voice::<B>)
        .layer::<_, Infallible>(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(config.max_upload_bytes));

    let api = Router::new()
        .route("/health", get(handlers::health::<B>))
        .route("/voices", get(handlers::list_voices::<B>))
        .route("/generate", post(handlers::generate::<B>))
        .route("/upload-voice", upload)
        .route("/cache/clear", post(handlers::clear_cache::<B>));

    let openai = Router::new()
        .route("/v1/audio/speech", post(handlers::speech::<B>))
        .route("/v1/audio/batch", post(handlers::batch::<B>));

    let api_key: Option<Arc<str>> = config.api_key.as_deref().map(Arc::from);
    if api_key.is_none() {
        warn!("TTS_API_KEY not set, API key authentication disabled");
    }

    let app = Router::new()
        .route("/", get(handlers::root))
        .merge(api.clone())
        .nest("/api", api)
        .merge(openai)
        .route("/ws/stream", get(ws::stream_ws::<B>))
        .route("/metrics", get(handlers::metrics::<B>))
        .layer(axum::middleware::from_fn_with_state(api_key, middleware::require_api_key))
        .layer(axum::middleware::from_fn(middleware::add_request_id))
        .layer(middleware_stack)
        .with_state(state);

    Ok(app)
}
