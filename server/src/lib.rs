pub mod api;
pub mod config;
pub mod error;
pub mod media;
pub mod metrics;
pub mod notify;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod speech;
pub mod validation;

use std::sync::Arc;

use axum::{
    extract::Request,
    http::{HeaderValue, Method},
    middleware::Next,
    response::Response,
    routing::{get, post},
    Router,
};
use engine_core::SpeechEngine;
use tower::ServiceBuilder;
use tower_governor::{governor::GovernorConfigBuilder, key_extractor::GlobalKeyExtractor, GovernorLayer};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::metrics::AppMetrics;
use crate::notify::CallNotifier;
use crate::registry::SessionRegistry;

#[derive(Clone)]
pub struct AppState {
    pub registry: SessionRegistry,
    pub engine: Arc<dyn SpeechEngine>,
    pub notifier: CallNotifier,
    pub metrics: AppMetrics,
    pub config: ServerConfig,
}

impl AppState {
    pub fn new(config: ServerConfig, engine: Arc<dyn SpeechEngine>) -> Self {
        let notifier = CallNotifier::new(config.call_logic_url.clone(), config.notify_timeout());
        Self {
            registry: SessionRegistry::new(),
            engine,
            notifier,
            metrics: AppMetrics::new(),
            config,
        }
    }
}

const REQUEST_ID_HEADER: &str = "x-request-id";

async fn add_request_id(mut request: Request, next: Next) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    // A hyphenated UUID is always a valid header value.
    let header = HeaderValue::from_str(&request_id).ok();
    if let Some(value) = &header {
        request.headers_mut().insert(REQUEST_ID_HEADER, value.clone());
    }
    let mut response = next.run(request).await;
    if let Some(value) = header {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
        .allow_credentials(false);

    let Some(allowed_origins) = &config.cors_allowed_origins else {
        warn!("CORS_ALLOWED_ORIGINS not set, allowing all origins (development mode)");
        return base.allow_origin(Any);
    };

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect();
    if origins.is_empty() {
        warn!("CORS_ALLOWED_ORIGINS is empty, falling back to permissive CORS");
        base.allow_origin(Any)
    } else {
        info!("CORS configured for {} origin(s)", origins.len());
        base.allow_origin(AllowOrigin::list(origins))
    }
}

/// Build the HTTP and media-stream router.
pub fn app(state: AppState) -> anyhow::Result<Router> {
    let config = &state.config;

    // Global limit: replenish one request every 60s / rate, burst of a full minute.
    let rate = config.rate_limit_per_minute.max(1);
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_millisecond((60_000 / u64::from(rate)).max(1))
            .burst_size(rate)
            .key_extractor(GlobalKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("invalid rate limit configuration: {rate}/min"))?,
    );
    info!("Rate limiting: {} requests per minute", rate);

    let middleware_stack = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(GovernorLayer::new(governor_conf))
        .layer(cors_layer(config))
        .into_inner();

    let public_api = Router::new()
        .route("/health", get(api::health_check))
        .route("/healthz", get(api::health_check))
        .route("/media", get(media::media_ws))
        .route("/", get(media::media_ws));

    // Metrics endpoint - consider adding authentication in production
    let metrics_api = Router::new().route("/metrics", get(api::metrics_endpoint));

    // A waiting speak lasts as long as the utterance, so it is not timed out.
    let api = Router::new()
        .merge(public_api)
        .merge(metrics_api)
        .layer(TimeoutLayer::new(config.request_timeout()))
        .route("/speak", post(api::speak_endpoint));

    Ok(Router::new()
        .merge(api.clone())
        .nest("/api", api)
        .layer(axum::middleware::from_fn(add_request_id))
        .layer(middleware_stack)
        .with_state(state))
}

#[cfg(test)]
impl AppState {
    /// State with an engine that never produces audio.
    pub(crate) fn for_tests() -> Self {
        struct SilentEngine;

        #[async_trait::async_trait]
        impl SpeechEngine for SilentEngine {
            async fn open(
                &self,
                _request: &engine_core::SynthesisRequest,
            ) -> Result<Box<dyn engine_core::EngineConnection>, engine_core::EngineError> {
                Err(engine_core::EngineError::Connect("silent engine".into()))
            }

            fn sample_rate(&self) -> u32 {
                audio_core::DEFAULT_ENGINE_SAMPLE_RATE
            }
        }

        let config = ServerConfig::default();
        Self {
            registry: SessionRegistry::new(),
            engine: Arc::new(SilentEngine),
            notifier: CallNotifier::disabled(),
            metrics: AppMetrics::new(),
            config,
        }
    }
}
