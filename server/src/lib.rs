//! HTTP front end for the speech pipeline.
//!
//! `/speak` and `/chat` are the producers; every other route is read-only.

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod state;
pub mod validation;

use std::sync::Arc;

use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue, Method},
    middleware::Next,
    response::Response,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::GlobalKeyExtractor, GovernorLayer,
};
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::handlers::{
    chat_endpoint, health_check, list_voices, metrics_endpoint, speak_endpoint, status,
};
pub use crate::state::AppState;

const REQUEST_ID_HEADER: &str = "x-request-id";
const MAX_BODY_BYTES: usize = 64 * 1024;

/// CORS from `CORS_ALLOWED_ORIGINS`; permissive when unset or unusable.
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
        return base.allow_origin(Any);
    }

    info!("CORS configured for {} origin(s)", origins.len());
    base.allow_origin(AllowOrigin::list(origins))
}

/// Tag request and response with an id, keeping one the caller sent.
async fn add_request_id(mut request: Request, next: Next) -> Response {
    let header = HeaderName::from_static(REQUEST_ID_HEADER);
    let request_id = match request.headers().get(&header) {
        Some(value) => value.clone(),
        None => {
            let generated = HeaderValue::from_str(&uuid::Uuid::new_v4().to_string());
            match generated {
                Ok(value) => {
                    request.headers_mut().insert(header.clone(), value.clone());
                    value
                }
                Err(_) => return next.run(request).await,
            }
        }
    };

    let mut response = next.run(request).await;
    response.headers_mut().insert(header, request_id);
    response
}

/// Milliseconds per replenished request; never zero.
fn replenish_period_ms(per_minute: u32) -> u64 {
    (60_000 / u64::from(per_minute.max(1))).max(1)
}

pub fn build_router(state: AppState) -> anyhow::Result<Router> {
    // One global bucket: every request shares the limit
    let per_minute = state.config.rate_limit_per_minute.max(1);
    let governor_conf = GovernorConfigBuilder::default()
        .per_millisecond(replenish_period_ms(per_minute))
        .burst_size(per_minute)
        .key_extractor(GlobalKeyExtractor)
        .finish()
        .ok_or_else(|| anyhow::anyhow!("invalid rate limit: {per_minute}/min"))?;
    info!("Rate limiting: {} requests per minute", per_minute);

    let middleware_stack = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(GovernorLayer::new(Arc::new(governor_conf)))
        .layer(TimeoutLayer::new(state.config.request_timeout()))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(cors_layer(&state.config))
        .into_inner();

    let api = Router::new()
        .route("/health", get(health_check))
        .route("/healthz", get(health_check))
        .route("/voices", get(list_voices))
        .route("/status", get(status))
        .route("/metrics", get(metrics_endpoint))
        .route("/speak", post(speak_endpoint))
        .route("/chat", post(chat_endpoint));

    Ok(Router::new()
        .merge(api.clone()) // root paths
        .nest("/api", api) // /api prefix
        .layer(axum::middleware::from_fn(add_request_id))
        .layer(middleware_stack)
        .with_state(state))
}
