// Agentmesh Registry Library
// Decision: Shared library for the registry binary and integration tests

// API routes and types (shared for OpenAPI generation)
pub mod api;

// Environment configuration
pub mod config;

// Background health monitor
pub mod monitor;

// OpenAPI document generation
pub mod openapi;

// Services layer
pub mod services;
pub use services::RegistryService;

// Storage layer
pub mod storage;

#[cfg(test)]
pub(crate) mod test_support;

use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, HeaderValue, Method};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::openapi::ApiDoc;

/// HTTP layer settings
#[derive(Debug, Clone, Default)]
pub struct RouterOptions {
    /// Per-request timeout; `None` disables it
    pub request_timeout: Option<Duration>,
    /// Allowed CORS origins; empty means no CORS layer
    pub cors_allowed_origins: Vec<String>,
}

/// Build the full registry router over one service instance.
pub fn build_router(service: Arc<RegistryService>, options: &RouterOptions) -> Router {
    let app = Router::new()
        .merge(api::heartbeat::routes(api::heartbeat::AppState::new(service.clone())))
        .merge(api::agents::routes(api::agents::AppState::new(service.clone())))
        .merge(api::capabilities::routes(api::capabilities::AppState::new(service)))
        .merge(api::health::routes(api::health::HealthState::new()))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()));

    let cors_origins: Vec<HeaderValue> = options
        .cors_allowed_origins
        .iter()
        .filter_map(|s| s.parse().ok())
        .collect();

    let app = if cors_origins.is_empty() {
        tracing::info!("CORS not configured (same-origin requests only)");
        app
    } else {
        tracing::info!(origins = ?cors_origins, "CORS origins configured");
        app.layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(cors_origins))
                .allow_methods([
                    Method::GET,
                    Method::HEAD,
                    Method::POST,
                    Method::DELETE,
                    Method::OPTIONS,
                ])
                .allow_headers([header::CONTENT_TYPE, header::ACCEPT, header::ORIGIN]),
        )
    };

    let app = match options.request_timeout {
        Some(timeout) => app.layer(TimeoutLayer::new(timeout)),
        None => app,
    };

    app.layer(TraceLayer::new_for_http())
}
