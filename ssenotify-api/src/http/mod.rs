// Module: http
// HTTP surface: fire and stream endpoints plus health and metrics

pub mod error;
pub mod health;
pub mod metrics;
pub mod notifications;

use axum::{
    http::{header, HeaderValue, Method},
    Router,
};
use ssenotify_core::config::CorsConfig;
use ssenotify_hub::SessionHub;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::observability::metrics_layer;
use crate::payload::PayloadSource;

pub use error::{AppError, AppResult};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub hub: SessionHub,
    pub payload_source: Arc<dyn PayloadSource>,
    /// Interval for SSE keep-alive comments; `None` disables them
    pub keep_alive: Option<Duration>,
}

impl AppState {
    pub fn new(hub: SessionHub, payload_source: impl PayloadSource) -> Self {
        Self {
            hub,
            payload_source: Arc::new(payload_source),
            keep_alive: Some(Duration::from_secs(15)),
        }
    }

    #[must_use]
    pub fn with_keep_alive(mut self, keep_alive: Option<Duration>) -> Self {
        self.keep_alive = keep_alive;
        self
    }
}

/// Create the HTTP router with all routes
pub fn create_router(state: AppState, cors: &CorsConfig) -> Router {
    Router::new()
        .merge(health::create_health_router())
        .merge(metrics::create_metrics_router())
        .merge(notifications::create_notification_router())
        .layer(axum::middleware::from_fn(metrics_layer))
        .layer(cors_layer(cors))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Build the CORS layer. An empty origin list allows any origin.
fn cors_layer(cors: &CorsConfig) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([
            header::ACCEPT,
            header::CACHE_CONTROL,
            header::CONTENT_TYPE,
            header::CONTENT_LENGTH,
            header::ORIGIN,
            header::HeaderName::from_static("last-event-id"),
        ]);

    if cors.allow_origins.is_empty() {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = cors
        .allow_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(origin = %origin, error = %e, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    layer
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(cors.allow_credentials)
}
