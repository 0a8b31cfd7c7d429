//! Prometheus scrape endpoint

use axum::{extract::State, http::header, response::IntoResponse, routing::get, Router};

use crate::http::{AppResult, AppState};
use crate::observability::metrics::{gather_metrics, record_hub_snapshot};

pub fn create_metrics_router() -> Router<AppState> {
    Router::new().route("/metrics", get(metrics_handler))
}

/// GET /metrics - Prometheus text exposition
pub async fn metrics_handler(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    record_hub_snapshot(&state.hub.metrics());
    let body = gather_metrics()?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    ))
}
