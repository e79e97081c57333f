//! HTTP surface of the daemon: health and metrics.

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;

use gantry_metrics::{MetricsRegistry, render_prometheus};

/// Build the daemon router: `/healthz` and `/metrics`.
pub fn build_router(metrics: Arc<MetricsRegistry>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_handler))
        .with_state(metrics)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn metrics_handler(State(metrics): State<Arc<MetricsRegistry>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        render_prometheus(&metrics),
    )
}
