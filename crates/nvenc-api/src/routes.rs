//! API routes.

use std::num::NonZeroU32;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::limit::RequestBodyLimitLayer;

use crate::handlers::{download, get_job, health, process, upload, upload_file};
use crate::metrics::metrics_middleware;
use crate::middleware::{
    cors_layer, hide_internal_errors, rate_limit_middleware, request_id, request_logging,
    security_headers, RateLimiterCache,
};
use crate::state::AppState;

/// Create the API router.
pub fn create_router(state: AppState, metrics_handle: Option<PrometheusHandle>) -> Router {
    let mut job_routes = Router::new()
        .route("/upload", post(upload))
        .route("/upload_file", post(upload_file))
        .route("/process", post(process))
        .route("/download/:job_id/:filename", get(download))
        .route("/jobs/:job_id", get(get_job));

    // RATE_LIMIT_RPS=0 turns limiting off
    if let Some(rps) = NonZeroU32::new(state.config.rate_limit_rps) {
        let rate_limiter = Arc::new(RateLimiterCache::new(rps));
        job_routes = job_routes.layer(middleware::from_fn_with_state(
            rate_limiter,
            rate_limit_middleware,
        ));
    }

    let health_routes = Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health));

    // Metrics endpoint (if enabled)
    let metrics_routes = if let Some(handle) = metrics_handle {
        Router::new().route("/metrics", get(move || async move { handle.render() }))
    } else {
        Router::new()
    };

    let mut router = Router::new()
        .merge(job_routes)
        .merge(health_routes)
        .merge(metrics_routes);
    if state.config.is_production() {
        router = router.layer(middleware::from_fn(hide_internal_errors));
    }

    router
        // uploads are streamed to disk, so the only cap is the configured one
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(state.config.max_body_size))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(security_headers))
        .layer(middleware::from_fn(request_id))
        .layer(middleware::from_fn(request_logging))
        .layer(cors_layer(&state.config.cors_origins))
        .with_state(state)
}
