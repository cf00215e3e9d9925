//! Prometheus metrics for the API server.

use std::sync::OnceLock;
use std::time::Instant;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use regex_lite::Regex;

/// Install the Prometheus recorder.
/// Returns a handle that can be used to render metrics.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Metric names as constants for consistency.
pub mod names {
    pub const HTTP_REQUESTS_TOTAL: &str = "nvenc_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "nvenc_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "nvenc_http_requests_in_flight";
    pub const UPLOAD_BYTES_TOTAL: &str = "nvenc_upload_bytes_total";
    pub const RATE_LIMIT_HITS_TOTAL: &str = "nvenc_rate_limit_hits_total";
}

/// Record an HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", sanitize_path(path).to_string()),
        ("status", status.to_string()),
    ];

    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record the size of a spooled upload.
pub fn record_upload_bytes(bytes: u64) {
    counter!(names::UPLOAD_BYTES_TOTAL).increment(bytes);
}

/// Record rate limit hit.
pub fn record_rate_limit_hit(endpoint: &str) {
    let labels = [("endpoint", sanitize_path(endpoint).to_string())];
    counter!(names::RATE_LIMIT_HITS_TOTAL, &labels).increment(1);
}

/// Routes without path parameters, reported as-is.
const STATIC_ROUTES: &[&str] = &[
    "/upload",
    "/upload_file",
    "/process",
    "/health",
    "/healthz",
    "/metrics",
];

/// Label for every path outside the route table.
const UNMATCHED: &str = "/:unmatched";

fn job_path_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^/(download|jobs)/[A-Za-z0-9_-]+(/[^/]+)?$").expect("valid pattern")
    })
}

/// Map a request path onto the route table so label values stay bounded.
fn sanitize_path(path: &str) -> &'static str {
    if let Some(route) = STATIC_ROUTES.iter().copied().find(|route| *route == path) {
        return route;
    }
    match job_path_pattern().captures(path) {
        Some(caps) => match (&caps[1], caps.get(2)) {
            ("download", Some(_)) => "/download/:job_id/:filename",
            ("jobs", None) => "/jobs/:job_id",
            _ => UNMATCHED,
        },
        None => UNMATCHED,
    }
}

/// Metrics middleware for HTTP requests.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);
    let response = next.run(request).await;
    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);

    let status = response.status().as_u16();
    let duration = start.elapsed().as_secs_f64();

    record_http_request(&method, &path, status, duration);

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_sanitize_path() {
        assert_eq!(
            sanitize_path("/download/0123456789abcdef0123456789abcdef/output.mp4"),
            "/download/:job_id/:filename"
        );
        assert_eq!(
            sanitize_path("/jobs/0123456789abcdef0123456789abcdef"),
            "/jobs/:job_id"
        );
        assert_eq!(sanitize_path("/process"), "/process");
        assert_eq!(sanitize_path("/jobs/abc/extra"), "/:unmatched");
        assert_eq!(sanitize_path("/healthz"), "/healthz");
    }

    #[test]
    fn test_unknown_paths_share_one_label() {
        let labels: HashSet<&str> = (0..1000)
            .map(|i| format!("/scan-{i}"))
            .chain(["/".to_string(), "/wp-login.php".to_string(), "/download/a b/c".to_string()])
            .chain((0..100).map(|i| format!("/upload/{i}")))
            .map(|path| sanitize_path(&path))
            .collect();
        assert_eq!(labels, HashSet::from([UNMATCHED]));
    }
}
