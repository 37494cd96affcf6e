//! Prometheus metrics endpoint handler.
//!
//! Unauthenticated so Prometheus can scrape it. Labels are bounded: no room
//! ids, user ids or task ids appear in any metric.

use axum::{extract::State, response::IntoResponse};
use metrics_exporter_prometheus::PrometheusHandle;

/// Handler for GET /metrics
///
/// ```text
/// # TYPE rtc_http_requests_total counter
/// rtc_http_requests_total{method="POST",endpoint="/api/v1/rooms/{room_id}/join",status_code="200"} 42
/// ```
#[tracing::instrument(skip_all, name = "rtc.metrics.scrape")]
pub async fn metrics_handler(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    handle.render()
}
