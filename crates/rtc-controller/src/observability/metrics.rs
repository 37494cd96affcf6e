//! Metrics definitions for the RTC Controller.
//!
//! All metrics follow Prometheus naming conventions:
//! - `rtc_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `method`: HTTP methods
//! - `endpoint`: parameterized route templates, unknown paths become `/other`
//! - `status`: success, error, timeout
//! - `operation`: gateway/resolver/ledger operation names fixed in code
//! - `kind`: `record`, `ai_transcription`
//! - `event_type`: known provider codes, everything else `other`
//!
//! Room ids, user ids and task ids are never used as labels.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize Prometheus metrics recorder and return the handle
/// for serving metrics via HTTP.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if Prometheus recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("rtc_http_request".to_string()),
            &[
                0.005, 0.010, 0.025, 0.050, 0.100, 0.200, 0.500, 1.000, 2.000, 5.000,
            ],
        )
        .map_err(|e| format!("Failed to set HTTP request buckets: {e}"))?
        // Provider round-trips are cross-region HTTPS calls
        .set_buckets_for_metric(
            Matcher::Prefix("rtc_remote_call".to_string()),
            &[
                0.025, 0.050, 0.100, 0.200, 0.500, 1.000, 2.000, 5.000, 10.000,
            ],
        )
        .map_err(|e| format!("Failed to set remote call buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("rtc_db_query".to_string()),
            &[
                0.001, 0.002, 0.005, 0.010, 0.020, 0.050, 0.100, 0.250, 0.500, 1.000,
            ],
        )
        .map_err(|e| format!("Failed to set DB query buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// HTTP Request Metrics
// ============================================================================

/// Record HTTP request completion
///
/// Metric: `rtc_http_requests_total`, `rtc_http_request_duration_seconds`
/// Labels: `method`, `endpoint`, `status`
///
/// Captures framework-level rejections (400 on bad JSON, 404, 405, 415) too,
/// since the middleware recording it is the outermost layer.
pub fn record_http_request(method: &str, endpoint: &str, status_code: u16, duration: Duration) {
    let normalized_endpoint = normalize_endpoint(endpoint);
    let status = categorize_status_code(status_code);

    histogram!("rtc_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint.clone(),
        "status" => status.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("rtc_http_requests_total",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint,
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

/// Categorize HTTP status code into success/error/timeout
fn categorize_status_code(status_code: u16) -> &'static str {
    match status_code {
        200..=299 => "success",
        408 | 504 => "timeout",
        _ => "error",
    }
}

/// Normalize endpoint path to a route template.
fn normalize_endpoint(path: &str) -> String {
    match path {
        "/health" | "/ready" | "/metrics" | "/api/v1/sessions" | "/api/v1/webhooks/rtc" => {
            path.to_string()
        }
        _ => normalize_room_endpoint(path).unwrap_or_else(|| "/other".to_string()),
    }
}

/// Paths under `/api/v1/rooms/{room_id}/...`.
fn normalize_room_endpoint(path: &str) -> Option<String> {
    let rest = path.strip_prefix("/api/v1/rooms/")?;
    let parts: Vec<&str> = rest.split('/').collect();

    let template = match parts.as_slice() {
        [room, action] if !room.is_empty() => match *action {
            "join" | "exit" | "dismiss" | "remove-participant" | "recordings"
            | "transcriptions" => format!("/api/v1/rooms/{{room_id}}/{action}"),
            _ => return None,
        },
        [room, "tasks", id] if !room.is_empty() && !id.is_empty() => {
            "/api/v1/rooms/{room_id}/tasks/{id}".to_string()
        }
        [room, collection, id, action] if !room.is_empty() && !id.is_empty() => {
            match (*collection, *action) {
                ("recordings", "stop" | "check") | ("transcriptions", "stop") => {
                    format!("/api/v1/rooms/{{room_id}}/{collection}/{{id}}/{action}")
                }
                _ => return None,
            }
        }
        _ => return None,
    };

    Some(template)
}

// ============================================================================
// Remote Call Metrics
// ============================================================================

/// Record a provider control-plane or storage round-trip
///
/// Metric: `rtc_remote_calls_total`, `rtc_remote_call_duration_seconds`
/// Labels: `operation`, `status`
///
/// Operations: start_recording, stop_recording, start_transcription,
/// stop_transcription, probe_transcription, dismiss_room, remove_participant,
/// list_objects, rehost_object, delete_object.
pub fn record_remote_call(operation: &str, status: &str, duration: Duration) {
    histogram!("rtc_remote_call_duration_seconds",
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("rtc_remote_calls_total",
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

// ============================================================================
// Task Lifecycle Metrics
// ============================================================================

/// Record a task state transition
///
/// Metric: `rtc_task_transitions_total`
/// Labels: `kind`, `transition`
///
/// Transitions: started, resumed, stopped, stop_noop, completed.
pub fn record_task_transition(kind: &str, transition: &str) {
    counter!("rtc_task_transitions_total",
        "kind" => kind.to_string(),
        "transition" => transition.to_string()
    )
    .increment(1);
}

/// Record a per-task stop failure swallowed during dismiss
///
/// Metric: `rtc_dismiss_stop_failures_total`
/// Labels: `kind`
pub fn record_dismiss_stop_failure(kind: &str) {
    counter!("rtc_dismiss_stop_failures_total",
        "kind" => kind.to_string()
    )
    .increment(1);
}

// ============================================================================
// Webhook Metrics
// ============================================================================

/// Record an ingested provider webhook
///
/// Metric: `rtc_webhook_events_total`
/// Labels: `event_type`, `outcome`
///
/// Outcomes: applied, ignored, audited, error.
pub fn record_webhook_event(event_type: i64, outcome: &str) {
    counter!("rtc_webhook_events_total",
        "event_type" => event_type_label(event_type),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

fn event_type_label(event_type: i64) -> &'static str {
    match event_type {
        903 => "903",
        310 => "310",
        _ => "other",
    }
}

// ============================================================================
// Database Metrics
// ============================================================================

/// Record ledger query execution
///
/// Metric: `rtc_db_query_duration_seconds`, `rtc_db_queries_total`
/// Labels: `operation`, `status`
pub fn record_db_query(operation: &str, status: &str, duration: Duration) {
    histogram!("rtc_db_query_duration_seconds",
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("rtc_db_queries_total",
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

// ============================================================================
// Tests
// ============================================================================
