//! Provider webhook receiver.
//!
//! - `POST /api/v1/webhooks/rtc`
//!
//! Any JSON body is audited before it is interpreted, so the ledger keeps
//! a record of deliveries that were later rejected.

use crate::errors::RtcError;
use crate::routes::AppState;
use crate::services::WebhookOutcome;
use axum::body::Bytes;
use axum::extract::State;
use axum::Json;
use serde_json::Value;
use std::sync::Arc;
use tracing::instrument;

/// Handler for POST /api/v1/webhooks/rtc
///
/// # Response
///
/// - 200 OK: `{"outcome": "applied", "taskId": ...}`, `{"outcome": "ignored"}`
///   or `{"outcome": "audited"}`
/// - 400 Bad Request: not JSON, not an envelope, or a malformed payload
/// - 404 Not Found: no task with the event's `TaskId`
#[instrument(skip_all, name = "rtc.webhooks.receive")]
pub async fn receive_webhook(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<WebhookOutcome>, RtcError> {
    let raw: Value = serde_json::from_slice(&body).map_err(|e| {
        tracing::debug!(target: "rtc.handlers.webhooks", error = %e, "Webhook body is not JSON");
        RtcError::InvalidArgument("Webhook body is not JSON".to_string())
    })?;

    let outcome = state.webhooks.dispatch(raw).await?;
    Ok(Json(outcome))
}
