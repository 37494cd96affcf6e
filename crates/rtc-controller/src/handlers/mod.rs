//! HTTP request handlers for the RTC Controller.

pub mod health;
pub mod metrics;
pub mod rooms;
pub mod sessions;
pub mod tasks;
pub mod webhooks;

pub use health::{health_check, readiness_check};
pub use metrics::metrics_handler;
pub use rooms::{dismiss_room, exit_room, join_room, remove_participant};
pub use sessions::get_session;
pub use tasks::{
    check_recording, get_task, start_recording, start_transcription, stop_recording,
    stop_transcription,
};
pub use webhooks::receive_webhook;

use crate::errors::RtcError;
use axum::body::Bytes;
use common::types::TaskId;
use serde::de::DeserializeOwned;

/// Deserialize a JSON body by hand so malformed input is a 400, not axum's 422.
///
/// An empty body reads as `{}`.
pub(crate) fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, RtcError> {
    let bytes: &[u8] = if body.is_empty() { b"{}" } else { body };
    serde_json::from_slice(bytes).map_err(|e| {
        tracing::debug!(target: "rtc.handlers", error = %e, "Invalid request body");
        RtcError::InvalidArgument(format!("Invalid request body: {e}"))
    })
}

pub(crate) fn parse_task_id(raw: &str) -> Result<TaskId, RtcError> {
    Ok(raw.parse::<TaskId>()?)
}
