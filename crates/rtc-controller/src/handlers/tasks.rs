//! Recording and transcription task handlers.
//!
//! - `POST /api/v1/rooms/{room_id}/recordings` - Start a cloud recording
//! - `POST /api/v1/rooms/{room_id}/recordings/{task_id}/stop` - Stop it
//! - `POST /api/v1/rooms/{room_id}/recordings/{task_id}/check` - Collect uploaded files
//! - `POST /api/v1/rooms/{room_id}/transcriptions` - Start or resume a transcription
//! - `POST /api/v1/rooms/{room_id}/transcriptions/{task_id}/stop` - Stop it
//! - `GET /api/v1/rooms/{room_id}/tasks/{task_id}` - Inspect any task
//!
//! Task ids in paths are the controller's ledger ids, not provider task ids.
//! A task that exists but belongs to another room is a 409 `MISMATCH`.

use super::{parse_body, parse_task_id};
use crate::errors::RtcError;
use crate::models::{StartRecordingRequest, StartTranscriptionRequest, Task, TaskKind};
use crate::routes::AppState;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use std::sync::Arc;
use tracing::instrument;

#[instrument(skip_all, name = "rtc.tasks.start_recording_request", fields(room_id = %room_id))]
pub async fn start_recording(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<Task>), RtcError> {
    let request: StartRecordingRequest = parse_body(&body)?;
    let task = state.engine.start_recording(&room_id, request).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

#[instrument(skip_all, name = "rtc.tasks.stop_recording_request", fields(room_id = %room_id, task_id = %task_id))]
pub async fn stop_recording(
    State(state): State<Arc<AppState>>,
    Path((room_id, task_id)): Path<(String, String)>,
) -> Result<Json<Task>, RtcError> {
    let task_id = parse_task_id(&task_id)?;
    let task = state
        .engine
        .stop_task(task_id, &room_id, TaskKind::Recording)
        .await?;
    Ok(Json(task))
}

/// Handler for POST /api/v1/rooms/{room_id}/recordings/{task_id}/check
///
/// For recordings whose upload webhook never arrived. Returns the task,
/// with a result if files were found under its prefix.
#[instrument(skip_all, name = "rtc.tasks.check_recording_request", fields(room_id = %room_id, task_id = %task_id))]
pub async fn check_recording(
    State(state): State<Arc<AppState>>,
    Path((room_id, task_id)): Path<(String, String)>,
) -> Result<Json<Task>, RtcError> {
    let task_id = parse_task_id(&task_id)?;
    let task = state.engine.check_recording(task_id, &room_id).await?;
    Ok(Json(task))
}

/// Handler for POST /api/v1/rooms/{room_id}/transcriptions
///
/// # Response
///
/// - 201 Created: a new transcription was started
/// - 200 OK: `resumeTaskId` named a running transcription, which was adopted
/// - 400 Bad Request: `resumeTaskId` names a task that is not a transcription
/// - 409 Conflict (`MISMATCH`): the resumed task belongs to another room
#[instrument(skip_all, name = "rtc.tasks.start_transcription_request", fields(room_id = %room_id))]
pub async fn start_transcription(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<Task>), RtcError> {
    let request: StartTranscriptionRequest = parse_body(&body)?;
    let resume_id = request.resume_task_id.clone();

    let task = state.engine.start_transcription(&room_id, request).await?;

    let status = if resume_id.as_deref() == Some(task.provider_task_id.as_str()) {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(task)))
}

#[instrument(skip_all, name = "rtc.tasks.stop_transcription_request", fields(room_id = %room_id, task_id = %task_id))]
pub async fn stop_transcription(
    State(state): State<Arc<AppState>>,
    Path((room_id, task_id)): Path<(String, String)>,
) -> Result<Json<Task>, RtcError> {
    let task_id = parse_task_id(&task_id)?;
    let task = state
        .engine
        .stop_task(task_id, &room_id, TaskKind::Transcription)
        .await?;
    Ok(Json(task))
}

#[instrument(skip_all, name = "rtc.tasks.get", fields(room_id = %room_id, task_id = %task_id))]
pub async fn get_task(
    State(state): State<Arc<AppState>>,
    Path((room_id, task_id)): Path<(String, String)>,
) -> Result<Json<Task>, RtcError> {
    let task_id = parse_task_id(&task_id)?;
    let task = state.engine.get_task(task_id, &room_id).await?;
    Ok(Json(task))
}
