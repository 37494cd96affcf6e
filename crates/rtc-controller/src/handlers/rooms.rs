//! Room handlers.
//!
//! - `POST /api/v1/rooms/{room_id}/join` - Join (creates the session on first join)
//! - `POST /api/v1/rooms/{room_id}/exit` - Mark a participant as left
//! - `POST /api/v1/rooms/{room_id}/dismiss` - End the room and stop its tasks
//! - `POST /api/v1/rooms/{room_id}/remove-participant` - Kick through the provider
//!
//! Bodies are parsed by hand so a malformed body is a 400 like every other
//! validation failure.

use super::parse_body;
use crate::errors::RtcError;
use crate::models::{
    DismissReport, DismissRequest, ExitRequest, JoinRequest, JoinResponse,
    RemoveParticipantRequest,
};
use crate::routes::AppState;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use std::sync::Arc;
use tracing::instrument;

/// Handler for POST /api/v1/rooms/{room_id}/join
///
/// # Response
///
/// - 200 OK: credential plus session id and join time
/// - 400 Bad Request: empty user id, bad options or expiry
#[instrument(skip_all, name = "rtc.rooms.join", fields(room_id = %room_id))]
pub async fn join_room(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
    body: Bytes,
) -> Result<Json<JoinResponse>, RtcError> {
    let request: JoinRequest = parse_body(&body)?;
    let response = state.registry.join(&room_id, request).await?;
    Ok(Json(response))
}

/// Handler for POST /api/v1/rooms/{room_id}/exit
#[instrument(skip_all, name = "rtc.rooms.exit", fields(room_id = %room_id))]
pub async fn exit_room(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
    body: Bytes,
) -> Result<StatusCode, RtcError> {
    let request: ExitRequest = parse_body(&body)?;
    state.registry.exit(&room_id, &request.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Handler for POST /api/v1/rooms/{room_id}/dismiss
///
/// Stop failures of individual tasks do not fail the request; they are
/// listed in the report.
///
/// # Response
///
/// - 200 OK: dismiss report
/// - 400 Bad Request: malformed body or options
/// - 404 Not Found: no live session for the room
/// - 502 Bad Gateway: the provider refused the dismiss; nothing was changed
#[instrument(skip_all, name = "rtc.rooms.dismiss", fields(room_id = %room_id))]
pub async fn dismiss_room(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
    body: Bytes,
) -> Result<Json<DismissReport>, RtcError> {
    let request: DismissRequest = parse_body(&body)?;
    let report = state.registry.dismiss(&room_id, request).await?;
    Ok(Json(report))
}

/// Handler for POST /api/v1/rooms/{room_id}/remove-participant
#[instrument(skip_all, name = "rtc.rooms.remove_participant", fields(room_id = %room_id))]
pub async fn remove_participant(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
    body: Bytes,
) -> Result<StatusCode, RtcError> {
    let request: RemoveParticipantRequest = parse_body(&body)?;
    state.registry.remove_participant(&room_id, request).await?;
    Ok(StatusCode::NO_CONTENT)
}
