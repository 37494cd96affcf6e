//! Session lookup.
//!
//! - `GET /api/v1/sessions?id={session_id}` or `?roomId={room_id}`

use crate::errors::RtcError;
use crate::models::{SessionLookup, SessionView};
use crate::routes::AppState;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::Json;
use std::sync::Arc;
use tracing::instrument;

/// Handler for GET /api/v1/sessions
///
/// Exactly one of `id` and `roomId` must be given.
///
/// # Response
///
/// - 200 OK: the session, participants included without their credentials
/// - 400 Bad Request: neither or both keys, or a malformed id
/// - 404 Not Found: no such session
#[instrument(skip_all, name = "rtc.sessions.get")]
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    query: Result<Query<SessionLookup>, QueryRejection>,
) -> Result<Json<SessionView>, RtcError> {
    let Query(lookup) = query.map_err(|e| RtcError::InvalidArgument(e.body_text()))?;
    let session = state.registry.resolve(&lookup).await?;
    Ok(Json(session.into()))
}
