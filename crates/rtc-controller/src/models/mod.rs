//! RTC Controller models.
//!
//! Ledger entities (room sessions, tasks, audited events), the provider
//! webhook envelope, and the request/response types of the HTTP API.

use chrono::{DateTime, Utc};
use common::extensions::Extensions;
use common::types::{EventId, SessionId, TaskId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Provider event type: one transcription round finished.
pub const EVENT_TRANSCRIPTION_COMPLETE: i64 = 903;

/// Provider event type: recording files uploaded to cloud storage.
pub const EVENT_RECORDING_UPLOADED: i64 = 310;

/// `Payload.Status` value meaning the recording upload succeeded.
pub const RECORDING_STATUS_SUCCESS: i64 = 0;

// ============================================================================
// Ledger entities
// ============================================================================

/// Kind of remote operation a task tracks.
///
/// The serialized tags double as the prefix of the synthetic credential
/// identity (`record_{roomId}`, `ai_transcription_{roomId}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskKind {
    #[serde(rename = "record")]
    Recording,
    #[serde(rename = "ai_transcription")]
    Transcription,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Recording => "record",
            TaskKind::Transcription => "ai_transcription",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "record" => Ok(TaskKind::Recording),
            "ai_transcription" => Ok(TaskKind::Transcription),
            other => Err(format!("unknown task kind '{other}'")),
        }
    }
}

/// Observable task state. CREATED and RUNNING are the same stored state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Running,
    Stopped,
}

/// Participant presence as last reported by join/exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatus {
    Joined,
    Exited,
}

/// Signed, time-limited credential for one identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub sdk_app_id: u64,
    pub user_id: String,
    pub user_sig: String,
}

/// One entry of a room session's participant map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub join_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_time: Option<DateTime<Utc>>,
    pub credential: Credential,
    pub status: ParticipantStatus,
    #[serde(default)]
    pub options: Extensions,
}

/// Local lifecycle record for one conferencing room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSession {
    pub id: SessionId,
    pub room_id: String,
    pub participants: BTreeMap<String, Participant>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub options: Extensions,
    /// Bumped on every participant write.
    pub version: i64,
    /// Soft-delete marker; only sessions without it count as live.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl RoomSession {
    /// A fresh session at version 0 with no participants.
    pub fn new(room_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: SessionId::new(),
            room_id: room_id.to_string(),
            participants: BTreeMap::new(),
            start_time: now,
            end_time: None,
            options: Extensions::new(),
            version: 0,
            deleted_at: None,
        }
    }
}

/// API view of a participant entry. The credential stays server-side.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantView {
    pub join_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_time: Option<DateTime<Utc>>,
    pub status: ParticipantStatus,
    pub options: Extensions,
}

/// API view of a room session returned by the session lookup.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub id: SessionId,
    pub room_id: String,
    pub participants: BTreeMap<String, ParticipantView>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub options: Extensions,
    pub version: i64,
}

impl From<RoomSession> for SessionView {
    fn from(session: RoomSession) -> Self {
        Self {
            id: session.id,
            room_id: session.room_id,
            participants: session
                .participants
                .into_iter()
                .map(|(user_id, p)| {
                    let view = ParticipantView {
                        join_time: p.join_time,
                        exit_time: p.exit_time,
                        status: p.status,
                        options: p.options,
                    };
                    (user_id, view)
                })
                .collect(),
            start_time: session.start_time,
            end_time: session.end_time,
            options: session.options,
            version: session.version,
        }
    }
}

/// Local ledger entry for one remote asynchronous operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub session_id: SessionId,
    #[serde(rename = "type")]
    pub kind: TaskKind,
    pub provider_task_id: String,
    pub start_request_id: String,
    pub stop_request_id: Option<String>,
    pub result: Option<serde_json::Value>,
    pub start_time: DateTime<Utc>,
    pub stop_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub options: Extensions,
}

impl Task {
    pub fn state(&self) -> TaskState {
        if self.stop_time.is_some() {
            TaskState::Stopped
        } else {
            TaskState::Running
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == TaskState::Stopped
    }
}

/// Append-only audit record of one inbound provider notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceEvent {
    pub id: EventId,
    /// Best-effort owning session; `None` when the room could not be determined.
    pub session_id: Option<SessionId>,
    pub code: i64,
    pub time: DateTime<Utc>,
    pub payload: serde_json::Value,
}

/// Transcription task result, overwritten by each completed round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptionResult {
    pub user_id: String,
    pub text: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

/// Recording artifact after rehosting into the application file store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredArtifact {
    /// Durable application-level file handle.
    pub file_id: String,
    /// Provider-side storage key the artifact was copied from (now deleted).
    pub source_key: String,
}

// ============================================================================
// Provider webhook envelope
// ============================================================================

/// Inbound provider callback.
///
/// ```json
/// {"EventGroupId": 3, "EventType": 310, "CallbackTs": 1700000000000,
///  "EventInfo": {"RoomId": "r1", "TaskId": "task-1", "Payload": {"Status": 0, "FileList": ["a.mp4"]}}}
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WebhookEnvelope {
    pub event_type: i64,
    #[serde(default)]
    pub callback_ts: Option<i64>,
    #[serde(default)]
    pub event_info: EventInfo,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EventInfo {
    /// String or numeric depending on the room id type.
    #[serde(default)]
    pub room_id: Option<serde_json::Value>,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl EventInfo {
    /// Room id as a string, whichever JSON type the provider used.
    pub fn room_id(&self) -> Option<String> {
        match self.room_id.as_ref()? {
            serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// `Payload` of a 903 event.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TranscriptionPayload {
    pub user_id: String,
    pub text: String,
    pub start_time_ms: i64,
    pub end_time_ms: i64,
    pub round_id: String,
}

/// `Payload` of a 310 event.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RecordingPayload {
    pub status: i64,
    #[serde(default)]
    pub file_list: Vec<String>,
}

// ============================================================================
// HTTP API models
// ============================================================================

/// Session lookup by exactly one of `id` / `roomId`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionLookup {
    #[serde(default)]
    pub id: Option<SessionId>,
    #[serde(default)]
    pub room_id: Option<String>,
}

impl SessionLookup {
    pub fn by_id(id: SessionId) -> Self {
        Self {
            id: Some(id),
            room_id: None,
        }
    }

    pub fn by_room(room_id: &str) -> Self {
        Self {
            id: None,
            room_id: Some(room_id.to_string()),
        }
    }
}

/// Request body for `POST /api/v1/rooms/{room_id}/join`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct JoinRequest {
    pub user_id: String,
    /// Overrides the configured credential lifetime.
    #[serde(default)]
    pub expire_seconds: Option<u64>,
    #[serde(default)]
    pub options: Extensions,
}

/// Response for a join.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinResponse {
    pub credential: Credential,
    pub session_id: SessionId,
    pub room_id: String,
    pub options: Extensions,
    pub join_time: DateTime<Utc>,
}

/// Request body for exit.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ExitRequest {
    pub user_id: String,
}

/// Request body for dismiss. The body itself is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DismissRequest {
    #[serde(default)]
    pub options: Extensions,
}

/// Request body for remove-participant.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RemoveParticipantRequest {
    pub user_id: String,
    #[serde(default)]
    pub options: Extensions,
}

/// Request body for starting a cloud recording.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StartRecordingRequest {
    #[serde(default)]
    pub options: Extensions,
}

/// Request body for starting (or resuming) a transcription.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StartTranscriptionRequest {
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub hot_word_list: Option<String>,
    /// Provider task id of a transcription that may still be running.
    #[serde(default)]
    pub resume_task_id: Option<String>,
    #[serde(default)]
    pub options: Extensions,
}

/// One task whose stop failed during dismiss.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopFailure {
    pub task_id: TaskId,
    pub reason: String,
}

/// Outcome of dismissing a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DismissReport {
    pub session_id: SessionId,
    pub end_time: Option<DateTime<Utc>>,
    pub stopped: Vec<TaskId>,
    pub failed: Vec<StopFailure>,
}

/// Readiness response.
#[derive(Debug, Clone, Serialize)]
pub struct ReadinessResponse {
    pub status: &'static str,
    pub ledger: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
