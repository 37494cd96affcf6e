//! PostgreSQL ledger.
//!
//! # Security
//!
//! - All queries use parameterized statements
//! - Participant credentials live inside the `participants` JSONB column and
//!   are never logged
//!
//! Set-once columns (`end_time`, `stop_time`) are written with
//! `COALESCE(existing, new)` so concurrent writers cannot move them.

use super::LedgerStore;
use crate::errors::RtcError;
use crate::models::{InstanceEvent, Participant, ParticipantStatus, RoomSession, Task};
use crate::observability::metrics;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::extensions::Extensions;
use common::types::{EventId, SessionId, TaskId};
use sqlx::types::Json;
use sqlx::PgPool;
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Instant;
use tracing::instrument;
use uuid::Uuid;

/// sqlx-backed [`LedgerStore`].
#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Run a query, recording its duration and outcome.
async fn observe<T, F>(operation: &'static str, query: F) -> Result<T, RtcError>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    let start = Instant::now();
    let result = query.await;
    let status = if result.is_ok() { "success" } else { "error" };
    metrics::record_db_query(operation, status, start.elapsed());
    Ok(result?)
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn ping(&self) -> Result<(), RtcError> {
        observe("ping", sqlx::query("SELECT 1").execute(&self.pool)).await?;
        Ok(())
    }

    #[instrument(skip_all, name = "rtc.repo.get_session", fields(session_id = %id))]
    async fn get_session(&self, id: SessionId) -> Result<Option<RoomSession>, RtcError> {
        let row: Option<SessionRow> = observe(
            "get_session",
            sqlx::query_as(
                r#"
                SELECT session_id, room_id, participants, start_time, end_time,
                       options, version, deleted_at
                FROM room_sessions
                WHERE session_id = $1 AND deleted_at IS NULL
                "#,
            )
            .bind(id.0)
            .fetch_optional(&self.pool),
        )
        .await?;

        Ok(row.map(RoomSession::from))
    }

    #[instrument(skip_all, name = "rtc.repo.find_session_by_room", fields(room_id = %room_id))]
    async fn find_session_by_room(&self, room_id: &str) -> Result<Option<RoomSession>, RtcError> {
        let row: Option<SessionRow> = observe(
            "find_session_by_room",
            sqlx::query_as(
                r#"
                SELECT session_id, room_id, participants, start_time, end_time,
                       options, version, deleted_at
                FROM room_sessions
                WHERE room_id = $1 AND deleted_at IS NULL
                "#,
            )
            .bind(room_id)
            .fetch_optional(&self.pool),
        )
        .await?;

        Ok(row.map(RoomSession::from))
    }

    #[instrument(skip_all, name = "rtc.repo.insert_session", fields(room_id = %session.room_id))]
    async fn insert_session(&self, session: RoomSession) -> Result<RoomSession, RtcError> {
        // Losing a concurrent insert is not an error; the winner is returned.
        let inserted: Option<SessionRow> = observe(
            "insert_session",
            sqlx::query_as(
                r#"
                INSERT INTO room_sessions
                    (session_id, room_id, participants, start_time, end_time, options, version)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (room_id) WHERE deleted_at IS NULL DO NOTHING
                RETURNING session_id, room_id, participants, start_time, end_time,
                          options, version, deleted_at
                "#,
            )
            .bind(session.id.0)
            .bind(&session.room_id)
            .bind(Json(&session.participants))
            .bind(session.start_time)
            .bind(session.end_time)
            .bind(Json(&session.options))
            .bind(session.version)
            .fetch_optional(&self.pool),
        )
        .await?;

        if let Some(row) = inserted {
            return Ok(row.into());
        }

        tracing::debug!(
            target: "rtc.repository.ledger",
            room_id = %session.room_id,
            "Session insert lost race, fetching live session"
        );
        self.find_session_by_room(&session.room_id)
            .await?
            .ok_or_else(|| {
                RtcError::Database(format!(
                    "live session for room {} vanished after insert conflict",
                    session.room_id
                ))
            })
    }

    #[instrument(skip_all, name = "rtc.repo.upsert_participant", fields(session_id = %id, user_id = %user_id))]
    async fn upsert_participant(
        &self,
        id: SessionId,
        user_id: &str,
        participant: &Participant,
    ) -> Result<RoomSession, RtcError> {
        // Merges a single key; concurrent joins serialize on the row lock.
        let row: Option<SessionRow> = observe(
            "upsert_participant",
            sqlx::query_as(
                r#"
                UPDATE room_sessions
                SET participants = participants || jsonb_build_object($2::text, $3::jsonb),
                    version = version + 1
                WHERE session_id = $1 AND deleted_at IS NULL
                RETURNING session_id, room_id, participants, start_time, end_time,
                          options, version, deleted_at
                "#,
            )
            .bind(id.0)
            .bind(user_id)
            .bind(Json(participant))
            .fetch_optional(&self.pool),
        )
        .await?;

        row.map(RoomSession::from)
            .ok_or_else(|| RtcError::NotFound(format!("Session {id} not found")))
    }

    #[instrument(skip_all, name = "rtc.repo.mark_participant_exited", fields(session_id = %id, user_id = %user_id))]
    async fn mark_participant_exited(
        &self,
        id: SessionId,
        user_id: &str,
        exit_time: DateTime<Utc>,
    ) -> Result<Option<RoomSession>, RtcError> {
        let row: Option<SessionRow> = observe(
            "mark_participant_exited",
            sqlx::query_as(
                r#"
                UPDATE room_sessions
                SET participants = jsonb_set(
                        participants,
                        ARRAY[$2::text],
                        (participants -> $2::text)
                            || jsonb_build_object('exitTime', $3::jsonb, 'status', $4::jsonb)
                    ),
                    version = version + 1
                WHERE session_id = $1
                  AND deleted_at IS NULL
                  AND (participants -> $2::text) IS NOT NULL
                RETURNING session_id, room_id, participants, start_time, end_time,
                          options, version, deleted_at
                "#,
            )
            .bind(id.0)
            .bind(user_id)
            .bind(Json(exit_time))
            .bind(Json(ParticipantStatus::Exited))
            .fetch_optional(&self.pool),
        )
        .await?;

        match row {
            Some(row) => Ok(Some(row.into())),
            None if self.get_session(id).await?.is_some() => Ok(None),
            None => Err(RtcError::NotFound(format!("Session {id} not found"))),
        }
    }

    #[instrument(skip_all, name = "rtc.repo.end_session", fields(session_id = %id))]
    async fn end_session(
        &self,
        id: SessionId,
        end_time: DateTime<Utc>,
    ) -> Result<RoomSession, RtcError> {
        let row: Option<SessionRow> = observe(
            "end_session",
            sqlx::query_as(
                r#"
                UPDATE room_sessions
                SET end_time = COALESCE(end_time, $2)
                WHERE session_id = $1 AND deleted_at IS NULL
                RETURNING session_id, room_id, participants, start_time, end_time,
                          options, version, deleted_at
                "#,
            )
            .bind(id.0)
            .bind(end_time)
            .fetch_optional(&self.pool),
        )
        .await?;

        row.map(RoomSession::from)
            .ok_or_else(|| RtcError::NotFound(format!("Session {id} not found")))
    }

    #[instrument(skip_all, name = "rtc.repo.insert_task", fields(provider_task_id = %task.provider_task_id))]
    async fn insert_task(&self, task: Task) -> Result<Task, RtcError> {
        let inserted: Option<TaskRow> = observe(
            "insert_task",
            sqlx::query_as(
                r#"
                INSERT INTO tasks
                    (task_id, session_id, kind, provider_task_id, start_request_id,
                     stop_request_id, result, start_time, stop_time, options)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ON CONFLICT (provider_task_id) DO NOTHING
                RETURNING task_id, session_id, kind, provider_task_id, start_request_id,
                          stop_request_id, result, start_time, stop_time, options
                "#,
            )
            .bind(task.id.0)
            .bind(task.session_id.0)
            .bind(task.kind.as_str())
            .bind(&task.provider_task_id)
            .bind(&task.start_request_id)
            .bind(&task.stop_request_id)
            .bind(&task.result)
            .bind(task.start_time)
            .bind(task.stop_time)
            .bind(Json(&task.options))
            .fetch_optional(&self.pool),
        )
        .await?;

        if let Some(row) = inserted {
            return Task::try_from(row);
        }

        self.find_task_by_provider_id(&task.provider_task_id)
            .await?
            .ok_or_else(|| {
                RtcError::Database(format!(
                    "task {} vanished after insert conflict",
                    task.provider_task_id
                ))
            })
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>, RtcError> {
        let row: Option<TaskRow> = observe(
            "get_task",
            sqlx::query_as(
                r#"
                SELECT task_id, session_id, kind, provider_task_id, start_request_id,
                       stop_request_id, result, start_time, stop_time, options
                FROM tasks
                WHERE task_id = $1 AND deleted_at IS NULL
                "#,
            )
            .bind(id.0)
            .fetch_optional(&self.pool),
        )
        .await?;

        row.map(Task::try_from).transpose()
    }

    async fn find_task_by_provider_id(
        &self,
        provider_task_id: &str,
    ) -> Result<Option<Task>, RtcError> {
        let row: Option<TaskRow> = observe(
            "find_task_by_provider_id",
            sqlx::query_as(
                r#"
                SELECT task_id, session_id, kind, provider_task_id, start_request_id,
                       stop_request_id, result, start_time, stop_time, options
                FROM tasks
                WHERE provider_task_id = $1 AND deleted_at IS NULL
                "#,
            )
            .bind(provider_task_id)
            .fetch_optional(&self.pool),
        )
        .await?;

        row.map(Task::try_from).transpose()
    }

    async fn list_open_tasks(&self, session_id: SessionId) -> Result<Vec<Task>, RtcError> {
        let rows: Vec<TaskRow> = observe(
            "list_open_tasks",
            sqlx::query_as(
                r#"
                SELECT task_id, session_id, kind, provider_task_id, start_request_id,
                       stop_request_id, result, start_time, stop_time, options
                FROM tasks
                WHERE session_id = $1 AND stop_time IS NULL AND deleted_at IS NULL
                ORDER BY start_time ASC
                "#,
            )
            .bind(session_id.0)
            .fetch_all(&self.pool),
        )
        .await?;

        rows.into_iter().map(Task::try_from).collect()
    }

    #[instrument(skip_all, name = "rtc.repo.mark_task_stopped", fields(task_id = %id))]
    async fn mark_task_stopped(
        &self,
        id: TaskId,
        stop_request_id: &str,
        stop_time: DateTime<Utc>,
    ) -> Result<Task, RtcError> {
        let row: Option<TaskRow> = observe(
            "mark_task_stopped",
            sqlx::query_as(
                r#"
                UPDATE tasks
                SET stop_request_id = COALESCE(stop_request_id, $2),
                    stop_time = COALESCE(stop_time, $3)
                WHERE task_id = $1 AND deleted_at IS NULL
                RETURNING task_id, session_id, kind, provider_task_id, start_request_id,
                          stop_request_id, result, start_time, stop_time, options
                "#,
            )
            .bind(id.0)
            .bind(stop_request_id)
            .bind(stop_time)
            .fetch_optional(&self.pool),
        )
        .await?;

        row.map(Task::try_from)
            .transpose()?
            .ok_or_else(|| RtcError::NotFound(format!("Task {id} not found")))
    }

    #[instrument(skip_all, name = "rtc.repo.record_task_result", fields(task_id = %id))]
    async fn record_task_result(
        &self,
        id: TaskId,
        result: serde_json::Value,
        stop_request_id: Option<&str>,
        stop_time: DateTime<Utc>,
    ) -> Result<Task, RtcError> {
        let row: Option<TaskRow> = observe(
            "record_task_result",
            sqlx::query_as(
                r#"
                UPDATE tasks
                SET result = $2,
                    stop_request_id = COALESCE($3, stop_request_id),
                    stop_time = COALESCE(stop_time, $4)
                WHERE task_id = $1 AND deleted_at IS NULL
                RETURNING task_id, session_id, kind, provider_task_id, start_request_id,
                          stop_request_id, result, start_time, stop_time, options
                "#,
            )
            .bind(id.0)
            .bind(result)
            .bind(stop_request_id)
            .bind(stop_time)
            .fetch_optional(&self.pool),
        )
        .await?;

        row.map(Task::try_from)
            .transpose()?
            .ok_or_else(|| RtcError::NotFound(format!("Task {id} not found")))
    }

    async fn append_event(&self, event: InstanceEvent) -> Result<(), RtcError> {
        observe(
            "append_event",
            sqlx::query(
                r#"
                INSERT INTO instance_events (event_id, session_id, code, event_time, payload)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(event.id.0)
            .bind(event.session_id.map(|s| s.0))
            .bind(event.code)
            .bind(event.time)
            .bind(&event.payload)
            .execute(&self.pool),
        )
        .await?;

        Ok(())
    }

    async fn list_events(
        &self,
        session_id: Option<SessionId>,
    ) -> Result<Vec<InstanceEvent>, RtcError> {
        let rows: Vec<EventRow> = observe(
            "list_events",
            sqlx::query_as(
                r#"
                SELECT event_id, session_id, code, event_time, payload
                FROM instance_events
                WHERE $1::uuid IS NULL OR session_id = $1
                ORDER BY created_at ASC
                "#,
            )
            .bind(session_id.map(|s| s.0))
            .fetch_all(&self.pool),
        )
        .await?;

        Ok(rows.into_iter().map(InstanceEvent::from).collect())
    }
}

// ============================================================================
// Row types
// ============================================================================

#[derive(sqlx::FromRow)]
struct SessionRow {
    session_id: Uuid,
    room_id: String,
    participants: Json<BTreeMap<String, Participant>>,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    options: Json<Extensions>,
    version: i64,
    deleted_at: Option<DateTime<Utc>>,
}

impl From<SessionRow> for RoomSession {
    fn from(row: SessionRow) -> Self {
        RoomSession {
            id: SessionId(row.session_id),
            room_id: row.room_id,
            participants: row.participants.0,
            start_time: row.start_time,
            end_time: row.end_time,
            options: row.options.0,
            version: row.version,
            deleted_at: row.deleted_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    task_id: Uuid,
    session_id: Uuid,
    kind: String,
    provider_task_id: String,
    start_request_id: String,
    stop_request_id: Option<String>,
    result: Option<serde_json::Value>,
    start_time: DateTime<Utc>,
    stop_time: Option<DateTime<Utc>>,
    options: Json<Extensions>,
}

impl TryFrom<TaskRow> for Task {
    type Error = RtcError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let kind = row.kind.parse().map_err(RtcError::Database)?;
        Ok(Task {
            id: TaskId(row.task_id),
            session_id: SessionId(row.session_id),
            kind,
            provider_task_id: row.provider_task_id,
            start_request_id: row.start_request_id,
            stop_request_id: row.stop_request_id,
            result: row.result,
            start_time: row.start_time,
            stop_time: row.stop_time,
            options: row.options.0,
        })
    }
}

#[derive(sqlx::FromRow)]
struct EventRow {
    event_id: Uuid,
    session_id: Option<Uuid>,
    code: i64,
    event_time: DateTime<Utc>,
    payload: serde_json::Value,
}

impl From<EventRow> for InstanceEvent {
    fn from(row: EventRow) -> Self {
        InstanceEvent {
            id: EventId(row.event_id),
            session_id: row.session_id.map(SessionId),
            code: row.code,
            time: row.event_time,
            payload: row.payload,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::TaskKind;
    use serde_json::json;

    fn task_row(kind: &str) -> TaskRow {
        TaskRow {
            task_id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            kind: kind.to_string(),
            provider_task_id: "p-1".to_string(),
            start_request_id: "req-1".to_string(),
            stop_request_id: None,
            result: Some(json!(["a.mp4"])),
            start_time: Utc::now(),
            stop_time: None,
            options: Json(Extensions::new()),
        }
    }

    #[test]
    fn test_task_row_conversion() {
        let row = task_row("ai_transcription");
        let task_id = row.task_id;

        let task = Task::try_from(row).unwrap();
        assert_eq!(task.id, TaskId(task_id));
        assert_eq!(task.kind, TaskKind::Transcription);
        assert_eq!(task.result, Some(json!(["a.mp4"])));
    }

    #[test]
    fn test_task_row_with_unknown_kind_is_database_error() {
        let result = Task::try_from(task_row("livestream"));
        assert!(matches!(result, Err(RtcError::Database(msg)) if msg.contains("livestream")));
    }

    #[test]
    fn test_session_row_conversion() {
        let row = SessionRow {
            session_id: Uuid::new_v4(),
            room_id: "r1".to_string(),
            participants: Json(BTreeMap::new()),
            start_time: Utc::now(),
            end_time: None,
            options: Json(Extensions::new()),
            version: 4,
            deleted_at: None,
        };

        let session = RoomSession::from(row);
        assert_eq!(session.room_id, "r1");
        assert_eq!(session.version, 4);
        assert!(session.participants.is_empty());
    }

    #[test]
    fn test_event_row_conversion_unassociated() {
        let event = InstanceEvent::from(EventRow {
            event_id: Uuid::new_v4(),
            session_id: None,
            code: 104,
            event_time: Utc::now(),
            payload: json!({"EventType": 104}),
        });

        assert!(event.session_id.is_none());
        assert_eq!(event.code, 104);
    }
}
