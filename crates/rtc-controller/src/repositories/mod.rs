//! Repository layer for the RTC Controller.
//!
//! The ledger (room sessions, tasks, audited events) sits behind the
//! [`LedgerStore`] trait so services never see the backend. Two backends:
//!
//! - [`PgLedgerStore`] - PostgreSQL via sqlx, parameterized queries only
//! - [`InMemoryLedgerStore`] - process-local, used when no database is
//!   configured and throughout the tests
//!
//! Both enforce the same write rules:
//!
//! - at most one live session per room id; a losing concurrent insert gets
//!   the winner back
//! - `end_time` and `stop_time` are set once and never cleared
//! - participant writes touch one user's entry atomically and bump `version`
//! - a task insert that collides on `provider_task_id` returns the existing task

pub mod memory;
pub mod postgres;

pub use memory::InMemoryLedgerStore;
pub use postgres::PgLedgerStore;

use crate::errors::RtcError;
use crate::models::{InstanceEvent, Participant, RoomSession, Task};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::types::{SessionId, TaskId};

/// Persistence seam for the ledger.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Short backend name for readiness output ("postgres", "memory").
    fn backend(&self) -> &'static str;

    /// Cheap connectivity check.
    async fn ping(&self) -> Result<(), RtcError>;

    async fn get_session(&self, id: SessionId) -> Result<Option<RoomSession>, RtcError>;

    /// The live session for a room id.
    async fn find_session_by_room(&self, room_id: &str) -> Result<Option<RoomSession>, RtcError>;

    /// Insert a session, or return the live session that already owns its room id.
    async fn insert_session(&self, session: RoomSession) -> Result<RoomSession, RtcError>;

    /// Insert or overwrite one participant entry in a single atomic write.
    /// Other entries are left as they are.
    async fn upsert_participant(
        &self,
        id: SessionId,
        user_id: &str,
        participant: &Participant,
    ) -> Result<RoomSession, RtcError>;

    /// Mark one participant as exited. Returns `None` if the user has no entry.
    async fn mark_participant_exited(
        &self,
        id: SessionId,
        user_id: &str,
        exit_time: DateTime<Utc>,
    ) -> Result<Option<RoomSession>, RtcError>;

    /// Set `end_time` unless already set. Returns the stored session.
    async fn end_session(
        &self,
        id: SessionId,
        end_time: DateTime<Utc>,
    ) -> Result<RoomSession, RtcError>;

    /// Insert a task, or return the existing task with the same provider task id.
    async fn insert_task(&self, task: Task) -> Result<Task, RtcError>;

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>, RtcError>;

    async fn find_task_by_provider_id(
        &self,
        provider_task_id: &str,
    ) -> Result<Option<Task>, RtcError>;

    /// Tasks of a session whose `stop_time` is unset, oldest first.
    async fn list_open_tasks(&self, session_id: SessionId) -> Result<Vec<Task>, RtcError>;

    /// Record an explicit stop. `stop_request_id` and `stop_time` keep their
    /// first values if already set.
    async fn mark_task_stopped(
        &self,
        id: TaskId,
        stop_request_id: &str,
        stop_time: DateTime<Utc>,
    ) -> Result<Task, RtcError>;

    /// Record a completion result. `result` always overwrites; the stop
    /// request id overwrites when given; `stop_time` keeps its first value.
    async fn record_task_result(
        &self,
        id: TaskId,
        result: serde_json::Value,
        stop_request_id: Option<&str>,
        stop_time: DateTime<Utc>,
    ) -> Result<Task, RtcError>;

    async fn append_event(&self, event: InstanceEvent) -> Result<(), RtcError>;

    /// Audited events, oldest first. `None` lists everything.
    async fn list_events(
        &self,
        session_id: Option<SessionId>,
    ) -> Result<Vec<InstanceEvent>, RtcError>;
}
