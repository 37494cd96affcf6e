//! Process-local ledger.
//!
//! Everything lives behind one `tokio::sync::RwLock`, so each trait call is
//! atomic with respect to the others. Nothing survives a restart.

use super::LedgerStore;
use crate::errors::RtcError;
use crate::models::{InstanceEvent, Participant, ParticipantStatus, RoomSession, Task};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::types::{SessionId, TaskId};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
struct LedgerState {
    sessions: HashMap<SessionId, RoomSession>,
    tasks: HashMap<TaskId, Task>,
    events: Vec<InstanceEvent>,
}

impl LedgerState {
    fn live_session_for_room(&self, room_id: &str) -> Option<&RoomSession> {
        self.sessions
            .values()
            .find(|s| s.room_id == room_id && s.deleted_at.is_none())
    }
}

/// In-memory [`LedgerStore`].
#[derive(Default)]
pub struct InMemoryLedgerStore {
    state: RwLock<LedgerState>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn live_session_mut(state: &mut LedgerState, id: SessionId) -> Result<&mut RoomSession, RtcError> {
    state
        .sessions
        .get_mut(&id)
        .filter(|s| s.deleted_at.is_none())
        .ok_or_else(|| RtcError::NotFound(format!("Session {id} not found")))
}

fn task_not_found(id: TaskId) -> RtcError {
    RtcError::NotFound(format!("Task {id} not found"))
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> Result<(), RtcError> {
        Ok(())
    }

    async fn get_session(&self, id: SessionId) -> Result<Option<RoomSession>, RtcError> {
        let state = self.state.read().await;
        Ok(state
            .sessions
            .get(&id)
            .filter(|s| s.deleted_at.is_none())
            .cloned())
    }

    async fn find_session_by_room(&self, room_id: &str) -> Result<Option<RoomSession>, RtcError> {
        let state = self.state.read().await;
        Ok(state.live_session_for_room(room_id).cloned())
    }

    async fn insert_session(&self, session: RoomSession) -> Result<RoomSession, RtcError> {
        let mut state = self.state.write().await;
        if let Some(existing) = state.live_session_for_room(&session.room_id) {
            return Ok(existing.clone());
        }
        state.sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn upsert_participant(
        &self,
        id: SessionId,
        user_id: &str,
        participant: &Participant,
    ) -> Result<RoomSession, RtcError> {
        let mut state = self.state.write().await;
        let session = live_session_mut(&mut state, id)?;

        session
            .participants
            .insert(user_id.to_string(), participant.clone());
        session.version += 1;
        Ok(session.clone())
    }

    async fn mark_participant_exited(
        &self,
        id: SessionId,
        user_id: &str,
        exit_time: DateTime<Utc>,
    ) -> Result<Option<RoomSession>, RtcError> {
        let mut state = self.state.write().await;
        let session = live_session_mut(&mut state, id)?;

        let Some(participant) = session.participants.get_mut(user_id) else {
            return Ok(None);
        };
        participant.exit_time = Some(exit_time);
        participant.status = ParticipantStatus::Exited;
        session.version += 1;
        Ok(Some(session.clone()))
    }

    async fn end_session(
        &self,
        id: SessionId,
        end_time: DateTime<Utc>,
    ) -> Result<RoomSession, RtcError> {
        let mut state = self.state.write().await;
        let session = live_session_mut(&mut state, id)?;

        session.end_time.get_or_insert(end_time);
        Ok(session.clone())
    }

    async fn insert_task(&self, task: Task) -> Result<Task, RtcError> {
        let mut state = self.state.write().await;
        if let Some(existing) = state
            .tasks
            .values()
            .find(|t| t.provider_task_id == task.provider_task_id)
        {
            return Ok(existing.clone());
        }
        state.tasks.insert(task.id, task.clone());
        Ok(task)
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>, RtcError> {
        let state = self.state.read().await;
        Ok(state.tasks.get(&id).cloned())
    }

    async fn find_task_by_provider_id(
        &self,
        provider_task_id: &str,
    ) -> Result<Option<Task>, RtcError> {
        let state = self.state.read().await;
        Ok(state
            .tasks
            .values()
            .find(|t| t.provider_task_id == provider_task_id)
            .cloned())
    }

    async fn list_open_tasks(&self, session_id: SessionId) -> Result<Vec<Task>, RtcError> {
        let state = self.state.read().await;
        let mut open: Vec<Task> = state
            .tasks
            .values()
            .filter(|t| t.session_id == session_id && t.stop_time.is_none())
            .cloned()
            .collect();
        open.sort_by_key(|t| t.start_time);
        Ok(open)
    }

    async fn mark_task_stopped(
        &self,
        id: TaskId,
        stop_request_id: &str,
        stop_time: DateTime<Utc>,
    ) -> Result<Task, RtcError> {
        let mut state = self.state.write().await;
        let task = state.tasks.get_mut(&id).ok_or_else(|| task_not_found(id))?;

        task.stop_request_id
            .get_or_insert_with(|| stop_request_id.to_string());
        task.stop_time.get_or_insert(stop_time);
        Ok(task.clone())
    }

    async fn record_task_result(
        &self,
        id: TaskId,
        result: serde_json::Value,
        stop_request_id: Option<&str>,
        stop_time: DateTime<Utc>,
    ) -> Result<Task, RtcError> {
        let mut state = self.state.write().await;
        let task = state.tasks.get_mut(&id).ok_or_else(|| task_not_found(id))?;

        task.result = Some(result);
        if let Some(request_id) = stop_request_id {
            task.stop_request_id = Some(request_id.to_string());
        }
        task.stop_time.get_or_insert(stop_time);
        Ok(task.clone())
    }

    async fn append_event(&self, event: InstanceEvent) -> Result<(), RtcError> {
        self.state.write().await.events.push(event);
        Ok(())
    }

    async fn list_events(
        &self,
        session_id: Option<SessionId>,
    ) -> Result<Vec<InstanceEvent>, RtcError> {
        let state = self.state.read().await;
        Ok(state
            .events
            .iter()
            .filter(|e| session_id.is_none() || e.session_id == session_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::{Credential, TaskKind};
    use chrono::Duration;
    use common::extensions::Extensions;
    use common::types::EventId;
    use serde_json::json;

    fn task_for(session_id: SessionId, provider_task_id: &str) -> Task {
        Task {
            id: TaskId::new(),
            session_id,
            kind: TaskKind::Recording,
            provider_task_id: provider_task_id.to_string(),
            start_request_id: "req-start".to_string(),
            stop_request_id: None,
            result: None,
            start_time: Utc::now(),
            stop_time: None,
            options: Extensions::new(),
        }
    }

    fn participant(user_id: &str) -> Participant {
        Participant {
            join_time: Utc::now(),
            exit_time: None,
            credential: Credential {
                sdk_app_id: 1,
                user_id: user_id.to_string(),
                user_sig: "sig".to_string(),
            },
            status: ParticipantStatus::Joined,
            options: Extensions::new(),
        }
    }

    #[tokio::test]
    async fn test_insert_session_returns_live_winner() {
        let store = InMemoryLedgerStore::new();
        let first = store
            .insert_session(RoomSession::new("r1", Utc::now()))
            .await
            .unwrap();
        let second = store
            .insert_session(RoomSession::new("r1", Utc::now()))
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(
            store.find_session_by_room("r1").await.unwrap().unwrap().id,
            first.id
        );
        assert!(store.find_session_by_room("r2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_participant_writes_touch_one_entry() {
        let store = InMemoryLedgerStore::new();
        let session = store
            .insert_session(RoomSession::new("r1", Utc::now()))
            .await
            .unwrap();

        store
            .upsert_participant(session.id, "u1", &participant("u1"))
            .await
            .unwrap();
        let updated = store
            .upsert_participant(session.id, "u2", &participant("u2"))
            .await
            .unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(updated.participants.len(), 2);

        let exited_at = Utc::now();
        let exited = store
            .mark_participant_exited(session.id, "u1", exited_at)
            .await
            .unwrap()
            .expect("u1 has an entry");
        let entry = exited.participants.get("u1").unwrap();
        assert_eq!(entry.exit_time, Some(exited_at));
        assert_eq!(entry.status, ParticipantStatus::Exited);
        assert!(exited.participants.get("u2").unwrap().exit_time.is_none());

        assert!(store
            .mark_participant_exited(session.id, "ghost", exited_at)
            .await
            .unwrap()
            .is_none());
        assert!(matches!(
            store
                .upsert_participant(SessionId::new(), "u1", &participant("u1"))
                .await,
            Err(RtcError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_end_session_is_set_once() {
        let store = InMemoryLedgerStore::new();
        let session = store
            .insert_session(RoomSession::new("r1", Utc::now()))
            .await
            .unwrap();

        let first_end = Utc::now();
        store.end_session(session.id, first_end).await.unwrap();
        let ended = store
            .end_session(session.id, first_end + Duration::seconds(60))
            .await
            .unwrap();

        assert_eq!(ended.end_time, Some(first_end));
    }

    #[tokio::test]
    async fn test_insert_task_dedupes_on_provider_id() {
        let store = InMemoryLedgerStore::new();
        let session_id = SessionId::new();

        let first = store.insert_task(task_for(session_id, "p-1")).await.unwrap();
        let duplicate = store.insert_task(task_for(session_id, "p-1")).await.unwrap();

        assert_eq!(first.id, duplicate.id);
        assert_eq!(
            store
                .find_task_by_provider_id("p-1")
                .await
                .unwrap()
                .unwrap()
                .id,
            first.id
        );
    }

    #[tokio::test]
    async fn test_stop_time_is_monotonic() {
        let store = InMemoryLedgerStore::new();
        let task = store
            .insert_task(task_for(SessionId::new(), "p-1"))
            .await
            .unwrap();

        let stopped_at = Utc::now();
        store
            .mark_task_stopped(task.id, "req-stop-1", stopped_at)
            .await
            .unwrap();
        let again = store
            .mark_task_stopped(task.id, "req-stop-2", stopped_at + Duration::seconds(5))
            .await
            .unwrap();

        assert_eq!(again.stop_time, Some(stopped_at));
        assert_eq!(again.stop_request_id.as_deref(), Some("req-stop-1"));

        let with_result = store
            .record_task_result(
                task.id,
                json!(["a.mp4"]),
                Some("round-2"),
                stopped_at + Duration::seconds(10),
            )
            .await
            .unwrap();
        assert_eq!(with_result.stop_time, Some(stopped_at));
        assert_eq!(with_result.result, Some(json!(["a.mp4"])));
        assert_eq!(with_result.stop_request_id.as_deref(), Some("round-2"));
    }

    #[tokio::test]
    async fn test_list_open_tasks_skips_stopped_and_foreign() {
        let store = InMemoryLedgerStore::new();
        let session_id = SessionId::new();

        let open = store.insert_task(task_for(session_id, "p-1")).await.unwrap();
        let stopped = store.insert_task(task_for(session_id, "p-2")).await.unwrap();
        store.insert_task(task_for(SessionId::new(), "p-3")).await.unwrap();
        store
            .mark_task_stopped(stopped.id, "req", Utc::now())
            .await
            .unwrap();

        let listed = store.list_open_tasks(session_id).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed.first().map(|t| t.id), Some(open.id));
    }

    #[tokio::test]
    async fn test_mark_unknown_task_is_not_found() {
        let store = InMemoryLedgerStore::new();
        let result = store
            .mark_task_stopped(TaskId::new(), "req", Utc::now())
            .await;
        assert!(matches!(result, Err(RtcError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_events_filter_by_session() {
        let store = InMemoryLedgerStore::new();
        let session_id = SessionId::new();

        for owner in [Some(session_id), None, Some(session_id)] {
            store
                .append_event(InstanceEvent {
                    id: EventId::new(),
                    session_id: owner,
                    code: 903,
                    time: Utc::now(),
                    payload: json!({}),
                })
                .await
                .unwrap();
        }

        assert_eq!(store.list_events(None).await.unwrap().len(), 3);
        assert_eq!(store.list_events(Some(session_id)).await.unwrap().len(), 2);
    }
}
