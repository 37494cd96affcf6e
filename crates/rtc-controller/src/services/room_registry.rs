//! Room Session Registry.
//!
//! Owns the room lifecycle (first join creates the session, dismiss ends it)
//! and the participant map.
//!
//! # Concurrency
//!
//! Join and exit each write a single participant entry in one atomic store
//! call, so concurrent joins for different users never drop each other's
//! entries and never fail for contention. For the same user the last writer
//! wins.

use crate::errors::RtcError;
use crate::models::{
    DismissReport, DismissRequest, JoinRequest, JoinResponse, Participant, ParticipantStatus,
    RemoveParticipantRequest, RoomSession, SessionLookup, StopFailure,
};
use crate::observability::metrics;
use crate::repositories::LedgerStore;
use crate::services::credentials::CredentialIssuer;
use crate::services::gateway::RtcGateway;
use crate::services::task_engine::TaskEngine;
use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use tracing::instrument;

/// Resolve a session by exactly one of `id` / `roomId`.
///
/// Shared with the task engine, which scopes every task operation to a room.
pub async fn resolve_session(
    store: &dyn LedgerStore,
    lookup: &SessionLookup,
) -> Result<RoomSession, RtcError> {
    let found = match (lookup.id, lookup.room_id.as_deref()) {
        (Some(id), None) => store.get_session(id).await?,
        (None, Some(room_id)) if !room_id.is_empty() => store.find_session_by_room(room_id).await?,
        _ => {
            return Err(RtcError::InvalidArgument(
                "exactly one of id or roomId must be given".to_string(),
            ))
        }
    };

    found.ok_or_else(|| RtcError::NotFound("Room session not found".to_string()))
}

/// Room lifecycle and participant bookkeeping.
#[derive(Clone)]
pub struct RoomRegistry {
    store: Arc<dyn LedgerStore>,
    gateway: Arc<dyn RtcGateway>,
    credentials: Arc<dyn CredentialIssuer>,
    tasks: TaskEngine,
}

impl RoomRegistry {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        gateway: Arc<dyn RtcGateway>,
        credentials: Arc<dyn CredentialIssuer>,
        tasks: TaskEngine,
    ) -> Self {
        Self {
            store,
            gateway,
            credentials,
            tasks,
        }
    }

    pub async fn resolve(&self, lookup: &SessionLookup) -> Result<RoomSession, RtcError> {
        resolve_session(self.store.as_ref(), lookup).await
    }

    /// Join a room, creating its session on first join.
    ///
    /// Always issues a fresh credential and overwrites the user's entry.
    #[instrument(skip_all, name = "rtc.registry.join", fields(room_id = %room_id, user_id = %request.user_id))]
    pub async fn join(&self, room_id: &str, request: JoinRequest) -> Result<JoinResponse, RtcError> {
        require_non_empty("roomId", room_id)?;
        require_non_empty("userId", &request.user_id)?;
        request.options.validate()?;

        let credential = self
            .credentials
            .issue(&request.user_id, request.expire_seconds)?;
        let join_time = Utc::now();

        let session = match self.store.find_session_by_room(room_id).await? {
            Some(session) => session,
            None => {
                let created = self
                    .store
                    .insert_session(RoomSession::new(room_id, join_time))
                    .await?;
                tracing::info!(
                    target: "rtc.services.room_registry",
                    room_id = %room_id,
                    session_id = %created.id,
                    "Room session created"
                );
                created
            }
        };

        let entry = Participant {
            join_time,
            exit_time: None,
            credential: credential.clone(),
            status: ParticipantStatus::Joined,
            options: request.options.clone(),
        };
        let session = self
            .store
            .upsert_participant(session.id, &request.user_id, &entry)
            .await?;

        tracing::info!(
            target: "rtc.services.room_registry",
            room_id = %room_id,
            user_id = %request.user_id,
            "Participant joined"
        );

        Ok(JoinResponse {
            credential,
            session_id: session.id,
            room_id: session.room_id,
            options: request.options,
            join_time,
        })
    }

    /// Record that a participant left.
    ///
    /// # Errors
    ///
    /// - `RtcError::NotFound` if the room has no session or the user never joined
    #[instrument(skip_all, name = "rtc.registry.exit", fields(room_id = %room_id, user_id = %user_id))]
    pub async fn exit(&self, room_id: &str, user_id: &str) -> Result<(), RtcError> {
        let session = self.resolve(&SessionLookup::by_room(room_id)).await?;
        let exit_time = Utc::now();

        self.store
            .mark_participant_exited(session.id, user_id, exit_time)
            .await?
            .ok_or_else(|| {
                RtcError::NotFound(format!("User {user_id} has not joined room {room_id}"))
            })?;

        tracing::info!(
            target: "rtc.services.room_registry",
            room_id = %room_id,
            user_id = %user_id,
            "Participant exited"
        );
        Ok(())
    }

    /// Dismiss a room: provider-side first, then `end_time`, then stop every
    /// task still open. Each stop is attempted independently; failures are
    /// reported, not raised.
    #[instrument(skip_all, name = "rtc.registry.dismiss", fields(room_id = %room_id))]
    pub async fn dismiss(
        &self,
        room_id: &str,
        request: DismissRequest,
    ) -> Result<DismissReport, RtcError> {
        request.options.validate()?;
        let session = self.resolve(&SessionLookup::by_room(room_id)).await?;

        self.gateway.dismiss_room(room_id).await?;
        let session = self.store.end_session(session.id, Utc::now()).await?;

        let open = self.store.list_open_tasks(session.id).await?;
        let outcomes = join_all(open.into_iter().map(|task| async move {
            let task_id = task.id;
            let kind = task.kind;
            (task_id, kind, self.tasks.stop_loaded(task).await)
        }))
        .await;

        let mut stopped = Vec::new();
        let mut failed = Vec::new();
        for (task_id, kind, outcome) in outcomes {
            match outcome {
                Ok(_) => stopped.push(task_id),
                Err(e) => {
                    tracing::warn!(
                        target: "rtc.services.room_registry",
                        room_id = %room_id,
                        task_id = %task_id,
                        error = %e,
                        "Task stop failed during dismiss"
                    );
                    metrics::record_dismiss_stop_failure(kind.as_str());
                    failed.push(StopFailure {
                        task_id,
                        reason: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            target: "rtc.services.room_registry",
            room_id = %room_id,
            stopped = stopped.len(),
            failed = failed.len(),
            "Room dismissed"
        );

        Ok(DismissReport {
            session_id: session.id,
            end_time: session.end_time,
            stopped,
            failed,
        })
    }

    /// Kick a participant through the provider. The participant map is untouched.
    #[instrument(skip_all, name = "rtc.registry.remove_participant", fields(room_id = %room_id, user_id = %request.user_id))]
    pub async fn remove_participant(
        &self,
        room_id: &str,
        request: RemoveParticipantRequest,
    ) -> Result<(), RtcError> {
        require_non_empty("userId", &request.user_id)?;
        request.options.validate()?;
        let session = self.resolve(&SessionLookup::by_room(room_id)).await?;

        self.gateway
            .remove_participant(&session.room_id, &request.user_id)
            .await?;

        tracing::info!(
            target: "rtc.services.room_registry",
            room_id = %room_id,
            user_id = %request.user_id,
            "Participant removed"
        );
        Ok(())
    }
}

fn require_non_empty(name: &str, value: &str) -> Result<(), RtcError> {
    if value.trim().is_empty() {
        return Err(RtcError::InvalidArgument(format!("{name} must not be empty")));
    }
    Ok(())
}
