//! Task Engine.
//!
//! Starts, stops, inspects and resumes provider-side recording and
//! transcription tasks, always scoped to a room session.
//!
//! Every transition calls the provider first and writes the ledger only
//! after the provider accepted it, so a failed remote call leaves the ledger
//! untouched. Stops are idempotent: a task with `stop_time` set is returned
//! as-is without another remote call.

use crate::errors::RtcError;
use crate::models::{
    RoomSession, SessionLookup, StartRecordingRequest, StartTranscriptionRequest, Task, TaskKind,
};
use crate::observability::metrics;
use crate::repositories::LedgerStore;
use crate::services::artifacts::ArtifactResolver;
use crate::services::credentials::CredentialIssuer;
use crate::services::gateway::{RecognizeConfig, RtcGateway};
use crate::services::operations::{self, TaskStart};
use crate::services::room_registry::resolve_session;
use chrono::Utc;
use common::extensions::Extensions;
use common::types::TaskId;
use std::sync::Arc;
use tracing::instrument;

/// Option keys consulted when the request leaves the recognizer unset.
const LANGUAGE_OPTION: &str = "language";
const HOT_WORD_LIST_OPTION: &str = "hotWordList";

#[derive(Clone)]
pub struct TaskEngine {
    store: Arc<dyn LedgerStore>,
    gateway: Arc<dyn RtcGateway>,
    credentials: Arc<dyn CredentialIssuer>,
    artifacts: Option<Arc<dyn ArtifactResolver>>,
}

impl TaskEngine {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        gateway: Arc<dyn RtcGateway>,
        credentials: Arc<dyn CredentialIssuer>,
        artifacts: Option<Arc<dyn ArtifactResolver>>,
    ) -> Self {
        Self {
            store,
            gateway,
            credentials,
            artifacts,
        }
    }

    #[instrument(skip_all, name = "rtc.tasks.start_recording", fields(room_id = %room_id))]
    pub async fn start_recording(
        &self,
        room_id: &str,
        request: StartRecordingRequest,
    ) -> Result<Task, RtcError> {
        let session = self.session(room_id).await?;
        self.start(&session, TaskStart::Recording, request.options)
            .await
    }

    /// Start a transcription, or adopt a still-running one.
    ///
    /// When `resumeTaskId` is given the provider is probed first. A running
    /// task is adopted without a new start; a probe miss or a probe failure
    /// falls through to a fresh start.
    ///
    /// # Errors
    ///
    /// - `RtcError::Mismatch` - the resumed task is recorded against another room
    #[instrument(skip_all, name = "rtc.tasks.start_transcription", fields(room_id = %room_id))]
    pub async fn start_transcription(
        &self,
        room_id: &str,
        request: StartTranscriptionRequest,
    ) -> Result<Task, RtcError> {
        let session = self.session(room_id).await?;

        if let Some(resume_id) = request.resume_task_id.as_deref().filter(|id| !id.is_empty()) {
            match operations::probe(self.gateway.as_ref(), TaskKind::Transcription, resume_id).await
            {
                Ok(Some(probe)) if probe.is_running() => {
                    return self
                        .adopt(&session, resume_id, probe.request_id, request.options)
                        .await;
                }
                Ok(_) => {
                    tracing::debug!(
                        target: "rtc.services.task_engine",
                        provider_task_id = %resume_id,
                        "Resume probe found no running task, starting fresh"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        target: "rtc.services.task_engine",
                        provider_task_id = %resume_id,
                        error = %e,
                        "Resume probe failed, starting fresh"
                    );
                }
            }
        }

        let recognize = recognize_config(&request);
        self.start(&session, TaskStart::Transcription(recognize), request.options)
            .await
    }

    /// Fetch a task and check it belongs to the room.
    pub async fn get_task(&self, task_id: TaskId, room_id: &str) -> Result<Task, RtcError> {
        let session = self.session(room_id).await?;
        let task = self
            .store
            .get_task(task_id)
            .await?
            .ok_or_else(|| RtcError::NotFound(format!("Task {task_id} not found")))?;

        if task.session_id != session.id {
            return Err(RtcError::Mismatch(format!(
                "Task {task_id} does not belong to room {room_id}"
            )));
        }
        Ok(task)
    }

    /// Stop a task of the given kind. Idempotent.
    #[instrument(skip_all, name = "rtc.tasks.stop", fields(room_id = %room_id, task_id = %task_id))]
    pub async fn stop_task(
        &self,
        task_id: TaskId,
        room_id: &str,
        kind: TaskKind,
    ) -> Result<Task, RtcError> {
        let task = self.get_task(task_id, room_id).await?;
        if task.kind != kind {
            return Err(RtcError::InvalidArgument(format!(
                "Task {task_id} is a {} task, not {kind}",
                task.kind
            )));
        }
        self.stop_loaded(task).await
    }

    /// Stop an already-loaded task. Used by room dismiss as well.
    pub async fn stop_loaded(&self, task: Task) -> Result<Task, RtcError> {
        if task.is_stopped() {
            tracing::debug!(
                target: "rtc.services.task_engine",
                task_id = %task.id,
                "Task already stopped"
            );
            metrics::record_task_transition(task.kind.as_str(), "stop_noop");
            return Ok(task);
        }

        let remote =
            operations::stop(self.gateway.as_ref(), task.kind, &task.provider_task_id).await?;
        let stopped = self
            .store
            .mark_task_stopped(task.id, &remote.request_id, Utc::now())
            .await?;

        metrics::record_task_transition(stopped.kind.as_str(), "stopped");
        tracing::info!(
            target: "rtc.services.task_engine",
            task_id = %stopped.id,
            kind = %stopped.kind,
            provider_task_id = %stopped.provider_task_id,
            "Task stopped"
        );
        Ok(stopped)
    }

    /// Pull a recording's uploaded files into the artifact store.
    ///
    /// Intended for when the upload webhook never arrived. Returns the task
    /// unchanged if it already has a result, if the bucket holds nothing
    /// under the task's prefix, or if no artifact store is configured.
    #[instrument(skip_all, name = "rtc.tasks.check_recording", fields(room_id = %room_id, task_id = %task_id))]
    pub async fn check_recording(&self, task_id: TaskId, room_id: &str) -> Result<Task, RtcError> {
        let task = self.get_task(task_id, room_id).await?;
        if task.kind != TaskKind::Recording {
            return Err(RtcError::InvalidArgument(format!(
                "Task {task_id} is not a recording"
            )));
        }
        if task.result.is_some() {
            return Ok(task);
        }

        let Some(resolver) = self.artifacts.as_ref() else {
            tracing::warn!(
                target: "rtc.services.task_engine",
                task_id = %task.id,
                "No artifact store configured, cannot check recording"
            );
            return Ok(task);
        };

        let artifacts = resolver
            .resolve_by_prefix(&format!("{}/", task.provider_task_id))
            .await?;
        if artifacts.is_empty() {
            return Ok(task);
        }

        let result = serde_json::to_value(&artifacts).map_err(|e| {
            tracing::error!(target: "rtc.services.task_engine", error = %e, "Failed to encode artifacts");
            RtcError::Internal
        })?;
        let completed = self
            .store
            .record_task_result(task.id, result, None, Utc::now())
            .await?;

        metrics::record_task_transition(completed.kind.as_str(), "completed");
        tracing::info!(
            target: "rtc.services.task_engine",
            task_id = %completed.id,
            files = artifacts.len(),
            "Recording artifacts collected"
        );
        Ok(completed)
    }

    async fn session(&self, room_id: &str) -> Result<RoomSession, RtcError> {
        resolve_session(self.store.as_ref(), &SessionLookup::by_room(room_id)).await
    }

    async fn start(
        &self,
        session: &RoomSession,
        params: TaskStart,
        options: Extensions,
    ) -> Result<Task, RtcError> {
        options.validate()?;
        let kind = params.kind();

        // Step 1: credential for the bot that joins on the controller's behalf
        let bot = self
            .credentials
            .issue(&operations::bot_identity(kind, &session.room_id), None)?;

        // Step 2: provider start; nothing is written if this fails
        let remote =
            operations::start(self.gateway.as_ref(), &session.room_id, &bot, &params).await?;

        // Step 3: ledger
        let task = self
            .store
            .insert_task(Task {
                id: TaskId::new(),
                session_id: session.id,
                kind,
                provider_task_id: remote.task_id,
                start_request_id: remote.request_id,
                stop_request_id: None,
                result: None,
                start_time: Utc::now(),
                stop_time: None,
                options,
            })
            .await?;

        metrics::record_task_transition(kind.as_str(), "started");
        tracing::info!(
            target: "rtc.services.task_engine",
            task_id = %task.id,
            kind = %kind,
            provider_task_id = %task.provider_task_id,
            "Task started"
        );
        Ok(task)
    }

    /// Take over a transcription the provider reports as running.
    async fn adopt(
        &self,
        session: &RoomSession,
        provider_task_id: &str,
        probe_request_id: String,
        options: Extensions,
    ) -> Result<Task, RtcError> {
        if let Some(existing) = self.store.find_task_by_provider_id(provider_task_id).await? {
            if existing.session_id != session.id {
                return Err(RtcError::Mismatch(format!(
                    "Task {provider_task_id} does not belong to room {}",
                    session.room_id
                )));
            }
            if existing.kind != TaskKind::Transcription {
                return Err(RtcError::InvalidArgument(format!(
                    "Task {provider_task_id} is not a transcription"
                )));
            }
            metrics::record_task_transition(existing.kind.as_str(), "resumed");
            return Ok(existing);
        }

        options.validate()?;
        let task = self
            .store
            .insert_task(Task {
                id: TaskId::new(),
                session_id: session.id,
                kind: TaskKind::Transcription,
                provider_task_id: provider_task_id.to_string(),
                start_request_id: probe_request_id,
                stop_request_id: None,
                result: None,
                start_time: Utc::now(),
                stop_time: None,
                options,
            })
            .await?;

        metrics::record_task_transition(task.kind.as_str(), "resumed");
        tracing::info!(
            target: "rtc.services.task_engine",
            task_id = %task.id,
            provider_task_id = %provider_task_id,
            "Running transcription adopted"
        );
        Ok(task)
    }
}

/// Explicit request fields win over the option fallbacks.
fn recognize_config(request: &StartTranscriptionRequest) -> RecognizeConfig {
    let from_options = |key: &str| request.options.get_text(key).map(str::to_string);
    RecognizeConfig {
        language: request
            .language
            .clone()
            .or_else(|| from_options(LANGUAGE_OPTION)),
        hot_word_list: request
            .hot_word_list
            .clone()
            .or_else(|| from_options(HOT_WORD_LIST_OPTION)),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::{JoinRequest, TaskState};
    use crate::repositories::InMemoryLedgerStore;
    use crate::services::artifacts::mock::MockArtifactResolver;
    use crate::services::credentials::mock::FixedCredentialIssuer;
    use crate::services::gateway::mock::{GatewayOp, MockGateway};
    use crate::services::room_registry::RoomRegistry;
    use common::extensions::ExtensionValue;

    struct Harness {
        store: Arc<InMemoryLedgerStore>,
        gateway: Arc<MockGateway>,
        credentials: Arc<FixedCredentialIssuer>,
        engine: TaskEngine,
        registry: RoomRegistry,
    }

    fn harness_with(
        gateway: MockGateway,
        artifacts: Option<Arc<dyn ArtifactResolver>>,
    ) -> Harness {
        let store = Arc::new(InMemoryLedgerStore::new());
        let gateway = Arc::new(gateway);
        let credentials = Arc::new(FixedCredentialIssuer::new(1));
        let engine = TaskEngine::new(
            store.clone(),
            gateway.clone(),
            credentials.clone(),
            artifacts,
        );
        let registry = RoomRegistry::new(
            store.clone(),
            gateway.clone(),
            credentials.clone(),
            engine.clone(),
        );
        Harness {
            store,
            gateway,
            credentials,
            engine,
            registry,
        }
    }

    fn harness() -> Harness {
        harness_with(MockGateway::new(), None)
    }

    async fn open_room(h: &Harness, room_id: &str) {
        h.registry
            .join(
                room_id,
                JoinRequest {
                    user_id: "u1".to_string(),
                    expire_seconds: None,
                    options: Extensions::new(),
                },
            )
            .await
            .unwrap();
    }

    fn resume(provider_task_id: &str) -> StartTranscriptionRequest {
        StartTranscriptionRequest {
            resume_task_id: Some(provider_task_id.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_start_recording_records_remote_ids() {
        let h = harness();
        open_room(&h, "r1").await;

        let task = h
            .engine
            .start_recording("r1", StartRecordingRequest::default())
            .await
            .unwrap();

        assert_eq!(task.kind, TaskKind::Recording);
        assert_eq!(task.provider_task_id, "mock-task-1");
        assert_eq!(task.start_request_id, "mock-req-1");
        assert_eq!(task.state(), TaskState::Running);
        assert!(h.credentials.issued().contains(&"record_r1".to_string()));
    }

    #[tokio::test]
    async fn test_start_requires_session() {
        let h = harness();

        let result = h
            .engine
            .start_recording("nope", StartRecordingRequest::default())
            .await;

        assert!(matches!(result, Err(RtcError::NotFound(_))));
        assert_eq!(h.gateway.call_count(GatewayOp::StartRecording), 0);
    }

    #[tokio::test]
    async fn test_failed_start_writes_nothing() {
        let h = harness_with(MockGateway::new().fail_on(GatewayOp::StartRecording), None);
        open_room(&h, "r1").await;

        let result = h
            .engine
            .start_recording("r1", StartRecordingRequest::default())
            .await;
        assert!(matches!(result, Err(RtcError::Upstream(_))));

        let session = h.registry.resolve(&SessionLookup::by_room("r1")).await.unwrap();
        assert!(h.store.list_open_tasks(session.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let h = harness();
        open_room(&h, "r1").await;
        let task = h
            .engine
            .start_recording("r1", StartRecordingRequest::default())
            .await
            .unwrap();

        let first = h
            .engine
            .stop_task(task.id, "r1", TaskKind::Recording)
            .await
            .unwrap();
        let second = h
            .engine
            .stop_task(task.id, "r1", TaskKind::Recording)
            .await
            .unwrap();

        assert!(first.stop_time.is_some());
        assert_eq!(first.stop_time, second.stop_time);
        assert_eq!(first.stop_request_id, second.stop_request_id);
        assert_eq!(h.gateway.call_count(GatewayOp::StopRecording), 1);
    }

    #[tokio::test]
    async fn test_failed_stop_leaves_task_running() {
        let h = harness_with(MockGateway::new().fail_stop_of("mock-task-1"), None);
        open_room(&h, "r1").await;
        let task = h
            .engine
            .start_recording("r1", StartRecordingRequest::default())
            .await
            .unwrap();

        let result = h.engine.stop_task(task.id, "r1", TaskKind::Recording).await;
        assert!(matches!(result, Err(RtcError::Upstream(_))));

        let stored = h.engine.get_task(task.id, "r1").await.unwrap();
        assert!(stored.stop_time.is_none());
    }

    #[tokio::test]
    async fn test_stop_rejects_wrong_kind() {
        let h = harness();
        open_room(&h, "r1").await;
        let task = h
            .engine
            .start_recording("r1", StartRecordingRequest::default())
            .await
            .unwrap();

        let result = h
            .engine
            .stop_task(task.id, "r1", TaskKind::Transcription)
            .await;
        assert!(matches!(result, Err(RtcError::InvalidArgument(_))));
        assert_eq!(h.gateway.call_count(GatewayOp::StopTranscription), 0);
    }

    #[tokio::test]
    async fn test_task_from_other_room_is_mismatch() {
        let h = harness();
        open_room(&h, "r1").await;
        open_room(&h, "r2").await;
        let task = h
            .engine
            .start_recording("r1", StartRecordingRequest::default())
            .await
            .unwrap();

        let get = h.engine.get_task(task.id, "r2").await;
        assert!(matches!(get, Err(RtcError::Mismatch(_))));

        let stop = h.engine.stop_task(task.id, "r2", TaskKind::Recording).await;
        assert!(matches!(stop, Err(RtcError::Mismatch(_))));
        assert_eq!(h.gateway.call_count(GatewayOp::StopRecording), 0);

        let unknown = h.engine.get_task(TaskId::new(), "r1").await;
        assert!(matches!(unknown, Err(RtcError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_resume_adopts_running_transcription() {
        let h = harness_with(
            MockGateway::new().with_running_transcription("remote-7"),
            None,
        );
        open_room(&h, "r1").await;

        let task = h
            .engine
            .start_transcription("r1", resume("remote-7"))
            .await
            .unwrap();

        assert_eq!(task.provider_task_id, "remote-7");
        assert_eq!(task.kind, TaskKind::Transcription);
        assert_eq!(h.gateway.call_count(GatewayOp::StartTranscription), 0);

        // Resuming again hands back the same ledger entry
        let again = h
            .engine
            .start_transcription("r1", resume("remote-7"))
            .await
            .unwrap();
        assert_eq!(again.id, task.id);
    }

    #[tokio::test]
    async fn test_resume_of_known_task_returns_it() {
        let h = harness_with(
            MockGateway::new().with_running_transcription("mock-task-1"),
            None,
        );
        open_room(&h, "r1").await;
        let started = h
            .engine
            .start_transcription("r1", StartTranscriptionRequest::default())
            .await
            .unwrap();

        let resumed = h
            .engine
            .start_transcription("r1", resume(&started.provider_task_id))
            .await
            .unwrap();

        assert_eq!(resumed.id, started.id);
        assert_eq!(h.gateway.call_count(GatewayOp::StartTranscription), 1);
    }

    #[tokio::test]
    async fn test_resume_of_other_rooms_task_is_mismatch() {
        let h = harness_with(
            MockGateway::new().with_running_transcription("mock-task-1"),
            None,
        );
        open_room(&h, "r1").await;
        open_room(&h, "r2").await;
        h.engine
            .start_transcription("r1", StartTranscriptionRequest::default())
            .await
            .unwrap();

        let result = h.engine.start_transcription("r2", resume("mock-task-1")).await;
        assert!(matches!(result, Err(RtcError::Mismatch(_))));
    }

    #[tokio::test]
    async fn test_resume_of_recording_is_rejected() {
        let h = harness_with(
            MockGateway::new().with_running_transcription("mock-task-1"),
            None,
        );
        open_room(&h, "r1").await;
        let recording = h
            .engine
            .start_recording("r1", StartRecordingRequest::default())
            .await
            .unwrap();
        assert_eq!(recording.provider_task_id, "mock-task-1");

        let result = h
            .engine
            .start_transcription("r1", resume(&recording.provider_task_id))
            .await;

        assert!(matches!(result, Err(RtcError::InvalidArgument(_))));
        assert_eq!(h.gateway.call_count(GatewayOp::StartTranscription), 0);
        let stored = h.store.get_task(recording.id).await.unwrap().unwrap();
        assert_eq!(stored.kind, TaskKind::Recording);
    }

    #[tokio::test]
    async fn test_resume_miss_starts_fresh() {
        let h = harness();
        open_room(&h, "r1").await;

        let task = h
            .engine
            .start_transcription("r1", resume("gone"))
            .await
            .unwrap();

        assert_ne!(task.provider_task_id, "gone");
        assert_eq!(h.gateway.call_count(GatewayOp::ProbeTranscription), 1);
        assert_eq!(h.gateway.call_count(GatewayOp::StartTranscription), 1);
    }

    #[tokio::test]
    async fn test_resume_probe_failure_starts_fresh() {
        let h = harness_with(
            MockGateway::new().fail_on(GatewayOp::ProbeTranscription),
            None,
        );
        open_room(&h, "r1").await;

        let task = h
            .engine
            .start_transcription("r1", resume("remote-7"))
            .await
            .unwrap();

        assert_eq!(task.kind, TaskKind::Transcription);
        assert_eq!(h.gateway.call_count(GatewayOp::StartTranscription), 1);
    }

    #[test]
    fn test_recognize_config_prefers_explicit_fields() {
        let options = Extensions::new()
            .with("language", ExtensionValue::Text("en".to_string()))
            .with("hotWordList", ExtensionValue::Text("rust|11".to_string()));

        let from_options = recognize_config(&StartTranscriptionRequest {
            options: options.clone(),
            ..Default::default()
        });
        assert_eq!(from_options.language.as_deref(), Some("en"));
        assert_eq!(from_options.hot_word_list.as_deref(), Some("rust|11"));

        let explicit = recognize_config(&StartTranscriptionRequest {
            language: Some("zh".to_string()),
            options,
            ..Default::default()
        });
        assert_eq!(explicit.language.as_deref(), Some("zh"));
        assert_eq!(explicit.hot_word_list.as_deref(), Some("rust|11"));
    }

    #[tokio::test]
    async fn test_check_recording_collects_artifacts() {
        let resolver = Arc::new(MockArtifactResolver::with_objects(&[
            "mock-task-1/a.mp4",
            "mock-task-1/b.mp4",
            "other/c.mp4",
        ]));
        let h = harness_with(MockGateway::new(), Some(resolver.clone()));
        open_room(&h, "r1").await;
        let task = h
            .engine
            .start_recording("r1", StartRecordingRequest::default())
            .await
            .unwrap();

        let checked = h.engine.check_recording(task.id, "r1").await.unwrap();

        let result = checked.result.expect("result should be recorded");
        assert_eq!(result.as_array().map(Vec::len), Some(2));
        assert!(checked.stop_time.is_some());
        assert_eq!(resolver.remaining(), vec!["other/c.mp4".to_string()]);

        // Once a result exists the bucket is not consulted again
        h.engine.check_recording(task.id, "r1").await.unwrap();
        assert_eq!(resolver.call_count(), 1);
    }

    #[tokio::test]
    async fn test_check_recording_with_empty_bucket() {
        let resolver = Arc::new(MockArtifactResolver::new());
        let h = harness_with(MockGateway::new(), Some(resolver));
        open_room(&h, "r1").await;
        let task = h
            .engine
            .start_recording("r1", StartRecordingRequest::default())
            .await
            .unwrap();

        let checked = h.engine.check_recording(task.id, "r1").await.unwrap();
        assert!(checked.result.is_none());
        assert!(checked.stop_time.is_none());
    }

    #[tokio::test]
    async fn test_check_recording_rejects_transcription() {
        let h = harness();
        open_room(&h, "r1").await;
        let task = h
            .engine
            .start_transcription("r1", StartTranscriptionRequest::default())
            .await
            .unwrap();

        let result = h.engine.check_recording(task.id, "r1").await;
        assert!(matches!(result, Err(RtcError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_check_recording_without_store_is_noop() {
        let h = harness();
        open_room(&h, "r1").await;
        let task = h
            .engine
            .start_recording("r1", StartRecordingRequest::default())
            .await
            .unwrap();

        let checked = h.engine.check_recording(task.id, "r1").await.unwrap();
        assert_eq!(checked, task);
    }
}
