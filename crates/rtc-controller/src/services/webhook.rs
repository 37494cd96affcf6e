//! Webhook reconciliation.
//!
//! The provider reports asynchronous completions by webhook. Every delivery
//! is appended to the audit log before anything else happens, even when it
//! turns out to be malformed or unknown. Known event types then write a
//! result onto the matching task:
//!
//! | EventType | Meaning                  | Effect                                   |
//! |-----------|--------------------------|------------------------------------------|
//! | 903       | transcription round done | result = sentence, stop request = round  |
//! | 310       | recording files uploaded | result = rehosted file ids (or raw keys) |
//!
//! Redelivery is safe: a repeat overwrites the result with the same value and
//! `stop_time` keeps its first value.

use crate::errors::RtcError;
use crate::models::{
    EventInfo, InstanceEvent, RecordingPayload, StoredArtifact, Task, TranscriptionPayload,
    TranscriptionResult, WebhookEnvelope, EVENT_RECORDING_UPLOADED, EVENT_TRANSCRIPTION_COMPLETE,
    RECORDING_STATUS_SUCCESS,
};
use crate::observability::metrics;
use crate::repositories::LedgerStore;
use crate::services::artifacts::ArtifactResolver;
use chrono::{DateTime, Utc};
use common::types::{EventId, SessionId, TaskId};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::instrument;

/// What a delivery did to the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum WebhookOutcome {
    /// A task result was written.
    Applied {
        #[serde(rename = "taskId")]
        task_id: TaskId,
    },
    /// A known event type that asks for no change (e.g. a failed upload).
    Ignored,
    /// Unknown event type; only the audit entry was written.
    Audited,
}

impl WebhookOutcome {
    fn label(&self) -> &'static str {
        match self {
            WebhookOutcome::Applied { .. } => "applied",
            WebhookOutcome::Ignored => "ignored",
            WebhookOutcome::Audited => "audited",
        }
    }
}

#[derive(Clone)]
pub struct WebhookReconciler {
    store: Arc<dyn LedgerStore>,
    artifacts: Option<Arc<dyn ArtifactResolver>>,
}

impl WebhookReconciler {
    pub fn new(store: Arc<dyn LedgerStore>, artifacts: Option<Arc<dyn ArtifactResolver>>) -> Self {
        Self { store, artifacts }
    }

    /// Audit and apply one webhook delivery.
    ///
    /// # Errors
    ///
    /// - `RtcError::InvalidArgument` - the body is not a webhook envelope, or
    ///   a known event type carries a malformed payload (still audited)
    /// - `RtcError::NotFound` - no task matches the event's task id (still audited)
    #[instrument(skip_all, name = "rtc.webhook.dispatch")]
    pub async fn dispatch(&self, raw: Value) -> Result<WebhookOutcome, RtcError> {
        let envelope: Option<WebhookEnvelope> = serde_json::from_value(raw.clone()).ok();

        let code = envelope.as_ref().map_or(0, |e| e.event_type);
        let time = envelope
            .as_ref()
            .and_then(|e| e.callback_ts)
            .and_then(DateTime::from_timestamp_millis)
            .unwrap_or_else(Utc::now);
        let session_id = match envelope.as_ref() {
            Some(e) => self.owning_session(&e.event_info).await,
            None => None,
        };

        self.store
            .append_event(InstanceEvent {
                id: EventId::new(),
                session_id,
                code,
                time,
                payload: raw,
            })
            .await?;

        let Some(envelope) = envelope else {
            metrics::record_webhook_event(code, "rejected");
            return Err(RtcError::InvalidArgument(
                "body is not a webhook envelope".to_string(),
            ));
        };

        let outcome = match envelope.event_type {
            EVENT_TRANSCRIPTION_COMPLETE => self.transcription_complete(&envelope.event_info).await,
            EVENT_RECORDING_UPLOADED => self.recording_uploaded(&envelope.event_info).await,
            other => {
                tracing::debug!(
                    target: "rtc.services.webhook",
                    event_type = other,
                    "Unhandled event type audited"
                );
                Ok(WebhookOutcome::Audited)
            }
        };

        match &outcome {
            Ok(applied) => metrics::record_webhook_event(envelope.event_type, applied.label()),
            Err(e) => {
                tracing::warn!(
                    target: "rtc.services.webhook",
                    event_type = envelope.event_type,
                    error = %e,
                    "Webhook not applied"
                );
                metrics::record_webhook_event(envelope.event_type, "rejected");
            }
        }
        outcome
    }

    /// Session the event belongs to: the task's session, else the room's
    /// live session, else none.
    async fn owning_session(&self, info: &EventInfo) -> Option<SessionId> {
        if let Some(task_id) = info.task_id.as_deref() {
            match self.store.find_task_by_provider_id(task_id).await {
                Ok(Some(task)) => return Some(task.session_id),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(target: "rtc.services.webhook", error = %e, "Task lookup for audit failed");
                }
            }
        }

        let room_id = info.room_id()?;
        match self.store.find_session_by_room(&room_id).await {
            Ok(session) => session.map(|s| s.id),
            Err(e) => {
                tracing::warn!(target: "rtc.services.webhook", error = %e, "Session lookup for audit failed");
                None
            }
        }
    }

    async fn transcription_complete(&self, info: &EventInfo) -> Result<WebhookOutcome, RtcError> {
        let payload: TranscriptionPayload = serde_json::from_value(info.payload.clone())
            .map_err(|e| RtcError::InvalidArgument(format!("malformed transcription payload: {e}")))?;
        let task_id = required_task_id(info)?;

        let result = TranscriptionResult {
            user_id: payload.user_id,
            text: payload.text,
            start_time: millis(payload.start_time_ms, "StartTimeMs")?,
            end_time: millis(payload.end_time_ms, "EndTimeMs")?,
        };
        let result = encode(&result)?;

        let task = self.task_for(task_id).await?;
        let updated = self
            .store
            .record_task_result(task.id, result, Some(&payload.round_id), Utc::now())
            .await?;

        metrics::record_task_transition(updated.kind.as_str(), "completed");
        tracing::info!(
            target: "rtc.services.webhook",
            task_id = %updated.id,
            round_id = %payload.round_id,
            "Transcription result recorded"
        );
        Ok(WebhookOutcome::Applied { task_id: updated.id })
    }

    async fn recording_uploaded(&self, info: &EventInfo) -> Result<WebhookOutcome, RtcError> {
        let payload: RecordingPayload = serde_json::from_value(info.payload.clone())
            .map_err(|e| RtcError::InvalidArgument(format!("malformed recording payload: {e}")))?;
        if payload.status != RECORDING_STATUS_SUCCESS {
            tracing::info!(
                target: "rtc.services.webhook",
                status = payload.status,
                "Recording upload reported failure, nothing to record"
            );
            return Ok(WebhookOutcome::Ignored);
        }

        let task_id = required_task_id(info)?;
        let task = self.task_for(task_id).await?;

        let result = match self.artifacts.as_ref() {
            Some(resolver) => {
                // Rehosting deletes the source object, so keys already collected
                // (by an earlier delivery or a poll) cannot be resolved again.
                let mut artifacts = rehosted(&task);
                let pending: Vec<String> = payload
                    .file_list
                    .iter()
                    .filter(|key| !artifacts.iter().any(|a| &a.source_key == *key))
                    .cloned()
                    .collect();
                if pending.is_empty() && task.result.is_some() {
                    tracing::debug!(
                        target: "rtc.services.webhook",
                        task_id = %task.id,
                        "Recording files already collected"
                    );
                    return Ok(WebhookOutcome::Applied { task_id: task.id });
                }
                artifacts.extend(resolver.resolve_by_keys(&pending).await?);
                encode(&artifacts)?
            }
            None => encode(&payload.file_list)?,
        };
        let updated = self
            .store
            .record_task_result(task.id, result, None, Utc::now())
            .await?;

        metrics::record_task_transition(updated.kind.as_str(), "completed");
        tracing::info!(
            target: "rtc.services.webhook",
            task_id = %updated.id,
            files = payload.file_list.len(),
            "Recording files recorded"
        );
        Ok(WebhookOutcome::Applied { task_id: updated.id })
    }

    async fn task_for(&self, provider_task_id: &str) -> Result<Task, RtcError> {
        self.store
            .find_task_by_provider_id(provider_task_id)
            .await?
            .ok_or_else(|| RtcError::NotFound(format!("No task with TaskId {provider_task_id}")))
    }
}

/// Artifacts already stored on a task. Anything else (no result yet, or
/// raw keys recorded without a resolver) counts as nothing collected.
fn rehosted(task: &Task) -> Vec<StoredArtifact> {
    task.result
        .clone()
        .and_then(|result| serde_json::from_value(result).ok())
        .unwrap_or_default()
}

fn required_task_id(info: &EventInfo) -> Result<&str, RtcError> {
    info.task_id
        .as_deref()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| RtcError::InvalidArgument("EventInfo.TaskId is required".to_string()))
}

fn millis(value: i64, field: &str) -> Result<DateTime<Utc>, RtcError> {
    DateTime::from_timestamp_millis(value)
        .ok_or_else(|| RtcError::InvalidArgument(format!("{field} is out of range")))
}

fn encode<T: Serialize>(value: &T) -> Result<Value, RtcError> {
    serde_json::to_value(value).map_err(|e| {
        tracing::error!(target: "rtc.services.webhook", error = %e, "Failed to encode task result");
        RtcError::Internal
    })
}
