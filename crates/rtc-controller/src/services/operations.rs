//! Per-kind remote protocol.
//!
//! Each [`TaskKind`] maps onto a fixed set of gateway calls: start, stop and
//! probe. The set of kinds is closed, so dispatch is a `match` rather than a
//! callback supplied by the caller.

use crate::errors::RtcError;
use crate::models::{Credential, TaskKind};
use crate::services::gateway::{RecognizeConfig, RemoteTask, RtcGateway, TranscriptionProbe};

/// Kind-specific start arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStart {
    Recording,
    Transcription(RecognizeConfig),
}

impl TaskStart {
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskStart::Recording => TaskKind::Recording,
            TaskStart::Transcription(_) => TaskKind::Transcription,
        }
    }
}

/// Identity the controller's bot joins the room with, e.g. `record_r1`.
pub fn bot_identity(kind: TaskKind, room_id: &str) -> String {
    format!("{}_{room_id}", kind.as_str())
}

pub async fn start(
    gateway: &dyn RtcGateway,
    room_id: &str,
    bot: &Credential,
    params: &TaskStart,
) -> Result<RemoteTask, RtcError> {
    match params {
        TaskStart::Recording => gateway.start_recording(room_id, bot).await,
        TaskStart::Transcription(recognize) => {
            gateway.start_transcription(room_id, bot, recognize).await
        }
    }
}

pub async fn stop(
    gateway: &dyn RtcGateway,
    kind: TaskKind,
    provider_task_id: &str,
) -> Result<RemoteTask, RtcError> {
    match kind {
        TaskKind::Recording => gateway.stop_recording(provider_task_id).await,
        TaskKind::Transcription => gateway.stop_transcription(provider_task_id).await,
    }
}

/// Ask the provider whether a task is still running.
///
/// Recordings have no probe; `Ok(None)` means "cannot tell".
pub async fn probe(
    gateway: &dyn RtcGateway,
    kind: TaskKind,
    provider_task_id: &str,
) -> Result<Option<TranscriptionProbe>, RtcError> {
    match kind {
        TaskKind::Recording => Ok(None),
        TaskKind::Transcription => gateway.probe_transcription(provider_task_id).await.map(Some),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::services::gateway::mock::{GatewayOp, MockGateway};

    fn bot() -> Credential {
        Credential {
            sdk_app_id: 1,
            user_id: "bot".to_string(),
            user_sig: "sig".to_string(),
        }
    }

    #[test]
    fn test_bot_identity_uses_kind_tag() {
        assert_eq!(bot_identity(TaskKind::Recording, "r1"), "record_r1");
        assert_eq!(
            bot_identity(TaskKind::Transcription, "r1"),
            "ai_transcription_r1"
        );
    }

    #[tokio::test]
    async fn test_start_dispatches_by_kind() {
        let gateway = MockGateway::new();

        start(&gateway, "r1", &bot(), &TaskStart::Recording)
            .await
            .unwrap();
        start(
            &gateway,
            "r1",
            &bot(),
            &TaskStart::Transcription(RecognizeConfig::default()),
        )
        .await
        .unwrap();

        assert_eq!(gateway.call_count(GatewayOp::StartRecording), 1);
        assert_eq!(gateway.call_count(GatewayOp::StartTranscription), 1);
    }

    #[tokio::test]
    async fn test_stop_dispatches_by_kind() {
        let gateway = MockGateway::new();

        stop(&gateway, TaskKind::Recording, "p-1").await.unwrap();
        stop(&gateway, TaskKind::Transcription, "p-2").await.unwrap();

        assert_eq!(
            gateway.calls(),
            vec![
                (GatewayOp::StopRecording, "p-1".to_string()),
                (GatewayOp::StopTranscription, "p-2".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_recording_has_no_probe() {
        let gateway = MockGateway::new();

        assert!(probe(&gateway, TaskKind::Recording, "p-1")
            .await
            .unwrap()
            .is_none());
        assert_eq!(gateway.call_count(GatewayOp::ProbeTranscription), 0);
    }

    #[test]
    fn test_task_start_kind() {
        assert_eq!(TaskStart::Recording.kind(), TaskKind::Recording);
        assert_eq!(
            TaskStart::Transcription(RecognizeConfig::default()).kind(),
            TaskKind::Transcription
        );
    }
}
