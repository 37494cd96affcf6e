//! Remote operation gateway for the provider control-plane.
//!
//! One [`HttpRtcGateway`] is built at startup and shared by every request
//! through `Arc<dyn RtcGateway>`; tests swap in [`mock::MockGateway`].
//!
//! # Wire protocol
//!
//! Action-style JSON over HTTPS. Every call is a `POST /` with the action
//! name in `X-TC-Action`, the API version in `X-TC-Version`, and a
//! `TC3-HMAC-SHA256` authorization header. Replies are wrapped in
//! `{"Response": {...}}`; a failed call carries `Response.Error.{Code,Message}`.
//!
//! # Security
//!
//! - The API secret key is only used to derive signing keys, never logged
//! - Bot credentials sent to the provider are never logged
//! - Provider error messages are logged server-side; callers see `Upstream`

use crate::config::{Config, RecordingStorageConfig};
use crate::errors::RtcError;
use crate::models::Credential;
use crate::observability::metrics;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::secret::{ExposeSecret, SecretString};
use reqwest::{Client, Url};
use ring::{digest, hmac};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tracing::{instrument, warn};

/// Provider API version sent with every action.
const API_VERSION: &str = "2019-07-22";

/// Service name used in the signing scope.
const SIGNING_SERVICE: &str = "trtc";

/// Connect timeout for provider requests.
const CONNECT_TIMEOUT_SECS: u64 = 5;

/// Room ids are passed as strings.
const ROOM_ID_TYPE_STRING: u8 = 1;

/// Describe status reported for a transcription that is still running.
const TRANSCRIPTION_IN_PROGRESS: &str = "InProgress";

/// Provider-side handle for a started or stopped task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTask {
    pub task_id: String,
    pub request_id: String,
}

/// Acknowledgement of a room-level action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAck {
    pub request_id: String,
}

/// Result of probing a transcription task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptionProbe {
    /// Raw provider status string.
    pub status: String,
    pub request_id: String,
}

impl TranscriptionProbe {
    pub fn is_running(&self) -> bool {
        self.status == TRANSCRIPTION_IN_PROGRESS
    }
}

/// Speech recognition settings for a transcription.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RecognizeConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hot_word_list: Option<String>,
}

/// Provider control-plane operations. Each is one network round-trip.
#[async_trait]
pub trait RtcGateway: Send + Sync {
    async fn start_recording(&self, room_id: &str, bot: &Credential)
        -> Result<RemoteTask, RtcError>;

    async fn stop_recording(&self, provider_task_id: &str) -> Result<RemoteTask, RtcError>;

    async fn start_transcription(
        &self,
        room_id: &str,
        bot: &Credential,
        recognize: &RecognizeConfig,
    ) -> Result<RemoteTask, RtcError>;

    async fn stop_transcription(&self, provider_task_id: &str) -> Result<RemoteTask, RtcError>;

    async fn probe_transcription(
        &self,
        provider_task_id: &str,
    ) -> Result<TranscriptionProbe, RtcError>;

    async fn dismiss_room(&self, room_id: &str) -> Result<RemoteAck, RtcError>;

    async fn remove_participant(&self, room_id: &str, user_id: &str)
        -> Result<RemoteAck, RtcError>;
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "Response")]
    response: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ProviderError {
    code: String,
    #[serde(default)]
    message: String,
}

/// HTTP implementation of [`RtcGateway`].
pub struct HttpRtcGateway {
    client: Client,
    endpoint: Url,
    host: String,
    region: String,
    secret_id: String,
    secret_key: SecretString,
    sdk_app_id: u64,
    recording_storage: Option<RecordingStorageConfig>,
}

impl HttpRtcGateway {
    /// Build the shared gateway from configuration.
    ///
    /// # Errors
    ///
    /// - `RtcError::InvalidArgument` if the endpoint is not an absolute URL
    /// - `RtcError::Internal` if the HTTP client cannot be built
    pub fn new(config: &Config) -> Result<Self, RtcError> {
        let endpoint = Url::parse(&config.api_endpoint).map_err(|e| {
            RtcError::InvalidArgument(format!("RTC_API_ENDPOINT is not a valid URL: {e}"))
        })?;
        let host = match (endpoint.host_str(), endpoint.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(RtcError::InvalidArgument(
                    "RTC_API_ENDPOINT has no host".to_string(),
                ))
            }
        };

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| {
                tracing::error!(target: "rtc.services.gateway", error = %e, "Failed to build HTTP client");
                RtcError::Internal
            })?;

        Ok(Self {
            client,
            endpoint,
            host,
            region: config.region.clone(),
            secret_id: config.api_secret_id.clone(),
            secret_key: config.api_secret_key.clone(),
            sdk_app_id: config.sdk_app_id,
            recording_storage: config.recording_storage.clone(),
        })
    }

    /// Send one action and unwrap the `Response` envelope.
    async fn call(&self, action: &str, operation: &str, body: &Value) -> Result<Value, RtcError> {
        let start = Instant::now();
        let result = self.send(action, body).await;
        let status = if result.is_ok() { "success" } else { "error" };
        metrics::record_remote_call(operation, status, start.elapsed());
        result
    }

    async fn send(&self, action: &str, body: &Value) -> Result<Value, RtcError> {
        let payload = serde_json::to_string(body).map_err(|e| {
            tracing::error!(target: "rtc.services.gateway", error = %e, action, "Failed to encode request");
            RtcError::Internal
        })?;
        let now = Utc::now();
        let authorization = self.authorization(&payload, now);

        let response = self
            .client
            .post(self.endpoint.clone())
            .header("Authorization", authorization)
            .header("Content-Type", "application/json; charset=utf-8")
            .header("X-TC-Action", action)
            .header("X-TC-Version", API_VERSION)
            .header("X-TC-Timestamp", now.timestamp().to_string())
            .header("X-TC-Region", &self.region)
            .body(payload)
            .send()
            .await
            .map_err(|e| {
                warn!(target: "rtc.services.gateway", error = %e, action, "Provider request failed");
                RtcError::Upstream(format!("{action}: request failed: {e}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(target: "rtc.services.gateway", status = %status, action, "Provider returned HTTP error");
            return Err(RtcError::Upstream(format!("{action}: HTTP {status}")));
        }

        let envelope: Envelope = response.json().await.map_err(|e| {
            warn!(target: "rtc.services.gateway", error = %e, action, "Malformed provider response");
            RtcError::Upstream(format!("{action}: malformed response"))
        })?;

        if let Some(error) = envelope.response.get("Error") {
            let error: ProviderError =
                serde_json::from_value(error.clone()).unwrap_or_else(|_| ProviderError {
                    code: "Unknown".to_string(),
                    message: error.to_string(),
                });
            warn!(
                target: "rtc.services.gateway",
                action,
                code = %error.code,
                message = %error.message,
                "Provider rejected action"
            );
            return Err(RtcError::Upstream(format!(
                "{action}: {}: {}",
                error.code, error.message
            )));
        }

        Ok(envelope.response)
    }

    /// `TC3-HMAC-SHA256` authorization header for one request.
    fn authorization(&self, payload: &str, now: DateTime<Utc>) -> String {
        let date = now.format("%Y-%m-%d").to_string();
        let scope = format!("{date}/{SIGNING_SERVICE}/tc3_request");

        let canonical_request = format!(
            "POST\n/\n\ncontent-type:application/json; charset=utf-8\nhost:{}\n\ncontent-type;host\n{}",
            self.host,
            sha256_hex(payload.as_bytes())
        );
        let string_to_sign = format!(
            "TC3-HMAC-SHA256\n{}\n{scope}\n{}",
            now.timestamp(),
            sha256_hex(canonical_request.as_bytes())
        );

        let secret_date = hmac_sha256(
            format!("TC3{}", self.secret_key.expose_secret()).as_bytes(),
            date.as_bytes(),
        );
        let secret_service = hmac_sha256(&secret_date, SIGNING_SERVICE.as_bytes());
        let secret_signing = hmac_sha256(&secret_service, b"tc3_request");
        let signature = hex::encode(hmac_sha256(&secret_signing, string_to_sign.as_bytes()));

        format!(
            "TC3-HMAC-SHA256 Credential={}/{scope}, SignedHeaders=content-type;host, Signature={signature}",
            self.secret_id
        )
    }

    fn storage_params(&self) -> Option<Value> {
        self.recording_storage.as_ref().map(|storage| {
            json!({
                "CloudStorage": {
                    "Vendor": 0,
                    "Region": storage.region,
                    "Bucket": storage.bucket,
                    "AccessKey": storage.secret_id,
                    "SecretKey": storage.secret_key.expose_secret(),
                }
            })
        })
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let key = hmac::Key::new(hmac::HMAC_SHA256, key);
    hmac::sign(&key, data).as_ref().to_vec()
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(digest::digest(&digest::SHA256, data))
}

fn string_field(response: &Value, field: &str, action: &str) -> Result<String, RtcError> {
    response
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            warn!(target: "rtc.services.gateway", action, field, "Provider response missing field");
            RtcError::Upstream(format!("{action}: response missing {field}"))
        })
}

fn remote_task(response: &Value, action: &str) -> Result<RemoteTask, RtcError> {
    Ok(RemoteTask {
        task_id: string_field(response, "TaskId", action)?,
        request_id: string_field(response, "RequestId", action)?,
    })
}

#[async_trait]
impl RtcGateway for HttpRtcGateway {
    #[instrument(skip_all, name = "rtc.gateway.start_recording", fields(room_id = %room_id))]
    async fn start_recording(
        &self,
        room_id: &str,
        bot: &Credential,
    ) -> Result<RemoteTask, RtcError> {
        let mut body = json!({
            "SdkAppId": self.sdk_app_id,
            "RoomId": room_id,
            "RoomIdType": ROOM_ID_TYPE_STRING,
            "UserId": bot.user_id,
            "UserSig": bot.user_sig,
            "RecordParams": {
                // single-stream, 30 s idle cutoff, audio+video, mp4
                "RecordMode": 1,
                "MaxIdleTime": 30,
                "StreamType": 0,
                "OutputFormat": 3,
            },
        });
        match (self.storage_params(), body.as_object_mut()) {
            (Some(storage), Some(fields)) => {
                fields.insert("StorageParams".to_string(), storage);
            }
            _ => {
                tracing::debug!(target: "rtc.services.gateway", "No recording storage configured, using provider default");
            }
        }

        let response = self
            .call("CreateCloudRecording", "start_recording", &body)
            .await?;
        remote_task(&response, "CreateCloudRecording")
    }

    #[instrument(skip_all, name = "rtc.gateway.stop_recording", fields(provider_task_id = %provider_task_id))]
    async fn stop_recording(&self, provider_task_id: &str) -> Result<RemoteTask, RtcError> {
        let body = json!({ "SdkAppId": self.sdk_app_id, "TaskId": provider_task_id });
        let response = self
            .call("DeleteCloudRecording", "stop_recording", &body)
            .await?;
        remote_task(&response, "DeleteCloudRecording")
    }

    #[instrument(skip_all, name = "rtc.gateway.start_transcription", fields(room_id = %room_id))]
    async fn start_transcription(
        &self,
        room_id: &str,
        bot: &Credential,
        recognize: &RecognizeConfig,
    ) -> Result<RemoteTask, RtcError> {
        let body = json!({
            "SdkAppId": self.sdk_app_id,
            "RoomId": room_id,
            "RoomIdType": ROOM_ID_TYPE_STRING,
            "TranscriptionParams": {
                "UserId": bot.user_id,
                "UserSig": bot.user_sig,
            },
            "RecognizeConfig": recognize,
        });
        let response = self
            .call("StartAITranscription", "start_transcription", &body)
            .await?;
        remote_task(&response, "StartAITranscription")
    }

    #[instrument(skip_all, name = "rtc.gateway.stop_transcription", fields(provider_task_id = %provider_task_id))]
    async fn stop_transcription(&self, provider_task_id: &str) -> Result<RemoteTask, RtcError> {
        let body = json!({ "SdkAppId": self.sdk_app_id, "TaskId": provider_task_id });
        let response = self
            .call("StopAITranscription", "stop_transcription", &body)
            .await?;
        // Stop replies do not always echo the task id.
        Ok(RemoteTask {
            task_id: provider_task_id.to_string(),
            request_id: string_field(&response, "RequestId", "StopAITranscription")?,
        })
    }

    #[instrument(skip_all, name = "rtc.gateway.probe_transcription", fields(provider_task_id = %provider_task_id))]
    async fn probe_transcription(
        &self,
        provider_task_id: &str,
    ) -> Result<TranscriptionProbe, RtcError> {
        let body = json!({ "SdkAppId": self.sdk_app_id, "TaskId": provider_task_id });
        let response = self
            .call("DescribeAITranscription", "probe_transcription", &body)
            .await?;
        Ok(TranscriptionProbe {
            status: string_field(&response, "Status", "DescribeAITranscription")?,
            request_id: string_field(&response, "RequestId", "DescribeAITranscription")?,
        })
    }

    #[instrument(skip_all, name = "rtc.gateway.dismiss_room", fields(room_id = %room_id))]
    async fn dismiss_room(&self, room_id: &str) -> Result<RemoteAck, RtcError> {
        let body = json!({ "SdkAppId": self.sdk_app_id, "RoomId": room_id });
        let response = self
            .call("DismissRoomByStrRoomId", "dismiss_room", &body)
            .await?;
        Ok(RemoteAck {
            request_id: string_field(&response, "RequestId", "DismissRoomByStrRoomId")?,
        })
    }

    #[instrument(skip_all, name = "rtc.gateway.remove_participant", fields(room_id = %room_id))]
    async fn remove_participant(
        &self,
        room_id: &str,
        user_id: &str,
    ) -> Result<RemoteAck, RtcError> {
        let body = json!({
            "SdkAppId": self.sdk_app_id,
            "RoomId": room_id,
            "UserIds": [user_id],
        });
        let response = self
            .call("RemoveUserByStrRoomId", "remove_participant", &body)
            .await?;
        Ok(RemoteAck {
            request_id: string_field(&response, "RequestId", "RemoveUserByStrRoomId")?,
        })
    }
}

/// Mock gateway for testing.
pub mod mock {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Gateway operation, for call accounting and failure injection.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum GatewayOp {
        StartRecording,
        StopRecording,
        StartTranscription,
        StopTranscription,
        ProbeTranscription,
        DismissRoom,
        RemoveParticipant,
    }

    /// In-process gateway that hands out sequential task and request ids.
    ///
    /// Provider task ids look like `mock-task-1`, request ids `mock-req-1`.
    #[derive(Default)]
    pub struct MockGateway {
        next_id: AtomicUsize,
        calls: Mutex<Vec<(GatewayOp, String)>>,
        failing_ops: HashSet<GatewayOp>,
        failing_tasks: HashSet<String>,
        running_transcriptions: HashSet<String>,
    }

    impl MockGateway {
        /// A gateway where every call succeeds.
        pub fn new() -> Self {
            Self::default()
        }

        /// Make every call of `op` fail with `Upstream`.
        pub fn fail_on(mut self, op: GatewayOp) -> Self {
            self.failing_ops.insert(op);
            self
        }

        /// Make stop calls for one provider task id fail with `Upstream`.
        pub fn fail_stop_of(mut self, provider_task_id: &str) -> Self {
            self.failing_tasks.insert(provider_task_id.to_string());
            self
        }

        /// Report `provider_task_id` as in progress when probed.
        pub fn with_running_transcription(mut self, provider_task_id: &str) -> Self {
            self.running_transcriptions
                .insert(provider_task_id.to_string());
            self
        }

        /// Number of calls made for `op`.
        pub fn call_count(&self, op: GatewayOp) -> usize {
            self.calls()
                .iter()
                .filter(|(called, _)| *called == op)
                .count()
        }

        /// Every call so far with its subject (room id or provider task id).
        pub fn calls(&self) -> Vec<(GatewayOp, String)> {
            self.calls.lock().map(|c| c.clone()).unwrap_or_default()
        }

        fn record(&self, op: GatewayOp, subject: &str) -> Result<usize, RtcError> {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push((op, subject.to_string()));
            }
            if self.failing_ops.contains(&op) {
                return Err(RtcError::Upstream(format!("mock {op:?} failure")));
            }
            Ok(self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
        }

        fn stop(&self, op: GatewayOp, provider_task_id: &str) -> Result<RemoteTask, RtcError> {
            let n = self.record(op, provider_task_id)?;
            if self.failing_tasks.contains(provider_task_id) {
                return Err(RtcError::Upstream(format!(
                    "mock stop failure for {provider_task_id}"
                )));
            }
            Ok(RemoteTask {
                task_id: provider_task_id.to_string(),
                request_id: format!("mock-req-{n}"),
            })
        }
    }

    #[async_trait]
    impl RtcGateway for MockGateway {
        async fn start_recording(
            &self,
            room_id: &str,
            _bot: &Credential,
        ) -> Result<RemoteTask, RtcError> {
            let n = self.record(GatewayOp::StartRecording, room_id)?;
            Ok(RemoteTask {
                task_id: format!("mock-task-{n}"),
                request_id: format!("mock-req-{n}"),
            })
        }

        async fn stop_recording(&self, provider_task_id: &str) -> Result<RemoteTask, RtcError> {
            self.stop(GatewayOp::StopRecording, provider_task_id)
        }

        async fn start_transcription(
            &self,
            room_id: &str,
            _bot: &Credential,
            _recognize: &RecognizeConfig,
        ) -> Result<RemoteTask, RtcError> {
            let n = self.record(GatewayOp::StartTranscription, room_id)?;
            Ok(RemoteTask {
                task_id: format!("mock-task-{n}"),
                request_id: format!("mock-req-{n}"),
            })
        }

        async fn stop_transcription(
            &self,
            provider_task_id: &str,
        ) -> Result<RemoteTask, RtcError> {
            self.stop(GatewayOp::StopTranscription, provider_task_id)
        }

        async fn probe_transcription(
            &self,
            provider_task_id: &str,
        ) -> Result<TranscriptionProbe, RtcError> {
            let n = self.record(GatewayOp::ProbeTranscription, provider_task_id)?;
            let status = if self.running_transcriptions.contains(provider_task_id) {
                TRANSCRIPTION_IN_PROGRESS
            } else {
                "Idle"
            };
            Ok(TranscriptionProbe {
                status: status.to_string(),
                request_id: format!("mock-req-{n}"),
            })
        }

        async fn dismiss_room(&self, room_id: &str) -> Result<RemoteAck, RtcError> {
            let n = self.record(GatewayOp::DismissRoom, room_id)?;
            Ok(RemoteAck {
                request_id: format!("mock-req-{n}"),
            })
        }

        async fn remove_participant(
            &self,
            room_id: &str,
            user_id: &str,
        ) -> Result<RemoteAck, RtcError> {
            let n = self.record(GatewayOp::RemoveParticipant, &format!("{room_id}/{user_id}"))?;
            Ok(RemoteAck {
                request_id: format!("mock-req-{n}"),
            })
        }
    }

}
