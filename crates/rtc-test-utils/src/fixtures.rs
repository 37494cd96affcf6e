//! Provider webhook fixtures.
//!
//! Envelopes in the provider's PascalCase shape, ready to POST to
//! `/api/v1/webhooks/rtc`.

use serde_json::{json, Value};

/// Callback timestamp used by every fixture (2023-11-14T22:13:20Z).
pub const FIXTURE_CALLBACK_TS_MS: i64 = 1_700_000_000_000;

/// A 903 "transcription round complete" envelope.
pub fn transcription_webhook(provider_task_id: &str, text: &str, round_id: &str) -> Value {
    json!({
        "EventGroupId": 9,
        "EventType": 903,
        "CallbackTs": FIXTURE_CALLBACK_TS_MS,
        "EventInfo": {
            "TaskId": provider_task_id,
            "Payload": {
                "UserId": "speaker",
                "Text": text,
                "StartTimeMs": FIXTURE_CALLBACK_TS_MS - 2_000,
                "EndTimeMs": FIXTURE_CALLBACK_TS_MS,
                "RoundId": round_id
            }
        }
    })
}

/// A 310 "recording files uploaded" envelope. Status 0 is success.
pub fn recording_webhook(provider_task_id: &str, status: i64, files: &[&str]) -> Value {
    json!({
        "EventGroupId": 3,
        "EventType": 310,
        "CallbackTs": FIXTURE_CALLBACK_TS_MS,
        "EventInfo": {
            "TaskId": provider_task_id,
            "Payload": { "Status": status, "FileList": files }
        }
    })
}

/// An event the controller only audits, attributed to a room.
pub fn room_event_webhook(room_id: &str, event_type: i64) -> Value {
    json!({
        "EventGroupId": 1,
        "EventType": event_type,
        "CallbackTs": FIXTURE_CALLBACK_TS_MS,
        "EventInfo": { "RoomId": room_id }
    })
}
