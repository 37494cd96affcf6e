//! PostgreSQL ledger integration tests.
//!
//! Need a live database: `DATABASE_URL=postgresql://... cargo test -- --ignored`.

use chrono::Utc;
use common::extensions::Extensions;
use common::types::TaskId;
use rtc_controller::models::{
    Credential, Participant, ParticipantStatus, RoomSession, Task, TaskKind,
};
use rtc_controller::repositories::{LedgerStore, PgLedgerStore};
use rtc_test_utils::{transcription_webhook, TestRtcServer};
use serde_json::json;
use sqlx::PgPool;

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

fn task_for(session: &RoomSession, provider_task_id: &str) -> Task {
    Task {
        id: TaskId::new(),
        session_id: session.id,
        kind: TaskKind::Recording,
        provider_task_id: provider_task_id.to_string(),
        start_request_id: "req-1".to_string(),
        stop_request_id: None,
        result: None,
        start_time: Utc::now(),
        stop_time: None,
        options: Extensions::new(),
    }
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_live_room_id_is_unique(pool: PgPool) -> Result<(), anyhow::Error> {
    let store = PgLedgerStore::new(pool);

    let first = store.insert_session(RoomSession::new("r1", Utc::now())).await?;
    let second = store.insert_session(RoomSession::new("r1", Utc::now())).await?;

    assert_eq!(first.id, second.id);
    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_participant_writes_are_per_user(pool: PgPool) -> Result<(), anyhow::Error> {
    let store = PgLedgerStore::new(pool);
    let session = store.insert_session(RoomSession::new("r1", Utc::now())).await?;

    let writes = (0..16).map(|i| {
        let store = store.clone();
        let session_id = session.id;
        async move {
            let user_id = format!("u{i}");
            store
                .upsert_participant(session_id, &user_id, &participant(&user_id))
                .await
        }
    });
    for result in futures::future::join_all(writes).await {
        result?;
    }

    let exit_time = Utc::now();
    let exited = store
        .mark_participant_exited(session.id, "u3", exit_time)
        .await?
        .ok_or_else(|| anyhow::anyhow!("u3 should have an entry"))?;
    assert_eq!(exited.participants.len(), 16);
    assert_eq!(exited.version, 17);
    let entry = exited.participants.get("u3");
    assert_eq!(
        entry.and_then(|p| p.exit_time).map(|t| t.timestamp_micros()),
        Some(exit_time.timestamp_micros())
    );
    assert_eq!(entry.map(|p| p.status), Some(ParticipantStatus::Exited));

    assert!(store
        .mark_participant_exited(session.id, "ghost", exit_time)
        .await?
        .is_none());
    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_stop_time_is_set_once(pool: PgPool) -> Result<(), anyhow::Error> {
    let store = PgLedgerStore::new(pool);
    let session = store.insert_session(RoomSession::new("r1", Utc::now())).await?;
    let task = store.insert_task(task_for(&session, "p-1")).await?;

    let stopped = store.mark_task_stopped(task.id, "stop-1", Utc::now()).await?;
    let again = store.mark_task_stopped(task.id, "stop-2", Utc::now()).await?;
    assert_eq!(stopped.stop_time, again.stop_time);
    assert_eq!(again.stop_request_id.as_deref(), Some("stop-1"));

    let completed = store
        .record_task_result(task.id, json!(["a.mp4"]), None, Utc::now())
        .await?;
    assert_eq!(completed.stop_time, stopped.stop_time);
    assert_eq!(completed.result, Some(json!(["a.mp4"])));
    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_duplicate_provider_task_returns_existing(pool: PgPool) -> Result<(), anyhow::Error> {
    let store = PgLedgerStore::new(pool);
    let session = store.insert_session(RoomSession::new("r1", Utc::now())).await?;

    let first = store.insert_task(task_for(&session, "p-1")).await?;
    let second = store.insert_task(task_for(&session, "p-1")).await?;

    assert_eq!(first.id, second.id);
    assert_eq!(store.list_open_tasks(session.id).await?.len(), 1);
    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_webhook_flow_against_postgres(pool: PgPool) -> Result<(), anyhow::Error> {
    let server = TestRtcServer::builder().pool(pool).spawn().await?;
    let client = reqwest::Client::new();

    client
        .post(format!("{}/api/v1/rooms/r1/join", server.url()))
        .json(&json!({ "userId": "host" }))
        .send()
        .await?;
    let task: serde_json::Value = client
        .post(format!("{}/api/v1/rooms/r1/transcriptions", server.url()))
        .json(&json!({}))
        .send()
        .await?
        .json()
        .await?;
    let provider_id = task["providerTaskId"].as_str().unwrap_or_default();

    let response = client
        .post(format!("{}/api/v1/webhooks/rtc", server.url()))
        .json(&transcription_webhook(provider_id, "hi", "round-1"))
        .send()
        .await?;
    assert_eq!(response.status(), 200);

    let events = server.ledger().list_events(None).await?;
    assert_eq!(events.len(), 1);
    assert_eq!(server.ledger().backend(), "postgres");
    Ok(())
}
