//! Room lifecycle integration tests.
//!
//! Join, exit, session lookup, remove-participant and dismiss over HTTP.

use rtc_controller::services::gateway::mock::{GatewayOp, MockGateway};
use rtc_test_utils::{TestRtcServer, TEST_SDK_APP_ID};
use serde_json::{json, Value};

async fn join(
    client: &reqwest::Client,
    server: &TestRtcServer,
    room_id: &str,
    body: Value,
) -> Result<reqwest::Response, anyhow::Error> {
    Ok(client
        .post(format!("{}/api/v1/rooms/{room_id}/join", server.url()))
        .json(&body)
        .send()
        .await?)
}

#[tokio::test]
async fn test_join_issues_verifiable_credential() -> Result<(), anyhow::Error> {
    let server = TestRtcServer::spawn().await?;
    let client = reqwest::Client::new();

    let response = join(&client, &server, "r1", json!({ "userId": "u1" })).await?;
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await?;
    assert_eq!(body["roomId"], "r1");
    assert_eq!(body["credential"]["sdkAppId"], TEST_SDK_APP_ID);
    assert_eq!(body["credential"]["userId"], "u1");
    assert!(body["sessionId"].is_string());
    assert!(body["joinTime"].is_string());

    let user_sig = body["credential"]["userSig"].as_str().unwrap_or_default();
    let document = server.credentials().verify(user_sig);
    assert_eq!(document.map(|d| d.identifier), Some("u1".to_string()));
    Ok(())
}

#[tokio::test]
async fn test_join_twice_reuses_session() -> Result<(), anyhow::Error> {
    let server = TestRtcServer::spawn().await?;
    let client = reqwest::Client::new();

    let first: Value = join(&client, &server, "r1", json!({ "userId": "u1" }))
        .await?
        .json()
        .await?;
    let second: Value = join(&client, &server, "r1", json!({ "userId": "u2" }))
        .await?
        .json()
        .await?;
    assert_eq!(first["sessionId"], second["sessionId"]);

    let session: Value = client
        .get(format!("{}/api/v1/sessions?roomId=r1", server.url()))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(session["id"], first["sessionId"]);
    assert!(session["participants"]["u1"].is_object());
    assert!(session["participants"]["u2"].is_object());
    assert!(session["participants"]["u1"].get("credential").is_none());
    let user_sig = first["credential"]["userSig"].as_str().unwrap_or_default();
    assert!(!user_sig.is_empty());
    assert!(!session.to_string().contains(user_sig));
    Ok(())
}

#[tokio::test]
async fn test_join_rejects_bad_bodies() -> Result<(), anyhow::Error> {
    let server = TestRtcServer::spawn().await?;
    let client = reqwest::Client::new();

    let unknown_field = join(&client, &server, "r1", json!({ "userId": "u1", "admin": true })).await?;
    assert_eq!(unknown_field.status(), 400);
    let body: Value = unknown_field.json().await?;
    assert_eq!(body["error"]["code"], "INVALID_ARGUMENT");

    let empty_user = join(&client, &server, "r1", json!({ "userId": "" })).await?;
    assert_eq!(empty_user.status(), 400);

    let zero_expiry = join(
        &client,
        &server,
        "r1",
        json!({ "userId": "u1", "expireSeconds": 0 }),
    )
    .await?;
    assert_eq!(zero_expiry.status(), 400);

    let not_json = client
        .post(format!("{}/api/v1/rooms/r1/join", server.url()))
        .body("userId=u1")
        .send()
        .await?;
    assert_eq!(not_json.status(), 400);

    assert!(server.ledger().find_session_by_room("r1").await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_session_lookup_rules() -> Result<(), anyhow::Error> {
    let server = TestRtcServer::spawn().await?;
    let client = reqwest::Client::new();
    let url = format!("{}/api/v1/sessions", server.url());

    let neither = client.get(&url).send().await?;
    assert_eq!(neither.status(), 400);

    let missing = client.get(format!("{url}?roomId=nope")).send().await?;
    assert_eq!(missing.status(), 404);

    let bad_id = client.get(format!("{url}?id=not-a-uuid")).send().await?;
    assert_eq!(bad_id.status(), 400);

    let joined: Value = join(&client, &server, "r1", json!({ "userId": "u1" }))
        .await?
        .json()
        .await?;
    let session_id = joined["sessionId"].as_str().unwrap_or_default().to_string();

    let by_id = client.get(format!("{url}?id={session_id}")).send().await?;
    assert_eq!(by_id.status(), 200);

    let both = client
        .get(format!("{url}?id={session_id}&roomId=r1"))
        .send()
        .await?;
    assert_eq!(both.status(), 400);
    Ok(())
}

#[tokio::test]
async fn test_exit_marks_participant() -> Result<(), anyhow::Error> {
    let server = TestRtcServer::spawn().await?;
    let client = reqwest::Client::new();
    join(&client, &server, "r1", json!({ "userId": "u1" })).await?;

    let exit = client
        .post(format!("{}/api/v1/rooms/r1/exit", server.url()))
        .json(&json!({ "userId": "u1" }))
        .send()
        .await?;
    assert_eq!(exit.status(), 204);

    let ghost = client
        .post(format!("{}/api/v1/rooms/r1/exit", server.url()))
        .json(&json!({ "userId": "ghost" }))
        .send()
        .await?;
    assert_eq!(ghost.status(), 404);

    let session = server.ledger().find_session_by_room("r1").await?;
    let exited = session
        .as_ref()
        .and_then(|s| s.participants.get("u1"))
        .and_then(|p| p.exit_time);
    assert!(exited.is_some());
    Ok(())
}

#[tokio::test]
async fn test_remove_participant_calls_provider() -> Result<(), anyhow::Error> {
    let server = TestRtcServer::spawn().await?;
    let client = reqwest::Client::new();
    join(&client, &server, "r1", json!({ "userId": "u1" })).await?;

    let response = client
        .post(format!("{}/api/v1/rooms/r1/remove-participant", server.url()))
        .json(&json!({ "userId": "u1" }))
        .send()
        .await?;

    assert_eq!(response.status(), 204);
    assert_eq!(
        server.gateway().calls().last().cloned(),
        Some((GatewayOp::RemoveParticipant, "r1/u1".to_string()))
    );
    Ok(())
}

#[tokio::test]
async fn test_dismiss_reports_partial_stop_failure() -> Result<(), anyhow::Error> {
    let server = TestRtcServer::builder()
        .gateway(MockGateway::new().fail_stop_of("mock-task-2"))
        .spawn()
        .await?;
    let client = reqwest::Client::new();
    join(&client, &server, "r1", json!({ "userId": "u1" })).await?;

    for _ in 0..3 {
        let started = client
            .post(format!("{}/api/v1/rooms/r1/recordings", server.url()))
            .send()
            .await?;
        assert_eq!(started.status(), 201);
    }

    let response = client
        .post(format!("{}/api/v1/rooms/r1/dismiss", server.url()))
        .send()
        .await?;
    assert_eq!(response.status(), 200);

    let report: Value = response.json().await?;
    assert!(report["endTime"].is_string());
    assert_eq!(report["stopped"].as_array().map(Vec::len), Some(2));
    assert_eq!(report["failed"].as_array().map(Vec::len), Some(1));
    assert_eq!(server.gateway().call_count(GatewayOp::StopRecording), 3);
    Ok(())
}

#[tokio::test]
async fn test_dismiss_validates_options() -> Result<(), anyhow::Error> {
    let server = TestRtcServer::spawn().await?;
    let client = reqwest::Client::new();
    join(&client, &server, "r1", json!({ "userId": "u1" })).await?;
    let url = format!("{}/api/v1/rooms/r1/dismiss", server.url());

    let unknown_field = client.post(&url).json(&json!({ "force": true })).send().await?;
    assert_eq!(unknown_field.status(), 400);

    let future_version = client
        .post(&url)
        .json(&json!({ "options": { "version": 99 } }))
        .send()
        .await?;
    assert_eq!(future_version.status(), 400);
    assert_eq!(server.gateway().call_count(GatewayOp::DismissRoom), 0);

    let with_options = client
        .post(&url)
        .json(&json!({ "options": { "values": { "reason": "meeting over" } } }))
        .send()
        .await?;
    assert_eq!(with_options.status(), 200);
    assert_eq!(server.gateway().call_count(GatewayOp::DismissRoom), 1);
    Ok(())
}

#[tokio::test]
async fn test_dismiss_provider_failure_changes_nothing() -> Result<(), anyhow::Error> {
    let server = TestRtcServer::builder()
        .gateway(MockGateway::new().fail_on(GatewayOp::DismissRoom))
        .spawn()
        .await?;
    let client = reqwest::Client::new();
    join(&client, &server, "r1", json!({ "userId": "u1" })).await?;

    let response = client
        .post(format!("{}/api/v1/rooms/r1/dismiss", server.url()))
        .send()
        .await?;
    assert_eq!(response.status(), 502);
    let body: Value = response.json().await?;
    assert_eq!(body["error"]["code"], "UPSTREAM_FAILURE");

    let session = server.ledger().find_session_by_room("r1").await?;
    assert!(session.is_some_and(|s| s.end_time.is_none()));
    Ok(())
}
