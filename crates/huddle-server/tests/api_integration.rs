#[allow(dead_code)]
mod common;

use std::time::Duration;

use common::{TEST_SECRET, TestServer, create_room, expect_frame, join_token, ws_connect};
use huddle_core::token::parse_token;

#[tokio::test]
async fn health_reports_rooms_and_connections() {
    let server = TestServer::new().await;
    create_room(&server, "group").await;

    let resp = reqwest::get(format!("{}/health", server.base_url()))
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);

    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "huddle-server");
    assert_eq!(body["rooms"]["active"], 1);
    assert_eq!(body["connections"], 0);
}

#[tokio::test]
async fn create_room_validates_type() {
    let server = TestServer::new().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/api/chat/create", server.base_url()))
        .json(&serde_json::json!({ "type": "stadium" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["code"], 2101);

    // Valid types produce well-formed six-character codes.
    let code = create_room(&server, "private").await;
    assert_eq!(code.len(), 6);
    assert!(huddle_core::code::is_valid_room_code(&code));
}

#[tokio::test]
async fn room_status_probes() {
    let server = TestServer::new().await;
    let client = reqwest::Client::new();

    // Malformed code fails the shape check before any lookup.
    let resp = client
        .get(format!("{}/api/chat/not-a-code", server.base_url()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["code"], 1001);

    // Valid shape but unknown room.
    let resp = client
        .get(format!("{}/api/chat/zZ9yX8", server.base_url()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 404);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["code"], 2103);

    // Fresh room is joinable.
    let code = create_room(&server, "private").await;
    let resp = client
        .get(format!("{}/api/chat/{code}", server.base_url()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["canJoin"], true);
}

#[tokio::test]
async fn room_status_reports_full() {
    let server = TestServer::new().await;
    let code = create_room(&server, "private").await;

    let (token_a, _) = join_token(&server, &code, "Alice", Some("guest_a1B2c3")).await;
    let mut alice = ws_connect(&server, &code, &token_a, "Alice").await;
    expect_frame(&mut alice, "INIT_DATA").await;

    let (token_b, _) = join_token(&server, &code, "Bob", Some("guest_d4E5f6")).await;
    let mut bob = ws_connect(&server, &code, &token_b, "Bob").await;
    expect_frame(&mut bob, "INIT_DATA").await;

    let resp = reqwest::get(format!("{}/api/chat/{code}", server.base_url()))
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 403);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["code"], 2104);
}

#[tokio::test]
async fn join_issues_scoped_token_and_generates_identity() {
    let server = TestServer::new().await;
    let code = create_room(&server, "group").await;

    // Explicit guest id round-trips through the token claims.
    let (token, user) = join_token(&server, &code, "Alice", Some("guest_a1B2c3")).await;
    assert_eq!(user["id"], "guest_a1B2c3");
    assert_eq!(user["nickname"], "Alice");
    assert_eq!(user["role"], "guest");

    let claims = parse_token(&token, TEST_SECRET.as_bytes()).unwrap();
    assert_eq!(claims.id, "guest_a1B2c3");
    assert_eq!(claims.code.as_deref(), Some(code.as_str()));
    assert_eq!(claims.exp - claims.iat, 15 * 60);

    // Omitted identity fields are generated server-side.
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/api/chat/{code}/join", server.base_url()))
        .json(&serde_json::json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    let id = body["user"]["id"].as_str().unwrap();
    let nickname = body["user"]["nickname"].as_str().unwrap();
    assert!(huddle_core::code::is_valid_guest_id(id));
    assert!(nickname.starts_with("User_"));
}

#[tokio::test]
async fn join_rejects_malformed_guest_id_and_unknown_room() {
    let server = TestServer::new().await;
    let code = create_room(&server, "group").await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/api/chat/{code}/join", server.base_url()))
        .json(&serde_json::json!({ "nickname": "X", "guestId": "not-a-guest-id" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["code"], 1001);

    let resp = client
        .post(format!("{}/api/chat/zZ9yX8/join", server.base_url()))
        .json(&serde_json::json!({ "nickname": "X" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 404);
}

#[tokio::test]
async fn create_rate_limit_applies_per_ip() {
    let mut config = TestServer::test_config();
    config.limits.create_rate_per_sec = 0.0;
    config.limits.create_burst = 2.0;
    let server = TestServer::from_config(config).await;
    let client = reqwest::Client::new();

    for _ in 0..2 {
        let resp = client
            .post(format!("{}/api/chat/create", server.base_url()))
            .json(&serde_json::json!({ "type": "private" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 200);
    }

    let resp = client
        .post(format!("{}/api/chat/create", server.base_url()))
        .json(&serde_json::json!({ "type": "private" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 429);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["code"], 1007);
}

#[tokio::test]
async fn empty_room_is_reaped_after_idle_timeout() {
    let mut config = TestServer::test_config();
    config.rooms.idle_timeout_secs = 1;
    let server = TestServer::from_config(config).await;

    let code = create_room(&server, "private").await;
    let status_url = format!("{}/api/chat/{code}", server.base_url());

    // Alive right after creation.
    let resp = reqwest::get(&status_url).await.unwrap();
    assert_eq!(resp.status().as_u16(), 200);

    // Nobody ever connects; the idle timer fires and the manager drops
    // the room from the directory.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let resp = reqwest::get(&status_url).await.unwrap();
        if resp.status().as_u16() == 404 {
            let body: serde_json::Value = resp.json().await.unwrap();
            assert_eq!(body["code"], 2103);
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "room was never reaped"
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

#[tokio::test]
async fn last_member_leaving_arms_the_idle_reaper() {
    let mut config = TestServer::test_config();
    config.rooms.idle_timeout_secs = 1;
    let server = TestServer::from_config(config).await;

    let code = create_room(&server, "private").await;
    let (token, _) = join_token(&server, &code, "Alice", Some("guest_a1B2c3")).await;
    let mut alice = ws_connect(&server, &code, &token, "Alice").await;
    expect_frame(&mut alice, "INIT_DATA").await;

    // Occupied rooms are not reaped even past the idle timeout.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    let resp = reqwest::get(format!("{}/api/chat/{code}", server.base_url()))
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);

    drop(alice);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let resp = reqwest::get(format!("{}/api/chat/{code}", server.base_url()))
            .await
            .unwrap();
        if resp.status().as_u16() == 404 {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "room was never reaped after the last member left"
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
