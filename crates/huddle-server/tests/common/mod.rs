use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use huddle_server::config::ServerConfig;
use huddle_server::state::AppState;
use huddle_server::build_app;

/// Signing secret every test server uses, so tests can mint and inspect
/// tokens directly.
pub const TEST_SECRET: &str = "integration-test-secret";

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
    _serve: tokio::task::JoinHandle<()>,
}

impl TestServer {
    /// Start a server with test-friendly limits (no effective rate
    /// limiting, fast heartbeat).
    pub async fn new() -> Self {
        Self::from_config(Self::test_config()).await
    }

    /// Baseline config for tests; callers tweak fields before passing it
    /// to [`TestServer::from_config`].
    pub fn test_config() -> ServerConfig {
        let mut config = ServerConfig::default();
        config.jwt_secret = Some(TEST_SECRET.to_string());
        config.limits.create_rate_per_sec = 1000.0;
        config.limits.create_burst = 1000.0;
        config.limits.join_rate_per_sec = 1000.0;
        config.limits.join_burst = 1000.0;
        config.limits.ws_ping_interval_secs = 1;
        config
    }

    pub async fn from_config(config: ServerConfig) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (app, state) = build_app(config);

        let serve = tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });

        // Give the listener a moment to start accepting
        tokio::time::sleep(Duration::from_millis(20)).await;

        Self {
            addr,
            state,
            _serve: serve,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn ws_url(&self, code: &str, token: &str, nickname: &str) -> String {
        format!(
            "ws://{}/ws/{}?token={}&nn={}",
            self.addr, code, token, nickname
        )
    }
}

/// POST /api/chat/create and return the new room code.
pub async fn create_room(server: &TestServer, room_type: &str) -> String {
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/api/chat/create", server.base_url()))
        .json(&serde_json::json!({ "type": room_type }))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success(), "create failed: {}", resp.status());
    let body: serde_json::Value = resp.json().await.unwrap();
    body["chatCode"].as_str().unwrap().to_string()
}

/// POST /api/chat/{code}/join and return (token, user).
pub async fn join_token(
    server: &TestServer,
    code: &str,
    nickname: &str,
    guest_id: Option<&str>,
) -> (String, serde_json::Value) {
    let mut body = serde_json::json!({ "nickname": nickname });
    if let Some(id) = guest_id {
        body["guestId"] = serde_json::json!(id);
    }

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/api/chat/{code}/join", server.base_url()))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success(), "join failed: {}", resp.status());
    let body: serde_json::Value = resp.json().await.unwrap();
    (
        body["token"].as_str().unwrap().to_string(),
        body["user"].clone(),
    )
}

/// Open a WebSocket session, asserting the upgrade succeeds.
pub async fn ws_connect(server: &TestServer, code: &str, token: &str, nickname: &str) -> WsStream {
    let (stream, _) = tokio_tungstenite::connect_async(server.ws_url(code, token, nickname))
        .await
        .expect("upgrade should succeed");
    stream
}

/// Attempt an upgrade that should be rejected; returns the HTTP status.
pub async fn ws_connect_expect_rejection(
    server: &TestServer,
    code: &str,
    token: &str,
    nickname: &str,
) -> u16 {
    match tokio_tungstenite::connect_async(server.ws_url(code, token, nickname)).await {
        Ok(_) => panic!("upgrade unexpectedly succeeded"),
        Err(tokio_tungstenite::tungstenite::Error::Http(response)) => response.status().as_u16(),
        Err(other) => panic!("unexpected connect error: {other}"),
    }
}

/// Read the next JSON frame (5s timeout), transparently skipping control
/// frames.
pub async fn read_frame(stream: &mut WsStream) -> serde_json::Value {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return serde_json::from_str(text.as_str()).unwrap();
                },
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Ok(Message::Close(frame))) => panic!("unexpected close: {frame:?}"),
                Some(Ok(other)) => panic!("unexpected frame: {other:?}"),
                Some(Err(e)) => panic!("WebSocket error: {e}"),
                None => panic!("WebSocket stream ended"),
            }
        }
    })
    .await
    .expect("timed out waiting for frame")
}

/// Read the next data frame and assert its wire type.
pub async fn expect_frame(stream: &mut WsStream, kind: &str) -> serde_json::Value {
    let frame = read_frame(stream).await;
    assert_eq!(frame["type"], kind, "unexpected frame: {frame}");
    frame
}

/// Assert that no data frame arrives within `timeout_ms`.
pub async fn expect_silence(stream: &mut WsStream, timeout_ms: u64) {
    let got = tokio::time::timeout(Duration::from_millis(timeout_ms), async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                other => return other,
            }
        }
    })
    .await;
    assert!(got.is_err(), "expected silence, got: {got:?}");
}

/// Wait for the server to close the connection and return the close code.
pub async fn expect_close(stream: &mut WsStream) -> Option<(u16, String)> {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Close(frame))) => {
                    return frame.map(|f| (u16::from(f.code), f.reason.to_string()));
                },
                Some(Ok(_)) => continue,
                Some(Err(_)) | None => return None,
            }
        }
    })
    .await
    .expect("timed out waiting for close")
}

/// Send a raw JSON value as a text frame.
pub async fn send_json(stream: &mut WsStream, value: serde_json::Value) {
    stream
        .send(Message::Text(value.to_string().into()))
        .await
        .unwrap();
}
