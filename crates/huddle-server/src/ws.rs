use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, FromRequest, Path};
use axum::response::IntoResponse;
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;

use huddle_core::code::is_valid_room_code;
use huddle_core::error::ErrorCode;
use huddle_core::message::MAX_FRAME_BYTES;
use huddle_core::token::parse_token;
use huddle_core::user::User;

use crate::client::{ClientHandle, Heartbeat, read_pump, write_pump};
use crate::error::ApiError;
use crate::room::Room;
use crate::state::{AppState, ConnectionGuard};

#[derive(Debug, Deserialize)]
pub struct UpgradeQuery {
    token: Option<String>,
    /// Display nickname, carried alongside the token.
    nn: Option<String>,
}

/// GET /ws/{code}?token=<jwt>&nn=<nickname> — admit, validate, upgrade.
/// Everything that can be rejected is rejected before the socket handoff:
/// rate limit, code shape, credential, room existence, capacity.
pub async fn ws_handler(
    axum::extract::State(state): axum::extract::State<AppState>,
    Path(code): Path<String>,
    axum::extract::Query(query): axum::extract::Query<UpgradeQuery>,
    request: axum::extract::Request,
) -> Result<axum::response::Response, ApiError> {
    let ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip())
        .unwrap_or(std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST));
    if !state.join_limiter.allow(ip).await {
        tracing::warn!(%ip, "WebSocket connection rejected: rate limit exceeded");
        return Err(ErrorCode::RateLimitExceeded.into());
    }

    let max_ws = state.config.limits.max_ws_connections;
    if state.ws_connection_count.load(Ordering::Relaxed) >= max_ws {
        tracing::warn!(max = max_ws, "WebSocket connection limit reached");
        return Err(ErrorCode::RateLimitExceeded.into());
    }

    if !is_valid_room_code(&code) {
        tracing::warn!(room_code = %code, "WebSocket rejected: invalid room code");
        return Err(ErrorCode::InvalidParams.into());
    }

    let Some(token) = query.token.filter(|t| !t.is_empty()) else {
        tracing::warn!(room_code = %code, "WebSocket rejected: missing token");
        return Err(ErrorCode::InvalidParams.into());
    };

    let room = state
        .manager
        .get(&code)
        .ok_or_else(|| ApiError::from(ErrorCode::RoomNotFound))?;

    let claims = parse_token(&token, room.jwt_secret()).map_err(|e| {
        tracing::warn!(room_code = %code, error = %e, "WebSocket rejected: invalid token");
        ApiError::from(ErrorCode::Unauthorized)
    })?;

    if claims.code.as_deref() != Some(code.as_str()) {
        tracing::warn!(
            room_code = %code,
            token_code = ?claims.code,
            "WebSocket rejected: token room mismatch"
        );
        return Err(ErrorCode::Unauthorized.into());
    }

    let nickname = query.nn.unwrap_or_default();
    if claims.id.is_empty() || nickname.trim().is_empty() {
        tracing::warn!(room_code = %code, "WebSocket rejected: missing id or nickname");
        return Err(ErrorCode::InvalidParams.into());
    }

    if room.is_full(Some(&claims.id)) {
        tracing::info!(room_code = %code, "WebSocket rejected: room is full");
        return Err(ErrorCode::RoomFull.into());
    }

    let user = User::new(claims.id, nickname.trim().to_string(), claims.role);
    let token_expiry = UNIX_EPOCH + Duration::from_secs(claims.exp.max(0) as u64);

    let ws = WebSocketUpgrade::from_request(request, &state)
        .await
        .map_err(|_| ApiError::from(ErrorCode::InvalidParams))?;

    tracing::info!(room_code = %code, client_id = %user.id, "WebSocket connection established");

    Ok(ws
        .max_message_size(MAX_FRAME_BYTES)
        .max_frame_size(MAX_FRAME_BYTES)
        .on_upgrade(move |socket| handle_socket(socket, state, room, user, token_expiry))
        .into_response())
}

async fn handle_socket(
    socket: WebSocket,
    state: AppState,
    room: Arc<Room>,
    user: User,
    token_expiry: SystemTime,
) {
    let _guard = ConnectionGuard::new(Arc::clone(&state.ws_connection_count));
    let heartbeat = Heartbeat::from_limits(&state.config.limits);

    let (sink, stream) = socket.split();
    let (outbound_tx, outbound_rx) = mpsc::channel(state.config.limits.outbound_queue_capacity);
    let handle = ClientHandle::new(user, outbound_tx);

    tokio::spawn(write_pump(
        sink,
        outbound_rx,
        handle.clone(),
        Arc::clone(&room),
        heartbeat,
        token_expiry,
    ));

    room.register(handle.clone());

    // Blocks until the connection dies; unregisters itself on exit.
    read_pump(stream, handle, room, heartbeat).await;
}
