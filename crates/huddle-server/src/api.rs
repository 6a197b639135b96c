use std::net::SocketAddr;

use axum::Json;
use axum::extract::{ConnectInfo, Path, State};
use serde::{Deserialize, Serialize};

use huddle_core::code::{
    generate_guest_id, generate_nickname, generate_room_code, is_valid_guest_id,
    is_valid_room_code,
};
use huddle_core::error::ErrorCode;
use huddle_core::token::issue_room_token;
use huddle_core::user::{Role, User};

use crate::error::ApiError;
use crate::room::{GROUP_MAX_CLIENTS, PRIVATE_MAX_CLIENTS};
use crate::state::AppState;

/// Retry budget for the unlikely room-code collision.
const CODE_RETRIES: usize = 5;

#[derive(Debug, Deserialize)]
pub struct CreateRoomInput {
    /// "private" (2 seats) or "group" (10 seats).
    #[serde(rename = "type")]
    pub room_type: String,
}

#[derive(Debug, Serialize)]
pub struct CreateRoomResponse {
    #[serde(rename = "chatCode")]
    pub chat_code: String,
}

/// POST /api/chat/create — create a room and return its code.
pub async fn create_room(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(input): Json<CreateRoomInput>,
) -> Result<Json<CreateRoomResponse>, ApiError> {
    if !state.create_limiter.allow(addr.ip()).await {
        tracing::warn!(ip = %addr.ip(), "Room creation rejected: rate limit exceeded");
        return Err(ErrorCode::RateLimitExceeded.into());
    }

    let max_clients = match input.room_type.as_str() {
        "private" => PRIVATE_MAX_CLIENTS,
        "group" => GROUP_MAX_CLIENTS,
        other => {
            tracing::warn!(room_type = other, "Invalid room type");
            return Err(ErrorCode::RoomTypeInvalid.into());
        },
    };

    for _ in 0..CODE_RETRIES {
        let code = generate_room_code();
        match state.manager.create(&code, max_clients) {
            Ok(room) => {
                tracing::info!(room_code = %room.code(), max_clients, "Room created");
                return Ok(Json(CreateRoomResponse {
                    chat_code: room.code().to_string(),
                }));
            },
            Err(err) if err.code == ErrorCode::RoomCodeExists => {
                tracing::warn!(room_code = %code, "Room code collision, retrying");
            },
            Err(err) => return Err(err.into()),
        }
    }

    Err(ErrorCode::Internal.into())
}

#[derive(Debug, Serialize)]
pub struct RoomStatusResponse {
    #[serde(rename = "canJoin")]
    pub can_join: bool,
}

/// GET /api/chat/{code} — existence and capacity probe.
pub async fn room_status(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<RoomStatusResponse>, ApiError> {
    if !is_valid_room_code(&code) {
        return Err(ErrorCode::InvalidParams.into());
    }

    let room = state
        .manager
        .get(&code)
        .ok_or_else(|| ApiError::from(ErrorCode::RoomNotFound))?;

    if room.is_full(None) {
        return Err(ErrorCode::RoomFull.into());
    }

    Ok(Json(RoomStatusResponse { can_join: true }))
}

#[derive(Debug, Deserialize)]
pub struct JoinRoomInput {
    pub nickname: Option<String>,
    #[serde(rename = "guestId")]
    pub guest_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct JoinRoomResponse {
    pub token: String,
    pub user: User,
}

/// POST /api/chat/{code}/join — issue the room-access credential that the
/// WebSocket upgrade consumes. Guests without an id get a generated one.
pub async fn join_room(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(code): Path<String>,
    Json(input): Json<JoinRoomInput>,
) -> Result<Json<JoinRoomResponse>, ApiError> {
    if !state.join_limiter.allow(addr.ip()).await {
        tracing::warn!(ip = %addr.ip(), "Join rejected: rate limit exceeded");
        return Err(ErrorCode::RateLimitExceeded.into());
    }

    if !is_valid_room_code(&code) {
        return Err(ErrorCode::InvalidParams.into());
    }

    let room = state
        .manager
        .get(&code)
        .ok_or_else(|| ApiError::from(ErrorCode::RoomNotFound))?;

    let guest_id = match input.guest_id {
        Some(id) => {
            if !is_valid_guest_id(&id) {
                tracing::warn!(room_code = %code, "Join rejected: malformed guest id");
                return Err(ErrorCode::InvalidParams.into());
            }
            id
        },
        None => generate_guest_id(),
    };

    // Re-entry exemption: a current member may fetch a fresh token even
    // when the room reads as full.
    if room.is_full(Some(&guest_id)) {
        return Err(ErrorCode::RoomFull.into());
    }

    let nickname = match input.nickname {
        Some(name) => {
            let name = name.trim().to_string();
            if name.is_empty() || name.len() > 32 || name.chars().any(char::is_control) {
                return Err(ErrorCode::InvalidParams.into());
            }
            name
        },
        None => generate_nickname(),
    };

    let token = issue_room_token(&guest_id, &code, Role::Guest, room.jwt_secret()).map_err(|e| {
        tracing::error!(room_code = %code, error = %e, "Failed to issue room token");
        ApiError::from(ErrorCode::Internal)
    })?;

    tracing::info!(room_code = %code, client_id = %guest_id, "Issued room-access token");

    Ok(Json(JoinRoomResponse {
        token,
        user: User::new(guest_id, nickname, Role::Guest),
    }))
}
