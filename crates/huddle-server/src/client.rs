use std::sync::{Arc, OnceLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use axum::extract::ws::{CloseFrame, Message as WsMessage, Utf8Bytes, WebSocket};
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use huddle_core::attachment;
use huddle_core::error::{ChatError, ErrorCode};
use huddle_core::message::{
    AttachmentsPayload, Body, ConfirmPayload, ErrorPayload, InboundFrame, InitDataPayload,
    MAX_ATTACHMENTS, MAX_CONTENT_BYTES, Message, TextPayload, TokenUpdatePayload,
};
use huddle_core::token::{self, REFRESH_WINDOW, ROOM_ACCESS_TTL};
use huddle_core::user::User;

use crate::config::LimitsConfig;
use crate::room::Room;

/// Custom WebSocket close code signalling that the session was replaced by
/// a newer connection for the same user. Clients must not auto-reconnect.
pub const CLOSE_SESSION_REPLACED: u16 = 4001;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// Heartbeat and deadline tunables for a connection's pumps.
#[derive(Debug, Clone, Copy)]
pub struct Heartbeat {
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
    pub write_timeout: Duration,
}

impl Heartbeat {
    pub fn from_limits(limits: &LimitsConfig) -> Self {
        Self {
            ping_interval: Duration::from_secs(limits.ws_ping_interval_secs),
            pong_timeout: Duration::from_secs(limits.ws_pong_timeout_secs),
            write_timeout: Duration::from_secs(limits.ws_write_timeout_secs),
        }
    }
}

#[derive(Debug)]
struct HandleInner {
    user: User,
    conn_id: u64,
    outbound: mpsc::Sender<Utf8Bytes>,
    closed: CancellationToken,
    kick_frame: OnceLock<CloseFrame>,
}

/// Shared handle to one connection's outbound side. The room's membership
/// map stores one of these per participant; the write pump consumes the
/// paired receiver. Cancelling `closed` is the single authoritative
/// "this connection is done" signal and is idempotent.
#[derive(Clone, Debug)]
pub struct ClientHandle {
    inner: Arc<HandleInner>,
}

impl ClientHandle {
    pub fn new(user: User, outbound: mpsc::Sender<Utf8Bytes>) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                user,
                conn_id: NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed),
                outbound,
                closed: CancellationToken::new(),
                kick_frame: OnceLock::new(),
            }),
        }
    }

    pub fn user(&self) -> &User {
        &self.inner.user
    }

    /// Process-unique id distinguishing this connection from any other for
    /// the same user. Stale unregisters are detected by comparing it.
    pub fn conn_id(&self) -> u64 {
        self.inner.conn_id
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    pub(crate) fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.inner.closed.cancelled()
    }

    fn kick_frame(&self) -> Option<CloseFrame> {
        self.inner.kick_frame.get().cloned()
    }

    /// Close the outbound queue. Idempotent; the write pump observes the
    /// cancellation at its next select and tears the socket down.
    pub fn close_queue(&self) {
        self.inner.closed.cancel();
    }

    /// Evict this connection with close code 4001 and the given reason,
    /// then close its outbound queue.
    pub fn kick(&self, reason: &str) {
        tracing::warn!(
            client_id = %self.inner.user.id,
            close_code = CLOSE_SESSION_REPLACED,
            reason,
            "Kicking connection"
        );
        let _ = self.inner.kick_frame.set(CloseFrame {
            code: CLOSE_SESSION_REPLACED,
            reason: Utf8Bytes::from(reason.to_string()),
        });
        self.inner.closed.cancel();
    }

    /// Non-blocking enqueue of a serialized frame. Returns false when the
    /// queue is full or already closed.
    pub fn try_send_frame(&self, frame: Utf8Bytes) -> bool {
        if self.inner.closed.is_cancelled() {
            return false;
        }
        self.inner.outbound.try_send(frame).is_ok()
    }

    fn send_system(&self, room_code: &str, sender: User, body: Body) -> bool {
        let message = Message::new(room_code, sender, body);
        let frame = match message.to_json() {
            Ok(json) => Utf8Bytes::from(json),
            Err(e) => {
                tracing::error!(client_id = %self.inner.user.id, error = %e, "Failed to marshal message");
                return false;
            },
        };
        let sent = self.try_send_frame(frame);
        if !sent {
            tracing::warn!(
                client_id = %self.inner.user.id,
                "Send queue full or closed, dropping message"
            );
        }
        sent
    }

    /// Enqueue an ERROR envelope. Dropped (and logged) when the queue is
    /// full; a single drop never tears the connection down.
    pub fn send_error(&self, room_code: &str, err: &ChatError) {
        self.send_system(
            room_code,
            User::system(),
            Body::Error(ErrorPayload {
                code: err.code.code(),
                message: err.message.clone(),
            }),
        );
    }

    /// Enqueue the INIT_DATA snapshot. Returns false when the enqueue
    /// failed and the room should schedule this connection for unregister.
    pub fn send_init(&self, room_code: &str, payload: InitDataPayload) -> bool {
        self.send_system(room_code, User::system(), Body::InitData(payload))
    }

    /// Enqueue a rotated room-access token.
    pub fn send_token_update(&self, room_code: &str, new_token: String) -> bool {
        self.send_system(
            room_code,
            User::system(),
            Body::TokenUpdate(TokenUpdatePayload { token: new_token }),
        )
    }

    /// Echo a CONFIRM for `temp_id` carrying the authoritative id and
    /// timestamp, authored by the confirmed sender.
    fn send_confirm(&self, room_code: &str, temp_id: String, authoritative: &Message) {
        self.send_system(
            room_code,
            self.inner.user.clone(),
            Body::Confirm(ConfirmPayload {
                temp_id,
                id: authoritative.id.clone(),
                timestamp: authoritative.timestamp,
            }),
        );
    }
}

/// Read pump: consumes frames until error, close, or read deadline. On
/// exit, schedules the connection for unregister (non-blocking; cleanup
/// proceeds even if the room is not listening).
pub async fn read_pump(
    mut stream: SplitStream<WebSocket>,
    handle: ClientHandle,
    room: Arc<Room>,
    heartbeat: Heartbeat,
) {
    let mut deadline = tokio::time::Instant::now() + heartbeat.pong_timeout;

    loop {
        let frame = match tokio::time::timeout_at(deadline, stream.next()).await {
            Err(_) => {
                tracing::info!(client_id = %handle.user().id, "Read deadline expired, closing");
                break;
            },
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                tracing::info!(client_id = %handle.user().id, error = %e, "Read error, closing");
                break;
            },
            Ok(Some(Ok(frame))) => frame,
        };

        match frame {
            WsMessage::Text(text) => process_inbound(text.as_str(), &handle, &room).await,
            WsMessage::Pong(_) => {
                deadline = tokio::time::Instant::now() + heartbeat.pong_timeout;
            },
            WsMessage::Close(_) => {
                tracing::info!(client_id = %handle.user().id, "Client requested close");
                break;
            },
            WsMessage::Binary(_) => {
                tracing::warn!(client_id = %handle.user().id, "Ignoring binary frame");
            },
            // Pings are answered by the transport layer.
            WsMessage::Ping(_) => {},
        }
    }

    tracing::info!(client_id = %handle.user().id, "Connection cleanup starting");
    if !room.schedule_unregister(&handle) {
        tracing::warn!(
            client_id = %handle.user().id,
            "Room unregister channel blocked, cleanup still proceeding"
        );
    }
}

/// Write pump: drains the outbound queue, emits heartbeat pings, and
/// rotates the session credential. Exits when the queue is closed or a
/// write fails, closing the socket.
pub async fn write_pump(
    mut sink: SplitSink<WebSocket, WsMessage>,
    mut outbound_rx: mpsc::Receiver<Utf8Bytes>,
    handle: ClientHandle,
    room: Arc<Room>,
    heartbeat: Heartbeat,
    mut token_expiry: SystemTime,
) {
    let start = tokio::time::Instant::now() + heartbeat.ping_interval;
    let mut ping = tokio::time::interval_at(start, heartbeat.ping_interval);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = handle.closed() => {
                // Flush anything enqueued before the close, e.g. a final
                // ERROR envelope, then emit the close frame.
                while let Ok(frame) = outbound_rx.try_recv() {
                    if write_with_deadline(&mut sink, WsMessage::Text(frame), heartbeat.write_timeout)
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                let close = match handle.kick_frame() {
                    Some(frame) => WsMessage::Close(Some(frame)),
                    None => WsMessage::Close(None),
                };
                if let Err(e) = write_with_deadline(&mut sink, close, heartbeat.write_timeout).await {
                    tracing::debug!(client_id = %handle.user().id, error = %e, "Failed to send close frame");
                }
                break;
            },
            maybe = outbound_rx.recv() => {
                let Some(frame) = maybe else { break };
                if let Err(e) = write_with_deadline(
                    &mut sink,
                    WsMessage::Text(frame),
                    heartbeat.write_timeout,
                ).await {
                    tracing::info!(client_id = %handle.user().id, error = %e, "Write failed, closing");
                    break;
                }
            },
            _ = ping.tick() => {
                if let Err(e) = write_with_deadline(
                    &mut sink,
                    WsMessage::Ping(Bytes::new()),
                    heartbeat.write_timeout,
                ).await {
                    tracing::info!(client_id = %handle.user().id, error = %e, "Ping failed, closing");
                    break;
                }
                refresh_token(&handle, &room, &mut token_expiry);
            },
        }
    }

    let _ = sink.close().await;
}

async fn write_with_deadline(
    sink: &mut SplitSink<WebSocket, WsMessage>,
    frame: WsMessage,
    deadline: Duration,
) -> Result<(), axum::Error> {
    match tokio::time::timeout(deadline, sink.send(frame)).await {
        Ok(result) => result,
        Err(_) => Err(axum::Error::new(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "write deadline exceeded",
        ))),
    }
}

/// Whether the session credential is inside the refresh window.
fn needs_refresh(expiry: SystemTime, now: SystemTime) -> bool {
    now + REFRESH_WINDOW >= expiry
}

/// Once per ping period: mint a replacement room-access token when the
/// current one nears expiry. A failed mint or a dropped TOKEN_UPDATE is
/// retried at the next tick; the session is never terminated for it.
fn refresh_token(handle: &ClientHandle, room: &Room, token_expiry: &mut SystemTime) {
    let now = SystemTime::now();
    if !needs_refresh(*token_expiry, now) {
        return;
    }

    tracing::info!(
        client_id = %handle.user().id,
        room_code = %room.code(),
        "Session token nearing expiry, rotating"
    );

    let user = handle.user();
    let new_token = match token::issue_room_token(&user.id, room.code(), user.role, room.jwt_secret())
    {
        Ok(token) => token,
        Err(e) => {
            tracing::error!(client_id = %user.id, error = %e, "Failed to mint replacement token");
            return;
        },
    };

    if handle.send_token_update(room.code(), new_token) {
        *token_expiry = now + ROOM_ACCESS_TTL;
    }
}

/// Dispatch one inbound frame. Only TEXT and ATTACHMENTS are accepted;
/// anything else (including malformed JSON) is logged and ignored without
/// disconnecting the session.
async fn process_inbound(raw: &str, handle: &ClientHandle, room: &Arc<Room>) {
    let frame: InboundFrame = match serde_json::from_str(raw) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(client_id = %handle.user().id, error = %e, "Client sent invalid JSON");
            return;
        },
    };

    match frame.kind.as_str() {
        "TEXT" => handle_text(frame.payload, frame.temp_id, handle, room).await,
        "ATTACHMENTS" => handle_attachments(frame.payload, frame.temp_id, handle, room).await,
        other => {
            tracing::warn!(
                client_id = %handle.user().id,
                msg_type = other,
                "Client sent unsupported message type"
            );
        },
    }
}

async fn handle_text(
    payload: serde_json::Value,
    temp_id: Option<String>,
    handle: &ClientHandle,
    room: &Arc<Room>,
) {
    let text: TextPayload = match serde_json::from_value(payload) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(client_id = %handle.user().id, error = %e, "Client sent invalid TEXT payload");
            return;
        },
    };

    if text.content.len() > MAX_CONTENT_BYTES {
        handle.send_error(room.code(), &ChatError::new(ErrorCode::ContentTooLong));
        return;
    }

    let message = Message::new(room.code(), handle.user().clone(), Body::Text(text));
    confirm_and_publish(message, temp_id, handle, room).await;
}

async fn handle_attachments(
    payload: serde_json::Value,
    temp_id: Option<String>,
    handle: &ClientHandle,
    room: &Arc<Room>,
) {
    let mut attachments: AttachmentsPayload = match serde_json::from_value(payload) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(
                client_id = %handle.user().id,
                error = %e,
                "Client sent invalid ATTACHMENTS payload"
            );
            return;
        },
    };

    let count = attachments.attachments.len();
    if count == 0 || count > MAX_ATTACHMENTS {
        handle.send_error(
            room.code(),
            &ChatError::new(ErrorCode::AttachmentCountInvalid),
        );
        return;
    }

    if attachments
        .description
        .as_ref()
        .is_some_and(|d| d.len() > MAX_CONTENT_BYTES)
    {
        handle.send_error(room.code(), &ChatError::new(ErrorCode::ContentTooLong));
        return;
    }

    for item in &mut attachments.attachments {
        if let Err(e) = attachment::validate_key_prefix(&item.key, room.code()) {
            handle.send_error(room.code(), &e);
            return;
        }
        if let Err(e) = attachment::validate_file_type(&item.name, &item.mime_type) {
            handle.send_error(room.code(), &e);
            return;
        }
        if let Err(e) = attachment::validate_file_size(item.size) {
            handle.send_error(room.code(), &e);
            return;
        }
        // Client-supplied metadata never travels past the server.
        item.meta = None;
    }

    let message = Message::new(
        room.code(),
        handle.user().clone(),
        Body::Attachments(attachments),
    );
    confirm_and_publish(message, temp_id, handle, room).await;
}

/// CONFIRM is enqueued into the sender's own queue before the message is
/// published to the room, preserving the per-session ordering contract.
async fn confirm_and_publish(
    message: Message,
    temp_id: Option<String>,
    handle: &ClientHandle,
    room: &Arc<Room>,
) {
    if let Some(temp_id) = temp_id {
        handle.send_confirm(room.code(), temp_id, &message);
    }

    if room.publish(message).await.is_err() {
        tracing::warn!(
            client_id = %handle.user().id,
            room_code = %room.code(),
            "Room broadcast channel closed, dropping message"
        );
    }
}
