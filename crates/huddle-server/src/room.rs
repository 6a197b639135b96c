use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use axum::extract::ws::Utf8Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use huddle_core::error::{ChatError, ErrorCode};
use huddle_core::message::{Body, InitDataPayload, Message, UserEventPayload};
use huddle_core::user::User;

use crate::client::ClientHandle;
use crate::config::ServerConfig;

/// Capacity limit for private rooms.
pub const PRIVATE_MAX_CLIENTS: usize = 2;

/// Capacity limit for group rooms.
pub const GROUP_MAX_CLIENTS: usize = 10;

/// Reap directive a terminating room sends to the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomReap {
    pub room_code: String,
}

/// An unregister request, identified by connection rather than by user so
/// that a displaced connection's late unregister can be recognized as
/// stale and ignored.
#[derive(Debug, Clone)]
pub struct Unregister {
    pub user_id: String,
    pub conn_id: u64,
}

/// Lifecycle tunables shared by every room a manager spawns.
#[derive(Debug, Clone, Copy)]
pub struct RoomSettings {
    pub idle_timeout: Duration,
    pub broadcast_capacity: usize,
}

impl RoomSettings {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            idle_timeout: Duration::from_secs(config.rooms.idle_timeout_secs),
            broadcast_capacity: config.limits.broadcast_capacity,
        }
    }
}

/// A single live chat room. One owning task runs the event loop, which is
/// the only writer of `members`; HTTP-side snapshot reads (capacity probe,
/// roster) take the shared lock. The lock is never held across an await.
#[derive(Debug)]
pub struct Room {
    code: String,
    max_clients: usize,
    jwt_secret: Vec<u8>,
    idle_timeout: Duration,
    members: RwLock<HashMap<String, ClientHandle>>,
    register_tx: mpsc::Sender<ClientHandle>,
    unregister_tx: mpsc::Sender<Unregister>,
    broadcast_tx: mpsc::Sender<Message>,
    stop: CancellationToken,
}

impl Room {
    /// Construct a room and launch its event loop task.
    pub fn spawn(
        code: String,
        max_clients: usize,
        jwt_secret: Vec<u8>,
        settings: RoomSettings,
        reap_tx: mpsc::Sender<RoomReap>,
    ) -> Arc<Self> {
        let (register_tx, register_rx) = mpsc::channel(1);
        let (unregister_tx, unregister_rx) = mpsc::channel(1);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(settings.broadcast_capacity);

        let room = Arc::new(Self {
            code,
            max_clients,
            jwt_secret,
            idle_timeout: settings.idle_timeout,
            members: RwLock::new(HashMap::new()),
            register_tx,
            unregister_tx,
            broadcast_tx,
            stop: CancellationToken::new(),
        });

        tokio::spawn(Arc::clone(&room).run(register_rx, unregister_rx, broadcast_rx, reap_tx));

        room
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn max_clients(&self) -> usize {
        self.max_clients
    }

    pub fn jwt_secret(&self) -> &[u8] {
        &self.jwt_secret
    }

    /// Signal the event loop to terminate at its next select.
    pub fn stop(&self) {
        tracing::info!(room_code = %self.code, "Room stop requested");
        self.stop.cancel();
    }

    /// Hand a new connection to the event loop. Non-blocking: when the
    /// loop is not ready the candidate gets an ERROR and is never
    /// installed. Queue closure stays with the event loop.
    pub fn register(&self, handle: ClientHandle) {
        if let Err(err) = self.register_tx.try_send(handle) {
            let handle = match err {
                mpsc::error::TrySendError::Full(h) | mpsc::error::TrySendError::Closed(h) => h,
            };
            tracing::warn!(
                room_code = %self.code,
                client_id = %handle.user().id,
                "Room register channel blocked, rejecting connection"
            );
            handle.send_error(
                &self.code,
                &ChatError::with_message(ErrorCode::Internal, "room is busy, try again"),
            );
        }
    }

    /// Schedule a connection for unregister. Returns false when the
    /// request was dropped because the loop was not ready.
    pub fn schedule_unregister(&self, handle: &ClientHandle) -> bool {
        self.unregister_tx
            .try_send(Unregister {
                user_id: handle.user().id.clone(),
                conn_id: handle.conn_id(),
            })
            .is_ok()
    }

    /// Publish a message onto the broadcast channel, suspending when it is
    /// at capacity. Fails only after the room has terminated.
    pub async fn publish(&self, message: Message) -> Result<(), mpsc::error::SendError<Message>> {
        self.broadcast_tx.send(message).await
    }

    /// Capacity probe with re-entry exemption: an id that is already a
    /// member may always reconnect (its old session gets replaced).
    pub fn is_full(&self, incumbent_id: Option<&str>) -> bool {
        let members = self.members_read();
        if let Some(id) = incumbent_id
            && members.contains_key(id)
        {
            return false;
        }
        self.max_clients > 0 && members.len() >= self.max_clients
    }

    pub fn member_count(&self) -> usize {
        self.members_read().len()
    }

    fn members_read(&self) -> RwLockReadGuard<'_, HashMap<String, ClientHandle>> {
        self.members
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn members_write(&self) -> RwLockWriteGuard<'_, HashMap<String, ClientHandle>> {
        self.members
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The event loop. Serializes every membership mutation and every
    /// broadcast; exits on the stop signal or when the idle timer fires.
    async fn run(
        self: Arc<Self>,
        mut register_rx: mpsc::Receiver<ClientHandle>,
        mut unregister_rx: mpsc::Receiver<Unregister>,
        mut broadcast_rx: mpsc::Receiver<Message>,
        reap_tx: mpsc::Sender<RoomReap>,
    ) {
        tracing::info!(
            room_code = %self.code,
            max_clients = self.max_clients,
            "Room event loop started"
        );

        // Armed iff the room is empty; fires exactly once per arming.
        let idle = tokio::time::sleep(self.idle_timeout);
        tokio::pin!(idle);
        let mut idle_armed = true;

        loop {
            tokio::select! {
                Some(handle) = register_rx.recv() => {
                    idle_armed = false;
                    self.handle_register(handle);
                },
                Some(departure) = unregister_rx.recv() => {
                    if self.handle_unregister(departure) {
                        idle_armed = true;
                        idle.as_mut().reset(tokio::time::Instant::now() + self.idle_timeout);
                    }
                },
                Some(message) = broadcast_rx.recv() => {
                    self.fan_out(message);
                },
                _ = &mut idle, if idle_armed => {
                    tracing::info!(
                        room_code = %self.code,
                        timeout_secs = self.idle_timeout.as_secs(),
                        "Room inactivity timeout reached, shutting down"
                    );
                    break;
                },
                _ = self.stop.cancelled() => {
                    tracing::info!(room_code = %self.code, "Room forced stop");
                    break;
                },
            }
        }

        // Cleanup: notify the manager, then close every member's queue.
        // The receivers drop with this task, so producers' non-blocking
        // sends fail harmlessly from here on.
        if reap_tx
            .try_send(RoomReap {
                room_code: self.code.clone(),
            })
            .is_err()
        {
            tracing::warn!(
                room_code = %self.code,
                "Manager reap channel closed or full, skipping notification"
            );
        }

        let mut members = self.members_write();
        for handle in members.values() {
            handle.close_queue();
        }
        members.clear();
        drop(members);

        tracing::info!(room_code = %self.code, "Room event loop finished");
    }

    fn handle_register(&self, handle: ClientHandle) {
        let user = handle.user().clone();

        let init = {
            let mut members = self.members_write();

            if let Some(existing) = members.get(&user.id) {
                tracing::warn!(
                    room_code = %self.code,
                    client_id = %user.id,
                    "Client already connected, replacing session"
                );
                existing.kick("Session replaced by new connection. Check other tabs.");
            } else if self.max_clients > 0 && members.len() >= self.max_clients {
                tracing::warn!(
                    room_code = %self.code,
                    client_id = %user.id,
                    max_clients = self.max_clients,
                    "Room is full, new unique client rejected"
                );
                handle.send_error(&self.code, &ChatError::new(ErrorCode::RoomFull));
                handle.close_queue();
                return;
            }

            members.insert(user.id.clone(), handle.clone());
            tracing::info!(
                room_code = %self.code,
                client_id = %user.id,
                total_users = members.len(),
                "Client joined room"
            );

            InitDataPayload {
                current_user: user.clone(),
                online_users: members.values().map(|h| h.user().clone()).collect(),
                max_users: self.max_clients,
            }
        };

        if !handle.send_init(&self.code, init) {
            // The fresh connection cannot even take its snapshot; give up
            // on it the same way a failed broadcast enqueue would.
            let _ = self.unregister_tx.try_send(Unregister {
                user_id: user.id.clone(),
                conn_id: handle.conn_id(),
            });
            return;
        }

        let joined = Message::new(
            &self.code,
            User::system(),
            Body::UserJoined(UserEventPayload { user }),
        );
        if self.broadcast_tx.try_send(joined).is_err() {
            tracing::warn!(room_code = %self.code, "Broadcast channel full during USER_JOINED");
        }
    }

    /// Returns true when the room is empty afterwards (idle timer should
    /// be armed).
    fn handle_unregister(&self, departure: Unregister) -> bool {
        let mut members = self.members_write();

        let is_current = members
            .get(&departure.user_id)
            .is_some_and(|current| current.conn_id() == departure.conn_id);

        if is_current {
            if let Some(handle) = members.remove(&departure.user_id) {
                handle.close_queue();
                tracing::info!(
                    room_code = %self.code,
                    client_id = %departure.user_id,
                    total_users = members.len(),
                    "Client left room"
                );

                let left = Message::new(
                    &self.code,
                    User::system(),
                    Body::UserLeft(UserEventPayload {
                        user: handle.user().clone(),
                    }),
                );
                if self.broadcast_tx.try_send(left).is_err() {
                    tracing::warn!(room_code = %self.code, "Broadcast channel full during USER_LEFT");
                }
            }
        } else if members.contains_key(&departure.user_id) {
            tracing::info!(
                room_code = %self.code,
                stale_client_id = %departure.user_id,
                "Ignoring unregister for stale connection"
            );
        } else {
            tracing::warn!(
                room_code = %self.code,
                client_id = %departure.user_id,
                "Unregister for unknown or already removed client"
            );
        }

        members.is_empty()
    }

    /// Marshal once, then enqueue the bytes on every member's queue except
    /// the sender's. A member whose queue is full or closed is scheduled
    /// for unregister; it is considered unable to keep up.
    fn fan_out(&self, message: Message) {
        if matches!(message.body, Body::Error(_)) {
            tracing::warn!(
                room_code = %self.code,
                message_id = %message.id,
                "ERROR messages are never multicast, dropping"
            );
            return;
        }

        let frame = match message.to_json() {
            Ok(json) => Utf8Bytes::from(json),
            Err(e) => {
                tracing::error!(
                    room_code = %self.code,
                    message_id = %message.id,
                    error = %e,
                    "Failed to marshal message for broadcast"
                );
                return;
            },
        };

        let members = self.members_read();
        for handle in members.values() {
            if handle.user().id == message.sender.id {
                continue;
            }
            if !handle.try_send_frame(frame.clone()) {
                tracing::warn!(
                    room_code = %self.code,
                    client_id = %handle.user().id,
                    "Send queue full or closed, scheduling unregister"
                );
                if self
                    .unregister_tx
                    .try_send(Unregister {
                        user_id: handle.user().id.clone(),
                        conn_id: handle.conn_id(),
                    })
                    .is_err()
                {
                    tracing::warn!(
                        room_code = %self.code,
                        "Unregister channel full, leaving slow client for the next attempt"
                    );
                }
            }
        }
    }
}
