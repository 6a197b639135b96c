use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use huddle_core::error::{ChatError, ErrorCode};

use crate::config::ServerConfig;
use crate::room::{Room, RoomReap, RoomSettings};

type RoomDirectory = Arc<RwLock<HashMap<String, Arc<Room>>>>;

/// Directory of live rooms. Creates, looks up, and reaps rooms; one
/// background task drains reap notifications from terminating room loops.
pub struct RoomManager {
    rooms: RoomDirectory,
    jwt_secret: Vec<u8>,
    settings: RoomSettings,
    /// Taken at shutdown so the reap channel can close once every room's
    /// sender clone is gone.
    reap_tx: Mutex<Option<mpsc::Sender<RoomReap>>>,
    reap_task: Mutex<Option<JoinHandle<()>>>,
}

impl RoomManager {
    pub fn new(jwt_secret: Vec<u8>, config: &ServerConfig) -> Self {
        let rooms: RoomDirectory = Arc::new(RwLock::new(HashMap::new()));
        let (reap_tx, reap_rx) = mpsc::channel(config.rooms.reap_buffer);

        let reap_task = tokio::spawn(run_reap_loop(Arc::clone(&rooms), reap_rx));

        Self {
            rooms,
            jwt_secret,
            settings: RoomSettings::from_config(config),
            reap_tx: Mutex::new(Some(reap_tx)),
            reap_task: Mutex::new(Some(reap_task)),
        }
    }

    /// Create a room under `code` and launch its event loop. Fails with a
    /// conflict error when the code is already live.
    pub fn create(&self, code: &str, max_clients: usize) -> Result<Arc<Room>, ChatError> {
        let reap_tx = match self.reap_sender() {
            Some(tx) => tx,
            None => return Err(ChatError::new(ErrorCode::Internal)),
        };

        let mut rooms = write_lock(&self.rooms);
        if rooms.contains_key(code) {
            tracing::warn!(room_code = %code, "Attempted to create existing room");
            return Err(ChatError::new(ErrorCode::RoomCodeExists));
        }

        let room = Room::spawn(
            code.to_string(),
            max_clients,
            self.jwt_secret.clone(),
            self.settings,
            reap_tx,
        );
        rooms.insert(code.to_string(), Arc::clone(&room));

        tracing::info!(room_code = %code, max_clients, "New room created and started");
        Ok(room)
    }

    /// Look up a live room by code.
    pub fn get(&self, code: &str) -> Option<Arc<Room>> {
        read_lock(&self.rooms).get(code).cloned()
    }

    /// (room count, total member count) for the health endpoint.
    pub fn stats(&self) -> (usize, usize) {
        let rooms = read_lock(&self.rooms);
        let members = rooms.values().map(|r| r.member_count()).sum();
        (rooms.len(), members)
    }

    /// Stop every live room, close the reap channel, and wait for the
    /// reap consumer to drain. Rooms run their cleanup concurrently; the
    /// manager does not block on them individually.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down room manager");

        let rooms: Vec<Arc<Room>> = {
            let mut map = write_lock(&self.rooms);
            map.drain().map(|(_, room)| room).collect()
        };
        for room in &rooms {
            room.stop();
        }

        // Drop our sender clone; the channel closes once each stopped
        // room's loop exits and releases its own clone.
        if let Ok(mut tx) = self.reap_tx.lock() {
            tx.take();
        }

        let task = match self.reap_task.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        if let Some(task) = task {
            let _ = task.await;
        }

        tracing::info!("Room manager shutdown complete");
    }

    fn reap_sender(&self) -> Option<mpsc::Sender<RoomReap>> {
        self.reap_tx.lock().ok().and_then(|slot| slot.clone())
    }
}

/// Drains reap notifications and deletes the named rooms. Notifications
/// for codes no longer in the directory are ignored.
async fn run_reap_loop(rooms: RoomDirectory, mut reap_rx: mpsc::Receiver<RoomReap>) {
    tracing::info!("Room reap loop started");

    while let Some(reap) = reap_rx.recv().await {
        let removed = write_lock(&rooms).remove(&reap.room_code).is_some();
        if removed {
            tracing::info!(room_code = %reap.room_code, "Room removed from directory");
        } else {
            tracing::debug!(room_code = %reap.room_code, "Reap for unknown room, ignoring");
        }
    }

    tracing::info!("Room reap loop stopped");
}

fn read_lock(
    rooms: &RoomDirectory,
) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<Room>>> {
    rooms.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_lock(
    rooms: &RoomDirectory,
) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<Room>>> {
    rooms.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}
