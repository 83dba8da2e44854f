//! Room manager: creates rooms and tracks which session is in which.

use std::collections::HashMap;
use std::sync::Arc;

use rand::Rng;
use stackclash_protocol::{MapId, RoomId, SessionToken};
use tokio::sync::mpsc;

use crate::room::spawn_room;
use crate::{BoardRules, PlayerSeat, RoomConfig, RoomError, RoomHandle, RoomNotice};

/// Directory of live rooms.
///
/// This is the entry point for room operations from the server layer.
/// A session is bound to at most one room at a time. Rooms report their
/// own shutdown through the [`RoomNotice`] channel returned by
/// [`RoomManager::new`]; the owner then calls
/// [`unbind_room`](Self::unbind_room).
pub struct RoomManager<R: BoardRules> {
    rooms: HashMap<RoomId, RoomHandle>,
    by_token: HashMap<SessionToken, RoomId>,
    rules: Arc<R>,
    config: RoomConfig,
    notices: mpsc::UnboundedSender<RoomNotice>,
    next_id: u64,
}

impl<R: BoardRules> RoomManager<R> {
    /// Creates an empty manager and the receiver for room notices.
    pub fn new(rules: Arc<R>, config: RoomConfig) -> (Self, mpsc::UnboundedReceiver<RoomNotice>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let manager = Self {
            rooms: HashMap::new(),
            by_token: HashMap::new(),
            rules,
            config,
            notices: tx,
            next_id: 1,
        };
        (manager, rx)
    }

    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    /// Spawns a room for two seated players and binds both tokens to it.
    pub fn create_room(&mut self, seats: [PlayerSeat; 2], map: MapId) -> RoomHandle {
        let room_id = RoomId(self.next_id);
        self.next_id += 1;

        for seat in &seats {
            if let Some(previous) = self.by_token.insert(seat.token.clone(), room_id) {
                tracing::warn!(token = %seat.token, %previous, %room_id, "session rebound to a new room");
            }
        }

        let seed = rand::rng().random::<u64>();
        let handle = spawn_room(
            room_id,
            seats,
            map,
            seed,
            Arc::clone(&self.rules),
            self.config.clone(),
            self.notices.clone(),
        );
        self.rooms.insert(room_id, handle.clone());
        tracing::info!(%room_id, %map, rooms = self.rooms.len(), "room created");
        handle
    }

    /// Returns the handle of the room `token` is bound to.
    pub fn route(&self, token: &SessionToken) -> Result<RoomHandle, RoomError> {
        let room_id = self.by_token.get(token).ok_or(RoomError::NotInRoom)?;
        self.rooms
            .get(room_id)
            .cloned()
            .ok_or(RoomError::NotFound(*room_id))
    }

    pub fn room_for(&self, token: &SessionToken) -> Option<RoomId> {
        self.by_token.get(token).copied()
    }

    pub fn handle(&self, room_id: RoomId) -> Option<RoomHandle> {
        self.rooms.get(&room_id).cloned()
    }

    /// Forgets a room and every binding to it.
    pub fn unbind_room(&mut self, room_id: RoomId) -> Option<RoomHandle> {
        let handle = self.rooms.remove(&room_id)?;
        self.by_token.retain(|_, rid| *rid != room_id);
        tracing::debug!(%room_id, rooms = self.rooms.len(), "room unbound");
        Some(handle)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn room_ids(&self) -> Vec<RoomId> {
        self.rooms.keys().copied().collect()
    }

    /// Asks every room to close. Each still posts its own notice.
    pub async fn shutdown_all(&self) {
        for handle in self.rooms.values() {
            let _ = handle.shutdown().await;
        }
    }
}
