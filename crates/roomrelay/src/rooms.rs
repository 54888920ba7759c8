//! Global room manager: lazily creates rooms keyed by room id and
//! reaps idle ones. Grounded on the teacher's `RoomManager`'s
//! create-or-join `Entry` idiom, generalized from per-IP peer-pairing
//! to per-tenant room ownership.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::info;

use crate::room::Room;

/// Room identifiers are opaque tenant-chosen strings (spec §3), not a
/// fixed-size hash like the teacher's legacy transfer rooms.
pub type RoomId = Arc<str>;

struct RoomSlot {
    room: Arc<Room>,
    created_at: Instant,
}

/// Owns every live room and performs idle cleanup. One instance per
/// server process.
pub struct RoomManager {
    rooms: DashMap<RoomId, RoomSlot>,
}

impl RoomManager {
    pub fn new() -> Self {
        Self { rooms: DashMap::new() }
    }

    /// Return the room for `id`, creating and starting its keepalive
    /// task if this is the first peer to ever reference it.
    pub async fn get_or_create(&self, id: &str) -> Arc<Room> {
        let key: RoomId = Arc::from(id);
        match self.rooms.entry(key.clone()) {
            Entry::Occupied(entry) => entry.get().room.clone(),
            Entry::Vacant(entry) => {
                let room = Room::new(key);
                room.spawn_keepalive().await;
                entry.insert(RoomSlot { room: room.clone(), created_at: Instant::now() });
                info!("room created");
                room
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<Room>> {
        self.rooms.get(id).map(|e| e.room.clone())
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Remove rooms with no peers left and that have existed longer
    /// than `min_age` (avoids reaping a room the instant its first
    /// peer connects, before the second has a chance to join).
    pub async fn cleanup_idle(&self, min_age: Duration) -> usize {
        let mut removed = 0;
        let candidates: Vec<RoomId> = self
            .rooms
            .iter()
            .filter(|e| e.value().created_at.elapsed() >= min_age)
            .map(|e| e.key().clone())
            .collect();

        for id in candidates {
            let is_empty = match self.rooms.get(&id) {
                Some(entry) => entry.value().room.is_empty().await,
                None => continue,
            };
            if is_empty {
                if let Some((_, entry)) = self.rooms.remove(&id) {
                    entry.room.stop_keepalive().await;
                    removed += 1;
                }
            }
        }
        removed
    }
}

impl Default for RoomManager {
    fn default() -> Self {
        Self::new()
    }
}
