//! Generic registry of connections keyed by room id.
//!
//! Rooms here are pure fan-out channels; chat and game semantics layer
//! on top. Broadcast copies the recipient list under the read lock and
//! sends outside it, and a slow connection never affects the others:
//! the per-connection enqueue is non-blocking, overflow is
//! drop-and-count.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use undertow_shared::{ConnectionId, ServerFrame};

use crate::connection::ConnectionHandle;

#[derive(Default)]
pub struct Hub {
    rooms: RwLock<HashMap<String, HashMap<ConnectionId, ConnectionHandle>>>,
    dropped_total: AtomicU64,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection under a room, creating the room if absent.
    pub fn join(&self, room: &str, handle: ConnectionHandle) {
        let mut rooms = self.rooms.write().expect("hub lock poisoned");
        rooms
            .entry(room.to_string())
            .or_default()
            .insert(handle.conn_id, handle);
    }

    /// Removes a connection from a room; the last leave garbage-collects
    /// the room entry. Returns whether the connection was registered.
    pub fn leave(&self, room: &str, conn_id: &ConnectionId) -> bool {
        let mut rooms = self.rooms.write().expect("hub lock poisoned");
        let Some(members) = rooms.get_mut(room) else {
            return false;
        };
        let removed = members.remove(conn_id).is_some();
        if members.is_empty() {
            rooms.remove(room);
        }
        removed
    }

    /// Fans a frame out to every connection in the room, minus the
    /// excluded one. Returns the number of successful enqueues; a room
    /// with zero members is a no-op.
    pub fn broadcast(
        &self,
        room: &str,
        frame: &ServerFrame,
        exclude: Option<&ConnectionId>,
    ) -> usize {
        let recipients: Vec<ConnectionHandle> = {
            let rooms = self.rooms.read().expect("hub lock poisoned");
            match rooms.get(room) {
                Some(members) => members
                    .values()
                    .filter(|h| Some(&h.conn_id) != exclude)
                    .cloned()
                    .collect(),
                None => return 0,
            }
        };

        let mut delivered = 0;
        for handle in &recipients {
            if handle.send(frame.clone()) {
                delivered += 1;
            } else {
                self.dropped_total.fetch_add(1, Ordering::Relaxed);
            }
        }
        delivered
    }

    /// Sends to a single connection in the room, if registered.
    pub fn send_to(&self, room: &str, conn_id: &ConnectionId, frame: ServerFrame) -> bool {
        let handle = {
            let rooms = self.rooms.read().expect("hub lock poisoned");
            rooms.get(room).and_then(|m| m.get(conn_id)).cloned()
        };
        handle.map(|h| h.send(frame)).unwrap_or(false)
    }

    /// Snapshot of a room's current connections.
    pub fn connections(&self, room: &str) -> Vec<ConnectionHandle> {
        let rooms = self.rooms.read().expect("hub lock poisoned");
        rooms
            .get(room)
            .map(|members| members.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn room_size(&self, room: &str) -> usize {
        let rooms = self.rooms.read().expect("hub lock poisoned");
        rooms.get(room).map(HashMap::len).unwrap_or(0)
    }

    /// Drops a room entry wholesale. Connections stay registered in
    /// their other rooms.
    pub fn drop_room(&self, room: &str) {
        let mut rooms = self.rooms.write().expect("hub lock poisoned");
        rooms.remove(room);
    }

    /// Removes a connection from every room it is registered in. Used
    /// on socket teardown; room state machines are not touched.
    pub fn remove_connection(&self, conn_id: &ConnectionId) {
        let mut rooms = self.rooms.write().expect("hub lock poisoned");
        rooms.retain(|_, members| {
            members.remove(conn_id);
            !members.is_empty()
        });
    }

    /// Every connection currently registered anywhere, deduplicated by
    /// connection id. Used for shutdown fan-out.
    pub fn all_connections(&self) -> Vec<ConnectionHandle> {
        let rooms = self.rooms.read().expect("hub lock poisoned");
        let mut seen = HashMap::new();
        for members in rooms.values() {
            for (conn_id, handle) in members {
                seen.entry(*conn_id).or_insert_with(|| handle.clone());
            }
        }
        seen.into_values().collect()
    }

    /// Total frames dropped across all rooms due to backpressure.
    pub fn dropped_total(&self) -> u64 {
        self.dropped_total.load(Ordering::Relaxed)
    }
}
