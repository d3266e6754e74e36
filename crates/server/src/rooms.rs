//! Room registry and per-room shared state.
//!
//! Each room owns one schema tree and a broadcast channel of pre-serialized
//! full-tree frames. Locks are scoped per room; patch traffic in one room
//! never serializes against another room or against the tracking decoder.

use crate::patch::{self, PatchError};
use protocol::ServerMessage;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio_tungstenite::tungstenite::Utf8Bytes;
use tracing::info;

const BROADCAST_CAPACITY: usize = 64;

struct RoomState {
    tree: Value,
    last_activity: Instant,
}

/// One room: a shared schema tree plus its broadcast fabric.
pub struct Room {
    /// Room identifier (the `room` query parameter of the join request).
    pub id: String,
    state: Mutex<RoomState>,
    tx: broadcast::Sender<Utf8Bytes>,
}

impl Room {
    fn new(id: &str) -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            id: id.to_string(),
            state: Mutex::new(RoomState {
                tree: json!({}),
                last_activity: Instant::now(),
            }),
            tx,
        }
    }

    /// Subscribe to full-tree broadcast frames.
    pub fn subscribe(&self) -> broadcast::Receiver<Utf8Bytes> {
        self.tx.subscribe()
    }

    /// Number of currently subscribed members.
    pub fn member_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Clone of the current tree.
    pub async fn snapshot(&self) -> Value {
        self.state.lock().await.tree.clone()
    }

    /// Serialized `schema` frame carrying the current tree.
    pub async fn encoded_snapshot(&self) -> Utf8Bytes {
        encode_state(&self.state.lock().await.tree)
    }

    /// Apply a client patch and rebroadcast on success.
    ///
    /// A failed patch is dropped without a broadcast; mutation applied
    /// before the failing node stays in the tree.
    pub async fn apply_patch(&self, delta: &Value) -> Result<(), PatchError> {
        let mut state = self.state.lock().await;
        patch::apply_patch(&mut state.tree, delta)?;
        state.last_activity = Instant::now();
        self.broadcast(&state.tree);
        Ok(())
    }

    /// Mutate the tree through `f`, rebroadcasting when `f` returns true.
    pub async fn mutate(&self, f: impl FnOnce(&mut Value) -> bool) {
        let mut state = self.state.lock().await;
        if f(&mut state.tree) {
            state.last_activity = Instant::now();
            self.broadcast(&state.tree);
        }
    }

    async fn idle_for(&self) -> Duration {
        self.state.lock().await.last_activity.elapsed()
    }

    fn broadcast(&self, tree: &Value) {
        // fire and forget: a room without members is fine
        let _ = self.tx.send(encode_state(tree));
    }
}

fn encode_state(tree: &Value) -> Utf8Bytes {
    let frame = ServerMessage::Schema { data: tree.clone() };
    serde_json::to_string(&frame).unwrap_or_default().into()
}

/// Registry of all live rooms, keyed by room identifier.
pub struct Rooms {
    rooms: RwLock<HashMap<String, Arc<Room>>>,
    max_rooms: usize,
}

impl Rooms {
    pub fn new(max_rooms: usize) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            max_rooms,
        }
    }

    /// Existing room, or a fresh empty one registered on first use.
    ///
    /// Returns `None` when the registry is full and the room does not exist.
    pub async fn get_or_create(&self, id: &str) -> Option<Arc<Room>> {
        {
            let rooms = self.rooms.read().await;
            if let Some(room) = rooms.get(id) {
                return Some(room.clone());
            }
        }
        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get(id) {
            return Some(room.clone());
        }
        if rooms.len() >= self.max_rooms {
            return None;
        }
        info!("Creating room {:?}", id);
        let room = Arc::new(Room::new(id));
        rooms.insert(id.to_string(), room.clone());
        Some(room)
    }

    /// All currently registered rooms, for producer fan-out.
    pub async fn active(&self) -> Vec<Arc<Room>> {
        self.rooms.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Drop rooms that have no members and have been idle past `ttl`.
    pub async fn sweep_idle(&self, ttl: Duration) -> usize {
        let mut stale = Vec::new();
        {
            let rooms = self.rooms.read().await;
            for (id, room) in rooms.iter() {
                if room.member_count() == 0 && room.idle_for().await >= ttl {
                    stale.push(id.clone());
                }
            }
        }
        if stale.is_empty() {
            return 0;
        }
        let mut rooms = self.rooms.write().await;
        let mut dropped = 0;
        for id in stale {
            // re-check under the write lock, a member may have joined
            if rooms.get(&id).is_some_and(|room| room.member_count() == 0) {
                rooms.remove(&id);
                dropped += 1;
            }
        }
        if dropped > 0 {
            info!("Dropped {} idle room(s)", dropped);
        }
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn first_join_sees_empty_tree() {
        let rooms = Rooms::new(8);
        let room = rooms.get_or_create("r1").await.unwrap();
        assert_eq!(room.snapshot().await, json!({}));
    }

    #[tokio::test]
    async fn later_join_sees_patched_tree() {
        let rooms = Rooms::new(8);
        let room = rooms.get_or_create("r1").await.unwrap();
        room.apply_patch(&json!({"count": [5]})).await.unwrap();

        let again = rooms.get_or_create("r1").await.unwrap();
        assert_eq!(again.snapshot().await, json!({"count": 5}));
    }

    #[tokio::test]
    async fn patch_then_numeric_delta_reaches_members() {
        let rooms = Rooms::new(8);
        let room = rooms.get_or_create("r1").await.unwrap();
        let mut rx = room.subscribe();

        room.apply_patch(&json!({"count": [5]})).await.unwrap();
        let frame = rx.recv().await.unwrap();
        let ServerMessage::Schema { data } = serde_json::from_str(frame.as_str()).unwrap();
        assert_eq!(data, json!({"count": 5}));

        room.apply_patch(&json!({"count": [5, 3, -8]})).await.unwrap();
        let frame = rx.recv().await.unwrap();
        let ServerMessage::Schema { data } = serde_json::from_str(frame.as_str()).unwrap();
        assert_eq!(data, json!({"count": 8}));
    }

    #[tokio::test]
    async fn failed_patch_is_not_broadcast() {
        let rooms = Rooms::new(8);
        let room = rooms.get_or_create("r1").await.unwrap();
        let mut rx = room.subscribe();

        assert!(room.apply_patch(&json!({"a": {"b": [1, 2]}})).await.is_err());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn room_limit_refuses_new_rooms() {
        let rooms = Rooms::new(1);
        assert!(rooms.get_or_create("r1").await.is_some());
        assert!(rooms.get_or_create("r2").await.is_none());
        // existing rooms still resolve
        assert!(rooms.get_or_create("r1").await.is_some());
    }

    #[tokio::test]
    async fn sweep_drops_only_idle_memberless_rooms() {
        let rooms = Rooms::new(8);
        let idle = rooms.get_or_create("idle").await.unwrap();
        let busy = rooms.get_or_create("busy").await.unwrap();
        let _rx = busy.subscribe();
        drop(idle);

        let dropped = rooms.sweep_idle(Duration::ZERO).await;
        assert_eq!(dropped, 1);
        assert_eq!(rooms.len().await, 1);
    }

    #[tokio::test]
    async fn mutate_broadcasts_only_when_told() {
        let rooms = Rooms::new(8);
        let room = rooms.get_or_create("r1").await.unwrap();
        let mut rx = room.subscribe();

        room.mutate(|_| false).await;
        assert!(rx.try_recv().is_err());

        room.mutate(|tree| {
            tree["x"] = json!(1);
            true
        })
        .await;
        assert!(rx.try_recv().is_ok());
    }
}
