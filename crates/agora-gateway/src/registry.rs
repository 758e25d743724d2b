use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::debug;
use uuid::Uuid;

use agora_types::events::ServerEvent;

/// Identifies one live connection for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A broadcast group of connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Room {
    /// Private room every authenticated connection of a user joins
    User(i64),
    /// One room per conversation
    Conversation(i64),
}

struct Entry {
    user_id: Option<i64>,
    rooms: HashSet<Room>,
    tx: mpsc::UnboundedSender<ServerEvent>,
}

#[derive(Default)]
struct State {
    connections: HashMap<ConnectionId, Entry>,
    rooms: HashMap<Room, HashSet<ConnectionId>>,
}

impl State {
    fn join(&mut self, conn_id: ConnectionId, room: Room) -> bool {
        let Some(entry) = self.connections.get_mut(&conn_id) else {
            return false;
        };
        if !entry.rooms.insert(room) {
            return false;
        }
        self.rooms.entry(room).or_default().insert(conn_id);
        true
    }

    fn leave(&mut self, conn_id: ConnectionId, room: Room) -> bool {
        let Some(entry) = self.connections.get_mut(&conn_id) else {
            return false;
        };
        if !entry.rooms.remove(&room) {
            return false;
        }
        if let Some(members) = self.rooms.get_mut(&room) {
            members.remove(&conn_id);
            if members.is_empty() {
                self.rooms.remove(&room);
            }
        }
        true
    }

    fn deliver(&self, room: Room, event: &ServerEvent) -> usize {
        let Some(members) = self.rooms.get(&room) else {
            return 0;
        };
        members
            .iter()
            .filter_map(|id| self.connections.get(id))
            .filter(|entry| entry.tx.send(event.clone()).is_ok())
            .count()
    }
}

/// Maps live connections to their user identity and joined rooms, and fans
/// events out to rooms.
///
/// All mutations go through a single lock. Delivery is best-effort: an event
/// sent to a connection whose writer has gone away is dropped.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<RwLock<State>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection. Events for it arrive on the returned receiver.
    pub async fn connect(&self) -> (ConnectionId, mpsc::UnboundedReceiver<ServerEvent>) {
        let conn_id = ConnectionId::new();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.write().await.connections.insert(
            conn_id,
            Entry {
                user_id: None,
                rooms: HashSet::new(),
                tx,
            },
        );
        (conn_id, rx)
    }

    /// Bind `user_id` to the connection and join its private room plus the
    /// given conversation rooms. Returns false for an unknown connection.
    pub async fn authenticate(
        &self,
        conn_id: ConnectionId,
        user_id: i64,
        conversation_ids: &[i64],
    ) -> bool {
        let mut state = self.inner.write().await;
        let Some(entry) = state.connections.get_mut(&conn_id) else {
            return false;
        };
        entry.user_id = Some(user_id);

        state.join(conn_id, Room::User(user_id));
        for &id in conversation_ids {
            state.join(conn_id, Room::Conversation(id));
        }
        debug!(
            "Connection {} bound to user {} with {} conversation rooms",
            conn_id,
            user_id,
            conversation_ids.len()
        );
        true
    }

    pub async fn user_id(&self, conn_id: ConnectionId) -> Option<i64> {
        self.inner
            .read()
            .await
            .connections
            .get(&conn_id)
            .and_then(|entry| entry.user_id)
    }

    /// Returns true if the connection was not already in the room.
    pub async fn join(&self, conn_id: ConnectionId, conversation_id: i64) -> bool {
        self.inner
            .write()
            .await
            .join(conn_id, Room::Conversation(conversation_id))
    }

    /// Returns true if the connection was in the room.
    pub async fn leave(&self, conn_id: ConnectionId, conversation_id: i64) -> bool {
        self.inner
            .write()
            .await
            .leave(conn_id, Room::Conversation(conversation_id))
    }

    /// Deliver `event` to every connection in the conversation room.
    /// Returns the number of connections it was handed to.
    pub async fn broadcast(&self, conversation_id: i64, event: ServerEvent) -> usize {
        self.inner
            .read()
            .await
            .deliver(Room::Conversation(conversation_id), &event)
    }

    /// Deliver `event` to a single connection.
    pub async fn send_to(&self, conn_id: ConnectionId, event: ServerEvent) -> bool {
        self.inner
            .read()
            .await
            .connections
            .get(&conn_id)
            .is_some_and(|entry| entry.tx.send(event).is_ok())
    }

    /// Drop a connection and all of its room memberships.
    pub async fn forget(&self, conn_id: ConnectionId) {
        let mut state = self.inner.write().await;
        let Some(entry) = state.connections.remove(&conn_id) else {
            return;
        };
        for room in entry.rooms {
            if let Some(members) = state.rooms.get_mut(&room) {
                members.remove(&conn_id);
                if members.is_empty() {
                    state.rooms.remove(&room);
                }
            }
        }
    }

    /// Remove every connection from a conversation room.
    pub async fn close_room(&self, conversation_id: i64) {
        let mut state = self.inner.write().await;
        let room = Room::Conversation(conversation_id);
        let Some(members) = state.rooms.remove(&room) else {
            return;
        };
        for conn_id in members {
            if let Some(entry) = state.connections.get_mut(&conn_id) {
                entry.rooms.remove(&room);
            }
        }
    }

    #[cfg(test)]
    pub async fn rooms_of(&self, conn_id: ConnectionId) -> HashSet<Room> {
        self.inner
            .read()
            .await
            .connections
            .get(&conn_id)
            .map(|entry| entry.rooms.clone())
            .unwrap_or_default()
    }

    pub async fn room_size(&self, conversation_id: i64) -> usize {
        self.inner
            .read()
            .await
            .rooms
            .get(&Room::Conversation(conversation_id))
            .map_or(0, HashSet::len)
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.connections.len()
    }
}
