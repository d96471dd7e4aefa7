use dashmap::DashMap;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::domain::types::{LobbyId, RequestId, UserId};

use super::events::ServerEvent;

/// Identifier of one socket connection. A user may hold several.
pub type ConnId = Uuid;

/// Logical broadcast group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Room {
    User(UserId),
    Lobby(LobbyId),
    MatchRequest(RequestId),
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Room::User(id) => write!(f, "user:{id}"),
            Room::Lobby(id) => write!(f, "lobby:{id}"),
            Room::MatchRequest(id) => write!(f, "matchrequest:{id}"),
        }
    }
}

struct ConnHandle {
    user_id: UserId,
    sender: mpsc::Sender<Arc<ServerEvent>>,
}

/// Per-user fan-out registry.
///
/// Emission is fire-and-forget `try_send`: a slow consumer drops events
/// rather than stalling the emitting service (durable delivery is an
/// explicit non-goal; clients resynchronize over REST).
#[derive(Default)]
pub struct EventBus {
    conns: DashMap<ConnId, ConnHandle>,
    user_conns: DashMap<UserId, HashSet<ConnId>>,
    rooms: DashMap<Room, HashSet<ConnId>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection and auto-join its user room.
    pub fn register(&self, user_id: UserId, sender: mpsc::Sender<Arc<ServerEvent>>) -> ConnId {
        let conn_id = Uuid::new_v4();
        self.conns.insert(conn_id, ConnHandle { user_id, sender });
        self.user_conns.entry(user_id).or_default().insert(conn_id);
        self.rooms
            .entry(Room::User(user_id))
            .or_default()
            .insert(conn_id);
        conn_id
    }

    /// Drop a connection from every room it joined.
    pub fn unregister(&self, conn_id: &ConnId) {
        let Some((_, handle)) = self.conns.remove(conn_id) else {
            return;
        };
        if let Some(mut conns) = self.user_conns.get_mut(&handle.user_id) {
            conns.remove(conn_id);
        }
        self.user_conns
            .remove_if(&handle.user_id, |_, conns| conns.is_empty());
        self.rooms.retain(|_, members| {
            members.remove(conn_id);
            !members.is_empty()
        });
    }

    pub fn join(&self, conn_id: ConnId, room: Room) {
        if self.conns.contains_key(&conn_id) {
            self.rooms.entry(room).or_default().insert(conn_id);
        }
    }

    pub fn leave(&self, conn_id: &ConnId, room: &Room) {
        if let Some(mut members) = self.rooms.get_mut(room) {
            members.remove(conn_id);
        }
        self.rooms.remove_if(room, |_, members| members.is_empty());
    }

    /// Drop a connection from every matchrequest room.
    pub fn leave_match_rooms(&self, conn_id: &ConnId) {
        self.rooms.retain(|room, members| {
            if matches!(room, Room::MatchRequest(_)) {
                members.remove(conn_id);
            }
            !members.is_empty()
        });
    }

    /// Subscribe all of a user's live connections to a room. Used by match
    /// finalization to pre-join winners to their new lobby room.
    pub fn join_user(&self, user_id: &UserId, room: Room) {
        let Some(conns) = self.user_conns.get(user_id) else {
            return;
        };
        let conn_ids: Vec<ConnId> = conns.iter().copied().collect();
        drop(conns);
        let mut members = self.rooms.entry(room).or_default();
        for conn_id in conn_ids {
            members.insert(conn_id);
        }
    }

    /// Broadcast to a room. Events emitted while the caller holds its
    /// aggregate lock are observed in emission order per connection.
    pub fn emit_room(&self, room: &Room, event: &Arc<ServerEvent>) {
        let Some(members) = self.rooms.get(room) else {
            return;
        };
        let conn_ids: Vec<ConnId> = members.iter().copied().collect();
        drop(members);
        for conn_id in conn_ids {
            if let Some(handle) = self.conns.get(&conn_id) {
                if handle.sender.try_send(Arc::clone(event)).is_err() {
                    tracing::warn!(%conn_id, "socket outbox full; dropping event");
                }
            }
        }
    }

    /// Broadcast to every connection of one user.
    pub fn emit_user(&self, user_id: &UserId, event: &Arc<ServerEvent>) {
        self.emit_room(&Room::User(*user_id), event);
    }

    /// Send to a single connection.
    pub fn emit_conn(&self, conn_id: &ConnId, event: &Arc<ServerEvent>) {
        if let Some(handle) = self.conns.get(conn_id) {
            if handle.sender.try_send(Arc::clone(event)).is_err() {
                tracing::warn!(%conn_id, "socket outbox full; dropping event");
            }
        }
    }

    pub fn connection_count(&self) -> usize {
        self.conns.len()
    }

    pub fn user_connection_count(&self, user_id: &UserId) -> usize {
        self.user_conns.get(user_id).map_or(0, |c| c.len())
    }
}
