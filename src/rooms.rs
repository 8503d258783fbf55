//! Room registry: which connections belong to which project rooms.
//!
//! A connection's room set and a room's member set are kept as duals under a
//! single lock, so no interleaving of join/leave/broadcast/disconnect can
//! observe a dangling reference in either direction.

use crate::collab::UserIdentity;
use crate::error::{AppError, AppResult};
use crate::protocol::ServerEvent;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{
    mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    RwLock,
};
use uuid::Uuid;

/// Unique identifier for one gateway connection.
///
/// Assigned at registration; all shared state is keyed by it so cleanup on
/// disconnect is precise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

struct ConnectionEntry {
    identity: UserIdentity,
    sender: UnboundedSender<ServerEvent>,
    rooms: HashSet<Uuid>,
}

#[derive(Default)]
struct RegistryInner {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    rooms: HashMap<Uuid, HashSet<ConnectionId>>,
}

impl RegistryInner {
    fn detach(&mut self, conn: ConnectionId, project_id: Uuid) {
        if let Some(members) = self.rooms.get_mut(&project_id) {
            members.remove(&conn);
            if members.is_empty() {
                self.rooms.remove(&project_id);
            }
        }
    }
}

/// Shared connection/room registry.
#[derive(Default, Clone)]
pub struct RoomRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a freshly authenticated connection and returns its id plus
    /// the channel on which it receives broadcasts.
    pub async fn register(
        &self,
        identity: UserIdentity,
    ) -> (ConnectionId, UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = unbounded_channel();
        let conn = ConnectionId::new();

        let mut guard = self.inner.write().await;
        guard.connections.insert(
            conn,
            ConnectionEntry {
                identity,
                sender: tx,
                rooms: HashSet::new(),
            },
        );
        tracing::debug!(connection = %conn, total = guard.connections.len(), "connection registered");

        (conn, rx)
    }

    /// Removes a connection from every room it belongs to and drops its
    /// entry. Returns the identity and the rooms it was joined to, in no
    /// particular order.
    pub async fn unregister(&self, conn: ConnectionId) -> Option<(UserIdentity, Vec<Uuid>)> {
        let mut guard = self.inner.write().await;
        let entry = guard.connections.remove(&conn)?;
        let rooms: Vec<Uuid> = entry.rooms.iter().copied().collect();
        for project_id in &rooms {
            guard.detach(conn, *project_id);
        }
        tracing::debug!(connection = %conn, rooms = rooms.len(), "connection unregistered");
        Some((entry.identity, rooms))
    }

    /// Adds the connection to a room. Returns `true` when membership
    /// actually changed; re-joining a room is a no-op success.
    pub async fn join(&self, conn: ConnectionId, project_id: Uuid) -> AppResult<bool> {
        let mut guard = self.inner.write().await;
        let entry = guard
            .connections
            .get_mut(&conn)
            .ok_or_else(|| AppError::Validation("unknown connection".into()))?;
        if !entry.rooms.insert(project_id) {
            return Ok(false);
        }
        guard.rooms.entry(project_id).or_default().insert(conn);
        Ok(true)
    }

    /// Removes the connection from a room. Returns `true` when it was a
    /// member; leaving a room never joined is a no-op.
    pub async fn leave(&self, conn: ConnectionId, project_id: Uuid) -> AppResult<bool> {
        let mut guard = self.inner.write().await;
        let entry = guard
            .connections
            .get_mut(&conn)
            .ok_or_else(|| AppError::Validation("unknown connection".into()))?;
        if !entry.rooms.remove(&project_id) {
            return Ok(false);
        }
        guard.detach(conn, project_id);
        Ok(true)
    }

    pub async fn contains(&self, conn: ConnectionId, project_id: Uuid) -> bool {
        let guard = self.inner.read().await;
        guard
            .connections
            .get(&conn)
            .map(|e| e.rooms.contains(&project_id))
            .unwrap_or(false)
    }

    pub async fn identity(&self, conn: ConnectionId) -> Option<UserIdentity> {
        let guard = self.inner.read().await;
        guard.connections.get(&conn).map(|e| e.identity.clone())
    }

    pub async fn rooms_of(&self, conn: ConnectionId) -> Vec<Uuid> {
        let guard = self.inner.read().await;
        guard
            .connections
            .get(&conn)
            .map(|e| e.rooms.iter().copied().collect())
            .unwrap_or_default()
    }

    pub async fn member_count(&self, project_id: Uuid) -> usize {
        let guard = self.inner.read().await;
        guard.rooms.get(&project_id).map(|m| m.len()).unwrap_or(0)
    }

    /// Sends an event to every current member of a room, optionally skipping
    /// one connection (typically the sender). A failed send means the
    /// receiver is mid-disconnect; its entry is reclaimed by `unregister`.
    pub async fn broadcast(
        &self,
        project_id: Uuid,
        event: &ServerEvent,
        exclude: Option<ConnectionId>,
    ) {
        let guard = self.inner.read().await;
        let Some(members) = guard.rooms.get(&project_id) else {
            return;
        };
        for conn in members {
            if Some(*conn) == exclude {
                continue;
            }
            if let Some(entry) = guard.connections.get(conn) {
                if entry.sender.send(event.clone()).is_err() {
                    tracing::debug!(connection = %conn, %project_id, "dropped broadcast to closing connection");
                }
            }
        }
    }

    /// Like [`broadcast`](Self::broadcast) but skips every connection that
    /// belongs to `user_id`. Used for typing expiry and disconnect cleanup,
    /// where the origin is a user rather than a live connection.
    pub async fn broadcast_excluding_user(
        &self,
        project_id: Uuid,
        event: &ServerEvent,
        user_id: Uuid,
    ) {
        let guard = self.inner.read().await;
        let Some(members) = guard.rooms.get(&project_id) else {
            return;
        };
        for conn in members {
            if let Some(entry) = guard.connections.get(conn) {
                if entry.identity.user_id == user_id {
                    continue;
                }
                if entry.sender.send(event.clone()).is_err() {
                    tracing::debug!(connection = %conn, %project_id, "dropped broadcast to closing connection");
                }
            }
        }
    }
}
