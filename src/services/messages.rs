//! Ordered, acknowledged message fanout.
//!
//! The persist-then-broadcast pair runs under a per-room lock: the store
//! assigns each message its room sequence, and no member can observe a
//! `new-message` for a later sequence before an earlier one. A persistence
//! failure produces an error ack and zero broadcasts, so clients may retry
//! with the same temp id.

use crate::collab::MessageStore;
use crate::error::{AppError, AppResult};
use crate::protocol::{Ack, MessagePayload, ServerEvent};
use crate::rooms::{ConnectionId, RoomRegistry};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Clone)]
pub struct MessageBroadcaster {
    registry: RoomRegistry,
    store: Arc<dyn MessageStore>,
    max_body_bytes: usize,
    send_locks: Arc<Mutex<HashMap<Uuid, Arc<Mutex<()>>>>>,
}

impl MessageBroadcaster {
    pub fn new(registry: RoomRegistry, store: Arc<dyn MessageStore>, max_body_bytes: usize) -> Self {
        Self {
            registry,
            store,
            max_body_bytes,
            send_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn room_lock(&self, project_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.send_locks.lock().await;
        locks
            .entry(project_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drops the room's send lock once no sender holds a clone of it.
    /// Called when the room's membership empties; an in-flight send keeps
    /// the entry alive until a later release.
    pub async fn release_room(&self, project_id: Uuid) {
        let mut locks = self.send_locks.lock().await;
        let idle = locks
            .get(&project_id)
            .map(|lock| Arc::strong_count(lock) == 1)
            .unwrap_or(false);
        if idle {
            locks.remove(&project_id);
        }
    }

    pub async fn send(
        &self,
        conn: ConnectionId,
        project_id: Uuid,
        body: String,
        temp_id: String,
    ) -> AppResult<Ack> {
        // Membership comes from registry state; no second authorization
        // round-trip per message.
        if !self.registry.contains(conn, project_id).await {
            return Err(AppError::NotInRoom(project_id));
        }
        let identity = self
            .registry
            .identity(conn)
            .await
            .ok_or_else(|| AppError::Validation("unknown connection".into()))?;

        if body.trim().is_empty() {
            return Err(AppError::Validation("message body is empty".into()));
        }
        if body.len() > self.max_body_bytes {
            return Err(AppError::Validation(format!(
                "message body exceeds {} bytes",
                self.max_body_bytes
            )));
        }

        let lock = self.room_lock(project_id).await;
        let _guard = lock.lock().await;

        let stored = self
            .store
            .append(project_id, identity.user_id, &body, Some(&temp_id))
            .await?;

        tracing::debug!(
            message = %stored.id,
            %project_id,
            sender = %identity.user_id,
            sequence = stored.sequence,
            "message persisted"
        );

        // Fanout includes the sender, so its optimistic render keyed by
        // temp_id can be reconciled to the canonical id.
        self.registry
            .broadcast(
                project_id,
                &ServerEvent::NewMessage {
                    message: MessagePayload {
                        id: stored.id,
                        project_id: stored.project_id,
                        sender_id: stored.sender_id,
                        body: stored.body,
                        created_at: stored.created_at,
                    },
                    temp_id: temp_id.clone(),
                },
                None,
            )
            .await;

        Ok(Ack::Message {
            id: stored.id,
            temp_id,
        })
    }
}
