//! Monotonic read receipts.
//!
//! The cursor for a `(project, user)` pair only ever advances, ordered by
//! the store-assigned room sequence. Marking an older or already-seen
//! message is acknowledged as success without mutating state or
//! broadcasting, so duplicated and out-of-order `mark-seen` calls are safe.

use crate::collab::MessageStore;
use crate::error::{AppError, AppResult};
use crate::protocol::{Ack, ServerEvent};
use crate::rooms::{ConnectionId, RoomRegistry};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReadCursor {
    pub message_id: Uuid,
    pub sequence: i64,
}

#[derive(Clone)]
pub struct ReadReceiptTracker {
    registry: RoomRegistry,
    store: Arc<dyn MessageStore>,
    cursors: Arc<RwLock<HashMap<(Uuid, Uuid), ReadCursor>>>,
}

impl ReadReceiptTracker {
    pub fn new(registry: RoomRegistry, store: Arc<dyn MessageStore>) -> Self {
        Self {
            registry,
            store,
            cursors: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn mark_seen(
        &self,
        conn: ConnectionId,
        project_id: Uuid,
        message_id: Uuid,
    ) -> AppResult<Ack> {
        if !self.registry.contains(conn, project_id).await {
            return Err(AppError::NotInRoom(project_id));
        }
        let identity = self
            .registry
            .identity(conn)
            .await
            .ok_or_else(|| AppError::Validation("unknown connection".into()))?;

        let meta = self
            .store
            .lookup(project_id, message_id)
            .await?
            .ok_or_else(|| {
                AppError::Validation(format!("message {message_id} not found in room"))
            })?;

        let advanced = {
            let mut cursors = self.cursors.write().await;
            let key = (project_id, identity.user_id);
            let stale = cursors
                .get(&key)
                .map(|cursor| cursor.sequence >= meta.sequence)
                .unwrap_or(false);
            if stale {
                false
            } else {
                cursors.insert(
                    key,
                    ReadCursor {
                        message_id: meta.id,
                        sequence: meta.sequence,
                    },
                );
                true
            }
        };

        if advanced {
            self.registry
                .broadcast(
                    project_id,
                    &ServerEvent::MessageSeen {
                        project_id,
                        user_id: identity.user_id,
                        message_id: meta.id,
                    },
                    Some(conn),
                )
                .await;
        }

        Ok(Ack::Success)
    }

    pub async fn cursor(&self, project_id: Uuid, user_id: Uuid) -> Option<ReadCursor> {
        let cursors = self.cursors.read().await;
        cursors.get(&(project_id, user_id)).copied()
    }
}
