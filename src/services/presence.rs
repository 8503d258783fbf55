//! Ephemeral typing indicators with bounded lifetime.
//!
//! Typing state is keyed by `(project, user)` and never persisted. Each
//! active entry owns one expiry timer; refreshing replaces the timer, and a
//! generation counter guards against a stale timer firing after it was
//! replaced but before its abort landed.

use crate::error::{AppError, AppResult};
use crate::protocol::{Ack, ServerEvent};
use crate::rooms::{ConnectionId, RoomRegistry};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

struct TypingEntry {
    generation: u64,
    expires_at: Instant,
    timer: JoinHandle<()>,
}

#[derive(Clone)]
pub struct PresenceTracker {
    registry: RoomRegistry,
    ttl: Duration,
    entries: Arc<Mutex<HashMap<(Uuid, Uuid), TypingEntry>>>,
    // Never reused, so a stale timer can never match a fresh entry.
    next_generation: Arc<AtomicU64>,
}

impl PresenceTracker {
    pub fn new(registry: RoomRegistry, ttl: Duration) -> Self {
        Self {
            registry,
            ttl,
            entries: Arc::new(Mutex::new(HashMap::new())),
            next_generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Sets or clears the typing flag for the caller in a room and notifies
    /// the other members. A `true` refreshes the TTL and replaces any
    /// pending expiry timer for the same key.
    pub async fn set_typing(
        &self,
        conn: ConnectionId,
        project_id: Uuid,
        is_typing: bool,
    ) -> AppResult<Ack> {
        if !self.registry.contains(conn, project_id).await {
            return Err(AppError::NotInRoom(project_id));
        }
        let identity = self
            .registry
            .identity(conn)
            .await
            .ok_or_else(|| AppError::Validation("unknown connection".into()))?;
        let key = (project_id, identity.user_id);

        {
            let mut entries = self.entries.lock().await;
            if let Some(prev) = entries.remove(&key) {
                prev.timer.abort();
            }

            if is_typing {
                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                let tracker = self.clone();
                let ttl = self.ttl;
                let timer = tokio::spawn(async move {
                    tokio::time::sleep(ttl).await;
                    tracker.expire(key, generation).await;
                });
                entries.insert(
                    key,
                    TypingEntry {
                        generation,
                        expires_at: Instant::now() + self.ttl,
                        timer,
                    },
                );
            }
        }

        self.registry
            .broadcast(
                project_id,
                &ServerEvent::UserTyping {
                    project_id,
                    user_id: identity.user_id,
                    is_typing,
                },
                Some(conn),
            )
            .await;

        Ok(Ack::Success)
    }

    /// Timer body: clears the entry and broadcasts a stop if it is still the
    /// generation the timer was armed for.
    async fn expire(&self, key: (Uuid, Uuid), generation: u64) {
        {
            let mut entries = self.entries.lock().await;
            let still_armed = entries
                .get(&key)
                .map(|e| e.generation == generation)
                .unwrap_or(false);
            if !still_armed {
                return;
            }
            entries.remove(&key);
        }

        let (project_id, user_id) = key;
        tracing::debug!(%project_id, %user_id, "typing indicator expired");
        self.registry
            .broadcast_excluding_user(
                project_id,
                &ServerEvent::UserTyping {
                    project_id,
                    user_id,
                    is_typing: false,
                },
                user_id,
            )
            .await;
    }

    /// Clears the typing entry for one user in one room, broadcasting a stop
    /// to the remaining members when an entry was active. Invoked on leave
    /// and as part of disconnect cleanup.
    pub async fn clear(&self, project_id: Uuid, user_id: Uuid) {
        let was_active = {
            let mut entries = self.entries.lock().await;
            match entries.remove(&(project_id, user_id)) {
                Some(entry) => {
                    entry.timer.abort();
                    true
                }
                None => false,
            }
        };

        if was_active {
            self.registry
                .broadcast_excluding_user(
                    project_id,
                    &ServerEvent::UserTyping {
                        project_id,
                        user_id,
                        is_typing: false,
                    },
                    user_id,
                )
                .await;
        }
    }

    /// Whether a typing entry is currently active and unexpired.
    pub async fn is_typing(&self, project_id: Uuid, user_id: Uuid) -> bool {
        let entries = self.entries.lock().await;
        entries
            .get(&(project_id, user_id))
            .map(|e| e.expires_at > Instant::now())
            .unwrap_or(false)
    }
}
