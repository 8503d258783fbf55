//! Collaborator interfaces consumed by the gateway.
//!
//! Credential verification, project membership, and message persistence are
//! external concerns; the gateway talks to them through these narrow traits.
//! In-memory implementations live in [`memory`] for tests and local runs.

use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Identity resolved from a bearer credential at handshake.
#[derive(Debug, Clone, PartialEq)]
pub struct UserIdentity {
    pub user_id: Uuid,
    pub display_name: String,
}

/// Verifies a bearer credential and resolves the caller's identity.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, credential: &str) -> AppResult<UserIdentity>;
}

/// Answers whether a user belongs to a project.
#[async_trait]
pub trait MembershipChecker: Send + Sync {
    async fn is_member(&self, user_id: Uuid, project_id: Uuid) -> AppResult<bool>;
}

/// A message as durably persisted by the store.
///
/// `sequence` is assigned per room at append time and establishes the total
/// order of messages within that room.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMessage {
    pub id: Uuid,
    pub project_id: Uuid,
    pub sender_id: Uuid,
    pub body: String,
    pub sequence: i64,
    pub created_at: DateTime<Utc>,
}

/// Existence/order metadata for a persisted message.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MessageMeta {
    pub id: Uuid,
    pub sequence: i64,
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Durably appends a message, assigning its canonical id, room sequence
    /// and creation timestamp.
    async fn append(
        &self,
        project_id: Uuid,
        sender_id: Uuid,
        body: &str,
        idempotency_key: Option<&str>,
    ) -> AppResult<StoredMessage>;

    /// Looks up a message within a room. `None` means the message does not
    /// exist in that room.
    async fn lookup(&self, project_id: Uuid, message_id: Uuid) -> AppResult<Option<MessageMeta>>;
}

pub mod memory {
    //! In-memory collaborators for tests and local development.

    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::Arc;
    use tokio::sync::RwLock;

    /// Static token -> identity directory doubling as a membership table.
    #[derive(Debug, Clone, Default)]
    pub struct StaticDirectory {
        tokens: HashMap<String, UserIdentity>,
        members: HashMap<Uuid, HashSet<Uuid>>,
    }

    impl StaticDirectory {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_token(mut self, token: &str, identity: UserIdentity) -> Self {
            self.tokens.insert(token.to_string(), identity);
            self
        }

        pub fn with_member(mut self, project_id: Uuid, user_id: Uuid) -> Self {
            self.members.entry(project_id).or_default().insert(user_id);
            self
        }
    }

    #[async_trait]
    impl IdentityVerifier for StaticDirectory {
        async fn verify(&self, credential: &str) -> AppResult<UserIdentity> {
            self.tokens
                .get(credential)
                .cloned()
                .ok_or_else(|| AppError::Authentication("unknown credential".into()))
        }
    }

    #[async_trait]
    impl MembershipChecker for StaticDirectory {
        async fn is_member(&self, user_id: Uuid, project_id: Uuid) -> AppResult<bool> {
            Ok(self
                .members
                .get(&project_id)
                .map(|m| m.contains(&user_id))
                .unwrap_or(false))
        }
    }

    /// Message store keeping per-room logs in memory.
    #[derive(Debug, Clone, Default)]
    pub struct InMemoryMessageStore {
        rooms: Arc<RwLock<HashMap<Uuid, Vec<StoredMessage>>>>,
    }

    impl InMemoryMessageStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn message_count(&self, project_id: Uuid) -> usize {
            let rooms = self.rooms.read().await;
            rooms.get(&project_id).map(|log| log.len()).unwrap_or(0)
        }
    }

    #[async_trait]
    impl MessageStore for InMemoryMessageStore {
        async fn append(
            &self,
            project_id: Uuid,
            sender_id: Uuid,
            body: &str,
            _idempotency_key: Option<&str>,
        ) -> AppResult<StoredMessage> {
            let mut rooms = self.rooms.write().await;
            let log = rooms.entry(project_id).or_default();
            let message = StoredMessage {
                id: Uuid::new_v4(),
                project_id,
                sender_id,
                body: body.to_string(),
                sequence: log.len() as i64 + 1,
                created_at: Utc::now(),
            };
            log.push(message.clone());
            Ok(message)
        }

        async fn lookup(
            &self,
            project_id: Uuid,
            message_id: Uuid,
        ) -> AppResult<Option<MessageMeta>> {
            let rooms = self.rooms.read().await;
            Ok(rooms.get(&project_id).and_then(|log| {
                log.iter()
                    .find(|m| m.id == message_id)
                    .map(|m| MessageMeta {
                        id: m.id,
                        sequence: m.sequence,
                    })
            }))
        }
    }
}
