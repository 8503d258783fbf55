//! Connection gateway: authentication, typed event dispatch, and
//! per-connection lifecycle.

use crate::collab::{IdentityVerifier, MembershipChecker, MessageStore, UserIdentity};
use crate::error::{AppError, AppResult};
use crate::protocol::{Ack, ClientEvent, ServerEvent};
use crate::rooms::{ConnectionId, RoomRegistry};
use crate::services::{MessageBroadcaster, PresenceTracker, ReadReceiptTracker};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub typing_ttl: Duration,
    pub max_body_bytes: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            typing_ttl: Duration::from_secs(10),
            max_body_bytes: 4096,
        }
    }
}

pub struct ChatGateway {
    registry: RoomRegistry,
    presence: PresenceTracker,
    receipts: ReadReceiptTracker,
    broadcaster: MessageBroadcaster,
    verifier: Arc<dyn IdentityVerifier>,
    membership: Arc<dyn MembershipChecker>,
}

impl ChatGateway {
    pub fn new(
        config: GatewayConfig,
        verifier: Arc<dyn IdentityVerifier>,
        membership: Arc<dyn MembershipChecker>,
        store: Arc<dyn MessageStore>,
    ) -> Self {
        let registry = RoomRegistry::new();
        Self {
            presence: PresenceTracker::new(registry.clone(), config.typing_ttl),
            receipts: ReadReceiptTracker::new(registry.clone(), store.clone()),
            broadcaster: MessageBroadcaster::new(
                registry.clone(),
                store,
                config.max_body_bytes,
            ),
            registry,
            verifier,
            membership,
        }
    }

    /// Verifies the handshake credential and registers the connection.
    /// No event is dispatched for a connection that has not passed here.
    pub async fn connect(
        &self,
        credential: &str,
    ) -> AppResult<(ConnectionId, UnboundedReceiver<ServerEvent>)> {
        let identity = self.verifier.verify(credential).await?;
        let user_id = identity.user_id;
        let (conn, rx) = self.registry.register(identity).await;
        tracing::info!(connection = %conn, user = %user_id, "connection authenticated");
        Ok((conn, rx))
    }

    /// Dispatches one inbound event and resolves it to exactly one
    /// acknowledgment. Component errors surface as error acks; they never
    /// tear down the connection.
    pub async fn handle_event(&self, conn: ConnectionId, event: ClientEvent) -> Ack {
        match self.dispatch(conn, event).await {
            Ok(ack) => ack,
            Err(err) => {
                tracing::debug!(connection = %conn, error = %err, "event rejected");
                Ack::from(err)
            }
        }
    }

    async fn dispatch(&self, conn: ConnectionId, event: ClientEvent) -> AppResult<Ack> {
        match event {
            ClientEvent::Join { project_id } => self.join(conn, project_id).await,
            ClientEvent::Leave { project_id } => self.leave(conn, project_id).await,
            ClientEvent::SendMessage {
                project_id,
                body,
                temp_id,
            } => self.broadcaster.send(conn, project_id, body, temp_id).await,
            ClientEvent::SetTyping {
                project_id,
                is_typing,
            } => self.presence.set_typing(conn, project_id, is_typing).await,
            ClientEvent::MarkSeen {
                project_id,
                message_id,
            } => self.receipts.mark_seen(conn, project_id, message_id).await,
        }
    }

    async fn join(&self, conn: ConnectionId, project_id: Uuid) -> AppResult<Ack> {
        let identity = self.require_identity(conn).await?;
        if !self
            .membership
            .is_member(identity.user_id, project_id)
            .await?
        {
            return Err(AppError::Authorization(project_id));
        }

        let added = self.registry.join(conn, project_id).await?;
        if added {
            tracing::info!(connection = %conn, user = %identity.user_id, %project_id, "joined room");
            self.registry
                .broadcast(
                    project_id,
                    &ServerEvent::MemberJoined {
                        project_id,
                        user_id: identity.user_id,
                    },
                    Some(conn),
                )
                .await;
        }
        Ok(Ack::Success)
    }

    async fn leave(&self, conn: ConnectionId, project_id: Uuid) -> AppResult<Ack> {
        let identity = self.require_identity(conn).await?;
        let was_member = self.registry.leave(conn, project_id).await?;
        if was_member {
            // A member list must never show typing for a non-member.
            self.presence.clear(project_id, identity.user_id).await;
            self.registry
                .broadcast(
                    project_id,
                    &ServerEvent::MemberLeft {
                        project_id,
                        user_id: identity.user_id,
                    },
                    Some(conn),
                )
                .await;
            if self.registry.member_count(project_id).await == 0 {
                self.broadcaster.release_room(project_id).await;
            }
        }
        Ok(Ack::Success)
    }

    /// Disconnect cleanup, run to completion before the connection's
    /// resources are released: typing entries are cleared with stop
    /// broadcasts, rooms are left without re-authorization, and remaining
    /// members are told the user left.
    pub async fn disconnect(&self, conn: ConnectionId) {
        let Some(identity) = self.registry.identity(conn).await else {
            return;
        };
        let rooms = self.registry.rooms_of(conn).await;

        for project_id in &rooms {
            self.presence.clear(*project_id, identity.user_id).await;
        }

        self.registry.unregister(conn).await;

        for project_id in rooms {
            self.registry
                .broadcast(
                    project_id,
                    &ServerEvent::MemberLeft {
                        project_id,
                        user_id: identity.user_id,
                    },
                    None,
                )
                .await;
            if self.registry.member_count(project_id).await == 0 {
                self.broadcaster.release_room(project_id).await;
            }
        }

        tracing::info!(connection = %conn, user = %identity.user_id, "connection closed");
    }

    async fn require_identity(&self, conn: ConnectionId) -> AppResult<UserIdentity> {
        self.registry
            .identity(conn)
            .await
            .ok_or_else(|| AppError::Validation("unknown connection".into()))
    }

    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    pub fn receipts(&self) -> &ReadReceiptTracker {
        &self.receipts
    }
}
