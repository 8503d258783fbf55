// End-to-end protocol tests driving the gateway through in-memory
// collaborators: room membership, ordered fanout, typing expiry, read
// receipts, and disconnect cleanup.

use async_trait::async_trait;
use project_chat_gateway::collab::memory::{InMemoryMessageStore, StaticDirectory};
use project_chat_gateway::collab::{MessageMeta, MessageStore, StoredMessage, UserIdentity};
use project_chat_gateway::error::{AppError, AppResult};
use project_chat_gateway::gateway::{ChatGateway, GatewayConfig};
use project_chat_gateway::protocol::{Ack, ClientEvent, ServerEvent};
use project_chat_gateway::rooms::ConnectionId;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

struct Harness {
    gateway: ChatGateway,
    project: Uuid,
    ada: Uuid,
    grace: Uuid,
}

fn harness_with(store: Arc<dyn MessageStore>, typing_ttl: Duration) -> Harness {
    let project = Uuid::new_v4();
    let ada = Uuid::new_v4();
    let grace = Uuid::new_v4();

    let directory = Arc::new(
        StaticDirectory::new()
            .with_token(
                "ada-token",
                UserIdentity {
                    user_id: ada,
                    display_name: "ada".into(),
                },
            )
            .with_token(
                "grace-token",
                UserIdentity {
                    user_id: grace,
                    display_name: "grace".into(),
                },
            )
            .with_member(project, ada)
            .with_member(project, grace),
    );

    let gateway = ChatGateway::new(
        GatewayConfig {
            typing_ttl,
            max_body_bytes: 64,
        },
        directory.clone(),
        directory,
        store,
    );

    Harness {
        gateway,
        project,
        ada,
        grace,
    }
}

fn harness() -> Harness {
    harness_with(
        Arc::new(InMemoryMessageStore::new()),
        Duration::from_secs(10),
    )
}

async fn connect(h: &Harness, token: &str) -> (ConnectionId, UnboundedReceiver<ServerEvent>) {
    h.gateway.connect(token).await.expect("connect")
}

async fn join(h: &Harness, conn: ConnectionId) {
    let ack = h
        .gateway
        .handle_event(
            conn,
            ClientEvent::Join {
                project_id: h.project,
            },
        )
        .await;
    assert_eq!(ack, Ack::Success);
}

fn drain(rx: &mut UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn error_code(ack: &Ack) -> &'static str {
    match ack {
        Ack::Error { code, .. } => *code,
        other => panic!("expected error ack, got {other:?}"),
    }
}

#[tokio::test]
async fn rejects_unknown_credentials() {
    let h = harness();
    let err = h.gateway.connect("intruder-token").await.unwrap_err();
    assert_eq!(err.code(), "AuthenticationFailure");
}

#[tokio::test]
async fn join_requires_project_membership() {
    let h = harness();
    let (ada, _rx) = connect(&h, "ada-token").await;
    let ack = h
        .gateway
        .handle_event(
            ada,
            ClientEvent::Join {
                project_id: Uuid::new_v4(),
            },
        )
        .await;
    assert_eq!(error_code(&ack), "AuthorizationFailure");
}

#[tokio::test]
async fn join_is_idempotent_and_leave_is_noop() {
    let h = harness();
    let (ada, _rx_a) = connect(&h, "ada-token").await;
    let (grace, mut rx_g) = connect(&h, "grace-token").await;
    join(&h, grace).await;

    join(&h, ada).await;
    join(&h, ada).await; // repeated join: success, no second broadcast

    let joins = drain(&mut rx_g)
        .into_iter()
        .filter(|e| matches!(e, ServerEvent::MemberJoined { .. }))
        .count();
    assert_eq!(joins, 1);
    assert_eq!(h.gateway.registry().member_count(h.project).await, 2);

    let leave = ClientEvent::Leave {
        project_id: h.project,
    };
    assert_eq!(h.gateway.handle_event(ada, leave.clone()).await, Ack::Success);
    assert_eq!(h.gateway.handle_event(ada, leave).await, Ack::Success);

    let leaves = drain(&mut rx_g)
        .into_iter()
        .filter(|e| matches!(e, ServerEvent::MemberLeft { .. }))
        .count();
    assert_eq!(leaves, 1);
    assert_eq!(h.gateway.registry().member_count(h.project).await, 1);
}

#[tokio::test]
async fn send_message_acks_and_fans_out_exactly_once() {
    let h = harness();
    let (ada, mut rx_a) = connect(&h, "ada-token").await;
    let (grace, mut rx_g) = connect(&h, "grace-token").await;
    join(&h, ada).await;
    join(&h, grace).await;
    drain(&mut rx_a);
    drain(&mut rx_g);

    let ack = h
        .gateway
        .handle_event(
            ada,
            ClientEvent::SendMessage {
                project_id: h.project,
                body: "hi".into(),
                temp_id: "t1".into(),
            },
        )
        .await;
    let Ack::Message { id, temp_id } = ack else {
        panic!("expected message ack, got {ack:?}");
    };
    assert_eq!(temp_id, "t1");

    // Both members, sender included, see the broadcast exactly once with
    // the canonical id and the echoed temp id.
    for rx in [&mut rx_a, &mut rx_g] {
        let events = drain(rx);
        assert_eq!(events.len(), 1);
        match &events[0] {
            ServerEvent::NewMessage { message, temp_id } => {
                assert_eq!(message.id, id);
                assert_eq!(message.sender_id, h.ada);
                assert_eq!(message.body, "hi");
                assert_eq!(temp_id, "t1");
            }
            other => panic!("expected new-message, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn members_observe_messages_in_identical_order() {
    let h = harness();
    let (ada, mut rx_a) = connect(&h, "ada-token").await;
    let (grace, mut rx_g) = connect(&h, "grace-token").await;
    join(&h, ada).await;
    join(&h, grace).await;
    drain(&mut rx_a);
    drain(&mut rx_g);

    let mut sent = Vec::new();
    for (conn, body, temp) in [(ada, "first", "t1"), (grace, "second", "t2"), (ada, "third", "t3")]
    {
        let ack = h
            .gateway
            .handle_event(
                conn,
                ClientEvent::SendMessage {
                    project_id: h.project,
                    body: body.into(),
                    temp_id: temp.into(),
                },
            )
            .await;
        match ack {
            Ack::Message { id, .. } => sent.push(id),
            other => panic!("send failed: {other:?}"),
        }
    }

    for rx in [&mut rx_a, &mut rx_g] {
        let observed: Vec<Uuid> = drain(rx)
            .into_iter()
            .filter_map(|e| match e {
                ServerEvent::NewMessage { message, .. } => Some(message.id),
                _ => None,
            })
            .collect();
        assert_eq!(observed, sent);
    }
}

#[tokio::test]
async fn send_without_join_is_rejected_with_zero_broadcasts() {
    let h = harness();
    let (ada, _rx_a) = connect(&h, "ada-token").await;
    let (grace, mut rx_g) = connect(&h, "grace-token").await;
    join(&h, grace).await;

    let ack = h
        .gateway
        .handle_event(
            ada,
            ClientEvent::SendMessage {
                project_id: h.project,
                body: "hi".into(),
                temp_id: "t1".into(),
            },
        )
        .await;
    assert_eq!(error_code(&ack), "NotInRoom");
    assert!(drain(&mut rx_g).is_empty());
}

#[tokio::test]
async fn empty_and_oversized_bodies_are_rejected() {
    let h = harness();
    let (ada, _rx_a) = connect(&h, "ada-token").await;
    join(&h, ada).await;

    let oversized = "x".repeat(65);
    for body in ["", "   ", oversized.as_str()] {
        let ack = h
            .gateway
            .handle_event(
                ada,
                ClientEvent::SendMessage {
                    project_id: h.project,
                    body: body.to_string(),
                    temp_id: "t1".into(),
                },
            )
            .await;
        assert_eq!(error_code(&ack), "ValidationFailure");
    }
}

struct FailingStore;

#[async_trait]
impl MessageStore for FailingStore {
    async fn append(
        &self,
        _project_id: Uuid,
        _sender_id: Uuid,
        _body: &str,
        _idempotency_key: Option<&str>,
    ) -> AppResult<StoredMessage> {
        Err(AppError::Persistence("storage unavailable".into()))
    }

    async fn lookup(&self, _project_id: Uuid, _message_id: Uuid) -> AppResult<Option<MessageMeta>> {
        Err(AppError::Persistence("storage unavailable".into()))
    }
}

#[tokio::test]
async fn persistence_failure_produces_error_ack_and_no_broadcast() {
    let h = harness_with(Arc::new(FailingStore), Duration::from_secs(10));
    let (ada, mut rx_a) = connect(&h, "ada-token").await;
    let (grace, mut rx_g) = connect(&h, "grace-token").await;
    join(&h, ada).await;
    join(&h, grace).await;
    drain(&mut rx_a);
    drain(&mut rx_g);

    let ack = h
        .gateway
        .handle_event(
            ada,
            ClientEvent::SendMessage {
                project_id: h.project,
                body: "hi".into(),
                temp_id: "t1".into(),
            },
        )
        .await;
    assert_eq!(error_code(&ack), "PersistenceFailure");
    assert!(drain(&mut rx_a).is_empty());
    assert!(drain(&mut rx_g).is_empty());
}

#[tokio::test]
async fn read_cursor_is_monotonic() {
    let h = harness();
    let (ada, mut rx_a) = connect(&h, "ada-token").await;
    let (grace, mut rx_g) = connect(&h, "grace-token").await;
    join(&h, ada).await;
    join(&h, grace).await;

    let mut ids = Vec::new();
    for (body, temp) in [("one", "t1"), ("two", "t2")] {
        match h
            .gateway
            .handle_event(
                ada,
                ClientEvent::SendMessage {
                    project_id: h.project,
                    body: body.into(),
                    temp_id: temp.into(),
                },
            )
            .await
        {
            Ack::Message { id, .. } => ids.push(id),
            other => panic!("send failed: {other:?}"),
        }
    }
    drain(&mut rx_a);
    drain(&mut rx_g);

    // advance to the newer message
    let ack = h
        .gateway
        .handle_event(
            grace,
            ClientEvent::MarkSeen {
                project_id: h.project,
                message_id: ids[1],
            },
        )
        .await;
    assert_eq!(ack, Ack::Success);
    let seen = drain(&mut rx_a);
    assert_eq!(
        seen,
        vec![ServerEvent::MessageSeen {
            project_id: h.project,
            user_id: h.grace,
            message_id: ids[1],
        }]
    );

    // stale mark: ack success, no mutation, no broadcast
    let ack = h
        .gateway
        .handle_event(
            grace,
            ClientEvent::MarkSeen {
                project_id: h.project,
                message_id: ids[0],
            },
        )
        .await;
    assert_eq!(ack, Ack::Success);
    assert!(drain(&mut rx_a).is_empty());

    let cursor = h
        .gateway
        .receipts()
        .cursor(h.project, h.grace)
        .await
        .expect("cursor");
    assert_eq!(cursor.message_id, ids[1]);
}

#[tokio::test]
async fn mark_seen_requires_room_membership() {
    let h = harness();
    let (ada, _rx_a) = connect(&h, "ada-token").await;

    let ack = h
        .gateway
        .handle_event(
            ada,
            ClientEvent::MarkSeen {
                project_id: h.project,
                message_id: Uuid::new_v4(),
            },
        )
        .await;
    assert_eq!(error_code(&ack), "NotInRoom");
}

#[tokio::test]
async fn mark_seen_requires_a_known_message() {
    let h = harness();
    let (ada, _rx_a) = connect(&h, "ada-token").await;
    join(&h, ada).await;

    let ack = h
        .gateway
        .handle_event(
            ada,
            ClientEvent::MarkSeen {
                project_id: h.project,
                message_id: Uuid::new_v4(),
            },
        )
        .await;
    assert_eq!(error_code(&ack), "ValidationFailure");
}

#[tokio::test]
async fn typing_broadcasts_to_other_members_only() {
    let h = harness();
    let (ada, mut rx_a) = connect(&h, "ada-token").await;
    let (grace, mut rx_g) = connect(&h, "grace-token").await;
    join(&h, ada).await;
    join(&h, grace).await;
    drain(&mut rx_a);
    drain(&mut rx_g);

    let ack = h
        .gateway
        .handle_event(
            ada,
            ClientEvent::SetTyping {
                project_id: h.project,
                is_typing: true,
            },
        )
        .await;
    assert_eq!(ack, Ack::Success);

    assert_eq!(
        drain(&mut rx_g),
        vec![ServerEvent::UserTyping {
            project_id: h.project,
            user_id: h.ada,
            is_typing: true,
        }]
    );
    assert!(drain(&mut rx_a).is_empty());
    assert!(h.gateway.presence().is_typing(h.project, h.ada).await);
}

#[tokio::test]
async fn typing_requires_room_membership() {
    let h = harness();
    let (ada, _rx_a) = connect(&h, "ada-token").await;

    let ack = h
        .gateway
        .handle_event(
            ada,
            ClientEvent::SetTyping {
                project_id: h.project,
                is_typing: true,
            },
        )
        .await;
    assert_eq!(error_code(&ack), "NotInRoom");
}

#[tokio::test]
async fn typing_expires_after_ttl() {
    let h = harness_with(
        Arc::new(InMemoryMessageStore::new()),
        Duration::from_millis(50),
    );
    let (ada, _rx_a) = connect(&h, "ada-token").await;
    let (grace, mut rx_g) = connect(&h, "grace-token").await;
    join(&h, ada).await;
    join(&h, grace).await;
    drain(&mut rx_g);

    h.gateway
        .handle_event(
            ada,
            ClientEvent::SetTyping {
                project_id: h.project,
                is_typing: true,
            },
        )
        .await;

    tokio::time::sleep(Duration::from_millis(200)).await;

    let typing: Vec<bool> = drain(&mut rx_g)
        .into_iter()
        .filter_map(|e| match e {
            ServerEvent::UserTyping { is_typing, .. } => Some(is_typing),
            _ => None,
        })
        .collect();
    assert_eq!(typing, vec![true, false]);
    assert!(!h.gateway.presence().is_typing(h.project, h.ada).await);
}

#[tokio::test]
async fn typing_refresh_replaces_the_expiry_timer() {
    let h = harness_with(
        Arc::new(InMemoryMessageStore::new()),
        Duration::from_millis(300),
    );
    let (ada, _rx_a) = connect(&h, "ada-token").await;
    let (grace, mut rx_g) = connect(&h, "grace-token").await;
    join(&h, ada).await;
    join(&h, grace).await;
    drain(&mut rx_g);

    let start_typing = ClientEvent::SetTyping {
        project_id: h.project,
        is_typing: true,
    };
    h.gateway.handle_event(ada, start_typing.clone()).await;
    tokio::time::sleep(Duration::from_millis(150)).await;
    h.gateway.handle_event(ada, start_typing).await;

    // 350ms after the first start: the original timer would have fired, but
    // the refresh replaced it.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let stops = drain(&mut rx_g)
        .into_iter()
        .filter(|e| matches!(e, ServerEvent::UserTyping { is_typing: false, .. }))
        .count();
    assert_eq!(stops, 0);

    // ...and the refreshed timer fires on its own schedule.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let stops = drain(&mut rx_g)
        .into_iter()
        .filter(|e| matches!(e, ServerEvent::UserTyping { is_typing: false, .. }))
        .count();
    assert_eq!(stops, 1);
}

#[tokio::test]
async fn explicit_stop_clears_typing_immediately() {
    let h = harness();
    let (ada, _rx_a) = connect(&h, "ada-token").await;
    let (grace, mut rx_g) = connect(&h, "grace-token").await;
    join(&h, ada).await;
    join(&h, grace).await;
    drain(&mut rx_g);

    for is_typing in [true, false] {
        h.gateway
            .handle_event(
                ada,
                ClientEvent::SetTyping {
                    project_id: h.project,
                    is_typing,
                },
            )
            .await;
    }

    let typing: Vec<bool> = drain(&mut rx_g)
        .into_iter()
        .filter_map(|e| match e {
            ServerEvent::UserTyping { is_typing, .. } => Some(is_typing),
            _ => None,
        })
        .collect();
    assert_eq!(typing, vec![true, false]);
    assert!(!h.gateway.presence().is_typing(h.project, h.ada).await);
}

#[tokio::test]
async fn leave_clears_active_typing_with_stop_broadcast() {
    let h = harness();
    let (ada, _rx_a) = connect(&h, "ada-token").await;
    let (grace, mut rx_g) = connect(&h, "grace-token").await;
    join(&h, ada).await;
    join(&h, grace).await;
    drain(&mut rx_g);

    h.gateway
        .handle_event(
            ada,
            ClientEvent::SetTyping {
                project_id: h.project,
                is_typing: true,
            },
        )
        .await;
    let ack = h
        .gateway
        .handle_event(
            ada,
            ClientEvent::Leave {
                project_id: h.project,
            },
        )
        .await;
    assert_eq!(ack, Ack::Success);

    let events = drain(&mut rx_g);
    assert!(events.contains(&ServerEvent::UserTyping {
        project_id: h.project,
        user_id: h.ada,
        is_typing: false,
    }));
    assert!(events.contains(&ServerEvent::MemberLeft {
        project_id: h.project,
        user_id: h.ada,
    }));
    assert!(!h.gateway.presence().is_typing(h.project, h.ada).await);
}

#[tokio::test]
async fn disconnect_clears_typing_and_membership() {
    let h = harness();
    let (ada, _rx_a) = connect(&h, "ada-token").await;
    let (grace, mut rx_g) = connect(&h, "grace-token").await;
    join(&h, ada).await;
    join(&h, grace).await;
    drain(&mut rx_g);

    h.gateway
        .handle_event(
            ada,
            ClientEvent::SetTyping {
                project_id: h.project,
                is_typing: true,
            },
        )
        .await;

    h.gateway.disconnect(ada).await;

    let events = drain(&mut rx_g);
    assert!(events.contains(&ServerEvent::UserTyping {
        project_id: h.project,
        user_id: h.ada,
        is_typing: false,
    }));
    assert!(events.contains(&ServerEvent::MemberLeft {
        project_id: h.project,
        user_id: h.ada,
    }));
    assert_eq!(h.gateway.registry().member_count(h.project).await, 1);
    assert!(!h.gateway.presence().is_typing(h.project, h.ada).await);
}

#[tokio::test]
async fn full_scenario_join_send_receive_mark_seen() {
    let h = harness();
    let (ada, mut rx_a) = connect(&h, "ada-token").await;
    let (grace, mut rx_g) = connect(&h, "grace-token").await;
    join(&h, grace).await;
    join(&h, ada).await;
    drain(&mut rx_a);
    drain(&mut rx_g);

    let ack = h
        .gateway
        .handle_event(
            ada,
            ClientEvent::SendMessage {
                project_id: h.project,
                body: "hi".into(),
                temp_id: "t1".into(),
            },
        )
        .await;
    let Ack::Message { id, temp_id } = ack else {
        panic!("expected message ack");
    };
    assert_eq!(temp_id, "t1");

    let received: Vec<Uuid> = drain(&mut rx_g)
        .into_iter()
        .filter_map(|e| match e {
            ServerEvent::NewMessage { message, .. } => Some(message.id),
            _ => None,
        })
        .collect();
    assert_eq!(received, vec![id]);

    let ack = h
        .gateway
        .handle_event(
            grace,
            ClientEvent::MarkSeen {
                project_id: h.project,
                message_id: id,
            },
        )
        .await;
    assert_eq!(ack, Ack::Success);

    let seen = drain(&mut rx_a);
    assert_eq!(
        seen,
        vec![ServerEvent::MessageSeen {
            project_id: h.project,
            user_id: h.grace,
            message_id: id,
        }]
    );
}
