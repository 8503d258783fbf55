//! Postgres-backed collaborators: message persistence and project
//! membership.
//!
//! Message appends assign a per-room `sequence_number` through an upserted
//! counter row inside the insert CTE; that row is the single serialization
//! point establishing total message order within a room.

use crate::collab::{MembershipChecker, MessageMeta, MessageStore, StoredMessage};
use crate::error::AppResult;
use async_trait::async_trait;
use deadpool_postgres::Pool;
use uuid::Uuid;

pub struct PgMessageStore {
    db: Pool,
}

impl PgMessageStore {
    pub fn new(db: Pool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn append(
        &self,
        project_id: Uuid,
        sender_id: Uuid,
        body: &str,
        idempotency_key: Option<&str>,
    ) -> AppResult<StoredMessage> {
        let id = Uuid::new_v4();
        let client = self.db.get().await?;

        let row = client
            .query_one(
                r#"
                WITH next AS (
                    INSERT INTO room_counters (project_id, last_seq)
                    VALUES ($2, 1)
                    ON CONFLICT (project_id)
                    DO UPDATE SET last_seq = room_counters.last_seq + 1
                    RETURNING last_seq
                )
                INSERT INTO messages (
                    id,
                    project_id,
                    sender_id,
                    body,
                    idempotency_key,
                    sequence_number
                )
                SELECT $1, $2, $3, $4, $5, next.last_seq
                FROM next
                RETURNING id, project_id, sender_id, body, sequence_number, created_at
                "#,
                &[&id, &project_id, &sender_id, &body, &idempotency_key],
            )
            .await?;

        Ok(StoredMessage {
            id: row.get(0),
            project_id: row.get(1),
            sender_id: row.get(2),
            body: row.get(3),
            sequence: row.get(4),
            created_at: row.get(5),
        })
    }

    async fn lookup(&self, project_id: Uuid, message_id: Uuid) -> AppResult<Option<MessageMeta>> {
        let client = self.db.get().await?;
        let row = client
            .query_opt(
                r#"
                SELECT id, sequence_number
                FROM messages
                WHERE project_id = $1 AND id = $2
                "#,
                &[&project_id, &message_id],
            )
            .await?;

        Ok(row.map(|row| MessageMeta {
            id: row.get(0),
            sequence: row.get(1),
        }))
    }
}

pub struct PgMembershipChecker {
    db: Pool,
}

impl PgMembershipChecker {
    pub fn new(db: Pool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MembershipChecker for PgMembershipChecker {
    async fn is_member(&self, user_id: Uuid, project_id: Uuid) -> AppResult<bool> {
        let client = self.db.get().await?;
        let row = client
            .query_opt(
                r#"
                SELECT 1
                FROM project_members
                WHERE project_id = $1 AND user_id = $2
                LIMIT 1
                "#,
                &[&project_id, &user_id],
            )
            .await?;
        Ok(row.is_some())
    }
}
