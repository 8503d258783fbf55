//! Wire-level event set for the chat gateway.
//!
//! Events are internally tagged by `type`. The set is closed: a frame whose
//! tag is not listed here fails to parse and is acknowledged with a
//! `ValidationFailure`, never silently dropped.

use crate::error::AppError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Inbound events from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "join")]
    Join { project_id: Uuid },

    #[serde(rename = "leave")]
    Leave { project_id: Uuid },

    #[serde(rename = "send-message")]
    SendMessage {
        project_id: Uuid,
        body: String,
        /// Client-chosen correlation token, echoed back opaquely.
        temp_id: String,
    },

    #[serde(rename = "set-typing")]
    SetTyping { project_id: Uuid, is_typing: bool },

    #[serde(rename = "mark-seen")]
    MarkSeen { project_id: Uuid, message_id: Uuid },
}

/// Outbound events from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "ack")]
    Ack(AckFrame),

    #[serde(rename = "new-message")]
    NewMessage {
        message: MessagePayload,
        temp_id: String,
    },

    #[serde(rename = "user-typing")]
    UserTyping {
        project_id: Uuid,
        user_id: Uuid,
        is_typing: bool,
    },

    #[serde(rename = "message-seen")]
    MessageSeen {
        project_id: Uuid,
        user_id: Uuid,
        message_id: Uuid,
    },

    #[serde(rename = "member-joined")]
    MemberJoined { project_id: Uuid, user_id: Uuid },

    #[serde(rename = "member-left")]
    MemberLeft { project_id: Uuid, user_id: Uuid },

    /// Unsolicited protocol-level error not tied to a specific ack.
    #[serde(rename = "error")]
    Error { code: String, message: String },
}

/// Canonical message shape carried in `new-message` broadcasts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePayload {
    pub id: Uuid,
    pub project_id: Uuid,
    pub sender_id: Uuid,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

/// Acknowledgment frame sent to the originating caller.
///
/// `seq` echoes the client-assigned request sequence when one was supplied,
/// so callers can correlate acks with in-flight requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AckFrame {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl AckFrame {
    pub fn error(seq: Option<u64>, err: &AppError) -> Self {
        Self {
            seq,
            success: false,
            id: None,
            temp_id: None,
            error: Some(ErrorBody {
                code: err.code().to_string(),
                message: err.to_string(),
            }),
        }
    }
}

/// Terminal result of one client-initiated event.
///
/// Every dispatched event resolves to exactly one of these; the transport
/// layer turns it into an [`AckFrame`].
#[derive(Debug, Clone, PartialEq)]
pub enum Ack {
    Success,
    Message { id: Uuid, temp_id: String },
    Error { code: &'static str, message: String },
}

impl Ack {
    pub fn into_frame(self, seq: Option<u64>) -> AckFrame {
        match self {
            Ack::Success => AckFrame {
                seq,
                success: true,
                id: None,
                temp_id: None,
                error: None,
            },
            Ack::Message { id, temp_id } => AckFrame {
                seq,
                success: true,
                id: Some(id),
                temp_id: Some(temp_id),
                error: None,
            },
            Ack::Error { code, message } => AckFrame {
                seq,
                success: false,
                id: None,
                temp_id: None,
                error: Some(ErrorBody {
                    code: code.to_string(),
                    message,
                }),
            },
        }
    }
}

impl From<AppError> for Ack {
    fn from(err: AppError) -> Self {
        Ack::Error {
            code: err.code(),
            message: err.to_string(),
        }
    }
}
