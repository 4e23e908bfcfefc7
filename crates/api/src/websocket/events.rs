//! WebSocket envelope types and wire codec
//!
//! Every frame exchanged over a ticket connection is one [`Envelope`]. The
//! `type` field selects the variant; field names are camelCase on the wire and
//! timestamps are RFC 3339. Decoding is all-or-nothing: an unknown tag, or a
//! missing/mistyped field required by the tag, rejects the whole frame.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Client-chosen identifier used to correlate a `message` with its `message_sent` ack
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TempId {
    Number(i64),
    Text(String),
}

/// One unit of wire traffic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Envelope {
    // =========================================================================
    // Client-to-server
    // =========================================================================
    /// New conversation message; the room comes from the connection
    Message {
        content: String,
        #[serde(
            default,
            with = "time::serde::rfc3339::option",
            skip_serializing_if = "Option::is_none"
        )]
        timestamp: Option<OffsetDateTime>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        temp_id: Option<TempId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_internal: Option<bool>,
    },

    /// Keep-alive ping
    Heartbeat {
        #[serde(
            default,
            with = "time::serde::rfc3339::option",
            skip_serializing_if = "Option::is_none"
        )]
        timestamp: Option<OffsetDateTime>,
    },

    /// Read receipt for a single message
    MessageRead {
        user_id: Uuid,
        message_id: Uuid,
        #[serde(with = "time::serde::rfc3339")]
        read_at: OffsetDateTime,
    },

    /// Request to withdraw one of the sender's own messages
    WithdrawMessage {
        user_id: Uuid,
        message_id: Uuid,
        room_id: Uuid,
        #[serde(with = "time::serde::rfc3339")]
        timestamp: OffsetDateTime,
    },

    // =========================================================================
    // Presence (both directions)
    // =========================================================================
    UserJoined {
        user_id: Uuid,
        room_id: Uuid,
        #[serde(with = "time::serde::rfc3339")]
        timestamp: OffsetDateTime,
    },

    UserLeft {
        user_id: Uuid,
        room_id: Uuid,
        #[serde(with = "time::serde::rfc3339")]
        timestamp: OffsetDateTime,
    },

    Typing {
        user_id: Uuid,
        room_id: Uuid,
        #[serde(with = "time::serde::rfc3339")]
        timestamp: OffsetDateTime,
    },

    // =========================================================================
    // Server-to-client
    // =========================================================================
    /// Heartbeat response (also accepted from clients answering a server ping)
    HeartbeatAck {
        #[serde(
            default,
            with = "time::serde::rfc3339::option",
            skip_serializing_if = "Option::is_none"
        )]
        timestamp: Option<OffsetDateTime>,
    },

    /// Handshake completed; `sequence` is the last sequence delivered in the room
    JoinSuccess {
        room_id: Uuid,
        #[serde(with = "time::serde::rfc3339")]
        timestamp: OffsetDateTime,
        #[serde(default)]
        sequence: u64,
    },

    /// Persisted message delivered to the other room members
    NewMessage {
        message_id: Uuid,
        room_id: Uuid,
        user_id: Uuid,
        content: String,
        #[serde(with = "time::serde::rfc3339")]
        timestamp: OffsetDateTime,
        is_internal: bool,
        #[serde(default)]
        sequence: u64,
    },

    /// Ack to the sender mapping its temp id to the server id
    MessageSent {
        #[serde(default)]
        temp_id: Option<TempId>,
        message_id: Uuid,
        room_id: Uuid,
        #[serde(with = "time::serde::rfc3339")]
        timestamp: OffsetDateTime,
        #[serde(default)]
        sequence: u64,
    },

    MessageReadUpdate {
        message_id: Uuid,
        user_id: Uuid,
        #[serde(with = "time::serde::rfc3339")]
        read_at: OffsetDateTime,
    },

    MessageWithdrawn {
        message_id: Uuid,
        room_id: Uuid,
        user_id: Uuid,
        #[serde(with = "time::serde::rfc3339")]
        timestamp: OffsetDateTime,
        is_internal: bool,
    },

    /// Rejection of the previous frame; the connection stays open
    Error { error: String },
}

impl Envelope {
    /// Wire tag of this envelope
    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::Message { .. } => "message",
            Envelope::Heartbeat { .. } => "heartbeat",
            Envelope::MessageRead { .. } => "message_read",
            Envelope::WithdrawMessage { .. } => "withdraw_message",
            Envelope::UserJoined { .. } => "user_joined",
            Envelope::UserLeft { .. } => "user_left",
            Envelope::Typing { .. } => "typing",
            Envelope::HeartbeatAck { .. } => "heartbeat_ack",
            Envelope::JoinSuccess { .. } => "join_success",
            Envelope::NewMessage { .. } => "new_message",
            Envelope::MessageSent { .. } => "message_sent",
            Envelope::MessageReadUpdate { .. } => "message_read_update",
            Envelope::MessageWithdrawn { .. } => "message_withdrawn",
            Envelope::Error { .. } => "error",
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Envelope::Error {
            error: message.into(),
        }
    }
}

/// Protocol-level rejection of a frame
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),
    #[error("Envelope type '{0}' is not accepted from clients")]
    UnexpectedEnvelope(&'static str),
    #[error("Message content cannot be empty")]
    EmptyContent,
}

/// Decode one wire frame
pub fn decode(frame: &[u8]) -> Result<Envelope, ProtocolError> {
    serde_json::from_slice(frame).map_err(|e| ProtocolError::MalformedEnvelope(e.to_string()))
}

/// Encode an envelope for the wire
pub fn encode(envelope: &Envelope) -> String {
    // Serialization of these types only fails on non-string map keys, which they never contain
    serde_json::to_string(envelope).unwrap_or_else(|e| {
        tracing::error!(error = %e, kind = envelope.kind(), "Failed to encode envelope");
        r#"{"type":"error","error":"Internal encoding failure"}"#.to_string()
    })
}
