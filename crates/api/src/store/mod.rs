//! Storage collaborators
//!
//! The messaging path and the reactive handlers reach persistence only through
//! these traits. [`PgStore`] implements all of them on Postgres.

mod postgres;

use async_trait::async_trait;
use helpdesk_shared::{NotificationChannel, ParticipantRole};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

pub use postgres::PgStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Record not found")]
    NotFound,
    /// Another writer already persisted this room sequence number
    #[error("Sequence {0} already taken")]
    SequenceConflict(u64),
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
    #[error("Invalid stored data: {0}")]
    InvalidData(String),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

// =============================================================================
// Conversation store
// =============================================================================

/// Message about to be appended to a ticket conversation
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub sender_id: Uuid,
    pub sender_role: ParticipantRole,
    pub sequence: u64,
    pub content: String,
    pub is_internal: bool,
}

/// Durable facts assigned by the store on append
#[derive(Debug, Clone, Copy)]
pub struct StoredMessage {
    pub id: Uuid,
    pub created_at: OffsetDateTime,
}

/// Author and visibility of an existing message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageOwner {
    pub sender_id: Uuid,
    pub is_internal: bool,
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Customers may only open their own tickets; staff may open any
    async fn has_ticket_access(
        &self,
        ticket_id: Uuid,
        user_id: Uuid,
        role: ParticipantRole,
    ) -> Result<bool, StoreError>;

    /// Highest sequence persisted for the ticket, 0 when empty
    async fn latest_sequence(&self, ticket_id: Uuid) -> Result<u64, StoreError>;

    /// Append-only message write
    async fn append_message(&self, message: &NewMessage) -> Result<StoredMessage, StoreError>;

    async fn upsert_read_marker(
        &self,
        ticket_id: Uuid,
        message_id: Uuid,
        user_id: Uuid,
        read_at: OffsetDateTime,
    ) -> Result<(), StoreError>;

    /// Author of a message in the ticket, None if it does not exist
    async fn message_owner(
        &self,
        ticket_id: Uuid,
        message_id: Uuid,
    ) -> Result<Option<MessageOwner>, StoreError>;

    async fn withdraw_message(&self, ticket_id: Uuid, message_id: Uuid) -> Result<(), StoreError>;
}

// =============================================================================
// Sync record store
// =============================================================================

/// Table family a sync record lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncRecordKind {
    HandoffNotification,
    FavoriteConversation,
}

impl SyncRecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HandoffNotification => "handoff_notification",
            Self::FavoriteConversation => "favorite_conversation",
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewHandoffNotification {
    pub ticket_id: Uuid,
    pub channel: NotificationChannel,
    pub target: String,
    pub summary: String,
}

/// Title and description used for hot-issue analysis
#[derive(Debug, Clone)]
pub struct TicketSummary {
    pub ticket_id: Uuid,
    pub title: String,
    pub description: String,
}

/// Full conversation handed to the knowledge base
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationSnapshot {
    pub ticket_id: Uuid,
    pub title: String,
    pub description: String,
    pub messages: Vec<SnapshotMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SnapshotMessage {
    pub id: Uuid,
    pub sender_role: ParticipantRole,
    pub content: String,
    pub is_internal: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Result of the hot-issue analysis collaborator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IssueAnalysis {
    pub is_hot: bool,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

#[async_trait]
pub trait SyncRecordStore: Send + Sync {
    async fn create_handoff_notification(
        &self,
        notification: &NewHandoffNotification,
    ) -> Result<Uuid, StoreError>;

    async fn create_favorite_sync(
        &self,
        ticket_id: Uuid,
        favorited_by: Uuid,
    ) -> Result<Uuid, StoreError>;

    /// pending -> processing; false when another delivery already picked it up
    async fn claim(&self, kind: SyncRecordKind, record_id: Uuid) -> Result<bool, StoreError>;

    /// processing -> synced; for handoff notifications also sets `notification_sent`
    async fn mark_synced(&self, kind: SyncRecordKind, record_id: Uuid) -> Result<bool, StoreError>;

    /// any -> failed, recording the error
    async fn mark_failed(
        &self,
        kind: SyncRecordKind,
        record_id: Uuid,
        error: &str,
    ) -> Result<(), StoreError>;

    async fn ticket_summary(&self, ticket_id: Uuid) -> Result<Option<TicketSummary>, StoreError>;

    /// Conversation without withdrawn messages, oldest first
    async fn conversation_snapshot(
        &self,
        ticket_id: Uuid,
    ) -> Result<Option<ConversationSnapshot>, StoreError>;

    /// Stamp the hot-issue audit timestamp, storing the analysis when there is one
    async fn mark_hot_issue_audited(
        &self,
        ticket_id: Uuid,
        analysis: Option<&IssueAnalysis>,
    ) -> Result<(), StoreError>;
}
