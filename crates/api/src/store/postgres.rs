//! Postgres implementation of the storage collaborators

use async_trait::async_trait;
use helpdesk_shared::ParticipantRole;
use sqlx::{types::Json, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{
    ConversationSnapshot, ConversationStore, IssueAnalysis, MessageOwner, NewHandoffNotification,
    NewMessage, SnapshotMessage, StoreError, StoredMessage, SyncRecordKind, SyncRecordStore,
    TicketSummary,
};

/// PostgreSQL unique violation
const UNIQUE_VIOLATION: &str = "23505";
/// PostgreSQL foreign key violation
const FOREIGN_KEY_VIOLATION: &str = "23503";

/// Postgres-backed conversation and sync record store
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn db_error_code(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().map(|c| c.into_owned()),
        _ => None,
    }
}

fn sync_table(kind: SyncRecordKind) -> &'static str {
    match kind {
        SyncRecordKind::HandoffNotification => "handoff_notifications",
        SyncRecordKind::FavoriteConversation => "favorite_conversations",
    }
}

#[async_trait]
impl ConversationStore for PgStore {
    async fn has_ticket_access(
        &self,
        ticket_id: Uuid,
        user_id: Uuid,
        role: ParticipantRole,
    ) -> Result<bool, StoreError> {
        let has_access = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS(
              SELECT 1 FROM support_tickets t
              WHERE t.id = $1
                AND ($3 <> 'customer' OR t.customer_id = $2)
            )
            "#,
        )
        .bind(ticket_id)
        .bind(user_id)
        .bind(role.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(has_access)
    }

    async fn latest_sequence(&self, ticket_id: Uuid) -> Result<u64, StoreError> {
        let latest: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(sequence), 0) FROM ticket_messages WHERE ticket_id = $1",
        )
        .bind(ticket_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(latest.max(0) as u64)
    }

    async fn append_message(&self, message: &NewMessage) -> Result<StoredMessage, StoreError> {
        let mut tx = self.pool.begin().await?;

        let created_at: OffsetDateTime = sqlx::query_scalar(
            r#"
            INSERT INTO ticket_messages
              (id, ticket_id, sender_id, sender_role, sequence, content, is_internal)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING created_at
            "#,
        )
        .bind(message.id)
        .bind(message.ticket_id)
        .bind(message.sender_id)
        .bind(message.sender_role.as_str())
        .bind(message.sequence as i64)
        .bind(&message.content)
        .bind(message.is_internal)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match db_error_code(&e).as_deref() {
            Some(UNIQUE_VIOLATION) => StoreError::SequenceConflict(message.sequence),
            Some(FOREIGN_KEY_VIOLATION) => StoreError::NotFound,
            _ => StoreError::Database(e),
        })?;

        // A customer reply reopens a resolved ticket
        sqlx::query(
            r#"
            UPDATE support_tickets
            SET updated_at = NOW(),
                status = CASE
                  WHEN $2 = 'customer' AND status IN ('resolved', 'closed') THEN 'open'
                  ELSE status
                END,
                resolved_at = CASE
                  WHEN $2 = 'customer' AND status IN ('resolved', 'closed') THEN NULL
                  ELSE resolved_at
                END
            WHERE id = $1
            "#,
        )
        .bind(message.ticket_id)
        .bind(message.sender_role.as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(StoredMessage {
            id: message.id,
            created_at,
        })
    }

    async fn upsert_read_marker(
        &self,
        ticket_id: Uuid,
        message_id: Uuid,
        user_id: Uuid,
        read_at: OffsetDateTime,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO ticket_message_reads (message_id, user_id, read_at)
            SELECT m.id, $3, $4
            FROM ticket_messages m
            WHERE m.id = $2 AND m.ticket_id = $1
            ON CONFLICT (message_id, user_id) DO UPDATE SET
              read_at = GREATEST(ticket_message_reads.read_at, EXCLUDED.read_at)
            "#,
        )
        .bind(ticket_id)
        .bind(message_id)
        .bind(user_id)
        .bind(read_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn message_owner(
        &self,
        ticket_id: Uuid,
        message_id: Uuid,
    ) -> Result<Option<MessageOwner>, StoreError> {
        let row: Option<(Uuid, bool)> = sqlx::query_as(
            "SELECT sender_id, is_internal FROM ticket_messages WHERE id = $2 AND ticket_id = $1",
        )
        .bind(ticket_id)
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(sender_id, is_internal)| MessageOwner {
            sender_id,
            is_internal,
        }))
    }

    async fn withdraw_message(&self, ticket_id: Uuid, message_id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE ticket_messages
            SET is_withdrawn = true, withdrawn_at = COALESCE(withdrawn_at, NOW())
            WHERE id = $2 AND ticket_id = $1
            "#,
        )
        .bind(ticket_id)
        .bind(message_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

#[async_trait]
impl SyncRecordStore for PgStore {
    async fn create_handoff_notification(
        &self,
        notification: &NewHandoffNotification,
    ) -> Result<Uuid, StoreError> {
        sqlx::query_scalar(
            r#"
            INSERT INTO handoff_notifications (ticket_id, channel, target, summary)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(notification.ticket_id)
        .bind(notification.channel.as_str())
        .bind(&notification.target)
        .bind(&notification.summary)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match db_error_code(&e).as_deref() {
            Some(FOREIGN_KEY_VIOLATION) => StoreError::NotFound,
            _ => StoreError::Database(e),
        })
    }

    async fn create_favorite_sync(
        &self,
        ticket_id: Uuid,
        favorited_by: Uuid,
    ) -> Result<Uuid, StoreError> {
        sqlx::query_scalar(
            r#"
            INSERT INTO favorite_conversations (ticket_id, favorited_by)
            VALUES ($1, $2)
            RETURNING id
            "#,
        )
        .bind(ticket_id)
        .bind(favorited_by)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match db_error_code(&e).as_deref() {
            Some(FOREIGN_KEY_VIOLATION) => StoreError::NotFound,
            _ => StoreError::Database(e),
        })
    }

    async fn claim(&self, kind: SyncRecordKind, record_id: Uuid) -> Result<bool, StoreError> {
        let query = format!(
            "UPDATE {} SET status = 'processing', updated_at = NOW() WHERE id = $1 AND status = 'pending'",
            sync_table(kind)
        );
        let result = sqlx::query(&query).bind(record_id).execute(&self.pool).await?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_synced(&self, kind: SyncRecordKind, record_id: Uuid) -> Result<bool, StoreError> {
        let query = match kind {
            SyncRecordKind::HandoffNotification => {
                r#"
                UPDATE handoff_notifications
                SET status = 'synced', notification_sent = true, last_error = NULL, updated_at = NOW()
                WHERE id = $1 AND status = 'processing'
                "#
            }
            SyncRecordKind::FavoriteConversation => {
                r#"
                UPDATE favorite_conversations
                SET status = 'synced', synced_at = NOW(), last_error = NULL, updated_at = NOW()
                WHERE id = $1 AND status = 'processing'
                "#
            }
        };
        let result = sqlx::query(query).bind(record_id).execute(&self.pool).await?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_failed(
        &self,
        kind: SyncRecordKind,
        record_id: Uuid,
        error: &str,
    ) -> Result<(), StoreError> {
        let query = format!(
            "UPDATE {} SET status = 'failed', last_error = $2, updated_at = NOW() WHERE id = $1",
            sync_table(kind)
        );
        sqlx::query(&query)
            .bind(record_id)
            .bind(error)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn ticket_summary(&self, ticket_id: Uuid) -> Result<Option<TicketSummary>, StoreError> {
        let row: Option<(String, String)> =
            sqlx::query_as("SELECT subject, description FROM support_tickets WHERE id = $1")
                .bind(ticket_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(title, description)| TicketSummary {
            ticket_id,
            title,
            description,
        }))
    }

    async fn conversation_snapshot(
        &self,
        ticket_id: Uuid,
    ) -> Result<Option<ConversationSnapshot>, StoreError> {
        let Some(summary) = self.ticket_summary(ticket_id).await? else {
            return Ok(None);
        };

        let rows: Vec<(Uuid, String, String, bool, OffsetDateTime)> = sqlx::query_as(
            r#"
            SELECT id, sender_role, content, is_internal, created_at
            FROM ticket_messages
            WHERE ticket_id = $1 AND is_withdrawn = false
            ORDER BY sequence ASC
            "#,
        )
        .bind(ticket_id)
        .fetch_all(&self.pool)
        .await?;

        let messages = rows
            .into_iter()
            .map(|(id, sender_role, content, is_internal, created_at)| {
                let sender_role = sender_role
                    .parse::<ParticipantRole>()
                    .map_err(|e| StoreError::InvalidData(e.to_string()))?;
                Ok(SnapshotMessage {
                    id,
                    sender_role,
                    content,
                    is_internal,
                    created_at,
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        Ok(Some(ConversationSnapshot {
            ticket_id,
            title: summary.title,
            description: summary.description,
            messages,
        }))
    }

    async fn mark_hot_issue_audited(
        &self,
        ticket_id: Uuid,
        analysis: Option<&IssueAnalysis>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE support_tickets
            SET hot_issue_audited_at = NOW(),
                hot_issue_analysis = COALESCE($2, hot_issue_analysis)
            WHERE id = $1
            "#,
        )
        .bind(ticket_id)
        .bind(analysis.map(Json))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}
