//! Connection session dispatch
//!
//! Owns everything that happens to a connection between the handshake and the
//! socket closing: joining its ticket room, routing each decoded envelope, and
//! leaving. Message delivery runs under the room sequencer so that every member
//! observes the same order, and nothing is broadcast unless it was persisted.

use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use uuid::Uuid;

use super::connection::{Connection, SentAck};
use super::events::{self, Envelope, ProtocolError, TempId};
use super::room::{Audience, Joined, MembershipError, Room, RoomRegistry};
use crate::store::{ConversationStore, NewMessage, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("Connection already joined this room")]
    AlreadyJoined,
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Forbidden")]
    Forbidden,
    #[error("Message not found")]
    UnknownMessage,
    #[error("Persistence failed: {0}")]
    Persistence(#[from] StoreError),
}

impl From<MembershipError> for SessionError {
    fn from(err: MembershipError) -> Self {
        match err {
            MembershipError::AlreadyJoined => SessionError::AlreadyJoined,
        }
    }
}

impl SessionError {
    /// Text sent back to the client in the `error` envelope
    pub fn client_message(&self) -> String {
        match self {
            SessionError::Protocol(e) => e.to_string(),
            SessionError::AlreadyJoined => "Already joined this ticket".to_string(),
            SessionError::Unauthorized => "Unauthorized".to_string(),
            SessionError::Forbidden => "Forbidden".to_string(),
            SessionError::UnknownMessage => "Message not found".to_string(),
            // Storage details stay in the logs
            SessionError::Persistence(_) => "Failed to save, please retry".to_string(),
        }
    }
}

/// Routes envelopes between connections, rooms and the conversation store
pub struct SessionDispatcher {
    rooms: Arc<RoomRegistry>,
    store: Arc<dyn ConversationStore>,
}

impl SessionDispatcher {
    pub fn new(rooms: Arc<RoomRegistry>, store: Arc<dyn ConversationStore>) -> Self {
        Self { rooms, store }
    }

    pub fn rooms(&self) -> &Arc<RoomRegistry> {
        &self.rooms
    }

    /// Join the connection to its ticket room
    ///
    /// Replies `join_success` to the connection and announces it to the others.
    pub async fn open(&self, conn: &Arc<Connection>) -> Result<Joined, SessionError> {
        let ticket_id = conn.room_id;

        if !self
            .store
            .has_ticket_access(ticket_id, conn.user_id(), conn.role())
            .await?
        {
            tracing::warn!(
                ticket_id = %ticket_id,
                user_id = %conn.user_id(),
                "Ticket access denied"
            );
            return Err(SessionError::Unauthorized);
        }

        let seed = self.store.latest_sequence(ticket_id).await?;
        let now = OffsetDateTime::now_utc();
        let joined = self
            .rooms
            .join(Arc::clone(conn), seed, |joined| {
                let _ = conn.send(Envelope::JoinSuccess {
                    room_id: ticket_id,
                    timestamp: now,
                    sequence: joined.sequence,
                });
            })
            .await?;

        self.rooms
            .broadcast(
                &ticket_id,
                &Envelope::UserJoined {
                    user_id: conn.user_id(),
                    room_id: ticket_id,
                    timestamp: now,
                },
                Audience::others(conn.session_id),
            )
            .await;

        tracing::info!(
            ticket_id = %ticket_id,
            session_id = %conn.session_id,
            user_id = %conn.user_id(),
            role = %conn.role(),
            room_size = joined.room_size,
            "Participant joined ticket room"
        );

        Ok(joined)
    }

    /// Remove the connection from its room and announce it to the rest
    pub async fn close(&self, conn: &Connection) {
        let ticket_id = conn.room_id;
        if self.rooms.leave(&ticket_id, &conn.session_id).await.is_none() {
            return;
        }

        self.rooms
            .broadcast(
                &ticket_id,
                &Envelope::UserLeft {
                    user_id: conn.user_id(),
                    room_id: ticket_id,
                    timestamp: OffsetDateTime::now_utc(),
                },
                Audience::everyone(),
            )
            .await;

        tracing::info!(
            ticket_id = %ticket_id,
            session_id = %conn.session_id,
            user_id = %conn.user_id(),
            "Participant left ticket room"
        );
    }

    /// Force the connection out of its room once its heartbeat window lapses
    ///
    /// Returns true when the connection was expired.
    pub async fn expire_if_silent(&self, conn: &Connection, timeout: Duration) -> bool {
        if !conn.heartbeat_expired(timeout).await {
            return false;
        }

        tracing::warn!(
            session_id = %conn.session_id,
            ticket_id = %conn.room_id,
            timeout_secs = timeout.as_secs(),
            "Heartbeat timeout, closing connection"
        );
        self.close(conn).await;
        true
    }

    /// Decode and dispatch one raw frame, replying `error` on rejection
    ///
    /// The connection stays open whatever the outcome.
    pub async fn handle_frame(
        &self,
        conn: &Arc<Connection>,
        frame: &[u8],
    ) -> Result<(), SessionError> {
        let result = match events::decode(frame) {
            Ok(envelope) => self.dispatch(conn.room_id, conn, envelope).await,
            Err(e) => Err(e.into()),
        };

        if let Err(e) = &result {
            match e {
                SessionError::Persistence(err) => tracing::error!(
                    ticket_id = %conn.room_id,
                    session_id = %conn.session_id,
                    error = %err,
                    "Failed to persist client envelope"
                ),
                _ => tracing::warn!(
                    ticket_id = %conn.room_id,
                    session_id = %conn.session_id,
                    error = %e,
                    "Rejected client envelope"
                ),
            }
            let _ = conn.send(Envelope::error(e.client_message()));
        }

        result
    }

    /// Apply one decoded envelope sent by `conn` to room `room_id`
    pub async fn dispatch(
        &self,
        room_id: Uuid,
        conn: &Arc<Connection>,
        envelope: Envelope,
    ) -> Result<(), SessionError> {
        if room_id != conn.room_id {
            return Err(SessionError::Unauthorized);
        }
        let room = self
            .rooms
            .room(&room_id)
            .await
            .ok_or(SessionError::Unauthorized)?;
        if !room.is_member(&conn.session_id).await {
            return Err(SessionError::Unauthorized);
        }

        tracing::debug!(
            ticket_id = %room_id,
            session_id = %conn.session_id,
            kind = envelope.kind(),
            "Dispatching client envelope"
        );

        match envelope {
            Envelope::Message {
                content,
                temp_id,
                is_internal,
                ..
            } => {
                self.send_message(&room, conn, content, temp_id, is_internal.unwrap_or(false))
                    .await
            }

            Envelope::Heartbeat { .. } => {
                conn.touch_heartbeat().await;
                let _ = conn.send(Envelope::HeartbeatAck {
                    timestamp: Some(OffsetDateTime::now_utc()),
                });
                Ok(())
            }

            // Client answering a server ping
            Envelope::HeartbeatAck { .. } => {
                conn.touch_heartbeat().await;
                Ok(())
            }

            Envelope::MessageRead {
                user_id,
                message_id,
                read_at,
            } => {
                ensure_identity(conn, user_id, room_id)?;
                self.store
                    .upsert_read_marker(room_id, message_id, user_id, read_at)
                    .await
                    .map_err(not_found_as_unknown)?;

                room.broadcast(
                    &Envelope::MessageReadUpdate {
                        message_id,
                        user_id,
                        read_at,
                    },
                    Audience::others(conn.session_id),
                )
                .await;
                Ok(())
            }

            Envelope::WithdrawMessage {
                user_id,
                message_id,
                room_id: target_room,
                ..
            } => {
                ensure_identity(conn, user_id, target_room)?;
                self.withdraw_message(&room, conn, message_id).await
            }

            Envelope::Typing {
                user_id,
                room_id: target_room,
                ..
            }
            | Envelope::UserJoined {
                user_id,
                room_id: target_room,
                ..
            }
            | Envelope::UserLeft {
                user_id,
                room_id: target_room,
                ..
            } => {
                ensure_identity(conn, user_id, target_room)?;
                room.broadcast(&envelope, Audience::others(conn.session_id))
                    .await;
                Ok(())
            }

            Envelope::JoinSuccess { .. }
            | Envelope::NewMessage { .. }
            | Envelope::MessageSent { .. }
            | Envelope::MessageReadUpdate { .. }
            | Envelope::MessageWithdrawn { .. }
            | Envelope::Error { .. } => {
                Err(ProtocolError::UnexpectedEnvelope(envelope.kind()).into())
            }
        }
    }

    async fn send_message(
        &self,
        room: &Room,
        conn: &Connection,
        content: String,
        temp_id: Option<TempId>,
        is_internal: bool,
    ) -> Result<(), SessionError> {
        if content.trim().is_empty() {
            return Err(ProtocolError::EmptyContent.into());
        }
        if is_internal && !conn.role().is_staff() {
            return Err(SessionError::Forbidden);
        }

        // Retransmission of a message the server already accepted
        if let Some(temp_id) = &temp_id {
            if let Some(ack) = conn.acknowledged(temp_id).await {
                tracing::debug!(
                    ticket_id = %room.room_id,
                    message_id = %ack.message_id,
                    "Re-acknowledging duplicate temp id"
                );
                let _ = conn.send(message_sent(room.room_id, Some(temp_id.clone()), ack));
                return Ok(());
            }
        }

        let _turn = room.sequencer().await;

        let mut message = NewMessage {
            id: Uuid::new_v4(),
            ticket_id: room.room_id,
            sender_id: conn.user_id(),
            sender_role: conn.role(),
            sequence: room.last_sequence() + 1,
            content,
            is_internal,
        };

        let stored = match self.store.append_message(&message).await {
            Ok(stored) => stored,
            Err(StoreError::SequenceConflict(taken)) => {
                // Another process wrote to this ticket since the room was seeded
                let latest = self.store.latest_sequence(room.room_id).await?;
                tracing::warn!(
                    ticket_id = %room.room_id,
                    taken,
                    latest,
                    "Room sequence was stale, reseeding"
                );
                room.commit_sequence(latest);
                message.sequence = latest + 1;
                self.store.append_message(&message).await?
            }
            Err(e) => return Err(e.into()),
        };

        room.commit_sequence(message.sequence);

        let ack = SentAck {
            message_id: stored.id,
            sequence: message.sequence,
            timestamp: stored.created_at,
        };
        let _ = conn.send(message_sent(room.room_id, temp_id.clone(), ack));
        if let Some(temp_id) = temp_id {
            conn.record_ack(temp_id, ack).await;
        }

        let recipients = room
            .broadcast(
                &Envelope::NewMessage {
                    message_id: stored.id,
                    room_id: room.room_id,
                    user_id: message.sender_id,
                    content: message.content,
                    timestamp: stored.created_at,
                    is_internal,
                    sequence: message.sequence,
                },
                Audience::others(conn.session_id).staff_only(is_internal),
            )
            .await;

        tracing::debug!(
            ticket_id = %room.room_id,
            message_id = %stored.id,
            sequence = message.sequence,
            recipients,
            "Message delivered"
        );

        Ok(())
    }

    async fn withdraw_message(
        &self,
        room: &Room,
        conn: &Connection,
        message_id: Uuid,
    ) -> Result<(), SessionError> {
        let owner = self
            .store
            .message_owner(room.room_id, message_id)
            .await?
            .ok_or(SessionError::UnknownMessage)?;

        if owner.sender_id != conn.user_id() {
            return Err(SessionError::Forbidden);
        }

        self.store
            .withdraw_message(room.room_id, message_id)
            .await
            .map_err(not_found_as_unknown)?;

        room.broadcast(
            &Envelope::MessageWithdrawn {
                message_id,
                room_id: room.room_id,
                user_id: owner.sender_id,
                timestamp: OffsetDateTime::now_utc(),
                is_internal: owner.is_internal,
            },
            Audience::everyone().staff_only(owner.is_internal),
        )
        .await;

        tracing::info!(
            ticket_id = %room.room_id,
            message_id = %message_id,
            "Message withdrawn"
        );

        Ok(())
    }
}

/// Identity fields on a payload must name the sending connection
fn ensure_identity(conn: &Connection, user_id: Uuid, room_id: Uuid) -> Result<(), SessionError> {
    if user_id != conn.user_id() || room_id != conn.room_id {
        return Err(SessionError::Unauthorized);
    }
    Ok(())
}

fn not_found_as_unknown(err: StoreError) -> SessionError {
    match err {
        StoreError::NotFound => SessionError::UnknownMessage,
        other => SessionError::Persistence(other),
    }
}

fn message_sent(room_id: Uuid, temp_id: Option<TempId>, ack: SentAck) -> Envelope {
    Envelope::MessageSent {
        temp_id,
        message_id: ack.message_id,
        room_id,
        timestamp: ack.timestamp,
        sequence: ack.sequence,
    }
}
