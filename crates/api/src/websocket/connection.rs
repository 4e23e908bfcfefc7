//! WebSocket connection management
//!
//! Represents one live participant connection bound to a single ticket room.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::{mpsc, RwLock};
use tokio::time::Instant;
use uuid::Uuid;

use helpdesk_shared::ParticipantRole;

use super::events::{Envelope, TempId};
use crate::auth::Identity;

/// Upper bound on remembered temp-id acks per connection
const MAX_PENDING_ACKS: usize = 256;

/// Represents an active WebSocket connection
#[derive(Debug)]
pub struct Connection {
    /// Unique session ID for this connection
    pub session_id: Uuid,

    /// Authenticated participant
    pub identity: Identity,

    /// Ticket room this connection belongs to
    pub room_id: Uuid,

    /// Channel to send envelopes to this connection
    pub sender: mpsc::UnboundedSender<Envelope>,

    last_heartbeat: RwLock<Instant>,

    pending_acks: RwLock<PendingAcks>,
}

impl Connection {
    /// Create a new connection
    pub fn new(identity: Identity, room_id: Uuid, sender: mpsc::UnboundedSender<Envelope>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            identity,
            room_id,
            sender,
            last_heartbeat: RwLock::new(Instant::now()),
            pending_acks: RwLock::new(PendingAcks::default()),
        }
    }

    pub fn user_id(&self) -> Uuid {
        self.identity.user_id
    }

    pub fn role(&self) -> ParticipantRole {
        self.identity.role
    }

    /// Send an envelope to this connection
    ///
    /// Returns Ok(()) if sent successfully, Err if connection is closed
    #[allow(clippy::result_large_err)] // Error type is from tokio mpsc, containing the failed envelope
    pub fn send(&self, envelope: Envelope) -> Result<(), mpsc::error::SendError<Envelope>> {
        self.sender.send(envelope)
    }

    /// Record a heartbeat from the client
    pub async fn touch_heartbeat(&self) {
        *self.last_heartbeat.write().await = Instant::now();
    }

    /// Whether the client has been silent for longer than `timeout`
    pub async fn heartbeat_expired(&self, timeout: Duration) -> bool {
        self.last_heartbeat.read().await.elapsed() > timeout
    }

    /// Ack already issued for this temp id, if any
    pub async fn acknowledged(&self, temp_id: &TempId) -> Option<SentAck> {
        self.pending_acks.read().await.get(temp_id)
    }

    /// Remember the ack issued for a client temp id
    pub async fn record_ack(&self, temp_id: TempId, ack: SentAck) {
        self.pending_acks.write().await.insert(temp_id, ack);
    }
}

/// What the server told the client when it acknowledged a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentAck {
    pub message_id: Uuid,
    pub sequence: u64,
    pub timestamp: OffsetDateTime,
}

/// Bounded temp id -> ack map, oldest entries evicted first
#[derive(Debug, Default)]
struct PendingAcks {
    ids: HashMap<TempId, SentAck>,
    order: VecDeque<TempId>,
}

impl PendingAcks {
    fn get(&self, temp_id: &TempId) -> Option<SentAck> {
        self.ids.get(temp_id).copied()
    }

    fn insert(&mut self, temp_id: TempId, ack: SentAck) {
        if self.ids.insert(temp_id.clone(), ack).is_none() {
            self.order.push_back(temp_id);
        }
        while self.order.len() > MAX_PENDING_ACKS {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ack(sequence: u64) -> SentAck {
        SentAck {
            message_id: Uuid::new_v4(),
            sequence,
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    fn identity() -> Identity {
        Identity {
            user_id: Uuid::new_v4(),
            role: ParticipantRole::Customer,
        }
    }

    #[tokio::test]
    async fn test_send_after_receiver_dropped_fails() {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Connection::new(identity(), Uuid::new_v4(), tx);

        assert!(conn.send(Envelope::HeartbeatAck { timestamp: None }).is_ok());
        drop(rx);
        assert!(conn.send(Envelope::HeartbeatAck { timestamp: None }).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_expiry() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = Connection::new(identity(), Uuid::new_v4(), tx);
        let timeout = Duration::from_secs(60);

        assert!(!conn.heartbeat_expired(timeout).await);

        tokio::time::advance(Duration::from_secs(45)).await;
        conn.touch_heartbeat().await;
        tokio::time::advance(Duration::from_secs(45)).await;
        assert!(!conn.heartbeat_expired(timeout).await);

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(conn.heartbeat_expired(timeout).await);
    }

    #[tokio::test]
    async fn test_pending_acks() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = Connection::new(identity(), Uuid::new_v4(), tx);
        let sent = ack(1);

        assert!(conn.acknowledged(&TempId::Number(42)).await.is_none());
        conn.record_ack(TempId::Number(42), sent).await;
        assert_eq!(conn.acknowledged(&TempId::Number(42)).await, Some(sent));
        assert!(conn.acknowledged(&TempId::Text("42".into())).await.is_none());
    }

    #[tokio::test]
    async fn test_pending_acks_evict_oldest() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = Connection::new(identity(), Uuid::new_v4(), tx);

        for i in 0..(MAX_PENDING_ACKS as i64 + 1) {
            conn.record_ack(TempId::Number(i), ack(i as u64)).await;
        }

        assert!(conn.acknowledged(&TempId::Number(0)).await.is_none());
        assert!(conn.acknowledged(&TempId::Number(1)).await.is_some());
        assert!(conn
            .acknowledged(&TempId::Number(MAX_PENDING_ACKS as i64))
            .await
            .is_some());
    }
}
