//! Ticket room management
//!
//! A room is the set of live connections on one ticket's conversation plus the
//! room-scoped message sequence. Rooms are created on first join and dropped as
//! soon as the last connection leaves.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, RwLock};
use uuid::Uuid;

use super::connection::Connection;
use super::events::Envelope;

/// Which members of a room receive a broadcast
#[derive(Debug, Clone, Copy)]
pub struct Audience {
    /// Session that should not receive its own event
    pub exclude: Option<Uuid>,
    /// Deliver only to agents and bots (internal notes)
    pub staff_only: bool,
}

impl Audience {
    pub fn everyone() -> Self {
        Self {
            exclude: None,
            staff_only: false,
        }
    }

    pub fn others(session_id: Uuid) -> Self {
        Self {
            exclude: Some(session_id),
            staff_only: false,
        }
    }

    pub fn staff_only(mut self, staff_only: bool) -> Self {
        self.staff_only = staff_only;
        self
    }

    fn includes(&self, conn: &Connection) -> bool {
        if self.exclude == Some(conn.session_id) {
            return false;
        }
        !self.staff_only || conn.role().is_staff()
    }
}

/// Live state of one ticket room
#[derive(Debug)]
pub struct Room {
    pub room_id: Uuid,
    members: RwLock<Vec<Arc<Connection>>>,
    /// Serializes sequence assignment + persistence + delivery
    sequencer: Mutex<()>,
    /// Last sequence number delivered to clients
    last_sequence: AtomicU64,
}

impl Room {
    fn new(room_id: Uuid, last_sequence: u64) -> Self {
        Self {
            room_id,
            members: RwLock::new(Vec::new()),
            sequencer: Mutex::new(()),
            last_sequence: AtomicU64::new(last_sequence),
        }
    }

    /// Take this room's delivery turn
    ///
    /// Holders assign the next sequence, persist, and deliver before releasing,
    /// so every member observes messages in sequence order.
    pub async fn sequencer(&self) -> MutexGuard<'_, ()> {
        self.sequencer.lock().await
    }

    pub fn last_sequence(&self) -> u64 {
        self.last_sequence.load(Ordering::SeqCst)
    }

    /// Publish a sequence number once its message is durable
    pub fn commit_sequence(&self, sequence: u64) {
        self.last_sequence.fetch_max(sequence, Ordering::SeqCst);
    }

    pub async fn is_member(&self, session_id: &Uuid) -> bool {
        self.members
            .read()
            .await
            .iter()
            .any(|c| c.session_id == *session_id)
    }

    pub async fn size(&self) -> usize {
        self.members.read().await.len()
    }

    pub async fn members(&self) -> Vec<Arc<Connection>> {
        self.members.read().await.clone()
    }

    /// Send an envelope to every member in `audience`
    ///
    /// Silently ignores send errors (closed connections will be cleaned up)
    pub async fn broadcast(&self, envelope: &Envelope, audience: Audience) -> usize {
        let members = self.members.read().await;
        let mut success_count = 0;
        let mut failed_count = 0;

        for conn in members.iter().filter(|c| audience.includes(c)) {
            match conn.send(envelope.clone()) {
                Ok(()) => success_count += 1,
                Err(_) => {
                    failed_count += 1;
                    tracing::warn!(
                        session_id = %conn.session_id,
                        "Failed to send envelope to connection (likely closed)"
                    );
                }
            }
        }

        tracing::debug!(
            room_id = %self.room_id,
            kind = envelope.kind(),
            recipients = success_count,
            failed = failed_count,
            "Broadcast envelope to ticket room"
        );

        success_count
    }
}

/// Membership outcome of a successful join
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Joined {
    /// Last sequence delivered in the room at join time
    pub sequence: u64,
    /// Members in the room including the new connection
    pub room_size: usize,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MembershipError {
    #[error("Connection already joined this room")]
    AlreadyJoined,
}

/// Registry of live ticket rooms
pub struct RoomRegistry {
    /// Map of ticket_id -> room
    rooms: RwLock<HashMap<Uuid, Arc<Room>>>,
}

impl RoomRegistry {
    /// Create a new room registry
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
        }
    }

    /// Add a connection to its ticket room
    ///
    /// `seed_sequence` initializes the counter when this join creates the room.
    /// Membership is granted while holding the room's delivery turn, and
    /// `on_joined` runs before the turn is released, so no message reaches the
    /// new member ahead of whatever `on_joined` sends.
    pub async fn join<F>(
        &self,
        conn: Arc<Connection>,
        seed_sequence: u64,
        on_joined: F,
    ) -> Result<Joined, MembershipError>
    where
        F: FnOnce(&Joined),
    {
        loop {
            let room = {
                let mut rooms = self.rooms.write().await;
                Arc::clone(
                    rooms
                        .entry(conn.room_id)
                        .or_insert_with(|| Arc::new(Room::new(conn.room_id, seed_sequence))),
                )
            };

            let _turn = room.sequencer().await;

            let rooms = self.rooms.read().await;
            if !rooms
                .get(&conn.room_id)
                .is_some_and(|live| Arc::ptr_eq(live, &room))
            {
                // Emptied and dropped while we waited for the turn
                continue;
            }

            let joined = {
                let mut members = room.members.write().await;
                if members.iter().any(|c| c.session_id == conn.session_id) {
                    return Err(MembershipError::AlreadyJoined);
                }
                members.push(Arc::clone(&conn));
                Joined {
                    sequence: room.last_sequence(),
                    room_size: members.len(),
                }
            };
            drop(rooms);

            tracing::debug!(
                ticket_id = %conn.room_id,
                session_id = %conn.session_id,
                room_size = joined.room_size,
                "Connection joined ticket room"
            );

            on_joined(&joined);
            return Ok(joined);
        }
    }

    /// Remove a connection from a ticket room
    ///
    /// Returns the removed connection, or None if it was not a member.
    pub async fn leave(&self, ticket_id: &Uuid, session_id: &Uuid) -> Option<Arc<Connection>> {
        let mut rooms = self.rooms.write().await;
        let room = rooms.get(ticket_id)?;

        let (removed, now_empty) = {
            let mut members = room.members.write().await;
            let position = members.iter().position(|c| c.session_id == *session_id)?;
            let removed = members.remove(position);
            (removed, members.is_empty())
        };

        if now_empty {
            rooms.remove(ticket_id);
            tracing::debug!(ticket_id = %ticket_id, "Removed empty ticket room");
        } else {
            tracing::debug!(
                ticket_id = %ticket_id,
                session_id = %session_id,
                "Connection left ticket room"
            );
        }

        Some(removed)
    }

    /// Look up a live room
    pub async fn room(&self, ticket_id: &Uuid) -> Option<Arc<Room>> {
        self.rooms.read().await.get(ticket_id).cloned()
    }

    /// Whether a session is currently a member of the ticket room
    pub async fn is_member(&self, ticket_id: &Uuid, session_id: &Uuid) -> bool {
        match self.room(ticket_id).await {
            Some(room) => room.is_member(session_id).await,
            None => false,
        }
    }

    /// Broadcast an envelope to a ticket room
    pub async fn broadcast(&self, ticket_id: &Uuid, envelope: &Envelope, audience: Audience) -> usize {
        match self.room(ticket_id).await {
            Some(room) => room.broadcast(envelope, audience).await,
            None => {
                tracing::debug!(
                    ticket_id = %ticket_id,
                    kind = envelope.kind(),
                    "No room found for ticket - no subscribers"
                );
                0
            }
        }
    }

    /// Get room size (number of connections) for a ticket
    pub async fn get_room_size(&self, ticket_id: &Uuid) -> usize {
        match self.room(ticket_id).await {
            Some(room) => room.size().await,
            None => 0,
        }
    }

    /// Get total number of active rooms
    pub async fn get_room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}
