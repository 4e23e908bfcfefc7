//! Global WebSocket state management
//!
//! Maintains global state for all WebSocket connections and ticket rooms.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::connection::Connection;
use super::room::RoomRegistry;
use super::session::SessionDispatcher;
use crate::store::ConversationStore;

/// Global WebSocket state shared across all connections
#[derive(Clone)]
pub struct WebSocketState {
    /// All active connections indexed by session_id
    pub connections: Arc<RwLock<HashMap<Uuid, Arc<Connection>>>>,

    /// Live ticket rooms
    pub rooms: Arc<RoomRegistry>,

    /// Routes client envelopes
    pub dispatcher: Arc<SessionDispatcher>,

    /// Silence after which a connection is force-closed
    pub heartbeat_timeout: Duration,

    /// How often the watchdog checks for silent connections
    pub heartbeat_check_interval: Duration,
}

impl WebSocketState {
    /// Create new WebSocket state
    pub fn new(
        store: Arc<dyn ConversationStore>,
        heartbeat_timeout: Duration,
        heartbeat_check_interval: Duration,
    ) -> Self {
        let rooms = Arc::new(RoomRegistry::new());
        Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
            dispatcher: Arc::new(SessionDispatcher::new(Arc::clone(&rooms), store)),
            rooms,
            heartbeat_timeout,
            heartbeat_check_interval,
        }
    }

    /// Add a connection
    pub async fn add_connection(&self, conn: Connection) -> Arc<Connection> {
        let conn = Arc::new(conn);
        let mut connections = self.connections.write().await;
        connections.insert(conn.session_id, Arc::clone(&conn));

        tracing::info!(
            session_id = %conn.session_id,
            user_id = %conn.user_id(),
            ticket_id = %conn.room_id,
            total_connections = connections.len(),
            "WebSocket connection added"
        );

        conn
    }

    /// Remove a connection
    ///
    /// Room membership is released separately through the dispatcher.
    pub async fn remove_connection(&self, session_id: &Uuid) {
        let mut connections = self.connections.write().await;
        if let Some(conn) = connections.remove(session_id) {
            tracing::info!(
                session_id = %session_id,
                user_id = %conn.user_id(),
                remaining_connections = connections.len(),
                "WebSocket connection removed"
            );
        }
    }

    /// Get total number of active connections
    pub async fn connection_count(&self) -> usize {
        let connections = self.connections.read().await;
        connections.len()
    }

    /// Get statistics about the WebSocket state
    pub async fn get_stats(&self) -> WebSocketStats {
        let connection_count = self.connection_count().await;
        let room_count = self.rooms.get_room_count().await;

        WebSocketStats {
            active_connections: connection_count,
            active_rooms: room_count,
        }
    }
}

/// Statistics about WebSocket connections
#[derive(Debug, Clone, serde::Serialize)]
pub struct WebSocketStats {
    /// Number of active connections
    pub active_connections: usize,
    /// Number of active ticket rooms
    pub active_rooms: usize,
}
