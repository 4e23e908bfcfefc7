//! WebSocket support for ticket conversations
//!
//! Keeps every participant of a ticket (customer, assigned agent, bots)
//! synchronized on the ticket's conversation.
//!
//! # Architecture
//!
//! - **Events**: Envelope types and the JSON wire codec
//! - **Connection**: One authenticated participant bound to a ticket room
//! - **Room**: Per-ticket membership and message sequencing
//! - **Session**: Join/leave and per-envelope dispatch
//! - **State**: Global WebSocket state shared across all connections
//! - **Handler**: Axum WebSocket route handler

pub mod connection;
pub mod events;
pub mod handler;
pub mod room;
pub mod session;
pub mod state;

pub use handler::ws_handler;
pub use session::{SessionDispatcher, SessionError};
pub use state::{WebSocketState, WebSocketStats};
