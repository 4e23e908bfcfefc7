//! Helpdesk API Library
//!
//! Real-time ticket conversations over WebSocket, the in-process event bus
//! with its reactive handlers, and the HTTP routes that trigger them.

pub mod auth;
pub mod bus;
pub mod config;
pub mod error;
pub mod outbound;
pub mod routes;
pub mod state;
pub mod store;
pub mod websocket;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use state::AppState;
