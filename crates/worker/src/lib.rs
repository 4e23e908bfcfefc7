//! Helpdesk background worker
//!
//! Hosts the scheduled auto-close sweep that resolves tickets left waiting on
//! the customer past the inactivity window.

pub mod auto_close;
pub mod config;
pub mod scheduler;

pub use auto_close::{AutoCloseSweeper, PgSweepStore, SweepError, SweepOutcome, TicketSweepStore};
pub use config::{ConfigError, WorkerConfig};
