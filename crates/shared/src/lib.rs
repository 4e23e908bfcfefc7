//! Helpdesk Shared Types and Utilities
//!
//! This crate contains types, errors, and utilities shared by the help-desk
//! API server and the background worker.

pub mod db;
pub mod error;
pub mod types;

pub use db::*;
pub use error::*;
pub use types::*;
