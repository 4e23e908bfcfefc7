//! Error types shared across the help-desk crates

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HelpdeskError {
    #[error("Unknown value for {field}: {value}")]
    UnknownValue { field: &'static str, value: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}
