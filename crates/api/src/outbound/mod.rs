//! Outbound collaborators
//!
//! HTTP-backed services the reactive handlers call: notification channels,
//! knowledge-base ingestion and hot-issue analysis. Each one sits behind a
//! trait so handlers can be exercised with in-memory fakes.

pub mod analysis;
pub mod knowledge;
pub mod notifications;

use std::time::Duration;

pub use analysis::{HttpIssueAnalyzer, IssueAnalyzer};
pub use knowledge::{HttpKnowledgeBase, KnowledgeBase};
pub use notifications::{
    EmailSender, NotificationPayload, NotificationSender, SenderRegistry, SmsSender, WebhookSender,
};

/// Failure talking to an outbound collaborator
#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    #[error("{0} is not configured")]
    NotConfigured(&'static str),
    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Upstream returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Rejected: {0}")]
    Rejected(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl CollaboratorError {
    /// Whether trying again later could succeed
    pub fn is_transient(&self) -> bool {
        match self {
            CollaboratorError::Transport(_) => true,
            CollaboratorError::Status { status, .. } => *status >= 500 || *status == 429,
            CollaboratorError::NotConfigured(_)
            | CollaboratorError::Rejected(_)
            | CollaboratorError::InvalidResponse(_) => false,
        }
    }
}

/// Shared HTTP client for all outbound calls
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, CollaboratorError> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

/// Turn a non-success response into [`CollaboratorError::Status`]
pub(crate) async fn check_status(
    response: reqwest::Response,
) -> Result<reqwest::Response, CollaboratorError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(CollaboratorError::Status { status, body })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(CollaboratorError::Status {
            status: 503,
            body: String::new()
        }
        .is_transient());
        assert!(CollaboratorError::Status {
            status: 429,
            body: String::new()
        }
        .is_transient());
        assert!(!CollaboratorError::Status {
            status: 400,
            body: String::new()
        }
        .is_transient());
        assert!(!CollaboratorError::NotConfigured("SMS gateway").is_transient());
        assert!(!CollaboratorError::Rejected("bad target".into()).is_transient());
    }
}
