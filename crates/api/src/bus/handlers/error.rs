use crate::outbound::CollaboratorError;
use crate::store::StoreError;

/// Why a reactive handler did not complete
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// Transient; a manual retry may succeed
    #[error("Collaborator unavailable: {0}")]
    CollaboratorUnavailable(String),
    /// Permanent; retrying the same payload will fail again
    #[error("Invalid payload: {0}")]
    PayloadInvalid(String),
    #[error("Handler panicked: {0}")]
    Panicked(String),
    #[error("Failed to record outcome: {0}")]
    Persistence(#[from] StoreError),
}

impl From<CollaboratorError> for HandlerError {
    fn from(err: CollaboratorError) -> Self {
        if err.is_transient() || matches!(err, CollaboratorError::NotConfigured(_)) {
            HandlerError::CollaboratorUnavailable(err.to_string())
        } else {
            HandlerError::PayloadInvalid(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collaborator_error_mapping() {
        let unavailable: HandlerError = CollaboratorError::Status {
            status: 502,
            body: "bad gateway".into(),
        }
        .into();
        assert!(matches!(unavailable, HandlerError::CollaboratorUnavailable(_)));

        let unconfigured: HandlerError = CollaboratorError::NotConfigured("SMS gateway").into();
        assert!(matches!(unconfigured, HandlerError::CollaboratorUnavailable(_)));

        let rejected: HandlerError = CollaboratorError::Status {
            status: 422,
            body: "bad target".into(),
        }
        .into();
        assert!(matches!(rejected, HandlerError::PayloadInvalid(_)));
    }
}
