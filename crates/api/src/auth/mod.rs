//! Participant authentication
//!
//! Verifies bearer tokens for the HTTP trigger routes and exposes the
//! participant identity carried by every WebSocket connection.

pub mod jwt;

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};
use helpdesk_shared::ParticipantRole;
use uuid::Uuid;

use crate::{error::ApiError, state::AppState};

pub use jwt::{Claims, JwtError, JwtManager};

/// Authenticated participant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Uuid,
    pub role: ParticipantRole,
}

/// Extractor for routes that require a bearer token
#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub Identity);

impl AuthUser {
    /// Reject anyone who is not an agent or bot
    pub fn require_staff(&self) -> Result<Identity, ApiError> {
        if self.0.role.is_staff() {
            Ok(self.0)
        } else {
            Err(ApiError::Forbidden)
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = AppState::from_ref(state);

        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer "))
            .ok_or(ApiError::Unauthorized)?;

        let claims = app_state.jwt.validate_token(token).map_err(|e| {
            tracing::debug!(error = %e, "Bearer token rejected");
            ApiError::InvalidToken
        })?;

        Ok(AuthUser(claims.identity()))
    }
}
