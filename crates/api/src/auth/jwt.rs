//! JWT validation
//!
//! Tokens are issued by the session service; this side only verifies them
//! during the WebSocket handshake and on the trigger routes.

use helpdesk_shared::ParticipantRole;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Identity;

/// JWT claims carried by participant access tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: Uuid,
    /// Conversation role of the participant
    pub role: ParticipantRole,
    /// Issued at
    pub iat: i64,
    /// Expiration
    pub exp: i64,
    /// JWT ID
    pub jti: String,
}

impl Claims {
    pub fn identity(&self) -> Identity {
        Identity {
            user_id: self.sub,
            role: self.role,
        }
    }
}

/// Verifies participant access tokens
#[derive(Clone)]
pub struct JwtManager {
    decoding_key: DecodingKey,
}

impl JwtManager {
    pub fn new(secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// Validate and decode a token
    pub fn validate_token(&self, token: &str) -> Result<Claims, JwtError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 60; // 60 second clock skew tolerance

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => JwtError::Expired,
                jsonwebtoken::errors::ErrorKind::InvalidToken => JwtError::Invalid,
                jsonwebtoken::errors::ErrorKind::InvalidAlgorithm => JwtError::Invalid,
                _ => JwtError::Validation(e.to_string()),
            })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("Token has expired")]
    Expired,
    #[error("Invalid token")]
    Invalid,
    #[error("Token validation failed: {0}")]
    Validation(String),
}

/// Mint a token the way the session service does
#[cfg(test)]
pub(crate) fn issue_token(
    secret: &str,
    user_id: Uuid,
    role: ParticipantRole,
    ttl: time::Duration,
) -> String {
    use jsonwebtoken::{encode, EncodingKey, Header};

    let now = time::OffsetDateTime::now_utc();
    let claims = Claims {
        sub: user_id,
        role,
        iat: now.unix_timestamp(),
        exp: (now + ttl).unix_timestamp(),
        jti: Uuid::new_v4().to_string(),
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    const SECRET: &str = "test-secret-key-at-least-32-chars!";

    #[test]
    fn test_token_validation() {
        let jwt = JwtManager::new(SECRET);
        let user_id = Uuid::new_v4();

        let token = issue_token(SECRET, user_id, ParticipantRole::Agent, Duration::hours(12));

        let claims = jwt.validate_token(&token).expect("Invalid token");
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.role, ParticipantRole::Agent);
        assert_eq!(claims.identity().user_id, user_id);
        assert!(!claims.jti.is_empty());
    }

    #[test]
    fn test_token_from_other_secret_rejected() {
        let verifier = JwtManager::new("another-secret-key-at-least-32-chars");
        let token = issue_token(
            "issuer-secret-key-at-least-32-chars",
            Uuid::new_v4(),
            ParticipantRole::Customer,
            Duration::hours(12),
        );

        assert!(verifier.validate_token(&token).is_err());
    }

    #[test]
    fn test_expired_token_rejected() {
        // Well past the leeway window
        let jwt = JwtManager::new(SECRET);
        let token = issue_token(SECRET, Uuid::new_v4(), ParticipantRole::Bot, Duration::hours(-2));

        assert!(matches!(jwt.validate_token(&token), Err(JwtError::Expired)));
    }

    #[test]
    fn test_garbage_token_rejected() {
        let jwt = JwtManager::new(SECRET);
        assert!(jwt.validate_token("not-a-jwt").is_err());
    }
}
