//! Application configuration

use std::env;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub bind_address: String,

    // Database
    pub database_url: String,
    pub database_max_connections: u32,

    // Authentication
    pub jwt_secret: String,

    // WebSocket sessions
    pub ws_heartbeat_timeout_secs: u64,
    pub ws_heartbeat_check_interval_secs: u64,

    // Outbound collaborators
    pub outbound_timeout_secs: u64,
    pub resend_api_key: String,
    pub email_from: String,
    pub sms_gateway_url: Option<String>,
    pub sms_api_key: String,
    pub knowledge_base_url: Option<String>,
    pub knowledge_base_api_key: String,
    pub completion_api_url: Option<String>,
    pub completion_api_key: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            // Server
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),

            // Database
            database_url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::Missing("DATABASE_URL"))?,
            database_max_connections: parse_or("DATABASE_MAX_CONNECTIONS", 10),

            // Authentication
            jwt_secret: {
                let secret =
                    env::var("JWT_SECRET").map_err(|_| ConfigError::Missing("JWT_SECRET"))?;
                if secret.len() < 32 {
                    return Err(ConfigError::WeakSecret(
                        "JWT_SECRET must be at least 32 characters",
                    ));
                }
                secret
            },

            // WebSocket sessions
            ws_heartbeat_timeout_secs: parse_or("WS_HEARTBEAT_TIMEOUT_SECS", 60),
            ws_heartbeat_check_interval_secs: parse_or("WS_HEARTBEAT_CHECK_INTERVAL_SECS", 15),

            // Outbound collaborators
            outbound_timeout_secs: parse_or("OUTBOUND_TIMEOUT_SECS", 10),
            resend_api_key: env::var("RESEND_API_KEY").unwrap_or_default(),
            email_from: env::var("EMAIL_FROM")
                .unwrap_or_else(|_| "Helpdesk <noreply@localhost>".to_string()),
            sms_gateway_url: env::var("SMS_GATEWAY_URL").ok().filter(|v| !v.is_empty()),
            sms_api_key: env::var("SMS_API_KEY").unwrap_or_default(),
            knowledge_base_url: env::var("KNOWLEDGE_BASE_URL").ok().filter(|v| !v.is_empty()),
            knowledge_base_api_key: env::var("KNOWLEDGE_BASE_API_KEY").unwrap_or_default(),
            completion_api_url: env::var("COMPLETION_API_URL").ok().filter(|v| !v.is_empty()),
            completion_api_key: env::var("COMPLETION_API_KEY").unwrap_or_default(),
        };

        if config.ws_heartbeat_timeout_secs == 0 || config.ws_heartbeat_check_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "WS_HEARTBEAT_TIMEOUT_SECS and WS_HEARTBEAT_CHECK_INTERVAL_SECS must be positive",
            ));
        }
        if config.ws_heartbeat_check_interval_secs > config.ws_heartbeat_timeout_secs {
            return Err(ConfigError::Invalid(
                "WS_HEARTBEAT_CHECK_INTERVAL_SECS must not exceed WS_HEARTBEAT_TIMEOUT_SECS",
            ));
        }

        Ok(config)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.ws_heartbeat_timeout_secs)
    }

    pub fn heartbeat_check_interval(&self) -> Duration {
        Duration::from_secs(self.ws_heartbeat_check_interval_secs)
    }

    pub fn outbound_timeout(&self) -> Duration {
        Duration::from_secs(self.outbound_timeout_secs)
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Weak secret: {0}")]
    WeakSecret(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}
