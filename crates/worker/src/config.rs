//! Worker configuration

use std::env;

use chrono::Weekday;
use chrono_tz::Tz;

/// Worker configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    pub database_max_connections: u32,

    // Auto-close schedule
    pub auto_close_day: Weekday,
    pub auto_close_hour: u32,
    pub auto_close_timezone: Tz,
    pub inactivity_days: i64,
}

impl WorkerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url =
            env::var("DATABASE_URL").map_err(|_| ConfigError::Missing("DATABASE_URL"))?;

        let auto_close_day = match env::var("AUTO_CLOSE_DAY_OF_WEEK") {
            Ok(v) => v.parse::<Weekday>().map_err(|_| {
                ConfigError::Invalid(format!("AUTO_CLOSE_DAY_OF_WEEK: unknown day {:?}", v))
            })?,
            Err(_) => Weekday::Sun,
        };

        let auto_close_hour = match env::var("AUTO_CLOSE_HOUR") {
            Ok(v) => v
                .parse::<u32>()
                .ok()
                .filter(|h| *h < 24)
                .ok_or_else(|| ConfigError::Invalid(format!("AUTO_CLOSE_HOUR: {:?} is not 0-23", v)))?,
            Err(_) => 3,
        };

        let auto_close_timezone = match env::var("AUTO_CLOSE_TIMEZONE") {
            Ok(v) => v.parse::<Tz>().map_err(|_| {
                ConfigError::Invalid(format!("AUTO_CLOSE_TIMEZONE: unknown timezone {:?}", v))
            })?,
            Err(_) => Tz::UTC,
        };

        let inactivity_days = match env::var("AUTO_CLOSE_INACTIVITY_DAYS") {
            Ok(v) => v.parse::<i64>().ok().filter(|d| *d > 0).ok_or_else(|| {
                ConfigError::Invalid(format!("AUTO_CLOSE_INACTIVITY_DAYS: {:?} is not positive", v))
            })?,
            Err(_) => 7,
        };

        Ok(Self {
            database_url,
            database_max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(2),
            auto_close_day,
            auto_close_hour,
            auto_close_timezone,
            inactivity_days,
        })
    }

    /// Six-field cron expression (sec min hour dom month dow) for the sweep
    pub fn cron_expression(&self) -> String {
        format!("0 0 {} * * {}", self.auto_close_hour, self.auto_close_day)
    }

    pub fn inactivity(&self) -> time::Duration {
        time::Duration::days(self.inactivity_days)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static CONFIG_TEST_MUTEX: Mutex<()> = Mutex::new(());

    const KEYS: [&str; 5] = [
        "DATABASE_URL",
        "AUTO_CLOSE_DAY_OF_WEEK",
        "AUTO_CLOSE_HOUR",
        "AUTO_CLOSE_TIMEZONE",
        "AUTO_CLOSE_INACTIVITY_DAYS",
    ];

    fn cleanup() {
        for key in KEYS {
            env::remove_var(key);
        }
    }

    #[test]
    fn test_defaults_and_overrides() {
        let _lock = CONFIG_TEST_MUTEX.lock().unwrap();
        cleanup();

        assert!(matches!(
            WorkerConfig::from_env(),
            Err(ConfigError::Missing("DATABASE_URL"))
        ));

        env::set_var("DATABASE_URL", "postgres://test");
        let config = WorkerConfig::from_env().unwrap();
        assert_eq!(config.cron_expression(), "0 0 3 * * Sun");
        assert_eq!(config.auto_close_timezone, Tz::UTC);
        assert_eq!(config.inactivity(), time::Duration::days(7));

        env::set_var("AUTO_CLOSE_DAY_OF_WEEK", "wednesday");
        env::set_var("AUTO_CLOSE_HOUR", "22");
        env::set_var("AUTO_CLOSE_TIMEZONE", "Asia/Taipei");
        let config = WorkerConfig::from_env().unwrap();
        assert_eq!(config.cron_expression(), "0 0 22 * * Wed");
        assert_eq!(config.auto_close_timezone, chrono_tz::Asia::Taipei);

        cleanup();
    }

    #[test]
    fn test_invalid_values_rejected() {
        let _lock = CONFIG_TEST_MUTEX.lock().unwrap();
        cleanup();
        env::set_var("DATABASE_URL", "postgres://test");

        env::set_var("AUTO_CLOSE_HOUR", "24");
        assert!(matches!(WorkerConfig::from_env(), Err(ConfigError::Invalid(_))));
        env::remove_var("AUTO_CLOSE_HOUR");

        env::set_var("AUTO_CLOSE_TIMEZONE", "Mars/Olympus");
        assert!(matches!(WorkerConfig::from_env(), Err(ConfigError::Invalid(_))));
        env::remove_var("AUTO_CLOSE_TIMEZONE");

        env::set_var("AUTO_CLOSE_INACTIVITY_DAYS", "0");
        assert!(matches!(WorkerConfig::from_env(), Err(ConfigError::Invalid(_))));

        cleanup();
    }
}
