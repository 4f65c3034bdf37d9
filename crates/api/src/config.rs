//! Application configuration

use std::env;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub bind_address: String,

    // Database
    pub database_url: String,

    // Provisioning
    /// Registration backend notified after provisioning; optional in dev
    pub registration_backend_url: Option<String>,

    // AI provider
    pub ai_api_base_url: String,
    pub ai_api_key: String,
    pub ai_model: String,
    pub ai_request_timeout_secs: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),

            database_url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::Missing("DATABASE_URL"))?,

            registration_backend_url: env::var("REGISTRATION_BACKEND_URL").ok(),

            ai_api_base_url: env::var("AI_API_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            ai_api_key: env::var("AI_API_KEY").map_err(|_| ConfigError::Missing("AI_API_KEY"))?,
            ai_model: env::var("AI_MODEL").unwrap_or_else(|_| "gpt-4".to_string()),
            ai_request_timeout_secs: env::var("AI_REQUEST_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| ConfigError::Invalid("AI_REQUEST_TIMEOUT_SECS"))?,
        })
    }
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("invalid value for environment variable: {0}")]
    Invalid(&'static str),
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use serial_test::serial;

    fn set_required_env() {
        env::set_var("DATABASE_URL", "postgres://localhost/surveyflow_test");
        env::set_var("AI_API_KEY", "sk-test");
    }

    fn clear_env() {
        for var in [
            "DATABASE_URL",
            "AI_API_KEY",
            "BIND_ADDRESS",
            "REGISTRATION_BACKEND_URL",
            "AI_API_BASE_URL",
            "AI_MODEL",
            "AI_REQUEST_TIMEOUT_SECS",
        ] {
            env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_defaults_applied() {
        clear_env();
        set_required_env();

        let config = Config::from_env().unwrap();
        assert_eq!(config.bind_address, "0.0.0.0:3000");
        assert_eq!(config.ai_model, "gpt-4");
        assert_eq!(config.ai_request_timeout_secs, 30);
        assert!(config.registration_backend_url.is_none());

        clear_env();
    }

    #[test]
    #[serial]
    fn test_missing_database_url_fails() {
        clear_env();
        env::set_var("AI_API_KEY", "sk-test");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("DATABASE_URL")));

        clear_env();
    }

    #[test]
    #[serial]
    fn test_invalid_timeout_fails() {
        clear_env();
        set_required_env();
        env::set_var("AI_REQUEST_TIMEOUT_SECS", "soon");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        clear_env();
    }
}
