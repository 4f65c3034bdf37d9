//! Stripe client configuration

use stripe::Client;

use crate::error::{BillingError, BillingResult};

/// Default credit grants. The original deployment shipped several different
/// literals for these; they are deliberately configuration, not constants.
const DEFAULT_SIGNUP_CREDITS: i64 = 37_000;
const DEFAULT_CREDIT_PACK_CREDITS: i64 = 14_500;

/// Configuration for Stripe billing
#[derive(Debug, Clone)]
pub struct StripeConfig {
    /// Stripe secret API key
    pub secret_key: String,
    /// Stripe webhook signing secret
    pub webhook_secret: String,
    /// Price ID for the sign-up subscription
    pub signup_price_id: String,
    /// Price ID for one credit pack
    pub credits_price_id: String,
    /// Credits seeded into a freshly provisioned account
    pub signup_credits: i64,
    /// Credits granted per purchased pack
    pub credit_pack_credits: i64,
    /// Base URL for success/cancel redirects
    pub app_base_url: String,
}

impl StripeConfig {
    /// Create config from environment variables
    pub fn from_env() -> BillingResult<Self> {
        Ok(Self {
            secret_key: std::env::var("STRIPE_SECRET_KEY")
                .map_err(|_| BillingError::Config("STRIPE_SECRET_KEY not set".to_string()))?,
            webhook_secret: std::env::var("STRIPE_WEBHOOK_SECRET")
                .map_err(|_| BillingError::Config("STRIPE_WEBHOOK_SECRET not set".to_string()))?,
            signup_price_id: std::env::var("STRIPE_PRICE_SIGNUP")
                .map_err(|_| BillingError::Config("STRIPE_PRICE_SIGNUP not set".to_string()))?,
            credits_price_id: std::env::var("STRIPE_PRICE_CREDITS")
                .map_err(|_| BillingError::Config("STRIPE_PRICE_CREDITS not set".to_string()))?,
            signup_credits: env_credits("SIGNUP_CREDITS", DEFAULT_SIGNUP_CREDITS)?,
            credit_pack_credits: env_credits("CREDIT_PACK_CREDITS", DEFAULT_CREDIT_PACK_CREDITS)?,
            app_base_url: std::env::var("APP_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
        })
    }
}

/// Parse a positive credit amount from the environment, with a default.
fn env_credits(var: &str, default: i64) -> BillingResult<i64> {
    match std::env::var(var) {
        Err(_) => Ok(default),
        Ok(raw) => {
            let value: i64 = raw
                .parse()
                .map_err(|_| BillingError::Config(format!("{} is not an integer: {}", var, raw)))?;
            if value <= 0 {
                return Err(BillingError::Config(format!(
                    "{} must be positive, got {}",
                    var, value
                )));
            }
            Ok(value)
        }
    }
}

/// Stripe billing client
#[derive(Clone)]
pub struct StripeClient {
    client: Client,
    config: StripeConfig,
}

impl StripeClient {
    /// Create a new Stripe client from config
    pub fn new(config: StripeConfig) -> Self {
        let client = Client::new(&config.secret_key);
        Self { client, config }
    }

    /// Create a new Stripe client from environment variables
    pub fn from_env() -> BillingResult<Self> {
        let config = StripeConfig::from_env()?;
        Ok(Self::new(config))
    }

    /// Get the inner Stripe client
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Get the config
    pub fn config(&self) -> &StripeConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_env_credits_default_when_unset() {
        assert_eq!(
            env_credits("SURVEYFLOW_TEST_UNSET_CREDITS", 37_000).unwrap(),
            37_000
        );
    }

    #[test]
    fn test_env_credits_rejects_garbage() {
        std::env::set_var("SURVEYFLOW_TEST_BAD_CREDITS", "lots");
        let err = env_credits("SURVEYFLOW_TEST_BAD_CREDITS", 1).unwrap_err();
        assert!(matches!(err, BillingError::Config(_)));
        std::env::remove_var("SURVEYFLOW_TEST_BAD_CREDITS");
    }

    #[test]
    fn test_env_credits_rejects_non_positive() {
        std::env::set_var("SURVEYFLOW_TEST_ZERO_CREDITS", "0");
        let err = env_credits("SURVEYFLOW_TEST_ZERO_CREDITS", 1).unwrap_err();
        assert!(matches!(err, BillingError::Config(_)));
        std::env::remove_var("SURVEYFLOW_TEST_ZERO_CREDITS");
    }
}
