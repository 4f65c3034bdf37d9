//! Shared application state
//!
//! Every service is constructed once at startup and injected here; handlers
//! reach them through `State` extraction. No ambient singletons.

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::Config;
use crate::generation::GenerationClient;
use surveyflow_billing::{
    AccountProvisioner, CheckoutService, CreditLedger, StripeClient, UsageMetering, WebhookHandler,
};

/// Billing services grouped for handler access
pub struct BillingState {
    pub checkout: CheckoutService,
    pub ledger: CreditLedger,
    pub metering: UsageMetering,
    pub provisioner: AccountProvisioner,
    pub webhooks: WebhookHandler,
    /// Credits seeded into a freshly provisioned account
    pub signup_credits: i64,
}

/// Application state shared across all request handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pool: PgPool,
    pub billing: Arc<BillingState>,
    pub generation: Arc<GenerationClient>,
}

impl AppState {
    pub fn new(
        config: Config,
        pool: PgPool,
        stripe: StripeClient,
        generation: GenerationClient,
    ) -> Self {
        let signup_credits = stripe.config().signup_credits;
        let http = reqwest::Client::new();

        let billing = BillingState {
            checkout: CheckoutService::new(stripe.clone(), pool.clone()),
            ledger: CreditLedger::new(pool.clone()),
            metering: UsageMetering::new(pool.clone()),
            provisioner: AccountProvisioner::new(
                pool.clone(),
                http,
                config.registration_backend_url.clone(),
            ),
            webhooks: WebhookHandler::new(stripe, pool.clone()),
            signup_credits,
        };

        Self {
            config: Arc::new(config),
            pool,
            billing: Arc::new(billing),
            generation: Arc::new(generation),
        }
    }
}
