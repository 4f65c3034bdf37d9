//! SurveyFlow billing core
//!
//! Credit ledger, usage metering, checkout session tracking, webhook
//! processing, and account provisioning. Web-facing routing lives in the
//! `surveyflow-api` crate; this crate owns the money-adjacent invariants:
//! balances never go negative, sessions are consumed at most once, and
//! webhook redelivery has no second effect.

pub mod checkout;
pub mod client;
pub mod error;
pub mod ledger;
pub mod metering;
pub mod provisioning;
pub mod sessions;
pub mod webhooks;

pub use checkout::{CheckoutResponse, CheckoutService, SessionStatusResponse};
pub use client::{StripeClient, StripeConfig};
pub use error::{BillingError, BillingResult};
pub use ledger::CreditLedger;
pub use metering::{Reservation, Settlement, UsageMetering};
pub use provisioning::{AccountProvisioner, ProfileParams};
pub use sessions::SessionTracker;
pub use webhooks::WebhookHandler;
