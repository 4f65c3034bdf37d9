//! Stripe Checkout sessions

use serde::Serialize;
use sqlx::PgPool;
use stripe::{
    CheckoutSession, CheckoutSessionMode, CreateCheckoutSession, CreateCheckoutSessionLineItems,
};

use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};
use crate::sessions::SessionTracker;
use surveyflow_shared::{SessionKind, SessionStatus};

/// Checkout service for creating Stripe checkout sessions
pub struct CheckoutService {
    stripe: StripeClient,
    sessions: SessionTracker,
}

impl CheckoutService {
    pub fn new(stripe: StripeClient, pool: PgPool) -> Self {
        Self {
            stripe,
            sessions: SessionTracker::new(pool),
        }
    }

    /// Create the sign-up checkout session that gates account creation.
    pub async fn create_signup_checkout(&self, email: &str) -> BillingResult<CheckoutResponse> {
        if email.is_empty() {
            return Err(BillingError::Internal("email is required".to_string()));
        }

        let config = self.stripe.config();
        let success_url = format!(
            "{}/register?session_id={{CHECKOUT_SESSION_ID}}",
            config.app_base_url
        );
        let cancel_url = format!("{}/?checkout=canceled", config.app_base_url);

        let mut metadata = std::collections::HashMap::new();
        metadata.insert("checkout_type".to_string(), SessionKind::Signup.to_string());

        let params = CreateCheckoutSession {
            customer_email: Some(email),
            mode: Some(CheckoutSessionMode::Subscription),
            line_items: Some(vec![CreateCheckoutSessionLineItems {
                price: Some(config.signup_price_id.clone()),
                quantity: Some(1),
                ..Default::default()
            }]),
            success_url: Some(&success_url),
            cancel_url: Some(&cancel_url),
            metadata: Some(metadata),
            ..Default::default()
        };

        let session = CheckoutSession::create(self.stripe.inner(), params).await?;
        let session_id = session.id.to_string();

        self.sessions
            .record(&session_id, email, SessionKind::Signup)
            .await?;

        tracing::info!(
            session_id = %session_id,
            "Created sign-up checkout session"
        );

        Ok(session.into())
    }

    /// Create a payment-mode checkout session for `quantity` credit packs.
    pub async fn create_credits_checkout(
        &self,
        email: &str,
        quantity: u32,
    ) -> BillingResult<CheckoutResponse> {
        if email.is_empty() {
            return Err(BillingError::Internal("email is required".to_string()));
        }
        if quantity == 0 {
            return Err(BillingError::InvalidAmount(
                "quantity must be at least 1".to_string(),
            ));
        }

        let config = self.stripe.config();
        let success_url = format!(
            "{}/credits?purchase=success&session_id={{CHECKOUT_SESSION_ID}}",
            config.app_base_url
        );
        let cancel_url = format!("{}/credits?purchase=canceled", config.app_base_url);

        let mut metadata = std::collections::HashMap::new();
        metadata.insert(
            "checkout_type".to_string(),
            SessionKind::Credits.to_string(),
        );
        metadata.insert("quantity".to_string(), quantity.to_string());

        let params = CreateCheckoutSession {
            customer_email: Some(email),
            mode: Some(CheckoutSessionMode::Payment),
            line_items: Some(vec![CreateCheckoutSessionLineItems {
                price: Some(config.credits_price_id.clone()),
                quantity: Some(quantity as u64),
                ..Default::default()
            }]),
            success_url: Some(&success_url),
            cancel_url: Some(&cancel_url),
            metadata: Some(metadata),
            ..Default::default()
        };

        let session = CheckoutSession::create(self.stripe.inner(), params).await?;
        let session_id = session.id.to_string();

        self.sessions
            .record(&session_id, email, SessionKind::Credits)
            .await?;

        tracing::info!(
            session_id = %session_id,
            quantity = quantity,
            "Created credit-pack checkout session"
        );

        Ok(session.into())
    }

    /// Current verification state of a session, for the client's
    /// post-checkout poll.
    pub async fn session_status(&self, session_id: &str) -> BillingResult<SessionStatusResponse> {
        let session = self.sessions.get(session_id).await?;
        Ok(SessionStatusResponse {
            verified: matches!(
                session.status(),
                Some(SessionStatus::Verified) | Some(SessionStatus::Used)
            ),
            status: session.status,
            email: session.email,
        })
    }
}

/// Response for creating a checkout session
#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub session_id: String,
    pub url: Option<String>,
}

impl From<CheckoutSession> for CheckoutResponse {
    fn from(session: CheckoutSession) -> Self {
        Self {
            session_id: session.id.to_string(),
            url: session.url,
        }
    }
}

/// Response for the session-status poll
#[derive(Debug, Serialize)]
pub struct SessionStatusResponse {
    pub status: String,
    pub verified: bool,
    pub email: String,
}
