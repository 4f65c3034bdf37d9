//! Billing error types

use thiserror::Error;

/// Billing-specific errors
#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Stripe API error: {0}")]
    StripeApi(String),

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Checkout session not found: {0}")]
    SessionNotFound(String),

    #[error("insufficient credits: need {needed}, have {available}")]
    InsufficientCredits { needed: i64, available: i64 },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Session conflict: {0}")]
    SessionConflict(String),

    #[error("Reservation not found: {0}")]
    ReservationNotFound(String),

    #[error("Reservation conflict: {0}")]
    ReservationConflict(String),

    #[error("Webhook signature verification failed")]
    WebhookSignatureInvalid,

    #[error("Webhook event type not supported: {0}")]
    WebhookEventNotSupported(String),

    #[error("Registration backend error: {0}")]
    Registration(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BillingError {
    /// Whether the failure is worth retrying (network/provider trouble)
    /// as opposed to a terminal rejection of the request itself.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BillingError::StripeApi(_)
                | BillingError::Registration(_)
                | BillingError::Database(_)
        )
    }
}

impl From<stripe::StripeError> for BillingError {
    fn from(err: stripe::StripeError) -> Self {
        BillingError::StripeApi(err.to_string())
    }
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        BillingError::Database(err.to_string())
    }
}

pub type BillingResult<T> = Result<T, BillingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_credits_message_is_actionable() {
        let err = BillingError::InsufficientCredits {
            needed: 1000,
            available: 250,
        };
        assert_eq!(err.to_string(), "insufficient credits: need 1000, have 250");
    }

    #[test]
    fn test_transient_classification() {
        assert!(BillingError::StripeApi("503".into()).is_transient());
        assert!(BillingError::Registration("connect timeout".into()).is_transient());

        assert!(!BillingError::InsufficientCredits {
            needed: 1,
            available: 0
        }
        .is_transient());
        assert!(!BillingError::SessionConflict("already used".into()).is_transient());
        assert!(!BillingError::AccountNotFound("missing".into()).is_transient());
    }
}
