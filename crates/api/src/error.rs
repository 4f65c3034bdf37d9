//! API error types and handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use surveyflow_billing::BillingError;

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    // Validation errors
    #[error("Invalid request: {0}")]
    BadRequest(String),

    // Resource errors
    #[error("Resource not found")]
    NotFound,
    #[error("Conflict: {0}")]
    Conflict(String),

    // Billing errors
    #[error("{0}")]
    PaymentRequired(String),

    // Upstream errors
    #[error("Upstream provider error: {0}")]
    UpstreamUnavailable(String),

    // Internal errors
    #[error("Database error: {0}")]
    Database(String),
    #[error("Internal server error")]
    Internal,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),

            ApiError::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND", self.to_string()),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),

            ApiError::PaymentRequired(msg) => {
                (StatusCode::PAYMENT_REQUIRED, "INSUFFICIENT_CREDITS", msg.clone())
            }

            ApiError::UpstreamUnavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "UPSTREAM_UNAVAILABLE", msg.clone())
            }

            ApiError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                "Database error".to_string(),
            ),
            ApiError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                self.to_string(),
            ),
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::AccountNotFound(_)
            | BillingError::SessionNotFound(_)
            | BillingError::ReservationNotFound(_) => ApiError::NotFound,

            // The message carries "need N, have M" for the user
            e @ BillingError::InsufficientCredits { .. } => {
                ApiError::PaymentRequired(e.to_string())
            }

            BillingError::SessionConflict(msg) | BillingError::ReservationConflict(msg) => {
                ApiError::Conflict(msg)
            }

            BillingError::InvalidAmount(msg) => ApiError::BadRequest(msg),

            BillingError::WebhookSignatureInvalid => {
                ApiError::BadRequest("Invalid webhook signature".to_string())
            }
            BillingError::WebhookEventNotSupported(msg) => ApiError::BadRequest(msg),

            BillingError::StripeApi(msg) => {
                tracing::error!(error = %msg, "Stripe API failure");
                ApiError::UpstreamUnavailable("payment provider unavailable".to_string())
            }

            BillingError::Database(msg) => ApiError::Database(msg),

            BillingError::Registration(msg)
            | BillingError::Config(msg)
            | BillingError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal billing failure");
                ApiError::Internal
            }
        }
    }
}

impl From<crate::generation::GenerationError> for ApiError {
    fn from(err: crate::generation::GenerationError) -> Self {
        use crate::generation::GenerationError;
        match err {
            GenerationError::Transient(msg) => {
                tracing::warn!(error = %msg, "AI provider transient failure");
                ApiError::UpstreamUnavailable("AI provider unavailable, try again".to_string())
            }
            GenerationError::Terminal(msg) => {
                tracing::error!(error = %msg, "AI provider rejected generation request");
                ApiError::BadRequest(format!("generation failed: {}", msg))
            }
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!("Database error: {:?}", err);
        match err {
            sqlx::Error::RowNotFound => ApiError::NotFound,
            _ => ApiError::Database(err.to_string()),
        }
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_credits_maps_to_payment_required() {
        let err: ApiError = BillingError::InsufficientCredits {
            needed: 1000,
            available: 250,
        }
        .into();

        match err {
            ApiError::PaymentRequired(msg) => {
                assert!(msg.contains("need 1000"));
                assert!(msg.contains("have 250"));
            }
            other => panic!("expected PaymentRequired, got {:?}", other),
        }
    }

    #[test]
    fn test_session_conflict_maps_to_conflict() {
        let err: ApiError = BillingError::SessionConflict("already used".to_string()).into();
        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[test]
    fn test_not_found_variants_collapse() {
        for err in [
            BillingError::AccountNotFound("a".into()),
            BillingError::SessionNotFound("s".into()),
            BillingError::ReservationNotFound("r".into()),
        ] {
            assert!(matches!(ApiError::from(err), ApiError::NotFound));
        }
    }
}
