//! Billing routes for Stripe integration

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;
use surveyflow_billing::{CheckoutResponse, ProfileParams, SessionStatusResponse};

/// Request to create the sign-up checkout session
#[derive(Debug, Deserialize)]
pub struct CreateCheckoutRequest {
    pub email: String,
}

/// Request to create a credit-pack checkout session
#[derive(Debug, Deserialize)]
pub struct CreateCreditsCheckoutRequest {
    pub email: String,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
}

fn default_quantity() -> u32 {
    1
}

/// Request to finish registration once the checkout session is verified
#[derive(Debug, Deserialize)]
pub struct CompleteRegistrationRequest {
    pub session_id: String,
    /// Subject id issued by the identity provider at sign-up
    pub identity_id: Uuid,
    pub name: String,
    pub phone: Option<String>,
}

/// Response after provisioning completes
#[derive(Debug, Serialize)]
pub struct CompleteRegistrationResponse {
    pub account_id: Uuid,
    pub email: String,
    pub credits: i64,
}

/// Create the checkout session that gates account creation
pub async fn create_checkout(
    State(state): State<AppState>,
    Json(req): Json<CreateCheckoutRequest>,
) -> Result<Json<CheckoutResponse>, ApiError> {
    if req.email.trim().is_empty() {
        return Err(ApiError::BadRequest("email is required".to_string()));
    }

    let response = state
        .billing
        .checkout
        .create_signup_checkout(req.email.trim())
        .await?;

    Ok(Json(response))
}

/// Create a checkout session for purchasing credit packs
pub async fn create_credits_checkout(
    State(state): State<AppState>,
    Json(req): Json<CreateCreditsCheckoutRequest>,
) -> Result<Json<CheckoutResponse>, ApiError> {
    if req.email.trim().is_empty() {
        return Err(ApiError::BadRequest("email is required".to_string()));
    }

    let response = state
        .billing
        .checkout
        .create_credits_checkout(req.email.trim(), req.quantity)
        .await?;

    Ok(Json(response))
}

/// Poll a checkout session's verification state after redirect
pub async fn session_status(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionStatusResponse>, ApiError> {
    let status = state.billing.checkout.session_status(&session_id).await?;
    Ok(Json(status))
}

/// Provision the account for a verified checkout session
pub async fn complete_registration(
    State(state): State<AppState>,
    Json(req): Json<CompleteRegistrationRequest>,
) -> Result<Json<CompleteRegistrationResponse>, ApiError> {
    if req.name.trim().is_empty() {
        return Err(ApiError::BadRequest("name is required".to_string()));
    }

    let account = state
        .billing
        .provisioner
        .provision(
            &req.session_id,
            req.identity_id,
            ProfileParams {
                name: req.name.trim().to_string(),
                phone: req.phone,
            },
            state.billing.signup_credits,
        )
        .await?;

    Ok(Json(CompleteRegistrationResponse {
        account_id: account.id,
        email: account.email,
        credits: account.credits,
    }))
}

/// Handle Stripe webhook events
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<serde_json::Value>, ApiError> {
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!("Stripe webhook missing signature header");
            ApiError::BadRequest("Missing stripe-signature header".to_string())
        })?;

    let event = state
        .billing
        .webhooks
        .verify_event(&body, signature)
        .map_err(|e| {
            tracing::warn!(error = ?e, "Stripe webhook signature verification failed");
            ApiError::BadRequest("Invalid webhook signature".to_string())
        })?;

    // A non-2xx here makes Stripe redeliver; the handler's event claim makes
    // that retry safe.
    state.billing.webhooks.handle_event(event).await?;

    Ok(Json(serde_json::json!({ "received": true })))
}
