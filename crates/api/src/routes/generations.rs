//! AI generation endpoint
//!
//! The one place where credits actually get spent. The flow is
//! reserve -> call provider -> settle, with a full rollback of the
//! reservation when the provider call fails, so balances always reflect
//! work that really happened.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;
use crate::generation::ResponseSize;
use crate::state::AppState;

/// Request to generate one reply draft
#[derive(Debug, Deserialize)]
pub struct GenerationRequest {
    pub account_id: Uuid,
    pub prompt: String,
    #[serde(default)]
    pub response_size: ResponseSize,
    /// Client-supplied idempotency key; generated when absent. Retrying with
    /// the same key cannot double-charge.
    pub request_id: Option<Uuid>,
}

/// A generated reply draft and what it cost
#[derive(Debug, Serialize)]
pub struct GenerationResponse {
    pub request_id: Uuid,
    pub text: String,
    pub credits_charged: i64,
    pub balance: i64,
}

pub async fn create_generation(
    State(state): State<AppState>,
    Json(req): Json<GenerationRequest>,
) -> Result<Json<GenerationResponse>, ApiError> {
    if req.prompt.trim().is_empty() {
        return Err(ApiError::BadRequest("prompt is required".to_string()));
    }

    let request_id = req.request_id.unwrap_or_else(Uuid::new_v4);
    let estimated = state
        .generation
        .estimate_credits(&req.prompt, req.response_size);

    // Reserve before spending anything on the provider. InsufficientCredits
    // surfaces as 402 with the need/have amounts and no provider call is made.
    let reservation = state
        .billing
        .metering
        .reserve(req.account_id, request_id, estimated)
        .await?;

    if reservation.duplicate {
        tracing::info!(
            account_id = %req.account_id,
            request_id = %request_id,
            "Retrying generation under an existing reservation"
        );
    }

    match state
        .generation
        .generate(&req.prompt, req.response_size)
        .await
    {
        Ok(outcome) => {
            let settlement = state
                .billing
                .metering
                .settle(request_id, outcome.total_tokens)
                .await?;

            Ok(Json(GenerationResponse {
                request_id,
                text: outcome.text,
                credits_charged: settlement.final_credits,
                balance: settlement.balance,
            }))
        }
        Err(provider_err) => {
            // The generation produced nothing; give the reservation back.
            if let Err(cancel_err) = state.billing.metering.cancel(request_id).await {
                tracing::error!(
                    account_id = %req.account_id,
                    request_id = %request_id,
                    error = %cancel_err,
                    "Failed to roll back reservation after provider failure"
                );
            }
            Err(provider_err.into())
        }
    }
}
