//! Credit balance and usage history routes

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;
use surveyflow_shared::UsageEvent;

/// Balance shown in the client header
#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub account_id: Uuid,
    pub credits: i64,
}

/// Query parameters for usage history
#[derive(Debug, Deserialize)]
pub struct UsageHistoryQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    50
}

/// Current credit balance for an account
pub async fn balance(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let credits = state.billing.ledger.balance(account_id).await?;
    Ok(Json(BalanceResponse {
        account_id,
        credits,
    }))
}

/// Recent usage events for an account, newest first
pub async fn usage_history(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
    Query(query): Query<UsageHistoryQuery>,
) -> Result<Json<Vec<UsageEvent>>, ApiError> {
    let limit = query.limit.clamp(1, 200);

    // Distinguish "unknown account" from "no usage yet"
    state.billing.ledger.balance(account_id).await?;

    let events = state
        .billing
        .metering
        .recent_events(account_id, limit)
        .await?;

    Ok(Json(events))
}
