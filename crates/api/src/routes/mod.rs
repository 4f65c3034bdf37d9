//! API routes

pub mod billing;
pub mod credits;
pub mod generations;
pub mod health;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::state::AppState;

/// Create all API routes
pub fn create_router(state: AppState) -> Router {
    // Health check routes (at root level for infrastructure monitoring)
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/ready", get(health::readiness));

    let api_routes = Router::new()
        // Checkout and provisioning
        .route("/billing/checkout", post(billing::create_checkout))
        .route(
            "/billing/credits/checkout",
            post(billing::create_credits_checkout),
        )
        .route("/billing/session/:session_id", get(billing::session_status))
        .route(
            "/billing/complete-registration",
            post(billing::complete_registration),
        )
        // Stripe webhook (public, protected by signature verification)
        .route("/billing/webhook", post(billing::webhook))
        // Ledger reads
        .route("/credits/:account_id/balance", get(credits::balance))
        .route("/credits/:account_id/usage", get(credits::usage_history))
        // Generation (the credit-spending path)
        .route("/generations", post(generations::create_generation));

    Router::new()
        .merge(health_routes)
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
