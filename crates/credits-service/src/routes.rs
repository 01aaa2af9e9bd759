//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{
    accounts, anomalies, checkout, credits, entitlements, health, pricing, reports, webhooks,
};
use crate::state::AppState;

/// Maximum concurrent requests for general API endpoints.
const API_MAX_CONCURRENT_REQUESTS: usize = 50;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
/// - `GET /v1/pricing` - Catalog and report costs
///
/// ## Accounts
/// - `POST /v1/accounts` - Register account (service API key)
/// - `GET /v1/accounts/:id` - Account summary
/// - `GET /v1/accounts/:id/balance` - Balance and subscription state
/// - `GET /v1/accounts/:id/transactions` - Transaction history
/// - `GET /v1/accounts/:id/entitlements` - Plan features and subscription
/// - `GET /v1/accounts/:id/usage` - Report usage statistics
/// - `POST /v1/accounts/:id/debit` - Manual debit (service API key)
///
/// ## Reports
/// - `GET /v1/accounts/:id/reports/:type/access` - Access check
/// - `POST /v1/accounts/:id/reports/consume` - Debit a report once per report ID (service API key)
///
/// ## Checkout
/// - `POST /v1/checkout` - Open a checkout session
/// - `GET /v1/checkout/:session_id` - Session status
///
/// ## Operators
/// - `GET /v1/admin/anomalies` - Unapplied webhooks (service API key)
///
/// ## Webhooks (Signature verification)
/// - `POST /webhooks/payments` - Payment provider webhooks
pub fn create_router(state: AppState) -> Router {
    // Extract config values before moving state
    let cors_origins = state.config.cors_origins.clone();
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout_seconds = state.config.request_timeout_seconds;

    let cors = build_cors_layer(&cors_origins);

    let state = Arc::new(state);

    let api_routes = Router::new()
        .route("/pricing", get(pricing::get_pricing))
        // Accounts
        .route("/accounts", post(accounts::create_account))
        .route("/accounts/:id", get(accounts::get_account))
        .route("/accounts/:id/balance", get(credits::get_balance))
        .route("/accounts/:id/transactions", get(credits::list_transactions))
        .route("/accounts/:id/debit", post(credits::debit))
        .route(
            "/accounts/:id/entitlements",
            get(entitlements::get_entitlements),
        )
        .route("/accounts/:id/usage", get(entitlements::get_usage))
        // Reports
        .route(
            "/accounts/:id/reports/:report_type/access",
            get(reports::check_access),
        )
        .route("/accounts/:id/reports/consume", post(reports::consume))
        // Checkout
        .route("/checkout", post(checkout::create_checkout))
        .route("/checkout/:session_id", get(checkout::get_checkout_session))
        // Operators
        .route("/admin/anomalies", get(anomalies::list_anomalies))
        .layer(ConcurrencyLimitLayer::new(API_MAX_CONCURRENT_REQUESTS));

    Router::new()
        // Health (public, no rate limit)
        .route("/health", get(health::health))
        .nest("/v1", api_routes)
        // Webhooks (no rate limit - retried by the provider)
        .route("/webhooks/payments", post(webhooks::payment_webhook))
        // Global middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            request_timeout_seconds,
        )))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
