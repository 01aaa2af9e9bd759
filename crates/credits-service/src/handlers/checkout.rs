//! Checkout handlers.
//!
//! The success/cancel redirect the customer lands on is advisory. The UI learns whether
//! a purchase went through by polling the session status here.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use credits_core::{AccountId, CheckoutSession, PurchaseIntent, SessionStatus};

use crate::checkout::CheckoutRedirect;
use crate::error::ApiError;
use crate::state::AppState;

/// Create checkout request.
#[derive(Debug, Deserialize)]
pub struct CreateCheckoutRequest {
    /// Account receiving the purchase.
    pub account_id: AccountId,
    /// Credit pack SKU or plan product ID.
    pub product_id: String,
    /// Redirect after payment (default: frontend billing page).
    #[serde(default)]
    pub success_url: Option<String>,
    /// Redirect after cancelling (default: frontend billing page).
    #[serde(default)]
    pub cancel_url: Option<String>,
}

/// Open a checkout session.
pub async fn create_checkout(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateCheckoutRequest>,
) -> Result<Json<CheckoutRedirect>, ApiError> {
    let frontend = state.config.frontend_url.trim_end_matches('/');
    let intent = PurchaseIntent {
        product_id: body.product_id,
        account_id: body.account_id,
        success_url: body.success_url.unwrap_or_else(|| {
            format!("{frontend}/billing/success?session_id={{CHECKOUT_SESSION_ID}}")
        }),
        cancel_url: body
            .cancel_url
            .unwrap_or_else(|| format!("{frontend}/billing/cancel")),
    };

    tracing::info!(
        account_id = %intent.account_id,
        product_id = %intent.product_id,
        "Initiating checkout"
    );

    let redirect = state.checkout.initiate(&intent).await?;
    Ok(Json(redirect))
}

/// Checkout session status response.
#[derive(Debug, Serialize)]
pub struct CheckoutStatusResponse {
    /// Provider session handle.
    pub session_id: String,
    /// Account the purchase is for.
    pub account_id: String,
    /// Product purchased.
    pub product_id: String,
    /// `pending`, `completed` or `expired`.
    pub status: SessionStatus,
    /// Credits the purchase grants.
    pub credits: i64,
    /// When the session was opened.
    pub created_at: String,
    /// When the provider stops accepting payment.
    pub expires_at: String,
    /// When fulfilment was applied.
    pub completed_at: Option<String>,
    /// Whether a pending session is past its expiry timestamp.
    pub past_expiry: bool,
}

impl From<&CheckoutSession> for CheckoutStatusResponse {
    fn from(session: &CheckoutSession) -> Self {
        Self {
            session_id: session.session_id.clone(),
            account_id: session.account_id.to_string(),
            product_id: session.product.id().to_string(),
            status: session.status,
            credits: session.product.credits_granted(),
            created_at: session.created_at.to_rfc3339(),
            expires_at: session.expires_at.to_rfc3339(),
            completed_at: session.completed_at.map(|t| t.to_rfc3339()),
            past_expiry: session.status == SessionStatus::Pending
                && session.is_past_expiry(Utc::now()),
        }
    }
}

/// Get the server-side state of a checkout session.
pub async fn get_checkout_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<CheckoutStatusResponse>, ApiError> {
    let session = state
        .store
        .get_checkout_session(&session_id)?
        .ok_or_else(|| ApiError::NotFound(format!("Checkout session not found: {session_id}")))?;

    Ok(Json(CheckoutStatusResponse::from(&session)))
}
