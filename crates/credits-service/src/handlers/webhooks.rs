//! Payment provider webhook handler.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::Serialize;

use crate::error::ApiError;
use crate::reconciler::Outcome;
use crate::state::AppState;

/// Webhook response.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    /// Whether the webhook was accepted.
    pub received: bool,
    /// Provider event ID.
    pub event_id: String,
    /// What reconciliation did.
    pub outcome: Outcome,
}

/// Handle payment provider webhooks.
///
/// The raw body is verified against the `stripe-signature` header before anything is
/// parsed.
pub async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<WebhookResponse>, ApiError> {
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok());

    let reconciled = state.reconciler.handle(&body, signature)?;

    Ok(Json(WebhookResponse {
        received: true,
        event_id: reconciled.event_id,
        outcome: reconciled.outcome,
    }))
}
