//! Stripe API types.

use std::collections::HashMap;

use serde::Deserialize;

/// Stripe Checkout session object.
///
/// Used both for the create-session response and for the object inside
/// `checkout.session.*` events.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSessionObject {
    /// Session ID.
    pub id: String,
    /// Checkout URL to redirect the user to.
    #[serde(default)]
    pub url: Option<String>,
    /// Payment status (`paid`, `unpaid`, `no_payment_required`).
    #[serde(default)]
    pub payment_status: Option<String>,
    /// Customer ID.
    #[serde(default)]
    pub customer: Option<String>,
    /// Subscription ID for `subscription` mode sessions.
    #[serde(default)]
    pub subscription: Option<String>,
    /// Client reference ID (our `account_id`).
    #[serde(default)]
    pub client_reference_id: Option<String>,
    /// Expiry timestamp (Unix).
    #[serde(default)]
    pub expires_at: Option<i64>,
    /// Metadata.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Stripe subscription object inside `customer.subscription.*` events.
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionObject {
    /// Subscription ID.
    pub id: String,
    /// Status (`active`, `past_due`, `canceled`, ...).
    pub status: String,
    /// Customer ID.
    #[serde(default)]
    pub customer: Option<String>,
    /// Metadata copied from `subscription_data[metadata]` at checkout.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Stripe invoice object inside `invoice.paid` and `invoice.payment_succeeded` events.
#[derive(Debug, Clone, Deserialize)]
pub struct InvoiceObject {
    /// Invoice ID.
    pub id: String,
    /// Subscription the invoice bills.
    #[serde(default)]
    pub subscription: Option<String>,
    /// `subscription_create`, `subscription_cycle`, `manual`, ...
    #[serde(default)]
    pub billing_reason: Option<String>,
    /// Snapshot of the subscription at invoicing time.
    #[serde(default)]
    pub subscription_details: Option<SubscriptionDetails>,
}

/// Subscription snapshot on an invoice.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscriptionDetails {
    /// Metadata of the subscription.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Stripe webhook event envelope.
///
/// Only `id` and `type` are required here. `data` and `created` are decoded per event
/// type so an authentic event with a broken object can still be recorded.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeEvent {
    /// Event ID.
    pub id: String,
    /// Event type (e.g., "checkout.session.completed").
    #[serde(rename = "type")]
    pub event_type: String,
    /// Event data, decoded as [`StripeEventData`].
    #[serde(default)]
    pub data: serde_json::Value,
    /// Created timestamp (Unix).
    #[serde(default)]
    pub created: serde_json::Value,
}

/// Webhook event data container.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeEventData {
    /// The event object.
    pub object: serde_json::Value,
}

/// Stripe API error response.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeErrorResponse {
    /// Error details.
    pub error: StripeErrorDetail,
}

/// Stripe error detail.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeErrorDetail {
    /// Error type.
    #[serde(rename = "type")]
    pub error_type: String,
    /// Error message.
    #[serde(default)]
    pub message: String,
    /// Error code.
    #[serde(default)]
    pub code: Option<String>,
}
