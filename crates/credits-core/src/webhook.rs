//! Webhook event types and reconciliation records.
//!
//! A provider delivers each logical event at least once. The [`ProcessedEvent`] record,
//! keyed by the provider's event ID, is what makes processing exactly-once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AccountId, AnomalyId, SubscriptionStatus, Tier};

/// Event types the reconciler acts on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Payment for a checkout session completed.
    CheckoutCompleted,
    /// The provider expired an abandoned checkout session.
    CheckoutExpired,
    /// A subscription was created or changed.
    SubscriptionUpdated,
    /// A subscription ended.
    SubscriptionDeleted,
    /// A subscription invoice was paid.
    InvoicePaid,
    /// Any provider event type this service does not handle.
    Other(String),
}

impl EventType {
    /// Short name for logs and records.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::CheckoutCompleted => "checkout_completed",
            Self::CheckoutExpired => "checkout_expired",
            Self::SubscriptionUpdated => "subscription_updated",
            Self::SubscriptionDeleted => "subscription_deleted",
            Self::InvoicePaid => "invoice_paid",
            Self::Other(name) => name,
        }
    }
}

/// Provider-reported payment state of a checkout session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Funds captured.
    Paid,
    /// Payment not yet captured (e.g. delayed payment methods).
    Unpaid,
    /// Nothing to pay (e.g. a 100% discount).
    NoPaymentRequired,
}

impl PaymentStatus {
    /// Whether fulfilment may proceed.
    #[must_use]
    pub const fn is_settled(&self) -> bool {
        matches!(self, Self::Paid | Self::NoPaymentRequired)
    }
}

/// Payload of checkout events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutPayload {
    /// Provider session handle.
    pub session_id: String,
    /// Payment state.
    pub payment_status: PaymentStatus,
    /// Provider customer ID, if one was created.
    pub customer_id: Option<String>,
    /// Provider subscription ID for subscription checkouts.
    pub subscription_id: Option<String>,
}

/// Payload of subscription events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionPayload {
    /// Provider subscription ID.
    pub subscription_id: String,
    /// Account named in the subscription metadata.
    pub account_id: Option<AccountId>,
    /// Tier named in the subscription metadata.
    pub tier: Option<Tier>,
    /// Mapped subscription status.
    pub status: SubscriptionStatus,
}

/// Why an invoice was issued. Only renewals grant credits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingReason {
    /// First invoice of a new subscription. Checkout fulfilment already granted it.
    SubscriptionCreate,
    /// A new billing period started.
    SubscriptionCycle,
    /// Proration, manual invoices and anything else.
    Other,
}

impl BillingReason {
    /// Map the provider's `billing_reason` string.
    #[must_use]
    pub fn from_provider(raw: Option<&str>) -> Self {
        match raw {
            Some("subscription_create") => Self::SubscriptionCreate,
            Some("subscription_cycle") => Self::SubscriptionCycle,
            _ => Self::Other,
        }
    }
}

/// Payload of paid subscription invoices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoicePayload {
    /// Provider invoice ID.
    pub invoice_id: String,
    /// Subscription the invoice bills, if any.
    pub subscription_id: Option<String>,
    /// Why the invoice was issued.
    pub billing_reason: BillingReason,
    /// Account named in the subscription metadata.
    pub account_id: Option<AccountId>,
    /// Tier named in the subscription metadata.
    pub tier: Option<Tier>,
}

/// Typed event payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    /// Checkout session object.
    Checkout(CheckoutPayload),
    /// Subscription object.
    Subscription(SubscriptionPayload),
    /// Invoice object.
    Invoice(InvoicePayload),
    /// A handled event type whose object could not be decoded.
    Malformed {
        /// Decoding error.
        reason: String,
    },
    /// Unparsed object of an unhandled event type.
    Other {
        /// The raw provider object.
        object: serde_json::Value,
    },
}

/// A verified, parsed webhook event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookEvent {
    /// Provider event ID, unique per logical occurrence.
    pub id: String,
    /// Event type.
    pub event_type: EventType,
    /// When the provider created the event.
    pub created_at: DateTime<Utc>,
    /// Typed payload.
    pub payload: EventPayload,
}

/// What reconciliation did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Effects were applied to the ledger or account.
    Applied,
    /// The session had already been completed by an earlier event.
    SessionAlreadyCompleted,
    /// The provider had already expired the session.
    SessionExpired,
    /// Nothing to do (unhandled type, unsettled payment, no-op transition).
    Ignored,
    /// Could not be applied; an [`Anomaly`] was recorded.
    Anomaly,
}

impl Disposition {
    /// Short name for logs and responses.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::SessionAlreadyCompleted => "session_already_completed",
            Self::SessionExpired => "session_expired",
            Self::Ignored => "ignored",
            Self::Anomaly => "anomaly",
        }
    }
}

/// Durable deduplication record for a webhook event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedEvent {
    /// Provider event ID.
    pub event_id: String,
    /// Event type name.
    pub event_type: String,
    /// Outcome.
    pub disposition: Disposition,
    /// When processing finished.
    pub processed_at: DateTime<Utc>,
}

impl ProcessedEvent {
    /// Build the record for `event` with the given outcome.
    #[must_use]
    pub fn new(event: &WebhookEvent, disposition: Disposition) -> Self {
        Self {
            event_id: event.id.clone(),
            event_type: event.event_type.as_str().to_string(),
            disposition,
            processed_at: Utc::now(),
        }
    }
}

/// Why a verified event could not be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    /// No checkout session with this handle exists.
    UnknownSession,
    /// The account the event refers to does not exist.
    AccountNotFound,
    /// A subscription event carried no account reference.
    MissingAccountReference,
    /// The event was authentic but its object could not be decoded.
    MalformedPayload,
}

/// A verified webhook that could not be applied. Kept for operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Anomaly {
    /// Record ID.
    pub id: AnomalyId,
    /// Provider event ID.
    pub event_id: String,
    /// Event type name.
    pub event_type: String,
    /// Classification.
    pub kind: AnomalyKind,
    /// Free-form context (session or account id).
    pub detail: String,
    /// When it was recorded.
    pub recorded_at: DateTime<Utc>,
}

impl Anomaly {
    /// Build an anomaly for `event`.
    #[must_use]
    pub fn new(event: &WebhookEvent, kind: AnomalyKind, detail: impl Into<String>) -> Self {
        Self {
            id: AnomalyId::generate(),
            event_id: event.id.clone(),
            event_type: event.event_type.as_str().to_string(),
            kind,
            detail: detail.into(),
            recorded_at: Utc::now(),
        }
    }
}
