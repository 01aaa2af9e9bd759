//! Checkout session types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::Product;
use crate::AccountId;

/// A request to buy a product. Lives only until a session is opened for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseIntent {
    /// Catalog product identifier (credit pack SKU or plan id).
    pub product_id: String,
    /// The account that will receive the purchase.
    pub account_id: AccountId,
    /// Where the provider sends the customer after paying. Advisory only.
    pub success_url: String,
    /// Where the provider sends the customer after abandoning checkout.
    pub cancel_url: String,
}

/// Lifecycle state of a checkout session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Opened, waiting for the provider to report payment.
    Pending,
    /// Payment confirmed by a verified webhook and fulfilment applied.
    Completed,
    /// The provider reported the session as expired.
    Expired,
}

/// A checkout session opened with the payment provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSession {
    /// Opaque provider session handle.
    pub session_id: String,

    /// The account the purchase is for.
    pub account_id: AccountId,

    /// Product snapshot taken at initiation.
    pub product: Product,

    /// Current status.
    pub status: SessionStatus,

    /// When the session was opened.
    pub created_at: DateTime<Utc>,

    /// When the provider stops accepting payment for it.
    pub expires_at: DateTime<Utc>,

    /// When fulfilment was applied.
    pub completed_at: Option<DateTime<Utc>>,
}

impl CheckoutSession {
    /// Create a pending session.
    #[must_use]
    pub fn new(
        session_id: impl Into<String>,
        account_id: AccountId,
        product: Product,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            account_id,
            product,
            status: SessionStatus::Pending,
            created_at,
            expires_at,
            completed_at: None,
        }
    }

    /// Whether `now` is past the expiry timestamp.
    ///
    /// This is informational: a late completion for a pending session is still honoured.
    #[must_use]
    pub fn is_past_expiry(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Transition `Pending -> Completed`. Returns `false` from any other state.
    pub fn complete(&mut self, now: DateTime<Utc>) -> bool {
        if self.status != SessionStatus::Pending {
            return false;
        }
        self.status = SessionStatus::Completed;
        self.completed_at = Some(now);
        true
    }

    /// Transition `Pending -> Expired`. Returns `false` from any other state.
    pub fn expire(&mut self) -> bool {
        if self.status != SessionStatus::Pending {
            return false;
        }
        self.status = SessionStatus::Expired;
        true
    }
}
