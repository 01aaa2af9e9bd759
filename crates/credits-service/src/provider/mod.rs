//! Payment provider capability.
//!
//! The checkout initiator and the webhook reconciler talk to the provider only through
//! [`PaymentProvider`], so both can be exercised against [`FakeProvider`].
//!
//! - [`StripeProvider`]: Stripe Checkout over HTTPS.
//! - [`FakeProvider`]: no network. Used in mock mode and in tests.

pub mod fake;
pub mod stripe;
pub mod types;

pub use fake::FakeProvider;
pub use stripe::{sign_payload, verify_stripe_signature, StripeProvider};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use credits_core::{AccountId, Product, WebhookEvent};

/// Error type for payment provider operations.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The provider API returned an error.
    #[error("provider API error: {error_type} - {message}")]
    Api {
        /// Error type.
        error_type: String,
        /// Error message.
        message: String,
        /// Error code.
        code: Option<String>,
    },

    /// The provider answered with something we could not use.
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),

    /// Webhook signature missing, malformed, stale or not matching.
    #[error("invalid webhook signature: {0}")]
    InvalidSignature(String),

    /// Verified webhook payload could not be decoded.
    #[error("malformed event: {0}")]
    MalformedEvent(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The provider is unreachable or refused to serve the request.
    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

/// What the initiator asks the provider to sell.
#[derive(Debug, Clone)]
pub struct SessionRequest {
    /// Account receiving the purchase. Sent as metadata and client reference.
    pub account_id: AccountId,
    /// Product snapshot.
    pub product: Product,
    /// Redirect after payment.
    pub success_url: String,
    /// Redirect after abandoning checkout.
    pub cancel_url: String,
}

/// A session the provider opened.
#[derive(Debug, Clone)]
pub struct CreatedSession {
    /// Opaque provider handle.
    pub session_id: String,
    /// Hosted checkout page.
    pub url: String,
    /// Provider-reported expiry, when it gives one.
    pub expires_at: Option<DateTime<Utc>>,
}

/// A hosted checkout provider.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Short provider name for logs.
    fn name(&self) -> &'static str;

    /// Open a hosted checkout session.
    async fn create_session(&self, request: &SessionRequest)
        -> Result<CreatedSession, ProviderError>;

    /// Verify a webhook signature header against the raw payload.
    ///
    /// Fails closed: without a configured secret nothing verifies.
    fn verify_signature(&self, payload: &str, signature: &str) -> Result<(), ProviderError>;

    /// Decode a verified webhook payload.
    fn parse_event(&self, payload: &str) -> Result<WebhookEvent, ProviderError>;
}
