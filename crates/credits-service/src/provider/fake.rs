//! In-process payment provider.
//!
//! Opens sessions without any network call and verifies webhooks with the same
//! signature scheme as Stripe, so signed test payloads exercise the real path.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use credits_core::WebhookEvent;

use super::stripe::{parse_stripe_event, sign_payload, verify_stripe_signature};
use super::{CreatedSession, PaymentProvider, ProviderError, SessionRequest};

/// Hosted page root for fake sessions.
const CHECKOUT_BASE_URL: &str = "https://checkout.example.test/pay";

/// Fake provider for mock mode and tests.
#[derive(Debug, Default)]
pub struct FakeProvider {
    webhook_secret: Option<String>,
    tolerance_seconds: i64,
    fail: AtomicBool,
    delay_ms: AtomicU64,
    requests: Mutex<Vec<SessionRequest>>,
}

impl FakeProvider {
    /// Create a fake provider that verifies webhooks with `webhook_secret`.
    #[must_use]
    pub fn new(webhook_secret: Option<String>) -> Self {
        Self {
            webhook_secret,
            tolerance_seconds: super::stripe::DEFAULT_TOLERANCE_SECONDS,
            ..Self::default()
        }
    }

    /// Set the maximum accepted webhook age.
    #[must_use]
    pub fn with_tolerance(mut self, seconds: i64) -> Self {
        self.tolerance_seconds = seconds;
        self
    }

    /// Make every following `create_session` call fail.
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Delay every following `create_session` call.
    pub fn set_delay(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.delay_ms.store(millis, Ordering::SeqCst);
    }

    /// Requests received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<SessionRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    /// Sign `payload` as of now.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::Configuration` if no webhook secret is configured.
    pub fn sign(&self, payload: &str) -> Result<String, ProviderError> {
        self.sign_at(payload, Utc::now().timestamp())
    }

    /// Sign `payload` with an explicit timestamp.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::Configuration` if no webhook secret is configured.
    pub fn sign_at(&self, payload: &str, timestamp: i64) -> Result<String, ProviderError> {
        let secret = self
            .webhook_secret
            .as_deref()
            .ok_or_else(|| ProviderError::Configuration("webhook secret not configured".into()))?;
        sign_payload(secret, payload, timestamp)
    }
}

#[async_trait]
impl PaymentProvider for FakeProvider {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn create_session(
        &self,
        request: &SessionRequest,
    ) -> Result<CreatedSession, ProviderError> {
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        if self.fail.load(Ordering::SeqCst) {
            return Err(ProviderError::Unavailable("fake provider set to fail".into()));
        }

        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }

        let session_id = format!("cs_test_{}", uuid::Uuid::new_v4().simple());
        tracing::debug!(
            session_id = %session_id,
            account_id = %request.account_id,
            product_id = %request.product.id(),
            "Fake checkout session created"
        );

        Ok(CreatedSession {
            url: format!("{CHECKOUT_BASE_URL}/{session_id}"),
            session_id,
            expires_at: None,
        })
    }

    fn verify_signature(&self, payload: &str, signature: &str) -> Result<(), ProviderError> {
        verify_stripe_signature(
            self.webhook_secret.as_deref(),
            payload,
            signature,
            self.tolerance_seconds,
            Utc::now(),
        )
    }

    fn parse_event(&self, payload: &str) -> Result<WebhookEvent, ProviderError> {
        parse_stripe_event(payload)
    }
}
