//! Checkout session initiation.
//!
//! Turns a [`PurchaseIntent`] into a hosted checkout session. Validation happens before
//! the provider is contacted, and nothing is persisted unless the provider answered in
//! time.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::Serialize;

use credits_core::{AccountId, Catalog, CheckoutSession, PurchaseIntent};
use credits_store::{Store, StoreError};

use crate::provider::{PaymentProvider, SessionRequest};

/// Errors from [`CheckoutInitiator::initiate`].
#[derive(Debug, thiserror::Error)]
pub enum CheckoutError {
    /// Product identifier not in the catalog.
    #[error("invalid product: {0}")]
    InvalidProduct(String),

    /// A redirect URL is not an absolute http(s) URL.
    #[error("invalid {field}: {reason}")]
    InvalidRedirect {
        /// `success_url` or `cancel_url`.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// The account does not exist.
    #[error("account not found: {0}")]
    AccountNotFound(AccountId),

    /// The provider failed or did not answer in time.
    #[error("payment provider unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Storage failure.
    #[error(transparent)]
    Storage(#[from] StoreError),
}

/// What the caller redirects the customer to.
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutRedirect {
    /// Provider session handle.
    pub session_id: String,
    /// Hosted checkout page.
    pub checkout_url: String,
    /// When the provider stops accepting payment.
    pub expires_at: DateTime<Utc>,
}

/// Opens checkout sessions with the payment provider.
pub struct CheckoutInitiator {
    store: Arc<dyn Store>,
    provider: Arc<dyn PaymentProvider>,
    catalog: Catalog,
    provider_timeout: Duration,
    session_ttl: chrono::Duration,
}

impl CheckoutInitiator {
    /// Create an initiator.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        provider: Arc<dyn PaymentProvider>,
        catalog: Catalog,
        provider_timeout: Duration,
        session_ttl: chrono::Duration,
    ) -> Self {
        Self {
            store,
            provider,
            catalog,
            provider_timeout,
            session_ttl,
        }
    }

    /// Open a session for `intent` and persist it as pending.
    pub async fn initiate(&self, intent: &PurchaseIntent) -> Result<CheckoutRedirect, CheckoutError> {
        let product = self
            .catalog
            .resolve(&intent.product_id)
            .map_err(|_| CheckoutError::InvalidProduct(intent.product_id.clone()))?;

        validate_redirect("success_url", &intent.success_url)?;
        validate_redirect("cancel_url", &intent.cancel_url)?;

        if self.store.get_account(&intent.account_id)?.is_none() {
            return Err(CheckoutError::AccountNotFound(intent.account_id));
        }

        let request = SessionRequest {
            account_id: intent.account_id,
            product: product.clone(),
            success_url: intent.success_url.clone(),
            cancel_url: intent.cancel_url.clone(),
        };

        let created = match tokio::time::timeout(
            self.provider_timeout,
            self.provider.create_session(&request),
        )
        .await
        {
            Ok(Ok(created)) => created,
            Ok(Err(e)) => {
                tracing::warn!(
                    provider = self.provider.name(),
                    account_id = %intent.account_id,
                    error = %e,
                    "Checkout session creation failed"
                );
                return Err(CheckoutError::UpstreamUnavailable(e.to_string()));
            }
            Err(_) => {
                tracing::warn!(
                    provider = self.provider.name(),
                    account_id = %intent.account_id,
                    timeout_ms = %self.provider_timeout.as_millis(),
                    "Checkout session creation timed out"
                );
                return Err(CheckoutError::UpstreamUnavailable(
                    "timed out waiting for payment provider".into(),
                ));
            }
        };

        let now = Utc::now();
        let expires_at = created
            .expires_at
            .unwrap_or_else(|| now.checked_add_signed(self.session_ttl).unwrap_or(now));
        let session = CheckoutSession::new(
            created.session_id.clone(),
            intent.account_id,
            product,
            now,
            expires_at,
        );
        self.store.put_checkout_session(&session)?;

        tracing::info!(
            session_id = %session.session_id,
            account_id = %intent.account_id,
            product_id = %intent.product_id,
            expires_at = %expires_at,
            "Checkout session opened"
        );

        Ok(CheckoutRedirect {
            session_id: created.session_id,
            checkout_url: created.url,
            expires_at,
        })
    }
}

/// Redirect URLs must be absolute http(s) URLs.
fn validate_redirect(field: &'static str, value: &str) -> Result<(), CheckoutError> {
    let url = Url::parse(value).map_err(|e| CheckoutError::InvalidRedirect {
        field,
        reason: e.to_string(),
    })?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(CheckoutError::InvalidRedirect {
            field,
            reason: format!("unsupported scheme {}", url.scheme()),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use credits_core::{Account, Product, SessionStatus};
    use credits_store::MemoryStore;

    use crate::provider::FakeProvider;

    fn setup() -> (Arc<MemoryStore>, Arc<FakeProvider>, CheckoutInitiator, AccountId) {
        let store = Arc::new(MemoryStore::new());
        let provider = Arc::new(FakeProvider::new(None));
        let account_id = AccountId::generate();
        store.create_account(&Account::new(account_id)).unwrap();

        let initiator = CheckoutInitiator::new(
            store.clone(),
            provider.clone(),
            Catalog::default(),
            Duration::from_secs(10),
            chrono::Duration::hours(24),
        );
        (store, provider, initiator, account_id)
    }

    fn intent(account_id: AccountId, product_id: &str) -> PurchaseIntent {
        PurchaseIntent {
            product_id: product_id.into(),
            account_id,
            success_url: "https://app.example.com/billing?status=success".into(),
            cancel_url: "https://app.example.com/billing?status=cancel".into(),
        }
    }

    #[tokio::test]
    async fn opens_pending_session_with_product_snapshot() {
        let (store, _provider, initiator, account_id) = setup();

        let redirect = initiator
            .initiate(&intent(account_id, "credits_25"))
            .await
            .unwrap();

        let session = store
            .get_checkout_session(&redirect.session_id)
            .unwrap()
            .unwrap();
        assert_eq!(session.status, SessionStatus::Pending);
        assert_eq!(session.account_id, account_id);
        assert!(matches!(session.product, Product::CreditPack(ref pack) if pack.credits == 25));
        assert_eq!(session.expires_at, redirect.expires_at);
        assert!(redirect.checkout_url.contains(&redirect.session_id));
    }

    #[tokio::test]
    async fn overflowing_session_lifetime_does_not_panic() {
        let store = Arc::new(MemoryStore::new());
        let account_id = AccountId::generate();
        store.create_account(&Account::new(account_id)).unwrap();
        let initiator = CheckoutInitiator::new(
            store.clone(),
            Arc::new(FakeProvider::new(None)),
            Catalog::default(),
            Duration::from_secs(10),
            chrono::Duration::weeks(10_000_000_000),
        );

        let redirect = initiator
            .initiate(&intent(account_id, "credits_10"))
            .await
            .unwrap();

        assert_eq!(store.checkout_session_count(), 1);
        assert!(redirect.expires_at <= Utc::now());
    }

    #[tokio::test]
    async fn unknown_product_contacts_nobody() {
        let (_store, provider, initiator, account_id) = setup();

        let result = initiator.initiate(&intent(account_id, "credits_1000")).await;

        assert!(matches!(result, Err(CheckoutError::InvalidProduct(id)) if id == "credits_1000"));
        assert!(provider.requests().is_empty());
    }

    #[tokio::test]
    async fn relative_redirect_is_rejected() {
        let (_store, provider, initiator, account_id) = setup();
        let mut intent = intent(account_id, "credits_10");
        intent.cancel_url = "/billing".into();

        let result = initiator.initiate(&intent).await;

        assert!(matches!(
            result,
            Err(CheckoutError::InvalidRedirect {
                field: "cancel_url",
                ..
            })
        ));
        assert!(provider.requests().is_empty());
    }

    #[tokio::test]
    async fn non_http_redirect_is_rejected() {
        let (_store, _provider, initiator, account_id) = setup();
        let mut intent = intent(account_id, "credits_10");
        intent.success_url = "javascript:alert(1)".into();

        assert!(matches!(
            initiator.initiate(&intent).await,
            Err(CheckoutError::InvalidRedirect {
                field: "success_url",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn unknown_account_is_rejected() {
        let (_store, provider, initiator, _account_id) = setup();
        let other = AccountId::generate();

        let result = initiator.initiate(&intent(other, "pro")).await;

        assert!(matches!(result, Err(CheckoutError::AccountNotFound(id)) if id == other));
        assert!(provider.requests().is_empty());
    }

    #[tokio::test]
    async fn provider_failure_persists_nothing() {
        let (store, provider, initiator, account_id) = setup();
        provider.set_failing(true);

        let result = initiator.initiate(&intent(account_id, "credits_10")).await;

        assert!(matches!(result, Err(CheckoutError::UpstreamUnavailable(_))));
        assert_eq!(store.checkout_session_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_provider_times_out() {
        let (store, provider, initiator, account_id) = setup();
        provider.set_delay(Duration::from_secs(60));

        let result = initiator.initiate(&intent(account_id, "credits_10")).await;

        assert!(matches!(result, Err(CheckoutError::UpstreamUnavailable(_))));
        assert!(provider.requests().is_empty());
        assert_eq!(store.checkout_session_count(), 0);
    }
}
