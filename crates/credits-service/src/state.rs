//! Application state.

use std::sync::Arc;

use credits_store::Store;

use crate::checkout::CheckoutInitiator;
use crate::config::ServiceConfig;
use crate::provider::{FakeProvider, PaymentProvider, ProviderError, StripeProvider};
use crate::reconciler::WebhookReconciler;

/// Application state shared across handlers.
pub struct AppState {
    /// The storage backend.
    pub store: Arc<dyn Store>,

    /// Service configuration.
    pub config: ServiceConfig,

    /// Payment provider shared by checkout and webhooks.
    pub provider: Arc<dyn PaymentProvider>,

    /// Checkout session initiator.
    pub checkout: CheckoutInitiator,

    /// Webhook reconciler.
    pub reconciler: WebhookReconciler,
}

impl AppState {
    /// Create application state, choosing the provider from configuration.
    ///
    /// Stripe is used when an API key is configured and mock payments are off;
    /// otherwise the in-process fake provider is used.
    pub fn new(store: Arc<dyn Store>, config: ServiceConfig) -> Result<Self, ProviderError> {
        let provider: Arc<dyn PaymentProvider> = match config.stripe_api_key.as_ref() {
            Some(key) if !config.mock_payments => {
                let provider = StripeProvider::new(
                    key.clone(),
                    config.stripe_webhook_secret.clone(),
                    config.provider_timeout(),
                )?
                .with_tolerance(config.webhook_tolerance_seconds);
                tracing::info!("Stripe integration enabled");
                Arc::new(provider)
            }
            _ => {
                tracing::warn!("Stripe not configured or mock payments enabled - using fake payment provider");
                Arc::new(
                    FakeProvider::new(config.stripe_webhook_secret.clone())
                        .with_tolerance(config.webhook_tolerance_seconds),
                )
            }
        };

        if config.stripe_webhook_secret.is_none() {
            tracing::warn!("Webhook secret not configured - all webhooks will be rejected");
        }

        Ok(Self::with_provider(store, config, provider))
    }

    /// Create application state with an explicit provider.
    #[must_use]
    pub fn with_provider(
        store: Arc<dyn Store>,
        config: ServiceConfig,
        provider: Arc<dyn PaymentProvider>,
    ) -> Self {
        let checkout = CheckoutInitiator::new(
            store.clone(),
            provider.clone(),
            config.catalog.clone(),
            config.provider_timeout(),
            config.checkout_session_ttl(),
        );
        let reconciler =
            WebhookReconciler::new(store.clone(), provider.clone(), config.catalog.clone());

        Self {
            store,
            config,
            provider,
            checkout,
            reconciler,
        }
    }
}
