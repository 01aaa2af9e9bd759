//! Common test utilities for credits service integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::Arc;

use axum::http::{HeaderName, HeaderValue};
use axum::Router;
use axum_test::TestServer;
use chrono::Utc;
use serde_json::{json, Value};

use credits_core::AccountId;
use credits_service::{create_router, AppState, FakeProvider, ServiceConfig};
use credits_store::{MemoryStore, Store};

pub const WEBHOOK_SECRET: &str = "whsec_test";
pub const SERVICE_API_KEY: &str = "test-service-key";

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// Direct access to the ledger.
    pub store: Arc<MemoryStore>,
    /// The provider behind checkout and webhooks.
    pub provider: Arc<FakeProvider>,
    /// A registered account with zero balance.
    pub account_id: AccountId,
}

impl TestHarness {
    /// Create a new test harness with a fresh store.
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    /// Create a harness with custom configuration.
    pub fn with_config(config: ServiceConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let provider = Arc::new(
            FakeProvider::new(config.stripe_webhook_secret.clone())
                .with_tolerance(config.webhook_tolerance_seconds),
        );

        let state = AppState::with_provider(store.clone(), config, provider.clone());
        let router: Router = create_router(state);
        let server = TestServer::new(router).expect("Failed to create test server");

        let account_id = AccountId::generate();
        store
            .create_account(&credits_core::Account::new(account_id))
            .expect("Failed to create account");

        Self {
            server,
            store,
            provider,
            account_id,
        }
    }

    /// Current balance of the harness account.
    pub fn balance(&self) -> i64 {
        self.store
            .get_account(&self.account_id)
            .expect("store read")
            .expect("account exists")
            .balance
    }

    /// Open a checkout session through the API and return its handle.
    pub async fn open_checkout(&self, product_id: &str) -> String {
        let response = self
            .server
            .post("/v1/checkout")
            .json(&json!({
                "account_id": self.account_id.to_string(),
                "product_id": product_id,
            }))
            .await;
        response.assert_status_ok();
        let body: Value = response.json();
        body["session_id"]
            .as_str()
            .expect("session_id in response")
            .to_string()
    }

    /// Deliver a correctly signed webhook payload.
    pub async fn deliver(&self, payload: &str) -> axum_test::TestResponse {
        let signature = self.provider.sign(payload).expect("sign payload");
        self.server
            .post("/webhooks/payments")
            .add_header(
                HeaderName::from_static("stripe-signature"),
                HeaderValue::from_str(&signature).expect("header value"),
            )
            .text(payload)
            .await
    }

    /// Service API key header pair.
    pub fn service_key() -> (HeaderName, HeaderValue) {
        (
            HeaderName::from_static("x-api-key"),
            HeaderValue::from_static(SERVICE_API_KEY),
        )
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration with a webhook secret and a service key.
pub fn test_config() -> ServiceConfig {
    ServiceConfig {
        listen_addr: "127.0.0.1:0".into(),
        service_api_key: Some(SERVICE_API_KEY.to_string()),
        stripe_webhook_secret: Some(WEBHOOK_SECRET.to_string()),
        mock_payments: true,
        frontend_url: "http://localhost:3000".into(),
        ..ServiceConfig::default()
    }
}

/// A `checkout.session.completed` event.
pub fn checkout_completed(event_id: &str, session_id: &str) -> String {
    json!({
        "id": event_id,
        "type": "checkout.session.completed",
        "created": Utc::now().timestamp(),
        "data": {"object": {
            "id": session_id,
            "payment_status": "paid",
            "customer": "cus_test"
        }}
    })
    .to_string()
}

/// A `checkout.session.expired` event.
pub fn checkout_expired(event_id: &str, session_id: &str) -> String {
    json!({
        "id": event_id,
        "type": "checkout.session.expired",
        "created": Utc::now().timestamp(),
        "data": {"object": {"id": session_id, "payment_status": "unpaid"}}
    })
    .to_string()
}

/// A `customer.subscription.*` event.
pub fn subscription_event(
    event_id: &str,
    event_type: &str,
    account_id: &AccountId,
    tier: &str,
    status: &str,
    created: i64,
) -> String {
    json!({
        "id": event_id,
        "type": event_type,
        "created": created,
        "data": {"object": {
            "id": "sub_test",
            "status": status,
            "metadata": {"account_id": account_id.to_string(), "tier": tier}
        }}
    })
    .to_string()
}
