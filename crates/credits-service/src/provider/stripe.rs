//! Stripe Checkout provider.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;

use credits_core::{
    AccountId, BillingReason, CheckoutPayload, EventPayload, EventType, InvoicePayload,
    PaymentStatus, Product, SubscriptionPayload, SubscriptionStatus, Tier, WebhookEvent,
};

use super::types::{
    CheckoutSessionObject, InvoiceObject, StripeErrorResponse, StripeEvent, StripeEventData,
    SubscriptionObject,
};
use super::{CreatedSession, PaymentProvider, ProviderError, SessionRequest};
use crate::crypto::{constant_time_eq, hmac_sha256_hex};

/// Default maximum age of a signed webhook, in seconds.
pub const DEFAULT_TOLERANCE_SECONDS: i64 = 300;

/// Stripe API client implementing [`PaymentProvider`].
#[derive(Debug, Clone)]
pub struct StripeProvider {
    client: Client,
    api_key: String,
    webhook_secret: Option<String>,
    base_url: String,
    tolerance_seconds: i64,
}

impl StripeProvider {
    /// Stripe API base URL.
    const BASE_URL: &'static str = "https://api.stripe.com/v1";

    /// Create a new Stripe provider.
    ///
    /// # Arguments
    ///
    /// * `api_key` - Stripe secret API key (`sk_test_...` or `sk_live_...`)
    /// * `webhook_secret` - Webhook signing secret (`whsec_...`). Without it every
    ///   webhook is rejected.
    /// * `timeout` - Upper bound on one HTTP call
    pub fn new(
        api_key: impl Into<String>,
        webhook_secret: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            webhook_secret,
            base_url: Self::BASE_URL.to_string(),
            tolerance_seconds: DEFAULT_TOLERANCE_SECONDS,
        })
    }

    /// Point the client at another API root (used by tests).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the maximum accepted webhook age.
    #[must_use]
    pub const fn with_tolerance(mut self, seconds: i64) -> Self {
        self.tolerance_seconds = seconds;
        self
    }

    /// Handle API response and convert errors.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, ProviderError> {
        let status = response.status();

        if status.is_success() {
            return Ok(response.json().await?);
        }

        // Try to parse error response
        let error_body: Result<StripeErrorResponse, _> = response.json().await;

        match error_body {
            Ok(stripe_error) => Err(ProviderError::Api {
                error_type: stripe_error.error.error_type,
                message: stripe_error.error.message,
                code: stripe_error.error.code,
            }),
            Err(_) => Err(ProviderError::Api {
                error_type: "unknown".to_string(),
                message: format!("HTTP {status}"),
                code: None,
            }),
        }
    }
}

/// Form parameters for `POST /checkout/sessions`.
fn session_params(request: &SessionRequest) -> Vec<(&'static str, String)> {
    let product = &request.product;
    let account_id = request.account_id.to_string();

    let mode = if product.is_subscription() {
        "subscription"
    } else {
        "payment"
    };

    let mut params = vec![
        ("mode", mode.to_string()),
        ("success_url", request.success_url.clone()),
        ("cancel_url", request.cancel_url.clone()),
        ("client_reference_id", account_id.clone()),
        ("line_items[0][price_data][currency]", "usd".to_string()),
        (
            "line_items[0][price_data][product_data][name]",
            product.name().to_string(),
        ),
        (
            "line_items[0][price_data][unit_amount]",
            product.price_cents().to_string(),
        ),
        ("line_items[0][quantity]", "1".to_string()),
        ("metadata[account_id]", account_id.clone()),
        ("metadata[product_id]", product.id().to_string()),
    ];

    if let Product::Subscription(plan) = product {
        params.push((
            "line_items[0][price_data][recurring][interval]",
            "month".to_string(),
        ));
        // Subscription events only carry the subscription's own metadata
        params.push(("subscription_data[metadata][account_id]", account_id));
        params.push((
            "subscription_data[metadata][tier]",
            plan.tier.as_str().to_string(),
        ));
    }

    params
}

#[async_trait]
impl PaymentProvider for StripeProvider {
    fn name(&self) -> &'static str {
        "stripe"
    }

    async fn create_session(
        &self,
        request: &SessionRequest,
    ) -> Result<CreatedSession, ProviderError> {
        let params = session_params(request);

        tracing::debug!(
            account_id = %request.account_id,
            product_id = %request.product.id(),
            amount_cents = %request.product.price_cents(),
            "Creating Stripe checkout session"
        );

        let response = self
            .client
            .post(format!("{}/checkout/sessions", self.base_url))
            .basic_auth(&self.api_key, Option::<&str>::None)
            .form(&params)
            .send()
            .await?;

        let session: CheckoutSessionObject = self.handle_response(response).await?;

        let url = session.url.ok_or_else(|| {
            ProviderError::InvalidResponse(format!("session {} has no checkout url", session.id))
        })?;

        Ok(CreatedSession {
            session_id: session.id,
            url,
            expires_at: session
                .expires_at
                .and_then(|ts| DateTime::from_timestamp(ts, 0)),
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

// ============================================================================
// Webhook signatures
// ============================================================================

/// Verify a `Stripe-Signature` header.
///
/// Format: `t=timestamp,v1=signature,v1=signature2,...`. The signed message is
/// `"{t}.{payload}"`; any `v1` entry may match.
pub fn verify_stripe_signature(
    secret: Option<&str>,
    payload: &str,
    signature: &str,
    tolerance_seconds: i64,
    now: DateTime<Utc>,
) -> Result<(), ProviderError> {
    let secret = secret
        .ok_or_else(|| ProviderError::InvalidSignature("webhook secret not configured".into()))?;

    let mut timestamp: Option<&str> = None;
    let mut signatures: Vec<&str> = Vec::new();

    for part in signature.split(',') {
        let mut kv = part.trim().splitn(2, '=');
        match (kv.next(), kv.next()) {
            (Some("t"), Some(ts)) => timestamp = Some(ts),
            (Some("v1"), Some(sig)) => signatures.push(sig),
            _ => {}
        }
    }

    let timestamp =
        timestamp.ok_or_else(|| ProviderError::InvalidSignature("missing timestamp".into()))?;

    if signatures.is_empty() {
        return Err(ProviderError::InvalidSignature("missing v1 signature".into()));
    }

    let signed_at: i64 = timestamp
        .parse()
        .map_err(|_| ProviderError::InvalidSignature("malformed timestamp".into()))?;

    if now.timestamp() - signed_at > tolerance_seconds {
        return Err(ProviderError::InvalidSignature(
            "timestamp outside tolerance".into(),
        ));
    }

    let expected = hmac_sha256_hex(secret, &format!("{timestamp}.{payload}"))
        .ok_or_else(|| ProviderError::Configuration("unusable webhook secret".into()))?;

    if signatures.iter().any(|sig| constant_time_eq(&expected, sig)) {
        Ok(())
    } else {
        Err(ProviderError::InvalidSignature("no matching signature".into()))
    }
}

/// Produce a `Stripe-Signature` header value for `payload` signed at `timestamp`.
pub fn sign_payload(secret: &str, payload: &str, timestamp: i64) -> Result<String, ProviderError> {
    let signature = hmac_sha256_hex(secret, &format!("{timestamp}.{payload}"))
        .ok_or_else(|| ProviderError::Configuration("unusable webhook secret".into()))?;
    Ok(format!("t={timestamp},v1={signature}"))
}

// ============================================================================
// Event parsing
// ============================================================================

/// Decode a Stripe event into the provider-neutral [`WebhookEvent`].
///
/// Fails only when the envelope has no readable `id` or `type`. A handled event whose
/// object or timestamp cannot be decoded becomes [`EventPayload::Malformed`] so it can
/// be recorded and acknowledged.
pub fn parse_stripe_event(payload: &str) -> Result<WebhookEvent, ProviderError> {
    let event: StripeEvent = serde_json::from_str(payload)
        .map_err(|e| ProviderError::MalformedEvent(e.to_string()))?;
    if event.id.trim().is_empty() {
        return Err(ProviderError::MalformedEvent("empty event id".into()));
    }

    let event_type = match event.event_type.as_str() {
        "checkout.session.completed" | "checkout.session.async_payment_succeeded" => {
            EventType::CheckoutCompleted
        }
        "checkout.session.expired" => EventType::CheckoutExpired,
        "customer.subscription.created" | "customer.subscription.updated" => {
            EventType::SubscriptionUpdated
        }
        "customer.subscription.deleted" => EventType::SubscriptionDeleted,
        "invoice.paid" | "invoice.payment_succeeded" => EventType::InvoicePaid,
        other => EventType::Other(other.to_string()),
    };

    let (created_at, payload) = match decode_body(&event_type, &event.created, event.data) {
        Ok(decoded) => decoded,
        Err(reason) => {
            tracing::warn!(
                event_id = %event.id,
                event_type = %event.event_type,
                reason = %reason,
                "Undecodable webhook object"
            );
            (Utc::now(), EventPayload::Malformed { reason })
        }
    };

    Ok(WebhookEvent {
        id: event.id,
        event_type,
        created_at,
        payload,
    })
}

fn decode_body(
    event_type: &EventType,
    created: &serde_json::Value,
    data: serde_json::Value,
) -> Result<(DateTime<Utc>, EventPayload), String> {
    let created_at = created
        .as_i64()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .ok_or_else(|| format!("invalid created timestamp {created}"))?;
    let object = serde_json::from_value::<StripeEventData>(data)
        .map_err(|e| format!("event data: {e}"))?
        .object;

    let payload = match event_type {
        EventType::CheckoutCompleted | EventType::CheckoutExpired => {
            EventPayload::Checkout(checkout_payload(object)?)
        }
        EventType::SubscriptionUpdated | EventType::SubscriptionDeleted => {
            EventPayload::Subscription(subscription_payload(object)?)
        }
        EventType::InvoicePaid => EventPayload::Invoice(invoice_payload(object)?),
        EventType::Other(_) => EventPayload::Other { object },
    };
    Ok((created_at, payload))
}

fn checkout_payload(object: serde_json::Value) -> Result<CheckoutPayload, String> {
    let session: CheckoutSessionObject =
        serde_json::from_value(object).map_err(|e| format!("checkout session: {e}"))?;

    Ok(CheckoutPayload {
        session_id: session.id,
        payment_status: map_payment_status(session.payment_status.as_deref()),
        customer_id: session.customer,
        subscription_id: session.subscription,
    })
}

fn subscription_payload(object: serde_json::Value) -> Result<SubscriptionPayload, String> {
    let subscription: SubscriptionObject =
        serde_json::from_value(object).map_err(|e| format!("subscription: {e}"))?;
    let (account_id, tier) = metadata_reference(&subscription.metadata);

    Ok(SubscriptionPayload {
        subscription_id: subscription.id,
        account_id,
        tier,
        status: map_subscription_status(&subscription.status),
    })
}

fn invoice_payload(object: serde_json::Value) -> Result<InvoicePayload, String> {
    let invoice: InvoiceObject =
        serde_json::from_value(object).map_err(|e| format!("invoice: {e}"))?;
    let details = invoice.subscription_details.unwrap_or_default();
    let (account_id, tier) = metadata_reference(&details.metadata);

    Ok(InvoicePayload {
        invoice_id: invoice.id,
        subscription_id: invoice.subscription,
        billing_reason: BillingReason::from_provider(invoice.billing_reason.as_deref()),
        account_id,
        tier,
    })
}

/// Account and tier written into subscription metadata at checkout.
fn metadata_reference(
    metadata: &HashMap<String, String>,
) -> (Option<AccountId>, Option<Tier>) {
    let account_id = metadata
        .get("account_id")
        .and_then(|id| id.parse::<AccountId>().ok());
    let tier = metadata.get("tier").and_then(|tier| Tier::parse(tier));
    (account_id, tier)
}

fn map_payment_status(status: Option<&str>) -> PaymentStatus {
    match status {
        Some("paid") => PaymentStatus::Paid,
        Some("no_payment_required") => PaymentStatus::NoPaymentRequired,
        _ => PaymentStatus::Unpaid,
    }
}

/// Map a Stripe subscription status. Unknown statuses are treated as past due so
/// they never grant an active subscription.
fn map_subscription_status(status: &str) -> SubscriptionStatus {
    match status {
        "active" | "trialing" => SubscriptionStatus::Active,
        "canceled" | "incomplete_expired" | "paused" => SubscriptionStatus::Canceled,
        other => {
            if !matches!(other, "past_due" | "unpaid" | "incomplete") {
                tracing::warn!(status = %other, "Unknown Stripe subscription status");
            }
            SubscriptionStatus::PastDue
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SECRET: &str = "whsec_test";

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn valid_signature_verifies() {
        let payload = r#"{"id":"evt_1"}"#;
        let header = sign_payload(SECRET, payload, now().timestamp()).unwrap();
        verify_stripe_signature(Some(SECRET), payload, &header, 300, now()).unwrap();
    }

    #[test]
    fn any_v1_entry_may_match() {
        let payload = r#"{"id":"evt_1"}"#;
        let ts = now().timestamp();
        let good = sign_payload(SECRET, payload, ts).unwrap();
        let good_sig = good.split("v1=").nth(1).unwrap();
        let header = format!("t={ts},v1={},v1={good_sig}", "0".repeat(64));
        verify_stripe_signature(Some(SECRET), payload, &header, 300, now()).unwrap();
    }

    #[test]
    fn tampered_payload_fails() {
        let header = sign_payload(SECRET, r#"{"id":"evt_1"}"#, now().timestamp()).unwrap();
        let result =
            verify_stripe_signature(Some(SECRET), r#"{"id":"evt_2"}"#, &header, 300, now());
        assert!(matches!(result, Err(ProviderError::InvalidSignature(_))));
    }

    #[test]
    fn wrong_secret_fails() {
        let payload = "{}";
        let header = sign_payload("whsec_other", payload, now().timestamp()).unwrap();
        assert!(verify_stripe_signature(Some(SECRET), payload, &header, 300, now()).is_err());
    }

    #[test]
    fn missing_secret_fails_closed() {
        let payload = "{}";
        let header = sign_payload(SECRET, payload, now().timestamp()).unwrap();
        let result = verify_stripe_signature(None, payload, &header, 300, now());
        assert!(matches!(result, Err(ProviderError::InvalidSignature(_))));
    }

    #[test]
    fn stale_timestamp_is_rejected() {
        let payload = "{}";
        let signed_at = now().timestamp() - 301;
        let header = sign_payload(SECRET, payload, signed_at).unwrap();
        assert!(verify_stripe_signature(Some(SECRET), payload, &header, 300, now()).is_err());
    }

    #[test]
    fn malformed_headers_are_rejected() {
        for header in ["", "garbage", "t=123", "v1=abc", "t=abc,v1=def"] {
            assert!(
                verify_stripe_signature(Some(SECRET), "{}", header, 300, now()).is_err(),
                "header {header:?} should be rejected"
            );
        }
    }

    #[test]
    fn parses_checkout_completed() {
        let payload = json!({
            "id": "evt_1",
            "type": "checkout.session.completed",
            "created": 1_700_000_000,
            "data": {"object": {
                "id": "cs_test_1",
                "payment_status": "paid",
                "customer": "cus_1",
                "subscription": null
            }}
        })
        .to_string();

        let event = parse_stripe_event(&payload).unwrap();
        assert_eq!(event.id, "evt_1");
        assert_eq!(event.event_type, EventType::CheckoutCompleted);
        assert_eq!(event.created_at.timestamp(), 1_700_000_000);
        match event.payload {
            EventPayload::Checkout(checkout) => {
                assert_eq!(checkout.session_id, "cs_test_1");
                assert_eq!(checkout.payment_status, PaymentStatus::Paid);
                assert_eq!(checkout.customer_id.as_deref(), Some("cus_1"));
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn parses_subscription_metadata() {
        let account_id = AccountId::generate();
        let payload = json!({
            "id": "evt_2",
            "type": "customer.subscription.updated",
            "created": 1_700_000_000,
            "data": {"object": {
                "id": "sub_1",
                "status": "past_due",
                "metadata": {"account_id": account_id.to_string(), "tier": "enterprise"}
            }}
        })
        .to_string();

        let event = parse_stripe_event(&payload).unwrap();
        assert_eq!(event.event_type, EventType::SubscriptionUpdated);
        match event.payload {
            EventPayload::Subscription(sub) => {
                assert_eq!(sub.account_id, Some(account_id));
                assert_eq!(sub.tier, Some(Tier::Enterprise));
                assert_eq!(sub.status, SubscriptionStatus::PastDue);
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn unknown_event_types_are_kept() {
        let payload = json!({
            "id": "evt_3",
            "type": "invoice.finalized",
            "created": 1_700_000_000,
            "data": {"object": {"id": "in_1"}}
        })
        .to_string();

        let event = parse_stripe_event(&payload).unwrap();
        assert_eq!(event.event_type, EventType::Other("invoice.finalized".into()));
    }

    #[test]
    fn unreadable_envelope_is_an_error() {
        for payload in ["not json", r#"{"id": 42}"#, r#"{"type": "invoice.paid"}"#] {
            assert!(
                matches!(
                    parse_stripe_event(payload),
                    Err(ProviderError::MalformedEvent(_))
                ),
                "payload {payload:?} should be rejected"
            );
        }
        assert!(parse_stripe_event(r#"{"id":"","type":"invoice.paid"}"#).is_err());
    }

    #[test]
    fn undecodable_object_keeps_event_identity() {
        let event = parse_stripe_event(
            r#"{"id":"evt_4","type":"checkout.session.completed","created":1,"data":{"object":{}}}"#,
        )
        .unwrap();
        assert_eq!(event.id, "evt_4");
        assert_eq!(event.event_type, EventType::CheckoutCompleted);
        assert!(matches!(event.payload, EventPayload::Malformed { ref reason } if reason.starts_with("checkout session")));
    }

    #[test]
    fn subscription_without_status_is_malformed() {
        let payload = json!({
            "id": "evt_5",
            "type": "customer.subscription.updated",
            "created": 1_700_000_000,
            "data": {"object": {"id": "sub_1", "metadata": {}}}
        })
        .to_string();

        let event = parse_stripe_event(&payload).unwrap();
        assert_eq!(event.event_type, EventType::SubscriptionUpdated);
        assert!(matches!(event.payload, EventPayload::Malformed { .. }));
    }

    #[test]
    fn missing_created_is_malformed() {
        let event =
            parse_stripe_event(r#"{"id":"evt_6","type":"invoice.paid","data":{"object":{"id":"in_1"}}}"#)
                .unwrap();
        assert!(matches!(event.payload, EventPayload::Malformed { ref reason } if reason.contains("created")));
    }

    #[test]
    fn parses_renewal_invoice() {
        let account_id = AccountId::generate();
        let payload = json!({
            "id": "evt_7",
            "type": "invoice.payment_succeeded",
            "created": 1_700_000_000,
            "data": {"object": {
                "id": "in_1",
                "subscription": "sub_1",
                "billing_reason": "subscription_cycle",
                "subscription_details": {
                    "metadata": {"account_id": account_id.to_string(), "tier": "pro"}
                }
            }}
        })
        .to_string();

        let event = parse_stripe_event(&payload).unwrap();
        assert_eq!(event.event_type, EventType::InvoicePaid);
        match event.payload {
            EventPayload::Invoice(invoice) => {
                assert_eq!(invoice.invoice_id, "in_1");
                assert_eq!(invoice.subscription_id.as_deref(), Some("sub_1"));
                assert_eq!(invoice.billing_reason, BillingReason::SubscriptionCycle);
                assert_eq!(invoice.account_id, Some(account_id));
                assert_eq!(invoice.tier, Some(Tier::Pro));
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn subscription_statuses() {
        assert_eq!(map_subscription_status("trialing"), SubscriptionStatus::Active);
        assert_eq!(map_subscription_status("unpaid"), SubscriptionStatus::PastDue);
        assert_eq!(
            map_subscription_status("incomplete_expired"),
            SubscriptionStatus::Canceled
        );
        assert_eq!(map_subscription_status("mystery"), SubscriptionStatus::PastDue);
    }

    #[test]
    fn subscription_sessions_carry_tier_metadata() {
        let request = SessionRequest {
            account_id: AccountId::generate(),
            product: credits_core::Catalog::default().resolve("pro").unwrap(),
            success_url: "https://app.example.com/ok".into(),
            cancel_url: "https://app.example.com/cancel".into(),
        };
        let params = session_params(&request);
        let get = |key: &str| {
            params
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(get("mode"), Some("subscription"));
        assert_eq!(get("subscription_data[metadata][tier]"), Some("pro"));
        assert_eq!(get("line_items[0][price_data][unit_amount]"), Some("4900"));
        assert_eq!(get("metadata[product_id]"), Some("pro"));
    }
}
