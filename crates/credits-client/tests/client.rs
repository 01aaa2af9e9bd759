//! Client behavior against a mocked credits service.

use credits_client::{CheckoutRequest, ClientError, ClientOptions, CreditsClient};
use credits_core::{AccountId, ReportType, SessionStatus};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> CreditsClient {
    CreditsClient::with_options(
        server.uri(),
        "svc-key",
        ClientOptions::with_service_name("report-dispatcher"),
    )
    .unwrap()
}

fn error_body(code: &str, message: &str, details: serde_json::Value) -> serde_json::Value {
    json!({ "error": { "code": code, "message": message, "details": details } })
}

#[tokio::test]
async fn consume_report_sends_service_headers() {
    let server = MockServer::start().await;
    let account_id = AccountId::generate();

    Mock::given(method("POST"))
        .and(path(format!("/v1/accounts/{account_id}/reports/consume")))
        .and(header("x-api-key", "svc-key"))
        .and(header("x-service-name", "report-dispatcher"))
        .and(body_json(json!({
            "report_type": "SPEND_BASELINE",
            "report_id": "run-42"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "transaction_id": "01J9Z8Y7X6W5V4T3S2R1Q0P9N8",
            "credits_consumed": 2,
            "credits_remaining": 8
        })))
        .expect(1)
        .mount(&server)
        .await;

    let consumed = client(&server)
        .consume_report(&account_id, ReportType::SpendBaseline, "run-42")
        .await
        .unwrap();

    assert_eq!(consumed.credits_consumed, 2);
    assert_eq!(consumed.credits_remaining, 8);
    assert!(!consumed.replayed);
}

#[tokio::test]
async fn replayed_consumption_is_reported() {
    let server = MockServer::start().await;
    let account_id = AccountId::generate();

    Mock::given(method("POST"))
        .and(path(format!("/v1/accounts/{account_id}/reports/consume")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "transaction_id": "01J9Z8Y7X6W5V4T3S2R1Q0P9N8",
            "credits_consumed": 2,
            "credits_remaining": 8,
            "replayed": true
        })))
        .mount(&server)
        .await;

    let consumed = client(&server)
        .consume_report(&account_id, ReportType::SpendBaseline, "run-42")
        .await
        .unwrap();

    assert!(consumed.replayed);
}

#[tokio::test]
async fn entitlements_are_decoded() {
    let server = MockServer::start().await;
    let account_id = AccountId::generate();

    Mock::given(method("GET"))
        .and(path(format!("/v1/accounts/{account_id}/entitlements")))
        .and(header("x-api-key", "svc-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "account_id": account_id.to_string(),
            "tier": "pro",
            "plan_name": "Pro Plan",
            "credits": 17,
            "can_publish": true,
            "reports_generated_this_month": 4,
            "subscription": {"active": true, "status": "active", "subscription_id": "sub_1"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let entitlements = client(&server).get_entitlements(&account_id).await.unwrap();

    assert!(entitlements.can_publish);
    assert_eq!(entitlements.credits, 17);
    assert_eq!(entitlements.reports_generated_this_month, 4);
    assert_eq!(entitlements.subscription.subscription_id.as_deref(), Some("sub_1"));
}

#[tokio::test]
async fn insufficient_credits_is_typed() {
    let server = MockServer::start().await;
    let account_id = AccountId::generate();

    Mock::given(method("POST"))
        .and(path(format!("/v1/accounts/{account_id}/reports/consume")))
        .respond_with(ResponseTemplate::new(402).set_body_json(error_body(
            "insufficient_credits",
            "Insufficient credits",
            json!({ "balance": 1, "required": 3 }),
        )))
        .mount(&server)
        .await;

    let result = client(&server)
        .consume_report(&account_id, ReportType::CompetitorSnapshot, "run-1")
        .await;

    assert!(matches!(
        result,
        Err(ClientError::InsufficientCredits {
            balance: 1,
            required: 3
        })
    ));
}

#[tokio::test]
async fn report_access_uses_wire_name_in_path() {
    let server = MockServer::start().await;
    let account_id = AccountId::generate();

    Mock::given(method("GET"))
        .and(path(format!(
            "/v1/accounts/{account_id}/reports/TRACKING_READINESS/access"
        )))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "report_type": "TRACKING_READINESS",
            "can_generate": false,
            "has_credits": false,
            "credits_available": 0,
            "credits_needed": 1,
            "tier": "none",
            "upgrade_required": true
        })))
        .mount(&server)
        .await;

    let access = client(&server)
        .check_report_access(&account_id, ReportType::TrackingReadiness)
        .await
        .unwrap();

    assert_eq!(access.report_type, ReportType::TrackingReadiness);
    assert!(access.upgrade_required);
    assert!(!access.can_generate);
}

#[tokio::test]
async fn create_checkout_omits_default_redirects() {
    let server = MockServer::start().await;
    let account_id = AccountId::generate();

    Mock::given(method("POST"))
        .and(path("/v1/checkout"))
        .and(body_json(json!({
            "account_id": account_id.to_string(),
            "product_id": "credits_10"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "session_id": "cs_test_abc",
            "checkout_url": "https://checkout.example.test/pay/cs_test_abc",
            "expires_at": "2026-10-20T12:00:00Z"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let checkout = client(&server)
        .create_checkout(&CheckoutRequest::new(account_id, "credits_10"))
        .await
        .unwrap();

    assert_eq!(checkout.session_id, "cs_test_abc");
    assert!(checkout.checkout_url.ends_with("cs_test_abc"));
}

#[tokio::test]
async fn invalid_product_is_typed() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/checkout"))
        .respond_with(ResponseTemplate::new(400).set_body_json(error_body(
            "invalid_product",
            "Unknown product",
            json!({ "product_id": "credits_1000" }),
        )))
        .mount(&server)
        .await;

    let result = client(&server)
        .create_checkout(&CheckoutRequest::new(AccountId::generate(), "credits_1000"))
        .await;

    assert!(matches!(
        result,
        Err(ClientError::InvalidProduct { product_id }) if product_id == "credits_1000"
    ));
}

#[tokio::test]
async fn provider_outage_is_retryable() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/checkout"))
        .respond_with(ResponseTemplate::new(503).set_body_json(error_body(
            "upstream_unavailable",
            "Payment provider unavailable",
            serde_json::Value::Null,
        )))
        .mount(&server)
        .await;

    let result = client(&server)
        .create_checkout(&CheckoutRequest::new(AccountId::generate(), "pro"))
        .await;

    assert!(matches!(result, Err(ClientError::UpstreamUnavailable(_))));
}

#[tokio::test]
async fn checkout_session_status_parses() {
    let server = MockServer::start().await;
    let account_id = AccountId::generate();

    Mock::given(method("GET"))
        .and(path("/v1/checkout/cs_test_abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "session_id": "cs_test_abc",
            "account_id": account_id.to_string(),
            "product_id": "credits_25",
            "status": "completed",
            "credits": 25,
            "created_at": "2026-10-19T12:00:00Z",
            "expires_at": "2026-10-20T12:00:00Z",
            "completed_at": "2026-10-19T12:03:00Z",
            "past_expiry": false
        })))
        .mount(&server)
        .await;

    let status = client(&server)
        .get_checkout_session("cs_test_abc")
        .await
        .unwrap();

    assert_eq!(status.status, SessionStatus::Completed);
    assert!(status.is_completed());
    assert_eq!(status.credits, 25);
    assert!(status.completed_at.is_some());
}

#[tokio::test]
async fn unknown_account_maps_to_not_found() {
    let server = MockServer::start().await;
    let account_id = AccountId::generate();

    Mock::given(method("GET"))
        .and(path(format!("/v1/accounts/{account_id}/balance")))
        .respond_with(ResponseTemplate::new(404).set_body_json(error_body(
            "not_found",
            "Account not found",
            serde_json::Value::Null,
        )))
        .mount(&server)
        .await;

    let result = client(&server).get_balance(&account_id).await;

    assert!(matches!(result, Err(ClientError::NotFound(_))));
}

#[tokio::test]
async fn non_json_error_keeps_status() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/pricing"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;

    let result = client(&server).pricing().await;

    assert!(matches!(
        result,
        Err(ClientError::Api { status: 502, ref code, .. }) if code == "unknown"
    ));
}

#[tokio::test]
async fn pricing_parses_catalog() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/pricing"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "plans": [{
                "product_id": "pro",
                "tier": "pro",
                "name": "Pro",
                "price_cents": 4900,
                "price_formatted": "$49.00",
                "monthly_credits": 30
            }],
            "credit_packs": [{
                "product_id": "credits_10",
                "name": "10 credits",
                "credits": 10,
                "price_cents": 1900,
                "price_formatted": "$19.00"
            }],
            "report_costs": { "SPEND_BASELINE": 2, "TRACKING_READINESS": 1 }
        })))
        .mount(&server)
        .await;

    let pricing = client(&server).pricing().await.unwrap();

    assert_eq!(pricing.plans.len(), 1);
    assert_eq!(pricing.credit_packs[0].credits, 10);
    assert_eq!(pricing.report_costs["SPEND_BASELINE"], 2);
}
