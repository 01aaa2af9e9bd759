//! Credits HTTP client implementation.

use reqwest::{Client, RequestBuilder};
use std::time::Duration;

use credits_core::{AccountId, ReportType};

use crate::error::ClientError;
use crate::types::{
    ApiErrorResponse, BalanceResponse, CheckoutRequest, CheckoutResponse, CheckoutSessionStatus,
    ConsumeReportRequest, ConsumeReportResponse, EntitlementsResponse, PricingResponse,
    ReportAccessResponse,
};

/// Credits API client.
///
/// Used by the report dispatcher to gate and pay for reports, and by UI backends
/// to open checkout sessions and poll their outcome.
#[derive(Debug, Clone)]
pub struct CreditsClient {
    client: Client,
    base_url: String,
    api_key: String,
    service_name: String,
}

impl CreditsClient {
    /// Create a new credits client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Base URL of the credits service (e.g., `"http://credits:8080"`)
    /// * `api_key` - Service API key for authentication
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Configuration` if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, ClientError> {
        Self::with_options(base_url, api_key, ClientOptions::default())
    }

    /// Create a new credits client with custom options.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Configuration` if the HTTP client cannot be built.
    pub fn with_options(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        options: ClientOptions,
    ) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(options.timeout_seconds))
            .build()
            .map_err(|e| ClientError::Configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            service_name: options.service_name,
        })
    }

    /// Fetch the product catalog and report costs.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn pricing(&self) -> Result<PricingResponse, ClientError> {
        let url = format!("{}/v1/pricing", self.base_url);
        let response = self.client.get(&url).send().await?;
        self.handle_response(response).await
    }

    /// Open a checkout session.
    ///
    /// # Errors
    ///
    /// - `ClientError::InvalidProduct` if the product is not in the catalog.
    /// - `ClientError::UpstreamUnavailable` if the payment provider did not answer.
    /// - `ClientError::NotFound` if the account does not exist.
    pub async fn create_checkout(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutResponse, ClientError> {
        let url = format!("{}/v1/checkout", self.base_url);
        let response = self.authed(self.client.post(&url)).json(request).send().await?;
        self.handle_response(response).await
    }

    /// Fetch the state of a checkout session.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn get_checkout_session(
        &self,
        session_id: &str,
    ) -> Result<CheckoutSessionStatus, ClientError> {
        let url = format!("{}/v1/checkout/{session_id}", self.base_url);
        let response = self.authed(self.client.get(&url)).send().await?;
        self.handle_response(response).await
    }

    /// Get an account's balance and subscription state.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn get_balance(&self, account_id: &AccountId) -> Result<BalanceResponse, ClientError> {
        let url = format!("{}/v1/accounts/{account_id}/balance", self.base_url);
        let response = self.authed(self.client.get(&url)).send().await?;
        self.handle_response(response).await
    }

    /// Get an account's plan features and subscription state.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn get_entitlements(
        &self,
        account_id: &AccountId,
    ) -> Result<EntitlementsResponse, ClientError> {
        let url = format!("{}/v1/accounts/{account_id}/entitlements", self.base_url);
        let response = self.authed(self.client.get(&url)).send().await?;
        self.handle_response(response).await
    }

    /// Check whether an account can pay for a report.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn check_report_access(
        &self,
        account_id: &AccountId,
        report_type: ReportType,
    ) -> Result<ReportAccessResponse, ClientError> {
        let url = format!(
            "{}/v1/accounts/{account_id}/reports/{}/access",
            self.base_url,
            report_type.as_str()
        );
        let response = self.authed(self.client.get(&url)).send().await?;
        self.handle_response(response).await
    }

    /// Debit the cost of a report. Retrying with the same `report_id` returns the
    /// original debit instead of charging again.
    ///
    /// # Errors
    ///
    /// - `ClientError::InsufficientCredits` if the balance does not cover the report.
    /// - `ClientError::NotFound` if the account does not exist.
    pub async fn consume_report(
        &self,
        account_id: &AccountId,
        report_type: ReportType,
        report_id: impl Into<String>,
    ) -> Result<ConsumeReportResponse, ClientError> {
        let url = format!(
            "{}/v1/accounts/{account_id}/reports/consume",
            self.base_url
        );
        let request = ConsumeReportRequest {
            report_type,
            report_id: report_id.into(),
        };

        let response = self
            .authed(self.client.post(&url))
            .json(&request)
            .send()
            .await?;

        let consumed: ConsumeReportResponse = self.handle_response(response).await?;
        tracing::debug!(
            account_id = %account_id,
            report_type = %report_type,
            credits_remaining = consumed.credits_remaining,
            replayed = consumed.replayed,
            "Report credits consumed"
        );
        Ok(consumed)
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("x-api-key", &self.api_key)
            .header("x-service-name", &self.service_name)
    }

    /// Handle API response and convert errors.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, ClientError> {
        let status = response.status();

        if status.is_success() {
            return Ok(response.json().await?);
        }

        let error_body: Result<ApiErrorResponse, _> = response.json().await;

        match error_body {
            Ok(api_error) => {
                let detail = api_error.error;
                let number = |key: &str| {
                    detail
                        .details
                        .as_ref()
                        .and_then(|d| d.get(key))
                        .and_then(serde_json::Value::as_i64)
                        .unwrap_or(0)
                };

                match detail.code.as_str() {
                    "insufficient_credits" => Err(ClientError::InsufficientCredits {
                        balance: number("balance"),
                        required: number("required"),
                    }),
                    "invalid_product" => Err(ClientError::InvalidProduct {
                        product_id: detail
                            .details
                            .as_ref()
                            .and_then(|d| d.get("product_id"))
                            .and_then(serde_json::Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                    }),
                    "upstream_unavailable" => Err(ClientError::UpstreamUnavailable(detail.message)),
                    "not_found" => Err(ClientError::NotFound(detail.message)),
                    code => Err(ClientError::Api {
                        code: code.to_string(),
                        message: detail.message,
                        status: status.as_u16(),
                    }),
                }
            }
            Err(_) => Err(ClientError::Api {
                code: "unknown".to_string(),
                message: format!("HTTP {status}"),
                status: status.as_u16(),
            }),
        }
    }
}

/// Client options for customization.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Request timeout in seconds (default: 30).
    pub timeout_seconds: u64,
    /// Service name to include in requests.
    pub service_name: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            service_name: "unknown".to_string(),
        }
    }
}

impl ClientOptions {
    /// Create options with a service name.
    #[must_use]
    pub fn with_service_name(name: impl Into<String>) -> Self {
        Self {
            service_name: name.into(),
            ..Self::default()
        }
    }
}
