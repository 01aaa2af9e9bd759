//! Request and response types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use credits_core::{AccountId, ReportType, SessionStatus};

/// Request to open a checkout session.
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutRequest {
    /// Account receiving the purchase.
    pub account_id: AccountId,
    /// Credit pack SKU or plan product ID.
    pub product_id: String,
    /// Redirect after payment. The service default is used when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success_url: Option<String>,
    /// Redirect after cancelling. The service default is used when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_url: Option<String>,
}

impl CheckoutRequest {
    /// Request with default redirects.
    #[must_use]
    pub fn new(account_id: AccountId, product_id: impl Into<String>) -> Self {
        Self {
            account_id,
            product_id: product_id.into(),
            success_url: None,
            cancel_url: None,
        }
    }

    /// Set explicit redirect URLs.
    #[must_use]
    pub fn with_redirects(
        mut self,
        success_url: impl Into<String>,
        cancel_url: impl Into<String>,
    ) -> Self {
        self.success_url = Some(success_url.into());
        self.cancel_url = Some(cancel_url.into());
        self
    }
}

/// An opened checkout session.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutResponse {
    /// Provider session handle.
    pub session_id: String,
    /// Hosted checkout page to redirect the customer to.
    pub checkout_url: String,
    /// When the provider stops accepting payment.
    pub expires_at: DateTime<Utc>,
}

/// Server-side state of a checkout session.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSessionStatus {
    /// Provider session handle.
    pub session_id: String,
    /// Account the purchase is for.
    pub account_id: String,
    /// Product purchased.
    pub product_id: String,
    /// Session status.
    pub status: SessionStatus,
    /// Credits the purchase grants.
    pub credits: i64,
    /// When the session was opened.
    pub created_at: DateTime<Utc>,
    /// When the provider stops accepting payment.
    pub expires_at: DateTime<Utc>,
    /// When fulfilment was applied.
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Whether a pending session is past its expiry.
    #[serde(default)]
    pub past_expiry: bool,
}

impl CheckoutSessionStatus {
    /// Whether the purchase has been applied to the account.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status == SessionStatus::Completed
    }
}

/// Balance response.
#[derive(Debug, Clone, Deserialize)]
pub struct BalanceResponse {
    /// Account ID.
    pub account_id: String,
    /// Balance in credits.
    pub balance: i64,
    /// Subscription tier.
    pub tier: String,
    /// Subscription status.
    pub subscription_status: String,
    /// Whether a paid subscription is active.
    pub has_active_subscription: bool,
}

/// Report access check response.
#[derive(Debug, Clone, Deserialize)]
pub struct ReportAccessResponse {
    /// Report type checked.
    pub report_type: ReportType,
    /// Whether the account can pay for the report now.
    pub can_generate: bool,
    /// Whether the account has any credits.
    pub has_credits: bool,
    /// Current balance.
    pub credits_available: i64,
    /// Cost of the report.
    pub credits_needed: i64,
    /// Subscription tier.
    pub tier: String,
    /// Whether the customer should be sent to checkout.
    pub upgrade_required: bool,
}

/// Request to debit a report.
#[derive(Debug, Clone, Serialize)]
pub struct ConsumeReportRequest {
    /// Report type.
    pub report_type: ReportType,
    /// Report run identifier.
    pub report_id: String,
}

/// Report debit response.
#[derive(Debug, Clone, Deserialize)]
pub struct ConsumeReportResponse {
    /// Transaction ID.
    pub transaction_id: String,
    /// Credits debited.
    pub credits_consumed: i64,
    /// Balance right after the debit.
    pub credits_remaining: i64,
    /// Whether this report ID had already been charged by an earlier call.
    #[serde(default)]
    pub replayed: bool,
}

/// A credit pack on sale.
#[derive(Debug, Clone, Deserialize)]
pub struct CreditPackInfo {
    /// Product identifier.
    pub product_id: String,
    /// Display name.
    pub name: String,
    /// Credits granted.
    pub credits: i64,
    /// Price in cents.
    pub price_cents: i64,
    /// Price formatted as dollars.
    pub price_formatted: String,
}

/// A subscription plan on sale.
#[derive(Debug, Clone, Deserialize)]
pub struct PlanInfo {
    /// Product identifier.
    pub product_id: String,
    /// Tier name.
    pub tier: String,
    /// Display name.
    pub name: String,
    /// Monthly price in cents.
    pub price_cents: i64,
    /// Monthly price formatted as dollars.
    pub price_formatted: String,
    /// Credits granted on activation and each renewal.
    pub monthly_credits: i64,
    /// Whether subscribers may publish reports.
    #[serde(default)]
    pub can_publish: bool,
}

/// Catalog and report costs.
#[derive(Debug, Clone, Deserialize)]
pub struct PricingResponse {
    /// Subscription plans.
    pub plans: Vec<PlanInfo>,
    /// Credit packs.
    pub credit_packs: Vec<CreditPackInfo>,
    /// Credits per report type (wire name to cost).
    pub report_costs: BTreeMap<String, i64>,
}

/// Subscription part of [`EntitlementsResponse`].
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionInfo {
    /// Whether a paid subscription is active.
    pub active: bool,
    /// Provider-reported status.
    pub status: String,
    /// Provider subscription handle.
    #[serde(default)]
    pub subscription_id: Option<String>,
}

/// What an account may do right now.
#[derive(Debug, Clone, Deserialize)]
pub struct EntitlementsResponse {
    /// Account ID.
    pub account_id: String,
    /// Subscription tier.
    pub tier: String,
    /// Plan in force.
    pub plan_name: String,
    /// Spendable credits.
    pub credits: i64,
    /// Whether reports may be published.
    pub can_publish: bool,
    /// Reports paid for this calendar month.
    pub reports_generated_this_month: u64,
    /// Subscription state.
    pub subscription: SubscriptionInfo,
}

/// API error response.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorResponse {
    /// Error details.
    pub error: ApiErrorDetail,
}

/// API error detail.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorDetail {
    /// Error code.
    pub code: String,
    /// Error message.
    pub message: String,
    /// Additional details.
    #[serde(default)]
    pub details: Option<serde_json::Value>,
}
