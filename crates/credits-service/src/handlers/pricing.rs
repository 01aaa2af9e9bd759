//! Pricing handler.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use credits_core::{CreditPack, FreePlan, ReportType, SubscriptionPlan};

use crate::state::AppState;

/// Credit pack entry.
#[derive(Debug, Serialize)]
pub struct CreditPackResponse {
    /// Product identifier for checkout.
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

impl From<&CreditPack> for CreditPackResponse {
    fn from(pack: &CreditPack) -> Self {
        Self {
            product_id: pack.sku.clone(),
            name: pack.name.clone(),
            credits: pack.credits,
            price_cents: pack.price_cents,
            price_formatted: format_cents(pack.price_cents),
        }
    }
}

/// Subscription plan entry.
#[derive(Debug, Serialize)]
pub struct PlanResponse {
    /// Product identifier for checkout.
    pub product_id: String,
    /// Tier the plan activates.
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
    pub can_publish: bool,
}

impl From<&SubscriptionPlan> for PlanResponse {
    fn from(plan: &SubscriptionPlan) -> Self {
        Self {
            product_id: plan.product_id.clone(),
            tier: plan.tier.as_str().to_string(),
            name: plan.name.clone(),
            price_cents: plan.price_cents,
            price_formatted: format_cents(plan.price_cents),
            monthly_credits: plan.monthly_credits,
            can_publish: plan.can_publish,
        }
    }
}

/// What an account gets without a subscription.
#[derive(Debug, Serialize)]
pub struct FreePlanResponse {
    /// Display name.
    pub name: String,
    /// Credits granted at registration.
    pub signup_credits: i64,
    /// Whether free accounts may publish reports.
    pub can_publish: bool,
}

impl From<&FreePlan> for FreePlanResponse {
    fn from(plan: &FreePlan) -> Self {
        Self {
            name: plan.name.clone(),
            signup_credits: plan.signup_credits,
            can_publish: plan.can_publish,
        }
    }
}

/// Pricing response.
#[derive(Debug, Serialize)]
pub struct PricingResponse {
    /// Allowance without a subscription.
    pub free_plan: FreePlanResponse,
    /// Subscription plans.
    pub plans: Vec<PlanResponse>,
    /// One-time credit packs.
    pub credit_packs: Vec<CreditPackResponse>,
    /// Credits charged per report type.
    pub report_costs: BTreeMap<&'static str, i64>,
}

/// Get the product catalog and report costs.
pub async fn get_pricing(State(state): State<Arc<AppState>>) -> Json<PricingResponse> {
    let catalog = &state.config.catalog;

    Json(PricingResponse {
        free_plan: FreePlanResponse::from(&catalog.free_plan),
        plans: catalog.plans.iter().map(PlanResponse::from).collect(),
        credit_packs: catalog
            .credit_packs
            .iter()
            .map(CreditPackResponse::from)
            .collect(),
        report_costs: ReportType::ALL
            .iter()
            .map(|report| (report.as_str(), report.cost()))
            .collect(),
    })
}

/// Format cents as dollars (e.g. `$19.00`).
pub(crate) fn format_cents(cents: i64) -> String {
    format!("${}.{:02}", cents / 100, (cents % 100).abs())
}
