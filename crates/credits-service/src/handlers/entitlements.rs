//! Entitlement and usage views over an account.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use credits_core::{Account, AccountId, Catalog, CreditTransaction, TransactionType, UsageStats};

use super::credits::TransactionResponse;
use super::{load_account, parse_account_id};
use crate::error::ApiError;
use crate::state::AppState;

/// Page size used when walking an account's full history.
const HISTORY_PAGE: usize = 500;

/// Report usage entries returned in `recent_usage`.
const RECENT_USAGE_LIMIT: usize = 10;

/// Subscription part of the entitlements view.
#[derive(Debug, Serialize)]
pub struct SubscriptionView {
    /// Whether a paid subscription is active.
    pub active: bool,
    /// Provider-reported status.
    pub status: String,
    /// Provider subscription handle, if any.
    pub subscription_id: Option<String>,
}

/// What an account is allowed to do right now.
#[derive(Debug, Serialize)]
pub struct EntitlementsResponse {
    /// Account ID.
    pub account_id: String,
    /// Subscription tier.
    pub tier: String,
    /// Display name of the plan in force.
    pub plan_name: String,
    /// Spendable credits.
    pub credits: i64,
    /// Whether reports may be published.
    pub can_publish: bool,
    /// Reports paid for in the current calendar month.
    pub reports_generated_this_month: u64,
    /// Subscription state.
    pub subscription: SubscriptionView,
}

/// Get the account's entitlements.
pub async fn get_entitlements(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<String>,
) -> Result<Json<EntitlementsResponse>, ApiError> {
    let account_id = parse_account_id(&account_id)?;
    let account = load_account(&state, &account_id)?;
    let history = full_history(&state, &account_id)?;
    let usage = UsageStats::from_transactions(&history, Utc::now());

    Ok(Json(entitlements(&state.config.catalog, &account, &usage)))
}

fn entitlements(catalog: &Catalog, account: &Account, usage: &UsageStats) -> EntitlementsResponse {
    // A lapsed or past-due tier keeps its name but not its features.
    let active = account.has_active_subscription();
    let can_publish = if active {
        catalog.can_publish(account.tier)
    } else {
        catalog.free_plan.can_publish
    };
    let plan_name = if active {
        catalog.plan_name(account.tier)
    } else {
        catalog.free_plan.name.as_str()
    };

    EntitlementsResponse {
        account_id: account.account_id.to_string(),
        tier: account.tier.as_str().to_string(),
        plan_name: plan_name.to_string(),
        credits: account.balance,
        can_publish,
        reports_generated_this_month: usage.reports_generated_this_month,
        subscription: SubscriptionView {
            active,
            status: account.subscription_status.as_str().to_string(),
            subscription_id: account.provider_subscription_id.clone(),
        },
    }
}

/// Report usage statistics.
#[derive(Debug, Serialize)]
pub struct UsageResponse {
    /// Account ID.
    pub account_id: String,
    /// Spendable credits.
    pub credits_available: i64,
    /// Reports paid for.
    pub total_reports_generated: u64,
    /// Credits spent on reports.
    pub total_credits_consumed: i64,
    /// Reports paid for in the current calendar month.
    pub reports_generated_this_month: u64,
    /// Reports paid for, by report type.
    pub report_breakdown: BTreeMap<String, u64>,
    /// Latest report debits, newest first.
    pub recent_usage: Vec<TransactionResponse>,
}

/// Get report usage statistics for an account.
pub async fn get_usage(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<String>,
) -> Result<Json<UsageResponse>, ApiError> {
    let account_id = parse_account_id(&account_id)?;
    let account = load_account(&state, &account_id)?;
    let history = full_history(&state, &account_id)?;
    let usage = UsageStats::from_transactions(&history, Utc::now());

    let recent_usage = history
        .iter()
        .filter(|tx| tx.transaction_type == TransactionType::ReportUsage)
        .take(RECENT_USAGE_LIMIT)
        .map(TransactionResponse::from)
        .collect();

    Ok(Json(UsageResponse {
        account_id: account.account_id.to_string(),
        credits_available: account.balance,
        total_reports_generated: usage.total_reports_generated,
        total_credits_consumed: usage.total_credits_consumed,
        reports_generated_this_month: usage.reports_generated_this_month,
        report_breakdown: usage.report_breakdown,
        recent_usage,
    }))
}

/// All transactions of an account, newest first.
fn full_history(
    state: &AppState,
    account_id: &AccountId,
) -> Result<Vec<CreditTransaction>, ApiError> {
    let mut history = Vec::new();
    loop {
        let page = state
            .store
            .list_transactions_by_account(account_id, HISTORY_PAGE, history.len())?;
        let done = page.len() < HISTORY_PAGE;
        history.extend(page);
        if done {
            return Ok(history);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use credits_core::{SubscriptionStatus, Tier};

    #[test]
    fn active_pro_subscriber_may_publish() {
        let mut account = Account::new(AccountId::generate());
        account.set_subscription(Some(Tier::Pro), SubscriptionStatus::Active);

        let view = entitlements(&Catalog::default(), &account, &UsageStats::default());

        assert!(view.can_publish);
        assert!(view.subscription.active);
        assert_eq!(view.tier, "pro");
        assert_ne!(view.plan_name, Catalog::default().free_plan.name);
    }

    #[test]
    fn past_due_subscriber_falls_back_to_free_features() {
        let mut account = Account::new(AccountId::generate());
        account.set_subscription(Some(Tier::Pro), SubscriptionStatus::PastDue);

        let view = entitlements(&Catalog::default(), &account, &UsageStats::default());

        assert!(!view.can_publish);
        assert!(!view.subscription.active);
        assert_eq!(view.plan_name, "Free");
        assert_eq!(view.subscription.status, "past_due");
    }
}
