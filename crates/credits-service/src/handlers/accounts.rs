//! Account management handlers.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use credits_core::{Account, AccountId, LedgerEntry};

use super::{load_account, parse_account_id};
use crate::auth::ServiceAuth;
use crate::error::ApiError;
use crate::state::AppState;

/// Account response.
#[derive(Debug, Serialize)]
pub struct AccountResponse {
    /// Account ID.
    pub account_id: String,
    /// Current balance in credits.
    pub balance: i64,
    /// Lifetime credits purchased.
    pub lifetime_purchased: i64,
    /// Lifetime credits granted by subscriptions.
    pub lifetime_granted: i64,
    /// Lifetime credits used.
    pub lifetime_used: i64,
    /// Subscription tier.
    pub tier: String,
    /// Subscription status.
    pub subscription_status: String,
    /// Whether a paid subscription is active.
    pub has_active_subscription: bool,
    /// Created timestamp.
    pub created_at: String,
}

impl From<&Account> for AccountResponse {
    fn from(account: &Account) -> Self {
        Self {
            account_id: account.account_id.to_string(),
            balance: account.balance,
            lifetime_purchased: account.lifetime_purchased,
            lifetime_granted: account.lifetime_granted,
            lifetime_used: account.lifetime_used,
            tier: account.tier.as_str().to_string(),
            subscription_status: account.subscription_status.as_str().to_string(),
            has_active_subscription: account.has_active_subscription(),
            created_at: account.created_at.to_rfc3339(),
        }
    }
}

/// Create account request.
#[derive(Debug, Deserialize)]
pub struct CreateAccountRequest {
    /// Identifier assigned by the signup system. Generated when absent.
    #[serde(default)]
    pub account_id: Option<AccountId>,
}

/// Register a new account on the free plan, with its signup allowance.
pub async fn create_account(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    Json(body): Json<CreateAccountRequest>,
) -> Result<(StatusCode, Json<AccountResponse>), ApiError> {
    let account = Account::new(body.account_id.unwrap_or_else(AccountId::generate));
    let free_plan = &state.config.catalog.free_plan;

    let account = if free_plan.signup_credits > 0 {
        let entry = LedgerEntry::free_grant(free_plan.signup_credits, &free_plan.name);
        let (account, tx) = state.store.create_account_with_grant(&account, &entry)?;
        tracing::debug!(
            account_id = %account.account_id,
            transaction_id = %tx.id,
            credits = %tx.amount,
            "Signup credits granted"
        );
        account
    } else {
        state.store.create_account(&account)?;
        account
    };

    tracing::info!(
        account_id = %account.account_id,
        balance = %account.balance,
        service = %auth.service_name,
        "Account registered"
    );

    Ok((StatusCode::CREATED, Json(AccountResponse::from(&account))))
}

/// Get an account summary.
pub async fn get_account(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<String>,
) -> Result<Json<AccountResponse>, ApiError> {
    let account_id = parse_account_id(&account_id)?;
    let account = load_account(&state, &account_id)?;
    Ok(Json(AccountResponse::from(&account)))
}
