//! API handlers.

pub mod accounts;
pub mod anomalies;
pub mod checkout;
pub mod credits;
pub mod entitlements;
pub mod health;
pub mod pricing;
pub mod reports;
pub mod webhooks;

use credits_core::{Account, AccountId};

use crate::error::ApiError;
use crate::state::AppState;

/// Parse an account ID from a path segment.
pub(crate) fn parse_account_id(raw: &str) -> Result<AccountId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("Invalid account_id: {raw}")))
}

/// Load an account or fail with 404.
pub(crate) fn load_account(state: &AppState, account_id: &AccountId) -> Result<Account, ApiError> {
    state
        .store
        .get_account(account_id)?
        .ok_or_else(|| ApiError::NotFound(format!("Account not found: {account_id}")))
}
