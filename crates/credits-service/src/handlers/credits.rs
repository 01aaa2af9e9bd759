//! Credit balance, transaction history and manual debit handlers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use credits_core::{CreditTransaction, LedgerEntry};

use super::{load_account, parse_account_id};
use crate::auth::ServiceAuth;
use crate::error::ApiError;
use crate::state::AppState;

/// Balance response.
#[derive(Debug, Serialize)]
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

/// Get current credit balance and subscription state.
pub async fn get_balance(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<String>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let account_id = parse_account_id(&account_id)?;
    let account = load_account(&state, &account_id)?;

    Ok(Json(BalanceResponse {
        account_id: account.account_id.to_string(),
        balance: account.balance,
        tier: account.tier.as_str().to_string(),
        subscription_status: account.subscription_status.as_str().to_string(),
        has_active_subscription: account.has_active_subscription(),
    }))
}

/// Transaction list query parameters.
#[derive(Debug, Deserialize)]
pub struct ListTransactionsQuery {
    /// Maximum number of transactions to return (default: 50).
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Offset for pagination (default: 0).
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    50
}

/// Transaction response.
#[derive(Debug, Serialize)]
pub struct TransactionResponse {
    /// Transaction ID.
    pub id: String,
    /// Amount in credits (positive = credit, negative = debit).
    pub amount: i64,
    /// Transaction type.
    pub transaction_type: String,
    /// Balance after this transaction.
    pub balance_after: i64,
    /// Description.
    pub description: String,
    /// Metadata.
    pub metadata: serde_json::Value,
    /// Timestamp.
    pub created_at: String,
}

impl From<&CreditTransaction> for TransactionResponse {
    fn from(tx: &CreditTransaction) -> Self {
        Self {
            id: tx.id.to_string(),
            amount: tx.amount,
            transaction_type: tx.transaction_type.as_str().to_string(),
            balance_after: tx.balance_after,
            description: tx.description.clone(),
            metadata: tx.metadata.clone(),
            created_at: tx.created_at.to_rfc3339(),
        }
    }
}

/// List transactions response.
#[derive(Debug, Serialize)]
pub struct ListTransactionsResponse {
    /// Transactions (newest first).
    pub transactions: Vec<TransactionResponse>,
    /// Whether there are more transactions.
    pub has_more: bool,
}

/// List transaction history.
pub async fn list_transactions(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<String>,
    Query(query): Query<ListTransactionsQuery>,
) -> Result<Json<ListTransactionsResponse>, ApiError> {
    let account_id = parse_account_id(&account_id)?;
    load_account(&state, &account_id)?;

    // Fetch one more than requested to determine has_more
    let limit = query.limit.min(100);
    let transactions =
        state
            .store
            .list_transactions_by_account(&account_id, limit + 1, query.offset)?;

    let has_more = transactions.len() > limit;
    let transactions: Vec<_> = transactions
        .iter()
        .take(limit)
        .map(TransactionResponse::from)
        .collect();

    Ok(Json(ListTransactionsResponse {
        transactions,
        has_more,
    }))
}

/// Manual debit request.
#[derive(Debug, Deserialize)]
pub struct DebitRequest {
    /// Credits to remove. Must be positive.
    pub amount: i64,
    /// Reason recorded on the transaction.
    pub reason: String,
}

/// Debit response.
#[derive(Debug, Serialize)]
pub struct DebitResponse {
    /// Transaction ID.
    pub transaction_id: String,
    /// Credits removed.
    pub amount: i64,
    /// Balance after the debit.
    pub balance: i64,
}

/// Debit credits from an account (service API key).
pub async fn debit(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    Path(account_id): Path<String>,
    Json(body): Json<DebitRequest>,
) -> Result<Json<DebitResponse>, ApiError> {
    let account_id = parse_account_id(&account_id)?;

    if body.amount <= 0 {
        return Err(ApiError::BadRequest("amount must be positive".into()));
    }

    let tx = state
        .store
        .debit(&account_id, &LedgerEntry::adjustment(body.amount, body.reason))?;

    tracing::info!(
        account_id = %account_id,
        amount = %body.amount,
        new_balance = %tx.balance_after,
        transaction_id = %tx.id,
        service = %auth.service_name,
        "Manual debit applied"
    );

    Ok(Json(DebitResponse {
        transaction_id: tx.id.to_string(),
        amount: body.amount,
        balance: tx.balance_after,
    }))
}
