//! Report access and consumption handlers.
//!
//! The report dispatcher checks access before offering a report and consumes credits
//! before running one. Running the report itself happens elsewhere.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use credits_core::{LedgerEntry, ReportType};
use credits_store::ConsumeOutcome;

use super::{load_account, parse_account_id};
use crate::auth::ServiceAuth;
use crate::error::ApiError;
use crate::state::AppState;

/// Report access response.
#[derive(Debug, Serialize)]
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
    /// Whether the caller should be pointed at checkout.
    pub upgrade_required: bool,
}

/// Check whether an account can pay for a report.
pub async fn check_access(
    State(state): State<Arc<AppState>>,
    Path((account_id, report_type)): Path<(String, String)>,
) -> Result<Json<ReportAccessResponse>, ApiError> {
    let account_id = parse_account_id(&account_id)?;
    let report_type: ReportType = report_type.parse()?;
    let account = load_account(&state, &account_id)?;

    let credits_needed = report_type.cost();
    let can_generate = account.has_sufficient_credits(credits_needed);

    Ok(Json(ReportAccessResponse {
        report_type,
        can_generate,
        has_credits: account.balance > 0,
        credits_available: account.balance,
        credits_needed,
        tier: account.tier.as_str().to_string(),
        upgrade_required: !can_generate,
    }))
}

/// Consume report request.
#[derive(Debug, Deserialize)]
pub struct ConsumeReportRequest {
    /// Report type being generated.
    pub report_type: ReportType,
    /// Identifier of the report run. Retries with the same ID are charged once.
    pub report_id: String,
}

/// Consume report response.
#[derive(Debug, Serialize)]
pub struct ConsumeReportResponse {
    /// Transaction ID.
    pub transaction_id: String,
    /// Credits debited.
    pub credits_consumed: i64,
    /// Balance right after the debit.
    pub credits_remaining: i64,
    /// Whether the report had already been paid for by an earlier request.
    pub replayed: bool,
}

/// Debit the cost of a report (service API key).
pub async fn consume(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    Path(account_id): Path<String>,
    Json(body): Json<ConsumeReportRequest>,
) -> Result<Json<ConsumeReportResponse>, ApiError> {
    let account_id = parse_account_id(&account_id)?;

    if body.report_id.trim().is_empty() {
        return Err(ApiError::BadRequest("report_id is required".into()));
    }

    let entry = LedgerEntry::report_usage(body.report_type, &body.report_id);
    let outcome = state
        .store
        .consume_report(&account_id, &body.report_id, &entry)?;
    let replayed = matches!(outcome, ConsumeOutcome::AlreadyConsumed(_));
    let tx = outcome.transaction();

    if replayed {
        tracing::info!(
            account_id = %account_id,
            report_id = %body.report_id,
            transaction_id = %tx.id,
            service = %auth.service_name,
            "Report already paid for, returning original debit"
        );
    } else {
        tracing::info!(
            account_id = %account_id,
            report_type = %body.report_type,
            report_id = %body.report_id,
            credits_consumed = %entry.amount,
            credits_remaining = %tx.balance_after,
            service = %auth.service_name,
            "Report credits consumed"
        );
    }

    Ok(Json(ConsumeReportResponse {
        transaction_id: tx.id.to_string(),
        credits_consumed: tx.amount.abs(),
        credits_remaining: tx.balance_after,
        replayed,
    }))
}
