//! Credit transaction types.
//!
//! Every balance change produces a transaction record.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

use crate::{AccountId, ReportType, TransactionId};

/// What the ledger is asked to apply. The amount is always positive; the direction
/// comes from the ledger operation (`grant` or `debit`).
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    /// Credits to move. Must be positive.
    pub amount: i64,
    /// Type recorded on the resulting transaction.
    pub transaction_type: TransactionType,
    /// Human-readable description.
    pub description: String,
    /// Additional metadata (session, report, event ids).
    pub metadata: serde_json::Value,
}

impl LedgerEntry {
    /// Credits bought through a credit pack checkout.
    #[must_use]
    pub fn purchase(amount: i64, product_name: &str, session_id: &str) -> Self {
        Self {
            amount,
            transaction_type: TransactionType::Purchase,
            description: format!("Purchased {product_name} ({amount} credits)"),
            metadata: serde_json::json!({ "session_id": session_id }),
        }
    }

    /// Credits granted when a subscription is activated.
    #[must_use]
    pub fn subscription_grant(amount: i64, plan_name: &str, session_id: &str) -> Self {
        Self {
            amount,
            transaction_type: TransactionType::SubscriptionGrant,
            description: format!("{plan_name} credit grant"),
            metadata: serde_json::json!({ "session_id": session_id }),
        }
    }

    /// Credits granted when a subscription renews for a new billing period.
    #[must_use]
    pub fn subscription_renewal(amount: i64, plan_name: &str, invoice_id: &str) -> Self {
        Self {
            amount,
            transaction_type: TransactionType::SubscriptionGrant,
            description: format!("{plan_name} renewal credit grant"),
            metadata: serde_json::json!({ "invoice_id": invoice_id }),
        }
    }

    /// The free plan allowance granted once at registration.
    #[must_use]
    pub fn free_grant(amount: i64, plan_name: &str) -> Self {
        Self {
            amount,
            transaction_type: TransactionType::FreeGrant,
            description: format!("{plan_name} plan credits"),
            metadata: serde_json::Value::Null,
        }
    }

    /// Credits consumed by a report.
    #[must_use]
    pub fn report_usage(report_type: ReportType, report_id: &str) -> Self {
        Self {
            amount: report_type.cost(),
            transaction_type: TransactionType::ReportUsage,
            description: format!("{report_type} report"),
            metadata: serde_json::json!({
                "report_id": report_id,
                "report_type": report_type.as_str(),
            }),
        }
    }

    /// A manual debit with a free-form reason.
    #[must_use]
    pub fn adjustment(amount: i64, reason: impl Into<String>) -> Self {
        Self {
            amount,
            transaction_type: TransactionType::Adjustment,
            description: reason.into(),
            metadata: serde_json::Value::Null,
        }
    }
}

/// A credit transaction representing a balance change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditTransaction {
    /// Unique transaction ID (ULID for time-ordering).
    pub id: TransactionId,

    /// The account whose balance was affected.
    pub account_id: AccountId,

    /// Signed amount. Positive = credit, negative = debit.
    pub amount: i64,

    /// Type of transaction.
    pub transaction_type: TransactionType,

    /// Balance after this transaction.
    pub balance_after: i64,

    /// Human-readable description.
    pub description: String,

    /// Additional metadata.
    pub metadata: serde_json::Value,

    /// When the transaction was created.
    pub created_at: DateTime<Utc>,
}

impl CreditTransaction {
    /// Record a grant of `entry.amount`.
    #[must_use]
    pub fn credit(account_id: AccountId, entry: &LedgerEntry, balance_after: i64) -> Self {
        Self::build(account_id, entry.amount.abs(), entry, balance_after)
    }

    /// Record a debit of `entry.amount`.
    #[must_use]
    pub fn debit(account_id: AccountId, entry: &LedgerEntry, balance_after: i64) -> Self {
        Self::build(account_id, -entry.amount.abs(), entry, balance_after)
    }

    fn build(account_id: AccountId, amount: i64, entry: &LedgerEntry, balance_after: i64) -> Self {
        Self {
            id: TransactionId::generate(),
            account_id,
            amount,
            transaction_type: entry.transaction_type,
            balance_after,
            description: entry.description.clone(),
            metadata: entry.metadata.clone(),
            created_at: Utc::now(),
        }
    }
}

/// Type of credit transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    /// Credit pack purchase.
    Purchase,

    /// Subscription activation grant.
    SubscriptionGrant,

    /// Free plan allowance.
    FreeGrant,

    /// Credits consumed by a report.
    ReportUsage,

    /// Manual debit.
    Adjustment,
}

impl TransactionType {
    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Purchase => "purchase",
            Self::SubscriptionGrant => "subscription_grant",
            Self::FreeGrant => "free_grant",
            Self::ReportUsage => "report_usage",
            Self::Adjustment => "adjustment",
        }
    }

    /// Check if this transaction type adds credits.
    #[must_use]
    pub const fn is_credit(&self) -> bool {
        matches!(
            self,
            Self::Purchase | Self::SubscriptionGrant | Self::FreeGrant
        )
    }
}

/// Report consumption totals derived from an account's history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UsageStats {
    /// Reports paid for.
    pub total_reports_generated: u64,
    /// Credits spent on reports.
    pub total_credits_consumed: i64,
    /// Reports paid for in the calendar month of `now`.
    pub reports_generated_this_month: u64,
    /// Reports paid for, by report type wire name.
    pub report_breakdown: BTreeMap<String, u64>,
}

impl UsageStats {
    /// Summarize the report usage among `transactions`; other types are skipped.
    #[must_use]
    pub fn from_transactions<'a>(
        transactions: impl IntoIterator<Item = &'a CreditTransaction>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut stats = Self::default();
        for tx in transactions {
            if tx.transaction_type != TransactionType::ReportUsage {
                continue;
            }
            stats.total_reports_generated += 1;
            stats.total_credits_consumed += tx.amount.abs();
            if tx.created_at.year() == now.year() && tx.created_at.month() == now.month() {
                stats.reports_generated_this_month += 1;
            }
            let report_type = tx.metadata["report_type"].as_str().unwrap_or("UNKNOWN");
            *stats
                .report_breakdown
                .entry(report_type.to_string())
                .or_default() += 1;
        }
        stats
    }
}
