//! Error types for credit billing.

use crate::ids::IdError;

/// Result type for billing operations.
pub type Result<T> = std::result::Result<T, BillingError>;

/// Errors raised by domain operations on accounts and sessions.
#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    /// Debit larger than the current balance.
    #[error("insufficient credits: balance={balance}, required={required}")]
    InsufficientCredits {
        /// Current balance in credits.
        balance: i64,
        /// Required amount in credits.
        required: i64,
    },

    /// Grant or debit with a non-positive or overflowing amount.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// Product identifier not present in the catalog.
    #[error("invalid product: {0}")]
    InvalidProduct(String),

    /// Unknown report type.
    #[error("invalid report type: {0}")]
    InvalidReportType(String),

    /// Invalid identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),
}
