//! Error types for credit storage.

use credits_core::BillingError;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// Serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Record not found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of record.
        entity: &'static str,
        /// Key that was looked up.
        id: String,
    },

    /// Record already exists.
    #[error("{entity} already exists: {id}")]
    AlreadyExists {
        /// Kind of record.
        entity: &'static str,
        /// Conflicting key.
        id: String,
    },

    /// Insufficient credits for a debit.
    #[error("insufficient credits: balance={balance}, required={required}")]
    InsufficientCredits {
        /// Current balance in credits.
        balance: i64,
        /// Required amount in credits.
        required: i64,
    },

    /// A ledger operation was given an unusable input.
    #[error("invalid input: {0}")]
    Invalid(String),
}

impl StoreError {
    /// Build a `NotFound` for an account.
    #[must_use]
    pub fn account_not_found(id: impl ToString) -> Self {
        Self::NotFound {
            entity: "account",
            id: id.to_string(),
        }
    }
}

impl From<BillingError> for StoreError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::InsufficientCredits { balance, required } => {
                Self::InsufficientCredits { balance, required }
            }
            other => Self::Invalid(other.to_string()),
        }
    }
}
