//! Column families used by the `RocksDB` backend.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Account records, keyed by `account_id`.
    pub const ACCOUNTS: &str = "accounts";

    /// Credit transactions, keyed by `transaction_id` (ULID).
    pub const TRANSACTIONS: &str = "transactions";

    /// Index: transactions by account, keyed by `account_id || transaction_id`.
    /// Value is empty (index only).
    pub const TRANSACTIONS_BY_ACCOUNT: &str = "transactions_by_account";

    /// Checkout sessions, keyed by the provider session handle.
    pub const CHECKOUT_SESSIONS: &str = "checkout_sessions";

    /// Processed webhook events for deduplication, keyed by provider `event_id`.
    pub const PROCESSED_EVENTS: &str = "processed_events";

    /// Reconciliation anomalies, keyed by `anomaly_id` (ULID).
    pub const ANOMALIES: &str = "anomalies";

    /// Report debits, keyed by `account_id || report_id`. Value is the `transaction_id`.
    pub const REPORT_DEBITS: &str = "report_debits";

    /// Renewal grants, keyed by provider `invoice_id`. Value is the `transaction_id`.
    pub const RENEWALS: &str = "renewals";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::ACCOUNTS,
        cf::TRANSACTIONS,
        cf::TRANSACTIONS_BY_ACCOUNT,
        cf::CHECKOUT_SESSIONS,
        cf::PROCESSED_EVENTS,
        cf::ANOMALIES,
        cf::REPORT_DEBITS,
        cf::RENEWALS,
    ]
}
