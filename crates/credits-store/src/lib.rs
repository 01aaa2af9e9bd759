//! Storage layer for the report credits billing service.
//!
//! This crate is the Credit Ledger: it owns account balances, checkout sessions and the
//! webhook deduplication records, and applies every balance change together with its
//! transaction record in one atomic write.
//!
//! # Backends
//!
//! - [`MemoryStore`]: a single mutex around plain maps. Used by tests and mock mode.
//! - [`RocksStore`] (feature `rocksdb-backend`): column families with CBOR values.
//!
//! # Concurrency
//!
//! All mutations for one account are serialized. Compound reconciliation operations
//! re-check the processed-event record while holding the account's lock, so a webhook
//! delivered twice in parallel is applied once.
//!
//! # Example
//!
//! ```no_run
//! use credits_core::{Account, AccountId, LedgerEntry};
//! use credits_store::{MemoryStore, Store};
//!
//! let store = MemoryStore::new();
//! let account_id = AccountId::generate();
//! store.create_account(&Account::new(account_id)).unwrap();
//!
//! let tx = store
//!     .grant(&account_id, &LedgerEntry::adjustment(10, "welcome credits"))
//!     .unwrap();
//! assert_eq!(tx.balance_after, 10);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
mod ledger;
#[cfg(feature = "rocksdb-backend")]
mod locks;
pub mod memory;
#[cfg(feature = "rocksdb-backend")]
pub mod keys;
#[cfg(feature = "rocksdb-backend")]
pub mod rocks;
#[cfg(feature = "rocksdb-backend")]
pub mod schema;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
#[cfg(feature = "rocksdb-backend")]
pub use rocks::RocksStore;

use credits_core::{
    Account, AccountId, Anomaly, CheckoutSession, CreditTransaction, LedgerEntry,
    ProcessedEvent, SessionStatus, SubscriptionStatus, Tier, TransactionId, WebhookEvent,
};

/// Provider facts carried by a completed-checkout event.
#[derive(Debug, Clone)]
pub struct CheckoutCompletion {
    /// Provider session handle.
    pub session_id: String,
    /// Provider customer ID, remembered on the account.
    pub customer_id: Option<String>,
    /// Provider subscription ID for subscription checkouts.
    pub subscription_id: Option<String>,
}

/// Result of [`Store::complete_checkout`].
#[derive(Debug, Clone)]
pub enum CompletionOutcome {
    /// The session moved to `Completed` and its fulfilment was applied.
    Applied {
        /// Account state after fulfilment.
        account: Account,
        /// The grant, if the product carries credits.
        transaction: Option<CreditTransaction>,
        /// Whether the session was already past its expiry timestamp.
        past_expiry: bool,
    },
    /// The event ID was already recorded. Nothing written.
    AlreadyProcessed,
    /// The session was completed by an earlier event. The event was recorded.
    AlreadyCompleted,
    /// The provider had already expired the session. The event was recorded.
    SessionExpired,
    /// No session with this handle. Nothing written.
    SessionNotFound,
    /// The session's account does not exist. Nothing written.
    AccountNotFound(AccountId),
}

/// Result of [`Store::expire_checkout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryOutcome {
    /// The session moved from `Pending` to `Expired`. The event was recorded.
    Expired,
    /// The session was already terminal. The event was recorded.
    Unchanged(SessionStatus),
    /// The event ID was already recorded. Nothing written.
    AlreadyProcessed,
    /// No session with this handle. Nothing written.
    SessionNotFound,
}

/// A subscription state change requested by a webhook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionChange {
    /// Set the status, and the tier when one is named.
    Update {
        /// Provider subscription ID.
        subscription_id: String,
        /// New tier, if the event names one.
        tier: Option<Tier>,
        /// New status.
        status: SubscriptionStatus,
    },
    /// The subscription ended. Terminal: later updates for the same subscription ID
    /// are not applied.
    Cancel {
        /// Provider subscription ID.
        subscription_id: String,
    },
}

/// Result of [`Store::apply_subscription_change`].
#[derive(Debug, Clone)]
pub enum ChangeOutcome {
    /// The change was applied and the event recorded.
    Applied(Account),
    /// A newer subscription event was already applied, or the update names a
    /// subscription that was deleted. The event was recorded as ignored.
    Stale,
    /// The event ID was already recorded. Nothing written.
    AlreadyProcessed,
    /// The account does not exist. Nothing written.
    AccountNotFound,
}

/// Provider facts carried by a paid renewal invoice.
#[derive(Debug, Clone)]
pub struct SubscriptionRenewal {
    /// Provider invoice ID. A given invoice grants at most once.
    pub invoice_id: String,
    /// Provider subscription ID the invoice bills.
    pub subscription_id: String,
}

/// Result of [`Store::grant_renewal`].
#[derive(Debug, Clone)]
pub enum RenewalOutcome {
    /// Credits were granted and the event recorded.
    Applied {
        /// Account state after the grant.
        account: Account,
        /// The grant.
        transaction: CreditTransaction,
    },
    /// The subscription was deleted before the invoice arrived. The event was
    /// recorded as ignored.
    SubscriptionEnded,
    /// Another event for the same invoice already granted. The event was recorded
    /// as ignored.
    InvoiceAlreadyGranted,
    /// The event ID was already recorded. Nothing written.
    AlreadyProcessed,
    /// The account does not exist. Nothing written.
    AccountNotFound,
}

/// Result of [`Store::consume_report`].
#[derive(Debug, Clone)]
pub enum ConsumeOutcome {
    /// The report was charged.
    Debited(CreditTransaction),
    /// The report ID was charged earlier; this is the original debit.
    AlreadyConsumed(CreditTransaction),
}

impl ConsumeOutcome {
    /// The debit transaction, new or original.
    #[must_use]
    pub fn transaction(&self) -> &CreditTransaction {
        match self {
            Self::Debited(tx) | Self::AlreadyConsumed(tx) => tx,
        }
    }
}

/// The storage trait defining all database operations.
///
/// This trait abstracts the storage layer, allowing for different implementations
/// (`RocksDB`, in-memory for tests and mock mode).
pub trait Store: Send + Sync {
    // =========================================================================
    // Account Operations
    // =========================================================================

    /// Insert a new account record.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyExists` if the account exists.
    fn create_account(&self, account: &Account) -> Result<()>;

    /// Get an account by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_account(&self, account_id: &AccountId) -> Result<Option<Account>>;

    /// Insert a new account and grant its opening allowance in one atomic write.
    ///
    /// Returns the stored account and the grant.
    ///
    /// # Errors
    ///
    /// - `StoreError::AlreadyExists` if the account exists.
    /// - `StoreError::Invalid` for a non-positive amount.
    fn create_account_with_grant(
        &self,
        account: &Account,
        entry: &LedgerEntry,
    ) -> Result<(Account, CreditTransaction)>;

    // =========================================================================
    // Ledger Operations
    // =========================================================================

    /// Add `entry.amount` credits and record the transaction atomically.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the account doesn't exist.
    /// - `StoreError::Invalid` for a non-positive amount.
    fn grant(&self, account_id: &AccountId, entry: &LedgerEntry) -> Result<CreditTransaction>;

    /// Remove `entry.amount` credits and record the transaction atomically.
    ///
    /// Nothing is written when the balance is too low.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the account doesn't exist.
    /// - `StoreError::InsufficientCredits` if the balance is lower than the amount.
    /// - `StoreError::Invalid` for a non-positive amount.
    fn debit(&self, account_id: &AccountId, entry: &LedgerEntry) -> Result<CreditTransaction>;

    /// Debit the cost of report `report_id` at most once.
    ///
    /// A repeated call with the same report ID returns the original transaction and
    /// writes nothing.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the account doesn't exist.
    /// - `StoreError::InsufficientCredits` if the balance is lower than the cost.
    fn consume_report(
        &self,
        account_id: &AccountId,
        report_id: &str,
        entry: &LedgerEntry,
    ) -> Result<ConsumeOutcome>;

    /// Get a transaction by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_transaction(&self, transaction_id: &TransactionId) -> Result<Option<CreditTransaction>>;

    /// List transactions for an account, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_transactions_by_account(
        &self,
        account_id: &AccountId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CreditTransaction>>;

    // =========================================================================
    // Checkout Sessions
    // =========================================================================

    /// Persist a newly opened checkout session.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyExists` if the handle is already stored.
    fn put_checkout_session(&self, session: &CheckoutSession) -> Result<()>;

    /// Get a checkout session by provider handle.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_checkout_session(&self, session_id: &str) -> Result<Option<CheckoutSession>>;

    // =========================================================================
    // Webhook Reconciliation
    // =========================================================================

    /// Get the processed-event record for a provider event ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_processed_event(&self, event_id: &str) -> Result<Option<ProcessedEvent>>;

    /// Check if a provider event has already been processed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn is_event_processed(&self, event_id: &str) -> Result<bool> {
        Ok(self.get_processed_event(event_id)?.is_some())
    }

    /// Record an event that has no other effect.
    ///
    /// Returns `false` if the event ID was already recorded.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn record_event(&self, record: &ProcessedEvent) -> Result<bool>;

    /// Complete a checkout session and apply its fulfilment.
    ///
    /// Session transition, account update, grant transaction and the processed-event
    /// record are written in one atomic batch under the account's lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn complete_checkout(
        &self,
        event: &WebhookEvent,
        completion: &CheckoutCompletion,
    ) -> Result<CompletionOutcome>;

    /// Mark a pending checkout session as expired.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn expire_checkout(&self, event: &WebhookEvent, session_id: &str) -> Result<ExpiryOutcome>;

    /// Apply a subscription change to an account together with the event record.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn apply_subscription_change(
        &self,
        event: &WebhookEvent,
        account_id: &AccountId,
        change: &SubscriptionChange,
    ) -> Result<ChangeOutcome>;

    /// Grant a subscription's renewal credits together with the event record.
    ///
    /// Nothing is granted when the subscription was deleted on this account or the
    /// invoice was already granted by another event.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn grant_renewal(
        &self,
        event: &WebhookEvent,
        account_id: &AccountId,
        renewal: &SubscriptionRenewal,
        entry: &LedgerEntry,
    ) -> Result<RenewalOutcome>;

    /// Record an anomaly together with its event record.
    ///
    /// Returns `false` (and writes nothing) if the event ID was already recorded.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn record_anomaly(&self, record: &ProcessedEvent, anomaly: &Anomaly) -> Result<bool>;

    /// List anomalies, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_anomalies(&self, limit: usize) -> Result<Vec<Anomaly>>;
}
