//! Key encoding for `RocksDB` column families.

use credits_core::{AccountId, AnomalyId, TransactionId};

/// Create an account key from an account ID.
#[must_use]
pub fn account_key(account_id: &AccountId) -> Vec<u8> {
    account_id.as_bytes().to_vec()
}

/// Create a transaction key from a transaction ID.
#[must_use]
pub fn transaction_key(transaction_id: &TransactionId) -> Vec<u8> {
    transaction_id.to_bytes().to_vec()
}

/// Create an account-transaction index key.
///
/// Format: `account_id (16 bytes) || transaction_id (16 bytes)`
///
/// Since ULIDs are time-ordered, an account's transactions sort by time.
#[must_use]
pub fn account_transaction_key(account_id: &AccountId, transaction_id: &TransactionId) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(account_id.as_bytes());
    key.extend_from_slice(&transaction_id.to_bytes());
    key
}

/// Create a prefix for iterating all transactions of an account.
#[must_use]
pub fn account_transactions_prefix(account_id: &AccountId) -> Vec<u8> {
    account_id.as_bytes().to_vec()
}

/// Extract the transaction ID from an account-transaction index key.
///
/// Returns `None` if the key is not 32 bytes long.
#[must_use]
pub fn transaction_id_from_index_key(key: &[u8]) -> Option<TransactionId> {
    if key.len() != 32 {
        return None;
    }
    let bytes: [u8; 16] = key[16..32].try_into().ok()?;
    Some(TransactionId::from_bytes(bytes))
}

/// Create a checkout session key from the provider handle.
#[must_use]
pub fn session_key(session_id: &str) -> Vec<u8> {
    session_id.as_bytes().to_vec()
}

/// Create a processed-event key from the provider event ID.
#[must_use]
pub fn event_key(event_id: &str) -> Vec<u8> {
    event_id.as_bytes().to_vec()
}

/// Create an anomaly key from an anomaly ID.
#[must_use]
pub fn anomaly_key(anomaly_id: &AnomalyId) -> Vec<u8> {
    anomaly_id.to_bytes().to_vec()
}

/// Create a renewal key from the provider invoice ID.
#[must_use]
pub fn renewal_key(invoice_id: &str) -> Vec<u8> {
    invoice_id.as_bytes().to_vec()
}

/// Create a report-debit key.
///
/// Format: `account_id (16 bytes) || report_id (UTF-8)`
#[must_use]
pub fn report_debit_key(account_id: &AccountId, report_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(16 + report_id.len());
    key.extend_from_slice(account_id.as_bytes());
    key.extend_from_slice(report_id.as_bytes());
    key
}
