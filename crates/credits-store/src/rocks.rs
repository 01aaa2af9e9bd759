//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `Store` trait. Every
//! read-modify-write on an account runs under that account's lock and ends in a single
//! `WriteBatch`.

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode,
    MultiThreaded, Options, WriteBatch,
};

use credits_core::{
    Account, AccountId, Anomaly, CheckoutSession, CreditTransaction, Disposition, LedgerEntry,
    ProcessedEvent, SessionStatus, TransactionId, WebhookEvent,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::ledger::{self, CompletionWrite, RenewalWrite};
use crate::locks::{lock, KeyedLocks};
use crate::schema::{all_column_families, cf};
use crate::{
    ChangeOutcome, CheckoutCompletion, CompletionOutcome, ConsumeOutcome, ExpiryOutcome,
    RenewalOutcome, Store, SubscriptionChange, SubscriptionRenewal,
};

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
    account_locks: KeyedLocks<AccountId>,
    /// Serializes inserts that are keyed only by event ID.
    event_lock: Mutex<()>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(Self {
            db: Arc::new(db),
            account_locks: KeyedLocks::new(),
            event_lock: Mutex::new(()),
        })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn get<T: serde::de::DeserializeOwned>(&self, family: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(family)?;
        self.db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn exists(&self, family: &str, key: &[u8]) -> Result<bool> {
        let cf = self.cf(family)?;
        Ok(self
            .db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .is_some())
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn batch_account(&self, batch: &mut WriteBatch, account: &Account) -> Result<()> {
        let cf = self.cf(cf::ACCOUNTS)?;
        batch.put_cf(
            &cf,
            keys::account_key(&account.account_id),
            Self::serialize(account)?,
        );
        Ok(())
    }

    fn batch_transaction(&self, batch: &mut WriteBatch, tx: &CreditTransaction) -> Result<()> {
        let cf_tx = self.cf(cf::TRANSACTIONS)?;
        let cf_by_account = self.cf(cf::TRANSACTIONS_BY_ACCOUNT)?;
        batch.put_cf(&cf_tx, keys::transaction_key(&tx.id), Self::serialize(tx)?);
        batch.put_cf(
            &cf_by_account,
            keys::account_transaction_key(&tx.account_id, &tx.id),
            [],
        );
        Ok(())
    }

    fn batch_session(&self, batch: &mut WriteBatch, session: &CheckoutSession) -> Result<()> {
        let cf = self.cf(cf::CHECKOUT_SESSIONS)?;
        batch.put_cf(
            &cf,
            keys::session_key(&session.session_id),
            Self::serialize(session)?,
        );
        Ok(())
    }

    fn batch_event(&self, batch: &mut WriteBatch, record: &ProcessedEvent) -> Result<()> {
        let cf = self.cf(cf::PROCESSED_EVENTS)?;
        batch.put_cf(&cf, keys::event_key(&record.event_id), Self::serialize(record)?);
        Ok(())
    }

    fn write_event(&self, event: &WebhookEvent, disposition: Disposition) -> Result<()> {
        let mut batch = WriteBatch::default();
        self.batch_event(&mut batch, &ProcessedEvent::new(event, disposition))?;
        self.write(batch)
    }

    fn mutate_balance(
        &self,
        account_id: &AccountId,
        apply: impl FnOnce(&mut Account) -> Result<CreditTransaction>,
    ) -> Result<CreditTransaction> {
        let handle = self.account_locks.handle(account_id);
        let _guard = lock(&handle);

        let mut account = self
            .get_account(account_id)?
            .ok_or_else(|| StoreError::account_not_found(account_id))?;
        let transaction = apply(&mut account)?;

        let mut batch = WriteBatch::default();
        self.batch_account(&mut batch, &account)?;
        self.batch_transaction(&mut batch, &transaction)?;
        self.write(batch)?;

        tracing::debug!(
            account_id = %account_id,
            amount = transaction.amount,
            balance = transaction.balance_after,
            "Ledger updated"
        );
        Ok(transaction)
    }
}

impl Store for RocksStore {
    // =========================================================================
    // Account Operations
    // =========================================================================

    fn create_account(&self, account: &Account) -> Result<()> {
        let handle = self.account_locks.handle(&account.account_id);
        let _guard = lock(&handle);

        if self.exists(cf::ACCOUNTS, &keys::account_key(&account.account_id))? {
            return Err(StoreError::AlreadyExists {
                entity: "account",
                id: account.account_id.to_string(),
            });
        }

        let mut batch = WriteBatch::default();
        self.batch_account(&mut batch, account)?;
        self.write(batch)
    }

    fn get_account(&self, account_id: &AccountId) -> Result<Option<Account>> {
        self.get(cf::ACCOUNTS, &keys::account_key(account_id))
    }

    fn create_account_with_grant(
        &self,
        account: &Account,
        entry: &LedgerEntry,
    ) -> Result<(Account, CreditTransaction)> {
        let handle = self.account_locks.handle(&account.account_id);
        let _guard = lock(&handle);

        if self.exists(cf::ACCOUNTS, &keys::account_key(&account.account_id))? {
            return Err(StoreError::AlreadyExists {
                entity: "account",
                id: account.account_id.to_string(),
            });
        }

        let mut account = account.clone();
        let transaction = ledger::grant(&mut account, entry)?;

        let mut batch = WriteBatch::default();
        self.batch_account(&mut batch, &account)?;
        self.batch_transaction(&mut batch, &transaction)?;
        self.write(batch)?;
        Ok((account, transaction))
    }

    // =========================================================================
    // Ledger Operations
    // =========================================================================

    fn grant(&self, account_id: &AccountId, entry: &LedgerEntry) -> Result<CreditTransaction> {
        self.mutate_balance(account_id, |account| ledger::grant(account, entry))
    }

    fn debit(&self, account_id: &AccountId, entry: &LedgerEntry) -> Result<CreditTransaction> {
        self.mutate_balance(account_id, |account| ledger::debit(account, entry))
    }

    fn consume_report(
        &self,
        account_id: &AccountId,
        report_id: &str,
        entry: &LedgerEntry,
    ) -> Result<ConsumeOutcome> {
        let handle = self.account_locks.handle(account_id);
        let _guard = lock(&handle);

        let debit_key = keys::report_debit_key(account_id, report_id);
        if let Some(transaction_id) = self.get::<TransactionId>(cf::REPORT_DEBITS, &debit_key)? {
            if let Some(tx) = self.get_transaction(&transaction_id)? {
                return Ok(ConsumeOutcome::AlreadyConsumed(tx));
            }
        }

        let mut account = self
            .get_account(account_id)?
            .ok_or_else(|| StoreError::account_not_found(account_id))?;
        let transaction = ledger::debit(&mut account, entry)?;

        let cf_debits = self.cf(cf::REPORT_DEBITS)?;
        let mut batch = WriteBatch::default();
        self.batch_account(&mut batch, &account)?;
        self.batch_transaction(&mut batch, &transaction)?;
        batch.put_cf(&cf_debits, debit_key, Self::serialize(&transaction.id)?);
        self.write(batch)?;

        tracing::debug!(
            account_id = %account_id,
            report_id = %report_id,
            balance = transaction.balance_after,
            "Report debited"
        );
        Ok(ConsumeOutcome::Debited(transaction))
    }

    fn get_transaction(&self, transaction_id: &TransactionId) -> Result<Option<CreditTransaction>> {
        self.get(cf::TRANSACTIONS, &keys::transaction_key(transaction_id))
    }

    fn list_transactions_by_account(
        &self,
        account_id: &AccountId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CreditTransaction>> {
        let cf_by_account = self.cf(cf::TRANSACTIONS_BY_ACCOUNT)?;
        let prefix = keys::account_transactions_prefix(account_id);

        let iter = self
            .db
            .iterator_cf(&cf_by_account, IteratorMode::From(&prefix, Direction::Forward));

        // ULIDs are time-ordered, so index keys come out oldest first
        let mut ids = Vec::new();
        for item in iter {
            let (key, _) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if !key.starts_with(&prefix) {
                break;
            }
            if let Some(id) = keys::transaction_id_from_index_key(&key) {
                ids.push(id);
            }
        }

        let mut transactions = Vec::new();
        for id in ids.iter().rev().skip(offset).take(limit) {
            if let Some(tx) = self.get_transaction(id)? {
                transactions.push(tx);
            }
        }
        Ok(transactions)
    }

    // =========================================================================
    // Checkout Sessions
    // =========================================================================

    fn put_checkout_session(&self, session: &CheckoutSession) -> Result<()> {
        let handle = self.account_locks.handle(&session.account_id);
        let _guard = lock(&handle);

        if self.exists(cf::CHECKOUT_SESSIONS, &keys::session_key(&session.session_id))? {
            return Err(StoreError::AlreadyExists {
                entity: "checkout session",
                id: session.session_id.clone(),
            });
        }

        let mut batch = WriteBatch::default();
        self.batch_session(&mut batch, session)?;
        self.write(batch)
    }

    fn get_checkout_session(&self, session_id: &str) -> Result<Option<CheckoutSession>> {
        self.get(cf::CHECKOUT_SESSIONS, &keys::session_key(session_id))
    }

    // =========================================================================
    // Webhook Reconciliation
    // =========================================================================

    fn get_processed_event(&self, event_id: &str) -> Result<Option<ProcessedEvent>> {
        self.get(cf::PROCESSED_EVENTS, &keys::event_key(event_id))
    }

    fn record_event(&self, record: &ProcessedEvent) -> Result<bool> {
        let _guard = lock(&self.event_lock);
        if self.is_event_processed(&record.event_id)? {
            return Ok(false);
        }
        let mut batch = WriteBatch::default();
        self.batch_event(&mut batch, record)?;
        self.write(batch)?;
        Ok(true)
    }

    fn complete_checkout(
        &self,
        event: &WebhookEvent,
        completion: &CheckoutCompletion,
    ) -> Result<CompletionOutcome> {
        // The session tells us which account to lock; it is re-read under the lock.
        let Some(session) = self.get_checkout_session(&completion.session_id)? else {
            return Ok(CompletionOutcome::SessionNotFound);
        };
        let handle = self.account_locks.handle(&session.account_id);
        let _guard = lock(&handle);

        if self.is_event_processed(&event.id)? {
            return Ok(CompletionOutcome::AlreadyProcessed);
        }
        let Some(session) = self.get_checkout_session(&completion.session_id)? else {
            return Ok(CompletionOutcome::SessionNotFound);
        };
        let account = self.get_account(&session.account_id)?;

        match ledger::plan_completion(session, account, completion, Utc::now())? {
            CompletionWrite::Nothing(outcome) => Ok(outcome),
            CompletionWrite::RecordOnly(disposition, outcome) => {
                self.write_event(event, disposition)?;
                Ok(outcome)
            }
            CompletionWrite::Fulfil {
                session,
                account,
                transaction,
                past_expiry,
            } => {
                let mut batch = WriteBatch::default();
                self.batch_account(&mut batch, &account)?;
                if let Some(tx) = &transaction {
                    self.batch_transaction(&mut batch, tx)?;
                }
                self.batch_session(&mut batch, &session)?;
                self.batch_event(
                    &mut batch,
                    &ProcessedEvent::new(event, Disposition::Applied),
                )?;
                self.write(batch)?;

                Ok(CompletionOutcome::Applied {
                    account,
                    transaction,
                    past_expiry,
                })
            }
        }
    }

    fn expire_checkout(&self, event: &WebhookEvent, session_id: &str) -> Result<ExpiryOutcome> {
        let Some(session) = self.get_checkout_session(session_id)? else {
            return Ok(ExpiryOutcome::SessionNotFound);
        };
        let handle = self.account_locks.handle(&session.account_id);
        let _guard = lock(&handle);

        if self.is_event_processed(&event.id)? {
            return Ok(ExpiryOutcome::AlreadyProcessed);
        }
        let Some(mut session) = self.get_checkout_session(session_id)? else {
            return Ok(ExpiryOutcome::SessionNotFound);
        };

        if session.expire() {
            let mut batch = WriteBatch::default();
            self.batch_session(&mut batch, &session)?;
            self.batch_event(
                &mut batch,
                &ProcessedEvent::new(event, Disposition::Applied),
            )?;
            self.write(batch)?;
            Ok(ExpiryOutcome::Expired)
        } else {
            let disposition = match session.status {
                SessionStatus::Completed => Disposition::SessionAlreadyCompleted,
                _ => Disposition::Ignored,
            };
            self.write_event(event, disposition)?;
            Ok(ExpiryOutcome::Unchanged(session.status))
        }
    }

    fn apply_subscription_change(
        &self,
        event: &WebhookEvent,
        account_id: &AccountId,
        change: &SubscriptionChange,
    ) -> Result<ChangeOutcome> {
        let handle = self.account_locks.handle(account_id);
        let _guard = lock(&handle);

        if self.is_event_processed(&event.id)? {
            return Ok(ChangeOutcome::AlreadyProcessed);
        }
        let Some(mut account) = self.get_account(account_id)? else {
            return Ok(ChangeOutcome::AccountNotFound);
        };

        if !ledger::apply_change(&mut account, change, event.created_at) {
            self.write_event(event, Disposition::Ignored)?;
            return Ok(ChangeOutcome::Stale);
        }

        let mut batch = WriteBatch::default();
        self.batch_account(&mut batch, &account)?;
        self.batch_event(
            &mut batch,
            &ProcessedEvent::new(event, Disposition::Applied),
        )?;
        self.write(batch)?;
        Ok(ChangeOutcome::Applied(account))
    }

    fn grant_renewal(
        &self,
        event: &WebhookEvent,
        account_id: &AccountId,
        renewal: &SubscriptionRenewal,
        entry: &LedgerEntry,
    ) -> Result<RenewalOutcome> {
        let handle = self.account_locks.handle(account_id);
        let _guard = lock(&handle);

        if self.is_event_processed(&event.id)? {
            return Ok(RenewalOutcome::AlreadyProcessed);
        }
        let account = self.get_account(account_id)?;
        let renewal_key = keys::renewal_key(&renewal.invoice_id);
        let invoice_granted = self.exists(cf::RENEWALS, &renewal_key)?;

        match ledger::plan_renewal(account, renewal, invoice_granted, entry)? {
            RenewalWrite::Nothing(outcome) => Ok(outcome),
            RenewalWrite::RecordOnly(outcome) => {
                self.write_event(event, Disposition::Ignored)?;
                Ok(outcome)
            }
            RenewalWrite::Grant {
                account,
                transaction,
            } => {
                let cf_renewals = self.cf(cf::RENEWALS)?;
                let mut batch = WriteBatch::default();
                self.batch_account(&mut batch, &account)?;
                self.batch_transaction(&mut batch, &transaction)?;
                batch.put_cf(&cf_renewals, renewal_key, Self::serialize(&transaction.id)?);
                self.batch_event(
                    &mut batch,
                    &ProcessedEvent::new(event, Disposition::Applied),
                )?;
                self.write(batch)?;
                Ok(RenewalOutcome::Applied {
                    account,
                    transaction,
                })
            }
        }
    }

    fn record_anomaly(&self, record: &ProcessedEvent, anomaly: &Anomaly) -> Result<bool> {
        let _guard = lock(&self.event_lock);
        if self.is_event_processed(&record.event_id)? {
            return Ok(false);
        }

        let cf_anomalies = self.cf(cf::ANOMALIES)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(
            &cf_anomalies,
            keys::anomaly_key(&anomaly.id),
            Self::serialize(anomaly)?,
        );
        self.batch_event(&mut batch, record)?;
        self.write(batch)?;
        Ok(true)
    }

    fn list_anomalies(&self, limit: usize) -> Result<Vec<Anomaly>> {
        let cf_anomalies = self.cf(cf::ANOMALIES)?;
        let mut anomalies = Vec::new();
        for item in self.db.iterator_cf(&cf_anomalies, IteratorMode::End) {
            if anomalies.len() >= limit {
                break;
            }
            let (_, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            anomalies.push(Self::deserialize(&value)?);
        }
        Ok(anomalies)
    }
}
