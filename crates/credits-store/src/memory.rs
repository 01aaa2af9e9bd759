//! In-memory storage implementation.
//!
//! Every operation holds one mutex for its whole duration, which trivially serializes
//! all accounts. Used by tests and by the service's mock mode.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;

use credits_core::{
    Account, AccountId, Anomaly, CheckoutSession, CreditTransaction, Disposition, LedgerEntry,
    ProcessedEvent, SessionStatus, TransactionId, WebhookEvent,
};

use crate::error::{Result, StoreError};
use crate::ledger::{self, CompletionWrite, RenewalWrite};
use crate::{
    ChangeOutcome, CheckoutCompletion, CompletionOutcome, ConsumeOutcome, ExpiryOutcome,
    RenewalOutcome, Store, SubscriptionChange, SubscriptionRenewal,
};

#[derive(Default)]
struct Inner {
    accounts: HashMap<AccountId, Account>,
    transactions: HashMap<TransactionId, CreditTransaction>,
    transactions_by_account: HashMap<AccountId, Vec<TransactionId>>,
    sessions: HashMap<String, CheckoutSession>,
    events: HashMap<String, ProcessedEvent>,
    anomalies: Vec<Anomaly>,
    report_debits: HashMap<(AccountId, String), TransactionId>,
    renewed_invoices: HashMap<String, TransactionId>,
}

impl Inner {
    fn put_transaction(&mut self, transaction: CreditTransaction) {
        self.transactions_by_account
            .entry(transaction.account_id)
            .or_default()
            .push(transaction.id);
        self.transactions.insert(transaction.id, transaction);
    }

    fn record(&mut self, event: &WebhookEvent, disposition: Disposition) {
        self.events
            .insert(event.id.clone(), ProcessedEvent::new(event, disposition));
    }
}

/// Process-local storage backend.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored checkout sessions.
    #[must_use]
    pub fn checkout_session_count(&self) -> usize {
        self.inner().sessions.len()
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mutate_balance(
        &self,
        account_id: &AccountId,
        apply: impl FnOnce(&mut Account) -> Result<CreditTransaction>,
    ) -> Result<CreditTransaction> {
        let mut inner = self.inner();
        let mut account = inner
            .accounts
            .get(account_id)
            .cloned()
            .ok_or_else(|| StoreError::account_not_found(account_id))?;

        let transaction = apply(&mut account)?;
        inner.accounts.insert(*account_id, account);
        inner.put_transaction(transaction.clone());
        Ok(transaction)
    }
}

impl Store for MemoryStore {
    fn create_account(&self, account: &Account) -> Result<()> {
        let mut inner = self.inner();
        if inner.accounts.contains_key(&account.account_id) {
            return Err(StoreError::AlreadyExists {
                entity: "account",
                id: account.account_id.to_string(),
            });
        }
        inner.accounts.insert(account.account_id, account.clone());
        Ok(())
    }

    fn get_account(&self, account_id: &AccountId) -> Result<Option<Account>> {
        Ok(self.inner().accounts.get(account_id).cloned())
    }

    fn create_account_with_grant(
        &self,
        account: &Account,
        entry: &LedgerEntry,
    ) -> Result<(Account, CreditTransaction)> {
        let mut inner = self.inner();
        if inner.accounts.contains_key(&account.account_id) {
            return Err(StoreError::AlreadyExists {
                entity: "account",
                id: account.account_id.to_string(),
            });
        }
        let mut account = account.clone();
        let transaction = ledger::grant(&mut account, entry)?;
        inner.accounts.insert(account.account_id, account.clone());
        inner.put_transaction(transaction.clone());
        Ok((account, transaction))
    }

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
        let mut inner = self.inner();
        let key = (*account_id, report_id.to_string());
        if let Some(tx) = inner
            .report_debits
            .get(&key)
            .and_then(|id| inner.transactions.get(id))
        {
            return Ok(ConsumeOutcome::AlreadyConsumed(tx.clone()));
        }

        let mut account = inner
            .accounts
            .get(account_id)
            .cloned()
            .ok_or_else(|| StoreError::account_not_found(account_id))?;
        let transaction = ledger::debit(&mut account, entry)?;
        inner.accounts.insert(*account_id, account);
        inner.report_debits.insert(key, transaction.id);
        inner.put_transaction(transaction.clone());
        Ok(ConsumeOutcome::Debited(transaction))
    }

    fn get_transaction(&self, transaction_id: &TransactionId) -> Result<Option<CreditTransaction>> {
        Ok(self.inner().transactions.get(transaction_id).cloned())
    }

    fn list_transactions_by_account(
        &self,
        account_id: &AccountId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CreditTransaction>> {
        let inner = self.inner();
        let Some(ids) = inner.transactions_by_account.get(account_id) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .rev()
            .skip(offset)
            .take(limit)
            .filter_map(|id| inner.transactions.get(id).cloned())
            .collect())
    }

    fn put_checkout_session(&self, session: &CheckoutSession) -> Result<()> {
        let mut inner = self.inner();
        if inner.sessions.contains_key(&session.session_id) {
            return Err(StoreError::AlreadyExists {
                entity: "checkout session",
                id: session.session_id.clone(),
            });
        }
        inner
            .sessions
            .insert(session.session_id.clone(), session.clone());
        Ok(())
    }

    fn get_checkout_session(&self, session_id: &str) -> Result<Option<CheckoutSession>> {
        Ok(self.inner().sessions.get(session_id).cloned())
    }

    fn get_processed_event(&self, event_id: &str) -> Result<Option<ProcessedEvent>> {
        Ok(self.inner().events.get(event_id).cloned())
    }

    fn record_event(&self, record: &ProcessedEvent) -> Result<bool> {
        let mut inner = self.inner();
        if inner.events.contains_key(&record.event_id) {
            return Ok(false);
        }
        inner.events.insert(record.event_id.clone(), record.clone());
        Ok(true)
    }

    fn complete_checkout(
        &self,
        event: &WebhookEvent,
        completion: &CheckoutCompletion,
    ) -> Result<CompletionOutcome> {
        let mut inner = self.inner();
        if inner.events.contains_key(&event.id) {
            return Ok(CompletionOutcome::AlreadyProcessed);
        }
        let Some(session) = inner.sessions.get(&completion.session_id).cloned() else {
            return Ok(CompletionOutcome::SessionNotFound);
        };
        let account = inner.accounts.get(&session.account_id).cloned();

        match ledger::plan_completion(session, account, completion, Utc::now())? {
            CompletionWrite::Nothing(outcome) => Ok(outcome),
            CompletionWrite::RecordOnly(disposition, outcome) => {
                inner.record(event, disposition);
                Ok(outcome)
            }
            CompletionWrite::Fulfil {
                session,
                account,
                transaction,
                past_expiry,
            } => {
                if let Some(tx) = &transaction {
                    inner.put_transaction(tx.clone());
                }
                inner.accounts.insert(account.account_id, account.clone());
                inner.sessions.insert(session.session_id.clone(), session);
                inner.record(event, Disposition::Applied);
                Ok(CompletionOutcome::Applied {
                    account,
                    transaction,
                    past_expiry,
                })
            }
        }
    }

    fn expire_checkout(&self, event: &WebhookEvent, session_id: &str) -> Result<ExpiryOutcome> {
        let mut inner = self.inner();
        if inner.events.contains_key(&event.id) {
            return Ok(ExpiryOutcome::AlreadyProcessed);
        }
        let Some(session) = inner.sessions.get_mut(session_id) else {
            return Ok(ExpiryOutcome::SessionNotFound);
        };

        if session.expire() {
            inner.record(event, Disposition::Applied);
            Ok(ExpiryOutcome::Expired)
        } else {
            let status = session.status;
            let disposition = match status {
                SessionStatus::Completed => Disposition::SessionAlreadyCompleted,
                _ => Disposition::Ignored,
            };
            inner.record(event, disposition);
            Ok(ExpiryOutcome::Unchanged(status))
        }
    }

    fn apply_subscription_change(
        &self,
        event: &WebhookEvent,
        account_id: &AccountId,
        change: &SubscriptionChange,
    ) -> Result<ChangeOutcome> {
        let mut inner = self.inner();
        if inner.events.contains_key(&event.id) {
            return Ok(ChangeOutcome::AlreadyProcessed);
        }
        let Some(account) = inner.accounts.get_mut(account_id) else {
            return Ok(ChangeOutcome::AccountNotFound);
        };

        if !ledger::apply_change(account, change, event.created_at) {
            inner.record(event, Disposition::Ignored);
            return Ok(ChangeOutcome::Stale);
        }
        let account = account.clone();
        inner.record(event, Disposition::Applied);
        Ok(ChangeOutcome::Applied(account))
    }

    fn grant_renewal(
        &self,
        event: &WebhookEvent,
        account_id: &AccountId,
        renewal: &SubscriptionRenewal,
        entry: &LedgerEntry,
    ) -> Result<RenewalOutcome> {
        let mut inner = self.inner();
        if inner.events.contains_key(&event.id) {
            return Ok(RenewalOutcome::AlreadyProcessed);
        }
        let account = inner.accounts.get(account_id).cloned();
        let invoice_granted = inner.renewed_invoices.contains_key(&renewal.invoice_id);

        match ledger::plan_renewal(account, renewal, invoice_granted, entry)? {
            RenewalWrite::Nothing(outcome) => Ok(outcome),
            RenewalWrite::RecordOnly(outcome) => {
                inner.record(event, Disposition::Ignored);
                Ok(outcome)
            }
            RenewalWrite::Grant {
                account,
                transaction,
            } => {
                inner.accounts.insert(account.account_id, account.clone());
                inner
                    .renewed_invoices
                    .insert(renewal.invoice_id.clone(), transaction.id);
                inner.put_transaction(transaction.clone());
                inner.record(event, Disposition::Applied);
                Ok(RenewalOutcome::Applied {
                    account,
                    transaction,
                })
            }
        }
    }

    fn record_anomaly(&self, record: &ProcessedEvent, anomaly: &Anomaly) -> Result<bool> {
        let mut inner = self.inner();
        if inner.events.contains_key(&record.event_id) {
            return Ok(false);
        }
        inner.events.insert(record.event_id.clone(), record.clone());
        inner.anomalies.push(anomaly.clone());
        Ok(true)
    }

    fn list_anomalies(&self, limit: usize) -> Result<Vec<Anomaly>> {
        Ok(self.inner().anomalies.iter().rev().take(limit).cloned().collect())
    }
}
