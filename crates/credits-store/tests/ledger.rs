//! Ledger behaviour shared by every backend, including concurrent access.

#![cfg(feature = "rocksdb-backend")]

use std::sync::Arc;
use std::thread;

use chrono::Utc;
use credits_core::{
    Account, AccountId, Catalog, CheckoutPayload, CheckoutSession, EventPayload, EventType,
    LedgerEntry, PaymentStatus, ReportType, WebhookEvent,
};
use credits_store::{
    CheckoutCompletion, CompletionOutcome, ConsumeOutcome, MemoryStore, RocksStore, Store,
    StoreError,
};
use tempfile::TempDir;

fn backends() -> Vec<(Arc<dyn Store>, Option<TempDir>)> {
    let dir = TempDir::new().unwrap();
    let rocks = RocksStore::open(dir.path()).unwrap();
    vec![
        (Arc::new(MemoryStore::new()), None),
        (Arc::new(rocks), Some(dir)),
    ]
}

fn new_account(store: &dyn Store, balance: i64) -> AccountId {
    let account_id = AccountId::generate();
    store.create_account(&Account::new(account_id)).unwrap();
    if balance > 0 {
        store
            .grant(&account_id, &LedgerEntry::adjustment(balance, "seed"))
            .unwrap();
    }
    account_id
}

fn paid_event(event_id: &str, session_id: &str) -> WebhookEvent {
    WebhookEvent {
        id: event_id.into(),
        event_type: EventType::CheckoutCompleted,
        created_at: Utc::now(),
        payload: EventPayload::Checkout(CheckoutPayload {
            session_id: session_id.into(),
            payment_status: PaymentStatus::Paid,
            customer_id: None,
            subscription_id: None,
        }),
    }
}

#[test]
fn concurrent_grants_and_debits_converge() {
    for (store, _dir) in backends() {
        let account_id = new_account(store.as_ref(), 30);

        let mut handles = Vec::new();
        for i in 0..10 {
            let store = Arc::clone(&store);
            handles.push(thread::spawn(move || {
                store
                    .grant(&account_id, &LedgerEntry::adjustment(10, format!("grant {i}")))
                    .unwrap();
            }));
            let store = Arc::clone(&store);
            handles.push(thread::spawn(move || {
                store
                    .debit(&account_id, &LedgerEntry::adjustment(3, format!("debit {i}")))
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let account = store.get_account(&account_id).unwrap().unwrap();
        assert_eq!(account.balance, 30 + 10 * 10 - 10 * 3);

        let history = store
            .list_transactions_by_account(&account_id, 100, 0)
            .unwrap();
        assert_eq!(history.len(), 21);
        let sum: i64 = history.iter().map(|tx| tx.amount).sum();
        assert_eq!(sum, account.balance);
    }
}

#[test]
fn concurrent_debits_never_overdraw() {
    for (store, _dir) in backends() {
        let account_id = new_account(store.as_ref(), 10);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || store.debit(&account_id, &LedgerEntry::adjustment(3, "report")))
            })
            .collect();

        let mut succeeded = 0;
        for handle in handles {
            match handle.join().unwrap() {
                Ok(_) => succeeded += 1,
                Err(StoreError::InsufficientCredits { .. }) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(succeeded, 3);
        assert_eq!(store.get_account(&account_id).unwrap().unwrap().balance, 1);
    }
}

#[test]
fn parallel_duplicate_deliveries_credit_once() {
    for (store, _dir) in backends() {
        let account_id = new_account(store.as_ref(), 0);
        let now = Utc::now();
        let session = CheckoutSession::new(
            "cs_parallel",
            account_id,
            Catalog::default().resolve("credits_10").unwrap(),
            now,
            now + chrono::Duration::hours(24),
        );
        store.put_checkout_session(&session).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    store
                        .complete_checkout(
                            &paid_event("evt_parallel", "cs_parallel"),
                            &CheckoutCompletion {
                                session_id: "cs_parallel".into(),
                                customer_id: None,
                                subscription_id: None,
                            },
                        )
                        .unwrap()
                })
            })
            .collect();

        let applied = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|outcome| matches!(outcome, CompletionOutcome::Applied { .. }))
            .count();

        assert_eq!(applied, 1);
        assert_eq!(store.get_account(&account_id).unwrap().unwrap().balance, 10);
    }
}

#[test]
fn duplicate_session_handle_is_rejected() {
    for (store, _dir) in backends() {
        let account_id = new_account(store.as_ref(), 0);
        let now = Utc::now();
        let session = CheckoutSession::new(
            "cs_dup",
            account_id,
            Catalog::default().resolve("credits_50").unwrap(),
            now,
            now + chrono::Duration::hours(24),
        );
        store.put_checkout_session(&session).unwrap();
        assert!(matches!(
            store.put_checkout_session(&session),
            Err(StoreError::AlreadyExists { .. })
        ));
    }
}

#[test]
fn parallel_report_retries_debit_once() {
    for (store, _dir) in backends() {
        let account_id = new_account(store.as_ref(), 10);
        let entry = LedgerEntry::report_usage(ReportType::CompetitorSnapshot, "rep_retry");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                let entry = entry.clone();
                thread::spawn(move || {
                    store
                        .consume_report(&account_id, "rep_retry", &entry)
                        .unwrap()
                })
            })
            .collect();

        let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let debited = outcomes
            .iter()
            .filter(|outcome| matches!(outcome, ConsumeOutcome::Debited(_)))
            .count();
        assert_eq!(debited, 1);
        let first = outcomes[0].transaction().id;
        assert!(outcomes.iter().all(|o| o.transaction().id == first));
        assert_eq!(store.get_account(&account_id).unwrap().unwrap().balance, 7);
    }
}

#[test]
fn short_balance_report_can_be_retried_after_top_up() {
    for (store, _dir) in backends() {
        let account_id = new_account(store.as_ref(), 1);
        let entry = LedgerEntry::report_usage(ReportType::SpendBaseline, "rep_short");

        assert!(matches!(
            store.consume_report(&account_id, "rep_short", &entry),
            Err(StoreError::InsufficientCredits { .. })
        ));

        store
            .grant(&account_id, &LedgerEntry::adjustment(5, "top up"))
            .unwrap();
        let outcome = store
            .consume_report(&account_id, "rep_short", &entry)
            .unwrap();
        assert!(matches!(outcome, ConsumeOutcome::Debited(ref tx) if tx.balance_after == 4));
    }
}
