//! Webhook reconciliation.
//!
//! Verified provider events are applied to the ledger exactly once. Duplicate
//! deliveries are detected through the processed-event record; the store re-checks it
//! under the account lock, so parallel deliveries of one event cannot both apply.
//!
//! Every path other than a signature failure or an unreadable envelope ends in a
//! success outcome, so the provider stops retrying. Storage failures are surfaced and retried, which is
//! safe because every step is idempotent.

use std::sync::Arc;

use serde::Serialize;

use credits_core::{
    Anomaly, AnomalyKind, BillingReason, Catalog, CheckoutPayload, Disposition, EventPayload,
    EventType, InvoicePayload, LedgerEntry, ProcessedEvent, SubscriptionPayload, WebhookEvent,
};
use credits_store::{
    ChangeOutcome, CheckoutCompletion, CompletionOutcome, ExpiryOutcome, RenewalOutcome, Store,
    StoreError, SubscriptionChange, SubscriptionRenewal,
};

use crate::provider::PaymentProvider;

/// Errors from [`WebhookReconciler::handle`].
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// Signature missing or not valid. Nothing was read or written.
    #[error("invalid webhook signature: {0}")]
    InvalidSignature(String),

    /// The verified payload has no readable event ID or type.
    #[error("malformed webhook event: {0}")]
    MalformedEvent(String),

    /// Storage failure. The provider should retry.
    #[error(transparent)]
    Storage(#[from] StoreError),
}

/// What happened to an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Effects were applied.
    Applied,
    /// The event was processed before. Nothing changed.
    Duplicate,
    /// Recorded without effect.
    Ignored,
    /// Could not be applied; an anomaly was recorded.
    Anomaly,
}

/// Result of handling one delivery.
#[derive(Debug, Clone, Serialize)]
pub struct Reconciled {
    /// Provider event ID.
    pub event_id: String,
    /// Outcome.
    pub outcome: Outcome,
}

/// Applies verified provider events to the ledger.
pub struct WebhookReconciler {
    store: Arc<dyn Store>,
    provider: Arc<dyn PaymentProvider>,
    catalog: Catalog,
}

impl WebhookReconciler {
    /// Create a reconciler. The catalog prices renewal grants.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, provider: Arc<dyn PaymentProvider>, catalog: Catalog) -> Self {
        Self {
            store,
            provider,
            catalog,
        }
    }

    /// Verify, decode and apply one webhook delivery.
    pub fn handle(
        &self,
        payload: &str,
        signature: Option<&str>,
    ) -> Result<Reconciled, ReconcileError> {
        let signature = signature
            .ok_or_else(|| ReconcileError::InvalidSignature("missing signature header".into()))?;

        self.provider
            .verify_signature(payload, signature)
            .map_err(|e| {
                tracing::warn!(provider = self.provider.name(), error = %e, "Rejected webhook signature");
                ReconcileError::InvalidSignature(e.to_string())
            })?;

        let event = self
            .provider
            .parse_event(payload)
            .map_err(|e| ReconcileError::MalformedEvent(e.to_string()))?;

        tracing::info!(
            event_id = %event.id,
            event_type = %event.event_type.as_str(),
            "Received webhook"
        );

        if self.store.is_event_processed(&event.id)? {
            tracing::debug!(event_id = %event.id, "Duplicate webhook delivery");
            return Ok(self.reconciled(&event, Outcome::Duplicate));
        }

        let outcome = match (&event.event_type, &event.payload) {
            (EventType::CheckoutCompleted, EventPayload::Checkout(checkout)) => {
                self.checkout_completed(&event, checkout)?
            }
            (EventType::CheckoutExpired, EventPayload::Checkout(checkout)) => {
                self.checkout_expired(&event, checkout)?
            }
            (EventType::SubscriptionUpdated, EventPayload::Subscription(subscription)) => {
                let change = SubscriptionChange::Update {
                    subscription_id: subscription.subscription_id.clone(),
                    tier: subscription.tier,
                    status: subscription.status,
                };
                self.subscription_changed(&event, subscription, &change)?
            }
            (EventType::SubscriptionDeleted, EventPayload::Subscription(subscription)) => {
                let change = SubscriptionChange::Cancel {
                    subscription_id: subscription.subscription_id.clone(),
                };
                self.subscription_changed(&event, subscription, &change)?
            }
            (EventType::InvoicePaid, EventPayload::Invoice(invoice)) => {
                self.invoice_paid(&event, invoice)?
            }
            (_, EventPayload::Malformed { reason }) => {
                self.anomaly(&event, AnomalyKind::MalformedPayload, reason)?
            }
            _ => {
                tracing::debug!(event_type = %event.event_type.as_str(), "Unhandled webhook event");
                self.ignore(&event)?
            }
        };

        Ok(self.reconciled(&event, outcome))
    }

    #[allow(clippy::unused_self)]
    fn reconciled(&self, event: &WebhookEvent, outcome: Outcome) -> Reconciled {
        Reconciled {
            event_id: event.id.clone(),
            outcome,
        }
    }

    fn checkout_completed(
        &self,
        event: &WebhookEvent,
        checkout: &CheckoutPayload,
    ) -> Result<Outcome, StoreError> {
        if !checkout.payment_status.is_settled() {
            tracing::info!(
                session_id = %checkout.session_id,
                payment_status = ?checkout.payment_status,
                "Checkout session not paid yet, skipping"
            );
            return self.ignore(event);
        }

        let completion = CheckoutCompletion {
            session_id: checkout.session_id.clone(),
            customer_id: checkout.customer_id.clone(),
            subscription_id: checkout.subscription_id.clone(),
        };

        let outcome = match self.store.complete_checkout(event, &completion)? {
            CompletionOutcome::Applied {
                account,
                transaction,
                past_expiry,
            } => {
                if past_expiry {
                    tracing::warn!(
                        session_id = %checkout.session_id,
                        account_id = %account.account_id,
                        "Honouring completion for session past its expiry"
                    );
                }
                tracing::info!(
                    session_id = %checkout.session_id,
                    account_id = %account.account_id,
                    credits_granted = %transaction.as_ref().map_or(0, |tx| tx.amount),
                    transaction_id = ?transaction.as_ref().map(|tx| tx.id),
                    new_balance = %account.balance,
                    tier = %account.tier.as_str(),
                    "Checkout fulfilled"
                );
                Outcome::Applied
            }
            CompletionOutcome::AlreadyProcessed => Outcome::Duplicate,
            CompletionOutcome::AlreadyCompleted => {
                tracing::info!(
                    session_id = %checkout.session_id,
                    event_id = %event.id,
                    "Session already completed by an earlier event"
                );
                Outcome::Ignored
            }
            CompletionOutcome::SessionExpired => {
                tracing::warn!(
                    session_id = %checkout.session_id,
                    event_id = %event.id,
                    "Completion for an expired session, not fulfilled"
                );
                Outcome::Ignored
            }
            CompletionOutcome::SessionNotFound => self.anomaly(
                event,
                AnomalyKind::UnknownSession,
                &checkout.session_id,
            )?,
            CompletionOutcome::AccountNotFound(account_id) => {
                self.anomaly(event, AnomalyKind::AccountNotFound, &account_id.to_string())?
            }
        };

        Ok(outcome)
    }

    fn checkout_expired(
        &self,
        event: &WebhookEvent,
        checkout: &CheckoutPayload,
    ) -> Result<Outcome, StoreError> {
        let outcome = match self.store.expire_checkout(event, &checkout.session_id)? {
            ExpiryOutcome::Expired => {
                tracing::info!(session_id = %checkout.session_id, "Checkout session expired");
                Outcome::Applied
            }
            ExpiryOutcome::Unchanged(status) => {
                tracing::debug!(
                    session_id = %checkout.session_id,
                    status = ?status,
                    "Expiry for a session that is already terminal"
                );
                Outcome::Ignored
            }
            ExpiryOutcome::AlreadyProcessed => Outcome::Duplicate,
            ExpiryOutcome::SessionNotFound => {
                self.anomaly(event, AnomalyKind::UnknownSession, &checkout.session_id)?
            }
        };

        Ok(outcome)
    }

    fn subscription_changed(
        &self,
        event: &WebhookEvent,
        subscription: &SubscriptionPayload,
        change: &SubscriptionChange,
    ) -> Result<Outcome, StoreError> {
        let Some(account_id) = subscription.account_id else {
            return self.anomaly(
                event,
                AnomalyKind::MissingAccountReference,
                &subscription.subscription_id,
            );
        };

        let outcome = match self
            .store
            .apply_subscription_change(event, &account_id, change)?
        {
            ChangeOutcome::Applied(account) => {
                tracing::info!(
                    account_id = %account_id,
                    subscription_id = %subscription.subscription_id,
                    tier = %account.tier.as_str(),
                    status = ?account.subscription_status,
                    "Subscription state updated"
                );
                Outcome::Applied
            }
            ChangeOutcome::Stale => {
                tracing::info!(
                    account_id = %account_id,
                    event_id = %event.id,
                    "Out-of-order subscription event ignored"
                );
                Outcome::Ignored
            }
            ChangeOutcome::AlreadyProcessed => Outcome::Duplicate,
            ChangeOutcome::AccountNotFound => {
                self.anomaly(event, AnomalyKind::AccountNotFound, &account_id.to_string())?
            }
        };

        Ok(outcome)
    }

    fn invoice_paid(
        &self,
        event: &WebhookEvent,
        invoice: &InvoicePayload,
    ) -> Result<Outcome, StoreError> {
        // The first invoice is paid through checkout, which already granted.
        let (BillingReason::SubscriptionCycle, Some(subscription_id)) =
            (invoice.billing_reason, invoice.subscription_id.as_ref())
        else {
            tracing::debug!(
                invoice_id = %invoice.invoice_id,
                billing_reason = ?invoice.billing_reason,
                "Invoice is not a subscription renewal, skipping"
            );
            return self.ignore(event);
        };
        let Some(account_id) = invoice.account_id else {
            return self.anomaly(
                event,
                AnomalyKind::MissingAccountReference,
                &invoice.invoice_id,
            );
        };

        let tier = match invoice.tier {
            Some(tier) => tier,
            None => match self.store.get_account(&account_id)? {
                Some(account) => account.tier,
                None => {
                    return self.anomaly(event, AnomalyKind::AccountNotFound, &account_id.to_string())
                }
            },
        };
        let Some(plan) = self
            .catalog
            .plan_for_tier(tier)
            .filter(|plan| plan.monthly_credits > 0)
        else {
            tracing::warn!(
                invoice_id = %invoice.invoice_id,
                tier = %tier.as_str(),
                "No plan with monthly credits for renewal tier"
            );
            return self.ignore(event);
        };

        let renewal = SubscriptionRenewal {
            invoice_id: invoice.invoice_id.clone(),
            subscription_id: subscription_id.clone(),
        };
        let entry =
            LedgerEntry::subscription_renewal(plan.monthly_credits, &plan.name, &invoice.invoice_id);

        let outcome = match self
            .store
            .grant_renewal(event, &account_id, &renewal, &entry)?
        {
            RenewalOutcome::Applied {
                account,
                transaction,
            } => {
                tracing::info!(
                    account_id = %account_id,
                    invoice_id = %invoice.invoice_id,
                    subscription_id = %subscription_id,
                    credits_granted = %transaction.amount,
                    new_balance = %account.balance,
                    "Subscription renewal credits granted"
                );
                Outcome::Applied
            }
            RenewalOutcome::SubscriptionEnded => {
                tracing::info!(
                    account_id = %account_id,
                    subscription_id = %subscription_id,
                    "Renewal for a deleted subscription ignored"
                );
                Outcome::Ignored
            }
            RenewalOutcome::InvoiceAlreadyGranted => {
                tracing::debug!(
                    invoice_id = %invoice.invoice_id,
                    event_id = %event.id,
                    "Invoice already granted by another event"
                );
                Outcome::Ignored
            }
            RenewalOutcome::AlreadyProcessed => Outcome::Duplicate,
            RenewalOutcome::AccountNotFound => {
                self.anomaly(event, AnomalyKind::AccountNotFound, &account_id.to_string())?
            }
        };

        Ok(outcome)
    }

    fn ignore(&self, event: &WebhookEvent) -> Result<Outcome, StoreError> {
        let recorded = self
            .store
            .record_event(&ProcessedEvent::new(event, Disposition::Ignored))?;
        Ok(if recorded {
            Outcome::Ignored
        } else {
            Outcome::Duplicate
        })
    }

    fn anomaly(
        &self,
        event: &WebhookEvent,
        kind: AnomalyKind,
        detail: &str,
    ) -> Result<Outcome, StoreError> {
        let anomaly = Anomaly::new(event, kind, detail);
        let recorded = self
            .store
            .record_anomaly(&ProcessedEvent::new(event, Disposition::Anomaly), &anomaly)?;

        if !recorded {
            return Ok(Outcome::Duplicate);
        }

        tracing::error!(
            event_id = %event.id,
            event_type = %event.event_type.as_str(),
            kind = ?kind,
            detail = %detail,
            anomaly_id = %anomaly.id,
            "Webhook could not be applied, anomaly recorded"
        );
        Ok(Outcome::Anomaly)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use credits_core::{
        Account, AccountId, Catalog, CheckoutSession, SessionStatus, SubscriptionStatus, Tier,
    };
    use credits_store::MemoryStore;
    use serde_json::json;

    use crate::provider::FakeProvider;

    struct Fixture {
        store: Arc<MemoryStore>,
        provider: Arc<FakeProvider>,
        reconciler: WebhookReconciler,
        account_id: AccountId,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let provider = Arc::new(FakeProvider::new(Some("whsec_test".into())));
        let account_id = AccountId::generate();
        store.create_account(&Account::new(account_id)).unwrap();
        let reconciler =
            WebhookReconciler::new(store.clone(), provider.clone(), Catalog::default());
        Fixture {
            store,
            provider,
            reconciler,
            account_id,
        }
    }

    impl Fixture {
        fn open_session(&self, product_id: &str) -> String {
            let session_id = format!("cs_test_{}", uuid::Uuid::new_v4().simple());
            let now = Utc::now();
            let session = CheckoutSession::new(
                session_id.clone(),
                self.account_id,
                Catalog::default().resolve(product_id).unwrap(),
                now,
                now + Duration::hours(24),
            );
            self.store.put_checkout_session(&session).unwrap();
            session_id
        }

        fn deliver(&self, payload: &str) -> Result<Reconciled, ReconcileError> {
            let signature = self.provider.sign(payload).unwrap();
            self.reconciler.handle(payload, Some(&signature))
        }

        fn balance(&self) -> i64 {
            self.store
                .get_account(&self.account_id)
                .unwrap()
                .unwrap()
                .balance
        }
    }

    fn completed(event_id: &str, session_id: &str, payment_status: &str) -> String {
        json!({
            "id": event_id,
            "type": "checkout.session.completed",
            "created": Utc::now().timestamp(),
            "data": {"object": {"id": session_id, "payment_status": payment_status}}
        })
        .to_string()
    }

    #[test]
    fn missing_signature_is_rejected() {
        let f = fixture();
        let session_id = f.open_session("credits_10");
        let result = f.reconciler.handle(&completed("evt_1", &session_id, "paid"), None);
        assert!(matches!(result, Err(ReconcileError::InvalidSignature(_))));
        assert_eq!(f.balance(), 0);
    }

    #[test]
    fn forged_signature_is_rejected() {
        let f = fixture();
        let session_id = f.open_session("credits_10");
        let payload = completed("evt_1", &session_id, "paid");
        let forged = format!("t={},v1={}", Utc::now().timestamp(), "ab".repeat(32));

        let result = f.reconciler.handle(&payload, Some(&forged));

        assert!(matches!(result, Err(ReconcileError::InvalidSignature(_))));
        assert_eq!(f.balance(), 0);
        assert!(!f.store.is_event_processed("evt_1").unwrap());
    }

    #[test]
    fn completion_grants_once() {
        let f = fixture();
        let session_id = f.open_session("credits_10");
        let payload = completed("evt_1", &session_id, "paid");

        assert_eq!(f.deliver(&payload).unwrap().outcome, Outcome::Applied);
        assert_eq!(f.deliver(&payload).unwrap().outcome, Outcome::Duplicate);
        assert_eq!(f.balance(), 10);
    }

    #[test]
    fn second_completion_event_for_same_session_is_a_no_op() {
        let f = fixture();
        let session_id = f.open_session("credits_10");

        f.deliver(&completed("evt_1", &session_id, "paid")).unwrap();
        let second = f.deliver(&completed("evt_2", &session_id, "paid")).unwrap();

        assert_eq!(second.outcome, Outcome::Ignored);
        assert_eq!(f.balance(), 10);
        let record = f.store.get_processed_event("evt_2").unwrap().unwrap();
        assert_eq!(record.disposition, Disposition::SessionAlreadyCompleted);
    }

    #[test]
    fn unpaid_completion_is_ignored() {
        let f = fixture();
        let session_id = f.open_session("credits_10");

        let result = f.deliver(&completed("evt_1", &session_id, "unpaid")).unwrap();

        assert_eq!(result.outcome, Outcome::Ignored);
        assert_eq!(f.balance(), 0);
        let session = f.store.get_checkout_session(&session_id).unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Pending);
    }

    #[test]
    fn expired_session_is_not_credited() {
        let f = fixture();
        let session_id = f.open_session("credits_10");
        let expired = json!({
            "id": "evt_exp",
            "type": "checkout.session.expired",
            "created": Utc::now().timestamp(),
            "data": {"object": {"id": session_id, "payment_status": "unpaid"}}
        })
        .to_string();

        assert_eq!(f.deliver(&expired).unwrap().outcome, Outcome::Applied);
        let late = f.deliver(&completed("evt_late", &session_id, "paid")).unwrap();

        assert_eq!(late.outcome, Outcome::Ignored);
        assert_eq!(f.balance(), 0);
        let session = f.store.get_checkout_session(&session_id).unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Expired);
    }

    #[test]
    fn unknown_session_records_anomaly() {
        let f = fixture();

        let result = f.deliver(&completed("evt_1", "cs_unknown", "paid")).unwrap();

        assert_eq!(result.outcome, Outcome::Anomaly);
        let anomalies = f.store.list_anomalies(10).unwrap();
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].kind, AnomalyKind::UnknownSession);
        assert_eq!(anomalies[0].detail, "cs_unknown");
        assert_eq!(
            f.deliver(&completed("evt_1", "cs_unknown", "paid"))
                .unwrap()
                .outcome,
            Outcome::Duplicate
        );
        assert_eq!(f.store.list_anomalies(10).unwrap().len(), 1);
    }

    #[test]
    fn subscription_checkout_activates_tier() {
        let f = fixture();
        let session_id = f.open_session("pro");
        let payload = json!({
            "id": "evt_sub",
            "type": "checkout.session.completed",
            "created": Utc::now().timestamp(),
            "data": {"object": {
                "id": session_id,
                "payment_status": "paid",
                "customer": "cus_1",
                "subscription": "sub_1"
            }}
        })
        .to_string();

        f.deliver(&payload).unwrap();

        let account = f.store.get_account(&f.account_id).unwrap().unwrap();
        assert_eq!(account.tier, Tier::Pro);
        assert_eq!(account.subscription_status, SubscriptionStatus::Active);
        assert_eq!(account.provider_subscription_id.as_deref(), Some("sub_1"));
        assert_eq!(account.balance, 20);
    }

    #[test]
    fn subscription_without_account_is_an_anomaly() {
        let f = fixture();
        let payload = json!({
            "id": "evt_del",
            "type": "customer.subscription.deleted",
            "created": Utc::now().timestamp(),
            "data": {"object": {"id": "sub_1", "status": "canceled"}}
        })
        .to_string();

        assert_eq!(f.deliver(&payload).unwrap().outcome, Outcome::Anomaly);
        assert_eq!(
            f.store.list_anomalies(10).unwrap()[0].kind,
            AnomalyKind::MissingAccountReference
        );
    }

    #[test]
    fn unknown_event_is_acknowledged() {
        let f = fixture();
        let payload = json!({
            "id": "evt_inv",
            "type": "invoice.finalized",
            "created": Utc::now().timestamp(),
            "data": {"object": {"id": "in_1"}}
        })
        .to_string();

        assert_eq!(f.deliver(&payload).unwrap().outcome, Outcome::Ignored);
        let record = f.store.get_processed_event("evt_inv").unwrap().unwrap();
        assert_eq!(record.event_type, "invoice.finalized");
    }

    #[test]
    fn garbage_payload_is_malformed() {
        let f = fixture();
        assert!(matches!(
            f.deliver("{not json"),
            Err(ReconcileError::MalformedEvent(_))
        ));
    }

    #[test]
    fn authentic_event_with_broken_object_is_recorded_once() {
        let f = fixture();
        let payload = json!({
            "id": "evt_no_status",
            "type": "customer.subscription.updated",
            "created": Utc::now().timestamp(),
            "data": {"object": {"id": "sub_1", "metadata": {"account_id": f.account_id.to_string()}}}
        })
        .to_string();

        assert_eq!(f.deliver(&payload).unwrap().outcome, Outcome::Anomaly);
        assert_eq!(f.deliver(&payload).unwrap().outcome, Outcome::Duplicate);

        let anomalies = f.store.list_anomalies(10).unwrap();
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].kind, AnomalyKind::MalformedPayload);
        let record = f.store.get_processed_event("evt_no_status").unwrap().unwrap();
        assert_eq!(record.disposition, Disposition::Anomaly);
    }

    fn invoice(event_id: &str, event_type: &str, account_id: AccountId, reason: &str) -> String {
        json!({
            "id": event_id,
            "type": event_type,
            "created": Utc::now().timestamp(),
            "data": {"object": {
                "id": "in_1",
                "subscription": "sub_1",
                "billing_reason": reason,
                "subscription_details": {
                    "metadata": {"account_id": account_id.to_string(), "tier": "pro"}
                }
            }}
        })
        .to_string()
    }

    #[test]
    fn renewal_invoice_grants_monthly_credits_once() {
        let f = fixture();
        let paid = invoice("evt_paid", "invoice.paid", f.account_id, "subscription_cycle");
        let succeeded = invoice(
            "evt_succeeded",
            "invoice.payment_succeeded",
            f.account_id,
            "subscription_cycle",
        );

        assert_eq!(f.deliver(&paid).unwrap().outcome, Outcome::Applied);
        assert_eq!(f.deliver(&paid).unwrap().outcome, Outcome::Duplicate);
        assert_eq!(f.deliver(&succeeded).unwrap().outcome, Outcome::Ignored);

        assert_eq!(f.balance(), 20);
        let history = f
            .store
            .list_transactions_by_account(&f.account_id, 10, 0)
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].metadata["invoice_id"], "in_1");
    }

    #[test]
    fn first_invoice_of_subscription_grants_nothing() {
        let f = fixture();
        let payload = invoice("evt_first", "invoice.paid", f.account_id, "subscription_create");

        assert_eq!(f.deliver(&payload).unwrap().outcome, Outcome::Ignored);
        assert_eq!(f.balance(), 0);
    }

    #[test]
    fn renewal_after_deletion_grants_nothing() {
        let f = fixture();
        let deleted = json!({
            "id": "evt_del",
            "type": "customer.subscription.deleted",
            "created": Utc::now().timestamp(),
            "data": {"object": {
                "id": "sub_1",
                "status": "canceled",
                "metadata": {"account_id": f.account_id.to_string()}
            }}
        })
        .to_string();
        f.deliver(&deleted).unwrap();

        let renewal = invoice("evt_renew", "invoice.paid", f.account_id, "subscription_cycle");
        assert_eq!(f.deliver(&renewal).unwrap().outcome, Outcome::Ignored);
        assert_eq!(f.balance(), 0);
    }
}
