//! Account mutations shared by the storage backends.
//!
//! Functions here work on in-memory copies. A backend persists the results only when
//! every step succeeded, so a failed step leaves stored state untouched.

use chrono::{DateTime, Utc};

use credits_core::{
    Account, CheckoutSession, CreditTransaction, Disposition, LedgerEntry, Product,
    SessionStatus, SubscriptionStatus, TransactionType,
};

use crate::error::Result;
use crate::{
    CheckoutCompletion, CompletionOutcome, RenewalOutcome, SubscriptionChange, SubscriptionRenewal,
};

/// Add credits to `account` and build the transaction.
pub(crate) fn grant(account: &mut Account, entry: &LedgerEntry) -> Result<CreditTransaction> {
    let balance = account.apply_grant(entry.amount)?;
    match entry.transaction_type {
        TransactionType::Purchase => account.lifetime_purchased += entry.amount,
        _ => account.lifetime_granted += entry.amount,
    }
    Ok(CreditTransaction::credit(account.account_id, entry, balance))
}

/// Remove credits from `account` and build the transaction.
pub(crate) fn debit(account: &mut Account, entry: &LedgerEntry) -> Result<CreditTransaction> {
    let balance = account.apply_debit(entry.amount)?;
    Ok(CreditTransaction::debit(account.account_id, entry, balance))
}

/// What completing a session requires the backend to write.
pub(crate) enum CompletionWrite {
    /// Write nothing and return the outcome.
    Nothing(CompletionOutcome),
    /// Write only the processed-event record.
    RecordOnly(Disposition, CompletionOutcome),
    /// Write session, account, transaction and processed-event record together.
    Fulfil {
        session: CheckoutSession,
        account: Account,
        transaction: Option<CreditTransaction>,
        past_expiry: bool,
    },
}

/// Decide what a completion does to `session`, read under the account lock.
pub(crate) fn plan_completion(
    mut session: CheckoutSession,
    account: Option<Account>,
    completion: &CheckoutCompletion,
    now: DateTime<Utc>,
) -> Result<CompletionWrite> {
    match session.status {
        SessionStatus::Completed => {
            return Ok(CompletionWrite::RecordOnly(
                Disposition::SessionAlreadyCompleted,
                CompletionOutcome::AlreadyCompleted,
            ));
        }
        SessionStatus::Expired => {
            return Ok(CompletionWrite::RecordOnly(
                Disposition::SessionExpired,
                CompletionOutcome::SessionExpired,
            ));
        }
        SessionStatus::Pending => {}
    }

    let Some(mut account) = account else {
        return Ok(CompletionWrite::Nothing(CompletionOutcome::AccountNotFound(
            session.account_id,
        )));
    };

    let past_expiry = session.is_past_expiry(now);
    session.complete(now);

    if let Some(customer_id) = &completion.customer_id {
        account.provider_customer_id = Some(customer_id.clone());
    }

    let transaction = match &session.product {
        Product::CreditPack(pack) => Some(grant(
            &mut account,
            &LedgerEntry::purchase(pack.credits, &pack.name, &session.session_id),
        )?),
        Product::Subscription(plan) => {
            account.set_subscription(Some(plan.tier), SubscriptionStatus::Active);
            if let Some(subscription_id) = &completion.subscription_id {
                account.provider_subscription_id = Some(subscription_id.clone());
            }
            if plan.monthly_credits > 0 {
                Some(grant(
                    &mut account,
                    &LedgerEntry::subscription_grant(
                        plan.monthly_credits,
                        &plan.name,
                        &session.session_id,
                    ),
                )?)
            } else {
                None
            }
        }
    };

    Ok(CompletionWrite::Fulfil {
        session,
        account,
        transaction,
        past_expiry,
    })
}

/// What a renewal requires the backend to write.
pub(crate) enum RenewalWrite {
    /// Write nothing and return the outcome.
    Nothing(RenewalOutcome),
    /// Write only the processed-event record, as ignored.
    RecordOnly(RenewalOutcome),
    /// Write account, transaction and processed-event record together.
    Grant {
        account: Account,
        transaction: CreditTransaction,
    },
}

/// Decide what a renewal invoice does to `account`, read under the account lock.
pub(crate) fn plan_renewal(
    account: Option<Account>,
    renewal: &SubscriptionRenewal,
    invoice_granted: bool,
    entry: &LedgerEntry,
) -> Result<RenewalWrite> {
    let Some(mut account) = account else {
        return Ok(RenewalWrite::Nothing(RenewalOutcome::AccountNotFound));
    };
    if invoice_granted {
        return Ok(RenewalWrite::RecordOnly(RenewalOutcome::InvoiceAlreadyGranted));
    }
    if account.has_ended_subscription(&renewal.subscription_id) {
        return Ok(RenewalWrite::RecordOnly(RenewalOutcome::SubscriptionEnded));
    }
    let transaction = grant(&mut account, entry)?;
    Ok(RenewalWrite::Grant {
        account,
        transaction,
    })
}

/// Apply a subscription change to `account`.
///
/// Returns `false` and leaves the account untouched when an update is older than the
/// last applied event or names a deleted subscription. Cancellation is terminal and
/// applies regardless of ordering.
pub(crate) fn apply_change(
    account: &mut Account,
    change: &SubscriptionChange,
    event_at: DateTime<Utc>,
) -> bool {
    match change {
        SubscriptionChange::Update {
            subscription_id,
            tier,
            status,
        } => {
            if account.is_stale_subscription_event(event_at)
                || account.has_ended_subscription(subscription_id)
            {
                return false;
            }
            account.set_subscription(*tier, *status);
            account.provider_subscription_id = Some(subscription_id.clone());
        }
        SubscriptionChange::Cancel { subscription_id } => {
            account.cancel_subscription(subscription_id);
        }
    }
    account.subscription_event_at = Some(
        account
            .subscription_event_at
            .map_or(event_at, |last| last.max(event_at)),
    );
    true
}
