//! Account types.
//!
//! This module defines the account record and the state transitions the ledger applies to it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{BillingError, Result};
use crate::AccountId;

/// A billing account.
///
/// The balance is mutated only through [`Account::apply_grant`] and
/// [`Account::apply_debit`], which keep it non-negative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// The account ID.
    pub account_id: AccountId,

    /// Current credit balance. Never negative.
    pub balance: i64,

    /// Subscription tier.
    pub tier: Tier,

    /// Subscription status.
    pub subscription_status: SubscriptionStatus,

    /// Lifetime credits bought through credit packs.
    pub lifetime_purchased: i64,

    /// Lifetime credits granted by subscriptions.
    pub lifetime_granted: i64,

    /// Lifetime credits consumed.
    pub lifetime_used: i64,

    /// Payment provider customer ID, learned from the first completed checkout.
    pub provider_customer_id: Option<String>,

    /// Payment provider subscription ID for the active subscription.
    pub provider_subscription_id: Option<String>,

    /// Provider creation time of the last subscription event applied.
    /// Older subscription events are stale and not applied.
    #[serde(default)]
    pub subscription_event_at: Option<DateTime<Utc>>,

    /// Provider subscription IDs that were deleted. Deletion is terminal, so later
    /// events for these IDs are never applied.
    #[serde(default)]
    pub ended_subscription_ids: Vec<String>,

    /// When the account was created.
    pub created_at: DateTime<Utc>,

    /// When the account was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Create a new account with zero balance and no subscription.
    #[must_use]
    pub fn new(account_id: AccountId) -> Self {
        let now = Utc::now();
        Self {
            account_id,
            balance: 0,
            tier: Tier::None,
            subscription_status: SubscriptionStatus::Canceled,
            lifetime_purchased: 0,
            lifetime_granted: 0,
            lifetime_used: 0,
            provider_customer_id: None,
            provider_subscription_id: None,
            subscription_event_at: None,
            ended_subscription_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Check if the account can pay for a debit of `amount`.
    #[must_use]
    pub fn has_sufficient_credits(&self, amount: i64) -> bool {
        self.balance >= amount
    }

    /// Check if the account has an active paid subscription.
    #[must_use]
    pub fn has_active_subscription(&self) -> bool {
        self.tier != Tier::None && self.subscription_status == SubscriptionStatus::Active
    }

    /// Add credits and return the new balance.
    ///
    /// # Errors
    ///
    /// Returns `BillingError::InvalidAmount` for non-positive amounts or on overflow.
    pub fn apply_grant(&mut self, amount: i64) -> Result<i64> {
        if amount <= 0 {
            return Err(BillingError::InvalidAmount(format!(
                "grant must be positive, got {amount}"
            )));
        }
        self.balance = self
            .balance
            .checked_add(amount)
            .ok_or_else(|| BillingError::InvalidAmount("balance overflow".into()))?;
        self.updated_at = Utc::now();
        Ok(self.balance)
    }

    /// Remove credits and return the new balance.
    ///
    /// The account is left untouched when the debit fails.
    ///
    /// # Errors
    ///
    /// - `BillingError::InvalidAmount` for non-positive amounts.
    /// - `BillingError::InsufficientCredits` if the balance is lower than `amount`.
    pub fn apply_debit(&mut self, amount: i64) -> Result<i64> {
        if amount <= 0 {
            return Err(BillingError::InvalidAmount(format!(
                "debit must be positive, got {amount}"
            )));
        }
        if !self.has_sufficient_credits(amount) {
            return Err(BillingError::InsufficientCredits {
                balance: self.balance,
                required: amount,
            });
        }
        self.balance -= amount;
        self.lifetime_used += amount;
        self.updated_at = Utc::now();
        Ok(self.balance)
    }

    /// Set the subscription fields.
    ///
    /// `tier` is left unchanged when `None`.
    pub fn set_subscription(&mut self, tier: Option<Tier>, status: SubscriptionStatus) {
        if let Some(tier) = tier {
            self.tier = tier;
        }
        self.subscription_status = status;
        self.updated_at = Utc::now();
    }

    /// Whether a subscription event created at `event_at` is older than the last one applied.
    #[must_use]
    pub fn is_stale_subscription_event(&self, event_at: DateTime<Utc>) -> bool {
        self.subscription_event_at.is_some_and(|last| event_at < last)
    }

    /// Whether the provider subscription `subscription_id` was deleted.
    #[must_use]
    pub fn has_ended_subscription(&self, subscription_id: &str) -> bool {
        self.ended_subscription_ids
            .iter()
            .any(|ended| ended == subscription_id)
    }

    /// End `subscription_id`. When it is the current subscription, or no subscription
    /// is linked, the account drops to tier `None` and status `Canceled`.
    pub fn cancel_subscription(&mut self, subscription_id: &str) {
        if !self.has_ended_subscription(subscription_id) {
            self.ended_subscription_ids.push(subscription_id.to_string());
        }
        let is_current = match self.provider_subscription_id.as_deref() {
            Some(current) => current == subscription_id,
            None => true,
        };
        if is_current {
            self.tier = Tier::None;
            self.subscription_status = SubscriptionStatus::Canceled;
            self.provider_subscription_id = None;
        }
        self.updated_at = Utc::now();
    }
}

/// Subscription tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// No subscription; credits come from packs only.
    None,

    /// Pro plan.
    Pro,

    /// Enterprise plan.
    Enterprise,
}

impl Tier {
    /// Stable lowercase name, also used in provider metadata.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Pro => "pro",
            Self::Enterprise => "enterprise",
        }
    }

    /// Parse the lowercase name written by [`Tier::as_str`].
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "none" => Some(Self::None),
            "pro" => Some(Self::Pro),
            "enterprise" => Some(Self::Enterprise),
            _ => None,
        }
    }
}

/// Status of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Subscription is paid up.
    Active,

    /// Payment failed, subscription is past due.
    PastDue,

    /// Subscription ended or never existed.
    Canceled,
}

impl SubscriptionStatus {
    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::PastDue => "past_due",
            Self::Canceled => "canceled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account_with(balance: i64) -> Account {
        let mut account = Account::new(AccountId::generate());
        account.balance = balance;
        account
    }

    #[test]
    fn new_account_has_no_subscription() {
        let account = Account::new(AccountId::generate());
        assert_eq!(account.balance, 0);
        assert_eq!(account.tier, Tier::None);
        assert_eq!(account.subscription_status, SubscriptionStatus::Canceled);
        assert!(!account.has_active_subscription());
    }

    #[test]
    fn grant_adds_to_balance() {
        let mut account = account_with(0);
        assert_eq!(account.apply_grant(10).unwrap(), 10);
        assert_eq!(account.balance, 10);
    }

    #[test]
    fn grant_rejects_non_positive_amounts() {
        let mut account = account_with(5);
        assert!(matches!(
            account.apply_grant(0),
            Err(BillingError::InvalidAmount(_))
        ));
        assert!(matches!(
            account.apply_grant(-3),
            Err(BillingError::InvalidAmount(_))
        ));
        assert_eq!(account.balance, 5);
    }

    #[test]
    fn grant_rejects_overflow() {
        let mut account = account_with(i64::MAX);
        assert!(account.apply_grant(1).is_err());
        assert_eq!(account.balance, i64::MAX);
    }

    #[test]
    fn debit_over_balance_leaves_account_unchanged() {
        let mut account = account_with(2);
        let result = account.apply_debit(3);
        assert!(matches!(
            result,
            Err(BillingError::InsufficientCredits {
                balance: 2,
                required: 3
            })
        ));
        assert_eq!(account.balance, 2);
        assert_eq!(account.lifetime_used, 0);
    }

    #[test]
    fn debit_of_exact_balance_reaches_zero() {
        let mut account = account_with(3);
        assert_eq!(account.apply_debit(3).unwrap(), 0);
        assert_eq!(account.lifetime_used, 3);
    }

    #[test]
    fn cancel_resets_tier_and_status() {
        let mut account = account_with(0);
        account.set_subscription(Some(Tier::Enterprise), SubscriptionStatus::Active);
        account.provider_subscription_id = Some("sub_123".into());

        account.cancel_subscription("sub_123");

        assert_eq!(account.tier, Tier::None);
        assert_eq!(account.subscription_status, SubscriptionStatus::Canceled);
        assert!(account.provider_subscription_id.is_none());
        assert!(account.has_ended_subscription("sub_123"));
    }

    #[test]
    fn cancelling_a_replaced_subscription_keeps_the_current_one() {
        let mut account = account_with(0);
        account.set_subscription(Some(Tier::Pro), SubscriptionStatus::Active);
        account.provider_subscription_id = Some("sub_new".into());

        account.cancel_subscription("sub_old");
        account.cancel_subscription("sub_old");

        assert_eq!(account.tier, Tier::Pro);
        assert_eq!(account.subscription_status, SubscriptionStatus::Active);
        assert_eq!(account.ended_subscription_ids, vec!["sub_old".to_string()]);
    }

    #[test]
    fn accounts_stored_before_ended_ids_still_decode() {
        let mut value = serde_json::to_value(Account::new(AccountId::generate())).unwrap();
        value.as_object_mut().unwrap().remove("ended_subscription_ids");
        let account: Account = serde_json::from_value(value).unwrap();
        assert!(account.ended_subscription_ids.is_empty());
    }

    #[test]
    fn status_update_without_tier_keeps_tier() {
        let mut account = account_with(0);
        account.set_subscription(Some(Tier::Pro), SubscriptionStatus::Active);
        account.set_subscription(None, SubscriptionStatus::PastDue);
        assert_eq!(account.tier, Tier::Pro);
        assert_eq!(account.subscription_status, SubscriptionStatus::PastDue);
    }

    #[test]
    fn older_subscription_events_are_stale() {
        let mut account = account_with(0);
        let now = Utc::now();
        assert!(!account.is_stale_subscription_event(now));

        account.subscription_event_at = Some(now);
        assert!(account.is_stale_subscription_event(now - chrono::Duration::seconds(1)));
        assert!(!account.is_stale_subscription_event(now));
    }

    #[test]
    fn tier_names_parse_back() {
        for tier in [Tier::None, Tier::Pro, Tier::Enterprise] {
            assert_eq!(Tier::parse(tier.as_str()), Some(tier));
        }
        assert_eq!(Tier::parse("PRO"), Some(Tier::Pro));
        assert_eq!(Tier::parse("gold"), None);
    }
}
