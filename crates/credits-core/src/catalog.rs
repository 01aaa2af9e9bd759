//! Product catalog and report costs.
//!
//! The catalog is configuration: the service loads it from a JSON file when one is
//! configured and falls back to [`Catalog::default`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::BillingError;
use crate::Tier;

/// A one-time credit pack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditPack {
    /// Product identifier used by purchase intents (e.g. `credits_10`).
    pub sku: String,
    /// Display name.
    pub name: String,
    /// Credits granted on completion.
    pub credits: i64,
    /// Price in cents (USD).
    pub price_cents: i64,
}

/// A monthly subscription plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionPlan {
    /// Product identifier used by purchase intents (e.g. `pro`).
    pub product_id: String,
    /// Tier the plan activates.
    pub tier: Tier,
    /// Display name.
    pub name: String,
    /// Monthly price in cents (USD).
    pub price_cents: i64,
    /// Credits granted when the subscription is activated and on each renewal.
    pub monthly_credits: i64,
    /// Whether subscribers may publish reports.
    #[serde(default = "default_can_publish")]
    pub can_publish: bool,
}

fn default_can_publish() -> bool {
    true
}

/// Allowance for accounts without a paid plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreePlan {
    /// Display name.
    pub name: String,
    /// Credits granted once when the account is registered.
    pub signup_credits: i64,
    /// Whether free accounts may publish reports.
    pub can_publish: bool,
}

impl Default for FreePlan {
    fn default() -> Self {
        Self {
            name: "Free".into(),
            signup_credits: 3,
            can_publish: false,
        }
    }
}

/// What a checkout session sells. Snapshotted into the session at initiation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Product {
    /// One-time credit pack.
    CreditPack(CreditPack),
    /// Recurring subscription.
    Subscription(SubscriptionPlan),
}

impl Product {
    /// The catalog identifier of this product.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::CreditPack(pack) => &pack.sku,
            Self::Subscription(plan) => &plan.product_id,
        }
    }

    /// Display name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::CreditPack(pack) => &pack.name,
            Self::Subscription(plan) => &plan.name,
        }
    }

    /// Price in cents.
    #[must_use]
    pub const fn price_cents(&self) -> i64 {
        match self {
            Self::CreditPack(pack) => pack.price_cents,
            Self::Subscription(plan) => plan.price_cents,
        }
    }

    /// Credits granted when the purchase completes.
    #[must_use]
    pub const fn credits_granted(&self) -> i64 {
        match self {
            Self::CreditPack(pack) => pack.credits,
            Self::Subscription(plan) => plan.monthly_credits,
        }
    }

    /// Whether this product is billed as a recurring subscription.
    #[must_use]
    pub const fn is_subscription(&self) -> bool {
        matches!(self, Self::Subscription(_))
    }
}

/// The fixed product catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Catalog {
    /// Credit packs on sale.
    pub credit_packs: Vec<CreditPack>,
    /// Subscription plans on sale.
    pub plans: Vec<SubscriptionPlan>,
    /// Allowance for accounts without a paid plan.
    #[serde(default)]
    pub free_plan: FreePlan,
}

impl Default for Catalog {
    fn default() -> Self {
        Self {
            credit_packs: vec![
                CreditPack {
                    sku: "credits_10".into(),
                    name: "Starter Pack".into(),
                    credits: 10,
                    price_cents: 1900, // $19
                },
                CreditPack {
                    sku: "credits_25".into(),
                    name: "Growth Pack".into(),
                    credits: 25,
                    price_cents: 3900, // $39
                },
                CreditPack {
                    sku: "credits_50".into(),
                    name: "Scale Pack".into(),
                    credits: 50,
                    price_cents: 6900, // $69
                },
            ],
            plans: vec![
                SubscriptionPlan {
                    product_id: "pro".into(),
                    tier: Tier::Pro,
                    name: "Pro Plan".into(),
                    price_cents: 4900, // $49/month
                    monthly_credits: 20,
                    can_publish: true,
                },
                SubscriptionPlan {
                    product_id: "enterprise".into(),
                    tier: Tier::Enterprise,
                    name: "Enterprise Plan".into(),
                    price_cents: 14900, // $149/month
                    monthly_credits: 100,
                    can_publish: true,
                },
            ],
            free_plan: FreePlan::default(),
        }
    }
}

impl Catalog {
    /// Look up a product by identifier.
    ///
    /// # Errors
    ///
    /// Returns `BillingError::InvalidProduct` if no pack or plan has this identifier.
    pub fn resolve(&self, product_id: &str) -> Result<Product, BillingError> {
        if let Some(pack) = self.credit_packs.iter().find(|p| p.sku == product_id) {
            return Ok(Product::CreditPack(pack.clone()));
        }
        if let Some(plan) = self.plans.iter().find(|p| p.product_id == product_id) {
            return Ok(Product::Subscription(plan.clone()));
        }
        Err(BillingError::InvalidProduct(product_id.to_string()))
    }

    /// The plan that activates `tier`, if any.
    #[must_use]
    pub fn plan_for_tier(&self, tier: Tier) -> Option<&SubscriptionPlan> {
        self.plans.iter().find(|p| p.tier == tier)
    }

    /// Whether an account on `tier` may publish reports. A tier with no plan in the
    /// catalog falls back to the free plan.
    #[must_use]
    pub fn can_publish(&self, tier: Tier) -> bool {
        self.plan_for_tier(tier)
            .map_or(self.free_plan.can_publish, |plan| plan.can_publish)
    }

    /// Display name of the plan behind `tier`.
    #[must_use]
    pub fn plan_name(&self, tier: Tier) -> &str {
        self.plan_for_tier(tier)
            .map_or(self.free_plan.name.as_str(), |plan| plan.name.as_str())
    }

    /// Check identifiers are unique and amounts positive.
    ///
    /// # Errors
    ///
    /// Returns `BillingError::InvalidProduct` naming the first offending entry.
    pub fn validate(&self) -> Result<(), BillingError> {
        let mut seen = std::collections::HashSet::new();
        for pack in &self.credit_packs {
            if !seen.insert(pack.sku.as_str()) || pack.credits <= 0 || pack.price_cents <= 0 {
                return Err(BillingError::InvalidProduct(pack.sku.clone()));
            }
        }
        for plan in &self.plans {
            if !seen.insert(plan.product_id.as_str())
                || plan.tier == Tier::None
                || plan.price_cents <= 0
                || plan.monthly_credits < 0
            {
                return Err(BillingError::InvalidProduct(plan.product_id.clone()));
            }
        }
        if self.free_plan.signup_credits < 0 {
            return Err(BillingError::InvalidProduct(self.free_plan.name.clone()));
        }
        Ok(())
    }
}

/// Report types sold against credits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportType {
    /// Conversion tracking readiness audit.
    TrackingReadiness,
    /// Advertising spend baseline.
    SpendBaseline,
    /// Competitor snapshot.
    CompetitorSnapshot,
}

impl ReportType {
    /// All report types, in price order.
    pub const ALL: [Self; 3] = [
        Self::TrackingReadiness,
        Self::SpendBaseline,
        Self::CompetitorSnapshot,
    ];

    /// Credits charged for one report.
    #[must_use]
    pub const fn cost(&self) -> i64 {
        match self {
            Self::TrackingReadiness => 1,
            Self::SpendBaseline => 2,
            Self::CompetitorSnapshot => 3,
        }
    }

    /// Wire name (e.g. `SPEND_BASELINE`).
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::TrackingReadiness => "TRACKING_READINESS",
            Self::SpendBaseline => "SPEND_BASELINE",
            Self::CompetitorSnapshot => "COMPETITOR_SNAPSHOT",
        }
    }
}

impl FromStr for ReportType {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|r| r.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| BillingError::InvalidReportType(s.to_string()))
    }
}

impl fmt::Display for ReportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_catalog_has_three_packs_and_two_tiers() {
        let catalog = Catalog::default();
        assert_eq!(catalog.credit_packs.len(), 3);
        assert_eq!(catalog.plans.len(), 2);
        catalog.validate().unwrap();
    }

    #[test]
    fn resolve_credit_pack() {
        let product = Catalog::default().resolve("credits_10").unwrap();
        assert_eq!(product.credits_granted(), 10);
        assert_eq!(product.price_cents(), 1900);
        assert!(!product.is_subscription());
    }

    #[test]
    fn resolve_subscription_plan() {
        let product = Catalog::default().resolve("enterprise").unwrap();
        match product {
            Product::Subscription(plan) => {
                assert_eq!(plan.tier, Tier::Enterprise);
                assert_eq!(plan.monthly_credits, 100);
            }
            Product::CreditPack(_) => panic!("expected subscription"),
        }
    }

    #[test]
    fn resolve_unknown_product_fails() {
        let result = Catalog::default().resolve("credits_1000");
        assert!(matches!(result, Err(BillingError::InvalidProduct(id)) if id == "credits_1000"));
    }

    #[test]
    fn validate_rejects_duplicate_ids() {
        let mut catalog = Catalog::default();
        let duplicate = catalog.credit_packs[0].clone();
        catalog.credit_packs.push(duplicate);
        assert!(catalog.validate().is_err());
    }

    #[test]
    fn catalog_loads_from_json() {
        let json = r#"{
            "credit_packs": [{"sku": "credits_5", "name": "Mini", "credits": 5, "price_cents": 900}],
            "plans": [{"product_id": "pro", "tier": "pro", "name": "Pro", "price_cents": 4900, "monthly_credits": 20}]
        }"#;
        let catalog: Catalog = serde_json::from_str(json).unwrap();
        catalog.validate().unwrap();
        assert_eq!(catalog.resolve("credits_5").unwrap().credits_granted(), 5);
        assert_eq!(catalog.plan_for_tier(Tier::Pro).unwrap().price_cents, 4900);
        assert!(catalog.plan_for_tier(Tier::Pro).unwrap().can_publish);
        assert_eq!(catalog.free_plan, FreePlan::default());
    }

    #[test]
    fn publishing_requires_a_paid_plan() {
        let catalog = Catalog::default();
        assert!(!catalog.can_publish(Tier::None));
        assert!(catalog.can_publish(Tier::Pro));
        assert!(catalog.can_publish(Tier::Enterprise));
        assert_eq!(catalog.plan_name(Tier::None), "Free");
        assert_eq!(catalog.plan_name(Tier::Enterprise), "Enterprise Plan");
        assert_eq!(catalog.free_plan.signup_credits, 3);
    }

    #[test]
    fn product_snapshot_is_tagged() {
        let product = Catalog::default().resolve("pro").unwrap();
        let json = serde_json::to_value(&product).unwrap();
        assert_eq!(json["kind"], "subscription");
        assert_eq!(json["tier"], "pro");
    }

    #[test]
    fn report_costs() {
        assert_eq!(ReportType::TrackingReadiness.cost(), 1);
        assert_eq!(ReportType::SpendBaseline.cost(), 2);
        assert_eq!(ReportType::CompetitorSnapshot.cost(), 3);
    }

    #[test]
    fn report_type_parses_wire_names() {
        assert_eq!(
            "COMPETITOR_SNAPSHOT".parse::<ReportType>().unwrap(),
            ReportType::CompetitorSnapshot
        );
        assert!("PERSONA".parse::<ReportType>().is_err());
    }
}
