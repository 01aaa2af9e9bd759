//! Core types for the report credits billing service.
//!
//! This crate provides the foundational types shared by the store, the HTTP service
//! and the client SDK:
//!
//! - **Identifiers**: `AccountId`, `TransactionId`, `AnomalyId`
//! - **Accounts**: `Account`, `Tier`, `SubscriptionStatus`
//! - **Catalog**: `Catalog`, `CreditPack`, `SubscriptionPlan`, `Product`, `ReportType`
//! - **Checkout**: `PurchaseIntent`, `CheckoutSession`, `SessionStatus`
//! - **Credits**: `CreditTransaction`, `LedgerEntry`, `TransactionType`
//! - **Webhooks**: `WebhookEvent`, `EventType`, `EventPayload`, `ProcessedEvent`, `Anomaly`
//!
//! # Credit Unit
//!
//! One credit is the unit charged per report generation. Balances are stored as
//! `i64` and never go below zero.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod account;
pub mod catalog;
pub mod checkout;
pub mod credits;
pub mod error;
pub mod ids;
pub mod webhook;

pub use account::{Account, SubscriptionStatus, Tier};
pub use catalog::{Catalog, CreditPack, FreePlan, Product, ReportType, SubscriptionPlan};
pub use checkout::{CheckoutSession, PurchaseIntent, SessionStatus};
pub use credits::{CreditTransaction, LedgerEntry, TransactionType, UsageStats};
pub use error::{BillingError, Result};
pub use ids::{AccountId, AnomalyId, IdError, TransactionId};
pub use webhook::{
    Anomaly, AnomalyKind, BillingReason, CheckoutPayload, Disposition, EventPayload, EventType,
    InvoicePayload, PaymentStatus, ProcessedEvent, SubscriptionPayload, WebhookEvent,
};
