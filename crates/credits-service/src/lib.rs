//! Report credits HTTP API service.
//!
//! This crate provides the HTTP API for the credits service:
//!
//! - Checkout session initiation against a hosted payment provider
//! - Webhook reconciliation that applies each payment event exactly once
//! - Credit balance, transaction history and report consumption
//!
//! # Authentication
//!
//! End users are authenticated in front of this service. Ledger mutations and operator
//! views require the service API key (`x-api-key`); webhooks are authenticated by their
//! signature.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are noisy for Axum handler functions
#![allow(clippy::missing_errors_doc)] // Axum handlers all return Result
#![allow(clippy::unused_async)] // Handlers are async for Axum even when the store is sync

pub mod auth;
pub mod checkout;
pub mod config;
pub mod crypto;
pub mod error;
pub mod handlers;
pub mod provider;
pub mod reconciler;
pub mod routes;
pub mod state;

pub use checkout::{CheckoutError, CheckoutInitiator, CheckoutRedirect};
pub use config::{ConfigError, ServiceConfig};
pub use error::ApiError;
pub use provider::{FakeProvider, PaymentProvider, ProviderError, StripeProvider};
pub use reconciler::{Outcome, ReconcileError, Reconciled, WebhookReconciler};
pub use routes::create_router;
pub use state::AppState;
