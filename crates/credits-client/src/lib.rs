//! Credits Client SDK.
//!
//! This crate provides a client library for the report dispatcher and UI backends to
//! interact with the credits API.
//!
//! # Example
//!
//! ```no_run
//! use credits_client::{CheckoutRequest, CreditsClient};
//! use credits_core::{AccountId, ReportType};
//!
//! # async fn example() -> Result<(), credits_client::ClientError> {
//! let client = CreditsClient::new(
//!     "http://credits.billing.svc:8080",
//!     "your-service-api-key",
//! )?;
//! let account_id: AccountId = "6f1c2a7e-4d8b-4f3e-9a51-0c2d7b8e9f10".parse().unwrap();
//!
//! let access = client
//!     .check_report_access(&account_id, ReportType::SpendBaseline)
//!     .await?;
//!
//! if access.can_generate {
//!     let consumed = client
//!         .consume_report(&account_id, ReportType::SpendBaseline, "report-123")
//!         .await?;
//!     println!("{} credits left", consumed.credits_remaining);
//! } else {
//!     let checkout = client
//!         .create_checkout(&CheckoutRequest::new(account_id, "credits_10"))
//!         .await?;
//!     println!("Redirect to {}", checkout.checkout_url);
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod client;
mod error;
mod types;

pub use client::{ClientOptions, CreditsClient};
pub use error::ClientError;
pub use types::*;
