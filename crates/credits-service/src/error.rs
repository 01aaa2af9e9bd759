//! API error types and responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use credits_core::BillingError;
use credits_store::StoreError;

use crate::checkout::CheckoutError;
use crate::reconciler::ReconcileError;

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Unauthorized - missing or invalid credentials.
    #[error("unauthorized")]
    Unauthorized,

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad request - invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Conflict - resource already exists.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Product identifier not in the catalog.
    #[error("invalid product: {0}")]
    InvalidProduct(String),

    /// Webhook signature missing or not valid.
    #[error("invalid signature")]
    InvalidSignature,

    /// Insufficient credits.
    #[error("insufficient credits: balance={balance}, required={required}")]
    InsufficientCredits {
        /// Current balance.
        balance: i64,
        /// Required amount.
        required: i64,
    },

    /// The payment provider could not be reached in time.
    #[error("payment provider unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match &self {
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                self.to_string(),
                None,
            ),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone(), None),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone(), None),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg.clone(), None),
            Self::InvalidProduct(product_id) => (
                StatusCode::BAD_REQUEST,
                "invalid_product",
                format!("Unknown product: {product_id}"),
                Some(serde_json::json!({ "product_id": product_id })),
            ),
            Self::InvalidSignature => (
                StatusCode::BAD_REQUEST,
                "invalid_signature",
                "Webhook signature verification failed".to_string(),
                None,
            ),
            Self::InsufficientCredits { balance, required } => (
                StatusCode::PAYMENT_REQUIRED,
                "insufficient_credits",
                self.to_string(),
                Some(serde_json::json!({
                    "balance": balance,
                    "required": required
                })),
            ),
            Self::UpstreamUnavailable(msg) => {
                tracing::warn!(error = %msg, "Payment provider unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "upstream_unavailable",
                    "Payment provider is unavailable, try again later".to_string(),
                    None,
                )
            }
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
                details,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => Self::NotFound(format!("{entity} not found: {id}")),
            StoreError::AlreadyExists { entity, id } => {
                Self::Conflict(format!("{entity} already exists: {id}"))
            }
            StoreError::InsufficientCredits { balance, required } => {
                Self::InsufficientCredits { balance, required }
            }
            StoreError::Invalid(msg) => Self::BadRequest(msg),
            StoreError::Database(msg) | StoreError::Serialization(msg) => Self::Internal(msg),
        }
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::InsufficientCredits { balance, required } => {
                Self::InsufficientCredits { balance, required }
            }
            BillingError::InvalidProduct(product_id) => Self::InvalidProduct(product_id),
            other => Self::BadRequest(other.to_string()),
        }
    }
}

impl From<CheckoutError> for ApiError {
    fn from(err: CheckoutError) -> Self {
        match err {
            CheckoutError::InvalidProduct(product_id) => Self::InvalidProduct(product_id),
            CheckoutError::InvalidRedirect { .. } => Self::BadRequest(err.to_string()),
            CheckoutError::AccountNotFound(account_id) => {
                Self::NotFound(format!("account not found: {account_id}"))
            }
            CheckoutError::UpstreamUnavailable(msg) => Self::UpstreamUnavailable(msg),
            CheckoutError::Storage(err) => err.into(),
        }
    }
}

impl From<ReconcileError> for ApiError {
    fn from(err: ReconcileError) -> Self {
        match err {
            ReconcileError::InvalidSignature(_) => Self::InvalidSignature,
            ReconcileError::MalformedEvent(msg) => Self::BadRequest(msg),
            // Anything else must be retried by the provider.
            ReconcileError::Storage(err) => Self::Internal(err.to_string()),
        }
    }
}
