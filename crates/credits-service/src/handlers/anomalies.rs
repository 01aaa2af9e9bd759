//! Reconciliation anomaly listing for operators.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use credits_core::Anomaly;

use crate::auth::ServiceAuth;
use crate::error::ApiError;
use crate::state::AppState;

/// Anomaly list query parameters.
#[derive(Debug, Deserialize)]
pub struct ListAnomaliesQuery {
    /// Maximum number of anomalies to return (default: 50, max: 500).
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

/// Anomaly list response.
#[derive(Debug, Serialize)]
pub struct ListAnomaliesResponse {
    /// Anomalies, newest first.
    pub anomalies: Vec<Anomaly>,
}

/// List webhooks that could not be applied.
pub async fn list_anomalies(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Query(query): Query<ListAnomaliesQuery>,
) -> Result<Json<ListAnomaliesResponse>, ApiError> {
    let anomalies = state.store.list_anomalies(query.limit.min(500))?;
    Ok(Json(ListAnomaliesResponse { anomalies }))
}
