//! Ledger audit queries

use axum::{
    extract::{Query, State},
    Json,
};
use ledger::{LedgerEntry, LedgerQuery};
use serde::Serialize;
use std::sync::Arc;

use crate::error::ApiError;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct LedgerResponse {
    pub count: usize,
    pub entries: Vec<LedgerEntry>,
}

/// Filter by `subject_id`, `cascade_id`, `since` and `until` (RFC 3339)
pub async fn query_ledger(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LedgerQuery>,
) -> Result<Json<LedgerResponse>, ApiError> {
    if let (Some(since), Some(until)) = (query.since, query.until) {
        if since > until {
            return Err(ApiError::BadRequest("since must not be after until".to_string()));
        }
    }
    let entries = state.monitor.query(&query).await?;
    Ok(Json(LedgerResponse {
        count: entries.len(),
        entries,
    }))
}
