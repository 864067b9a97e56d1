//! Telemetry ingestion

use axum::{extract::State, Json};
use safety_monitor::IngestOutcome;
use std::sync::Arc;
use telemetry::DeviceSample;

use crate::error::ApiError;
use crate::AppState;

/// Accept one device sample
pub async fn ingest(
    State(state): State<Arc<AppState>>,
    Json(sample): Json<DeviceSample>,
) -> Result<Json<IngestOutcome>, ApiError> {
    let outcome = state.monitor.ingest(sample).await?;
    Ok(Json(outcome))
}
