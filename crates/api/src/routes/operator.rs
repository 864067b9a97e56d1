//! Operator alert log

use axum::{extract::State, Json};
use safety_monitor::OperatorAlert;
use serde::Serialize;
use std::sync::Arc;

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct OperatorAlertsResponse {
    pub count: usize,
    pub alerts: Vec<OperatorAlert>,
}

pub async fn list_operator_alerts(State(state): State<Arc<AppState>>) -> Json<OperatorAlertsResponse> {
    let alerts = state.monitor.operator_alerts();
    Json(OperatorAlertsResponse {
        count: alerts.len(),
        alerts,
    })
}
