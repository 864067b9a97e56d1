//! HTTP error mapping

use anomaly_detector::DetectorError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use contacts::RegistryError;
use dispatcher::DispatchError;
use safety_monitor::MonitorError;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Error returned by handlers
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Monitor(#[from] MonitorError),

    #[error("{0}")]
    BadRequest(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    status: u16,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Monitor(e) => match e {
                MonitorError::UnknownSubject(_) => StatusCode::NOT_FOUND,
                MonitorError::Detector(DetectorError::Validation(_)) => StatusCode::UNPROCESSABLE_ENTITY,
                MonitorError::Detector(DetectorError::UnknownSubject(_)) => StatusCode::NOT_FOUND,
                MonitorError::Escalation(_) => StatusCode::CONFLICT,
                MonitorError::Registry(RegistryError::InvalidContact { .. }) => StatusCode::UNPROCESSABLE_ENTITY,
                MonitorError::Registry(RegistryError::NoContacts(_) | RegistryError::ContactNotFound(_)) => {
                    StatusCode::NOT_FOUND
                }
                MonitorError::Ledger(_) | MonitorError::Dispatch(DispatchError::Ledger(_)) => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self, "Request failed");
        }
        let body = ErrorBody {
            error: self.to_string(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}
