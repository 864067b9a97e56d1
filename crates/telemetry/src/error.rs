//! Validation Error Types

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors raised when a device sample is rejected
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// Value out of allowed range
    #[error("{field} value {value} is out of range [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// Sample is not newer than the newest sample already in the window
    #[error("Out-of-order sample at {timestamp}: window already holds {newest}")]
    OutOfOrder {
        timestamp: DateTime<Utc>,
        newest: DateTime<Utc>,
    },

    /// Sample timestamp lies too far in the future
    #[error("Sample timestamp {timestamp} is ahead of the clock by {skew_secs}s")]
    FutureTimestamp {
        timestamp: DateTime<Utc>,
        skew_secs: i64,
    },
}
