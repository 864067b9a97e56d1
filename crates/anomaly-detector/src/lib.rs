//! Anomaly Detector
//!
//! Turns per-subject telemetry streams into anomaly findings:
//! - Signal dropout after an online sample
//! - Route deviation from the declared itinerary
//! - Prolonged inactivity outside accommodation
//! - Implausible speed or abrupt stops
//! - Restricted zone (geofence) breaches
//!
//! Rules run in declaration order on every new sample; the most severe hit
//! wins and at most one finding is emitted per sample.

pub mod classifier;
pub mod config;
pub mod finding;
pub mod profile;
mod rules;

pub use classifier::AnomalyClassifier;
pub use config::DetectorConfig;
pub use finding::{AnomalyFinding, AnomalyKind, FindingId, Severity};
pub use profile::SubjectProfile;

use telemetry::{SubjectId, ValidationError};
use thiserror::Error;

/// Detector error types
#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("Invalid sample: {0}")]
    Validation(#[from] ValidationError),

    #[error("Subject not enrolled: {0}")]
    UnknownSubject(SubjectId),

    #[error("Classifier state poisoned: {0}")]
    StatePoisoned(String),
}
