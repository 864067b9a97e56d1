//! Safety Monitor
//!
//! Ties the safety core together for each tracked subject:
//! - Validates and classifies incoming telemetry
//! - Drives the escalation state machine and its monitoring timers
//! - Starts notification cascades and watches their outcome
//! - Raises operator alerts when a human has to step in

pub mod config;
pub mod monitor;
pub mod operator;
mod subject;

pub use config::{MonitorConfig, SweepConfig};
pub use monitor::{IngestOutcome, SafetyMonitor};
pub use operator::{OperatorAlert, OperatorAlertKind, OperatorLog};
pub use subject::SubjectStatus;

use anomaly_detector::DetectorError;
use contacts::RegistryError;
use dispatcher::DispatchError;
use escalation::EscalationError;
use ledger::LedgerError;
use telemetry::SubjectId;
use thiserror::Error;

/// Safety monitor errors
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Subject not enrolled: {0}")]
    UnknownSubject(SubjectId),

    #[error(transparent)]
    Detector(#[from] DetectorError),

    #[error(transparent)]
    Escalation(#[from] EscalationError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("Monitor state poisoned: {0}")]
    StatePoisoned(String),
}
