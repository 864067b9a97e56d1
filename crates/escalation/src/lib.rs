//! Escalation
//!
//! Decides what happens to a finding and tracks each subject's incident:
//! - Policy: ignore, monitor or escalate
//! - State machine: at most one active incident per subject
//! - Monitoring timers that auto-escalate (or lapse) on expiry

pub mod machine;
pub mod policy;
pub mod state;
pub mod timers;

pub use machine::{EscalationMachine, Resolution, Transition};
pub use policy::{Decision, EscalationPolicy, MinConfidence, PolicyConfig};
pub use state::{CascadeId, EscalationState};
pub use timers::MonitorTimers;

use anomaly_detector::FindingId;
use telemetry::SubjectId;
use thiserror::Error;

/// Escalation error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EscalationError {
    #[error("No active incident for subject {0}")]
    NoActiveIncident(SubjectId),

    #[error("Finding {got} is not part of the active incident (opened by {expected})")]
    FindingMismatch { expected: FindingId, got: FindingId },
}
