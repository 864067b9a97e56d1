//! Anomaly findings

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use telemetry::{Location, SubjectId};
use uuid::Uuid;

/// Identifier of a recorded finding
pub type FindingId = Uuid;

/// Finding severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    /// High and critical findings escalate without observation
    pub fn is_urgent(&self) -> bool {
        *self >= Severity::High
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of anomaly, in rule declaration order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnomalyKind {
    SignalDropout,
    RouteDeviation,
    ProlongedInactivity,
    SpeedAnomaly,
    GeofenceBreach,
    /// Raised by the subject directly, not by a rule
    PanicButton,
}

impl AnomalyKind {
    /// Every kind, rules first
    pub const ALL: [AnomalyKind; 6] = [
        AnomalyKind::SignalDropout,
        AnomalyKind::RouteDeviation,
        AnomalyKind::ProlongedInactivity,
        AnomalyKind::SpeedAnomaly,
        AnomalyKind::GeofenceBreach,
        AnomalyKind::PanicButton,
    ];

    /// Severity assigned to findings of this kind
    pub fn severity(&self) -> Severity {
        match self {
            AnomalyKind::SignalDropout => Severity::Critical,
            AnomalyKind::RouteDeviation => Severity::Medium,
            AnomalyKind::ProlongedInactivity => Severity::High,
            AnomalyKind::SpeedAnomaly => Severity::Medium,
            AnomalyKind::GeofenceBreach => Severity::High,
            AnomalyKind::PanicButton => Severity::Critical,
        }
    }

    /// Location-state kinds stay latched until their condition clears
    pub fn is_latching(&self) -> bool {
        matches!(
            self,
            AnomalyKind::RouteDeviation
                | AnomalyKind::ProlongedInactivity
                | AnomalyKind::GeofenceBreach
        )
    }

    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyKind::SignalDropout => "signal-dropout",
            AnomalyKind::RouteDeviation => "route-deviation",
            AnomalyKind::ProlongedInactivity => "prolonged-inactivity",
            AnomalyKind::SpeedAnomaly => "speed-anomaly",
            AnomalyKind::GeofenceBreach => "geofence-breach",
            AnomalyKind::PanicButton => "panic-button",
        }
    }
}

impl fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single detected anomaly; immutable once created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyFinding {
    pub id: FindingId,
    pub subject_id: SubjectId,
    pub kind: AnomalyKind,
    pub severity: Severity,
    /// Integer confidence in [0, 100]
    pub confidence: u8,
    pub detected_at: DateTime<Utc>,
    pub evidence: String,
    /// Last known fix when the finding was raised
    pub location: Option<Location>,
}

impl AnomalyFinding {
    /// Create a finding with the kind's default severity
    pub fn new(
        subject_id: SubjectId,
        kind: AnomalyKind,
        confidence: u8,
        detected_at: DateTime<Utc>,
        evidence: impl Into<String>,
        location: Option<Location>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            subject_id,
            kind,
            severity: kind.severity(),
            confidence: confidence.min(100),
            detected_at,
            evidence: evidence.into(),
            location,
        }
    }

    /// Subject pressed the panic button
    pub fn panic(subject_id: SubjectId, at: DateTime<Utc>, location: Option<Location>) -> Self {
        Self::new(
            subject_id,
            AnomalyKind::PanicButton,
            100,
            at,
            "Panic button pressed by subject",
            location,
        )
    }
}
