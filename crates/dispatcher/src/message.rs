//! Outbound alert messages

use anomaly_detector::{AnomalyFinding, AnomalyKind, Severity};
use serde::{Deserialize, Serialize};
use telemetry::{Location, SubjectId};

/// Subject context known when a cascade starts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubjectContext {
    /// Subject's own device is offline
    pub device_offline: bool,
    /// Newest known fix
    pub location: Option<Location>,
    pub battery_level: Option<u8>,
}

/// Rendered alert sent through every channel of a cascade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertMessage {
    pub subject_id: SubjectId,
    pub kind: AnomalyKind,
    pub severity: Severity,
    pub headline: String,
    pub body: String,
    /// Location is the last known one rather than live
    pub last_known_location: bool,
}

fn headline(kind: AnomalyKind) -> &'static str {
    match kind {
        AnomalyKind::SignalDropout => "EMERGENCY ALERT: Tourist device has gone silent",
        AnomalyKind::RouteDeviation => "LOCATION ALERT: Tourist has left the planned route",
        AnomalyKind::ProlongedInactivity => "WELFARE ALERT: Tourist has not moved for an extended period",
        AnomalyKind::SpeedAnomaly => "TRAVEL ALERT: Unusual travel speed detected",
        AnomalyKind::GeofenceBreach => "RESTRICTED AREA ALERT: Tourist entered a restricted zone",
        AnomalyKind::PanicButton => "PANIC BUTTON ACTIVATED: Immediate assistance required",
    }
}

impl AlertMessage {
    /// Compose the message for a finding
    pub fn compose(finding: &AnomalyFinding, context: &SubjectContext) -> Self {
        let location = context.location.or(finding.location);
        let location_line = match (location, context.device_offline) {
            (Some(loc), true) => format!("Last known location: {}", loc),
            (Some(loc), false) => format!("Location: {}", loc),
            (None, _) => "Location: unavailable".to_string(),
        };

        let mut body = format!(
            "{}\nSubject: {}\nSeverity: {} (confidence {}%)\n{}\n{}",
            headline(finding.kind),
            finding.subject_id,
            finding.severity,
            finding.confidence,
            finding.evidence,
            location_line,
        );
        if let Some(battery) = context.battery_level {
            body.push_str(&format!("\nBattery: {}%", battery));
        }
        if finding.severity >= Severity::Critical {
            body.push_str("\nPlease contact local authorities immediately.");
        }

        Self {
            subject_id: finding.subject_id.clone(),
            kind: finding.kind,
            severity: finding.severity,
            headline: headline(finding.kind).to_string(),
            body,
            last_known_location: context.device_offline,
        }
    }
}
