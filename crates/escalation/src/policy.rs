//! Escalation Policy

use anomaly_detector::{AnomalyFinding, AnomalyKind};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::state::EscalationState;

/// Action chosen for a finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Ignore,
    Monitor,
    Escalate,
}

/// Minimum confidence per finding kind
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MinConfidence {
    pub signal_dropout: u8,
    pub route_deviation: u8,
    pub prolonged_inactivity: u8,
    pub speed_anomaly: u8,
    pub geofence_breach: u8,
    pub panic_button: u8,
}

impl Default for MinConfidence {
    fn default() -> Self {
        Self {
            signal_dropout: 50,
            route_deviation: 20,
            prolonged_inactivity: 50,
            speed_anomaly: 40,
            geofence_breach: 80,
            panic_button: 0,
        }
    }
}

impl MinConfidence {
    pub fn for_kind(&self, kind: AnomalyKind) -> u8 {
        match kind {
            AnomalyKind::SignalDropout => self.signal_dropout,
            AnomalyKind::RouteDeviation => self.route_deviation,
            AnomalyKind::ProlongedInactivity => self.prolonged_inactivity,
            AnomalyKind::SpeedAnomaly => self.speed_anomaly,
            AnomalyKind::GeofenceBreach => self.geofence_breach,
            AnomalyKind::PanicButton => self.panic_button,
        }
    }
}

/// Policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub min_confidence: MinConfidence,
    /// Observation window for low/medium findings (seconds)
    pub monitor_window_secs: u64,
    /// Escalate when the observation window expires unresolved;
    /// otherwise the subject lapses back to normal
    pub auto_escalate_on_expiry: bool,
    /// Time spent in `Resolved` before settling to `Normal` (seconds)
    pub resolution_cooldown_secs: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            min_confidence: MinConfidence::default(),
            monitor_window_secs: 600,
            auto_escalate_on_expiry: true,
            resolution_cooldown_secs: 300,
        }
    }
}

/// Pure mapping from (state, finding) to a decision
#[derive(Debug, Clone, Default)]
pub struct EscalationPolicy {
    config: PolicyConfig,
}

impl EscalationPolicy {
    /// Create a new policy
    pub fn new(config: PolicyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Decide what to do with a finding
    ///
    /// The state only matters for how the machine applies the decision;
    /// merging into an open incident is its concern, not the policy's.
    pub fn decide(&self, state: &EscalationState, finding: &AnomalyFinding) -> Decision {
        let minimum = self.config.min_confidence.for_kind(finding.kind);
        let decision = if finding.confidence < minimum {
            Decision::Ignore
        } else if finding.severity.is_urgent() {
            Decision::Escalate
        } else {
            Decision::Monitor
        };

        debug!(
            kind = %finding.kind,
            confidence = finding.confidence,
            minimum,
            state = state.name(),
            ?decision,
            "Escalation decision"
        );
        decision
    }
}
