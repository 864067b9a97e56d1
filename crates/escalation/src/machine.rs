//! Escalation state machine
//!
//! One machine per subject. `Normal|Monitoring -> Escalated` is the only
//! path that opens a cascade; while an incident is active every further
//! finding is merged into it.

use anomaly_detector::{AnomalyFinding, FindingId};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use telemetry::SubjectId;
use tracing::{debug, info};
use uuid::Uuid;

use crate::policy::Decision;
use crate::state::{CascadeId, EscalationState};
use crate::EscalationError;

/// Observable effect of applying a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "transition", rename_all = "snake_case")]
pub enum Transition {
    Ignored,
    MonitoringStarted {
        finding_id: FindingId,
    },
    CascadeStarted {
        finding_id: FindingId,
        cascade_id: CascadeId,
        /// Monitoring incident this cascade grew out of
        promoted_from: Option<FindingId>,
    },
    MergedIntoMonitoring {
        finding_id: FindingId,
        related: FindingId,
    },
    MergedIntoCascade {
        finding_id: FindingId,
        cascade_id: CascadeId,
        related: FindingId,
    },
    /// Monitoring window expired without escalation
    Lapsed {
        finding_id: FindingId,
    },
}

/// Outcome of an accepted resolution signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub finding_id: FindingId,
    pub cascade_id: Option<CascadeId>,
    pub resolved_at: DateTime<Utc>,
    /// Whether the incident was still under observation
    pub was_monitoring: bool,
}

/// Per-subject escalation state machine
#[derive(Debug, Clone)]
pub struct EscalationMachine {
    subject_id: SubjectId,
    state: EscalationState,
    /// Every finding attached to the active incident, opener first
    incident: Vec<FindingId>,
}

impl EscalationMachine {
    pub fn new(subject_id: SubjectId) -> Self {
        Self {
            subject_id,
            state: EscalationState::Normal,
            incident: Vec::new(),
        }
    }

    pub fn state(&self) -> &EscalationState {
        &self.state
    }

    /// Findings attached to the active incident
    pub fn incident_findings(&self) -> &[FindingId] {
        &self.incident
    }

    /// Apply a policy decision for `finding`
    pub fn apply(&mut self, decision: Decision, finding: &AnomalyFinding, now: DateTime<Utc>) -> Transition {
        let transition = match (decision, self.state) {
            (Decision::Ignore, _) => Transition::Ignored,

            (
                _,
                EscalationState::Escalated {
                    finding_id,
                    cascade_id,
                },
            ) => {
                self.incident.push(finding.id);
                Transition::MergedIntoCascade {
                    finding_id,
                    cascade_id,
                    related: finding.id,
                }
            }

            (Decision::Monitor, EscalationState::Monitoring { finding_id, .. }) => {
                self.incident.push(finding.id);
                Transition::MergedIntoMonitoring {
                    finding_id,
                    related: finding.id,
                }
            }

            (Decision::Escalate, EscalationState::Monitoring { finding_id, .. }) => {
                self.incident.push(finding.id);
                self.open_cascade(finding.id, Some(finding_id))
            }

            (Decision::Monitor, EscalationState::Normal | EscalationState::Resolved { .. }) => {
                self.incident = vec![finding.id];
                self.state = EscalationState::Monitoring {
                    finding_id: finding.id,
                    since: now,
                };
                Transition::MonitoringStarted {
                    finding_id: finding.id,
                }
            }

            (Decision::Escalate, EscalationState::Normal | EscalationState::Resolved { .. }) => {
                self.incident = vec![finding.id];
                self.open_cascade(finding.id, None)
            }
        };

        debug!(subject = %self.subject_id, ?transition, "Escalation transition");
        transition
    }

    fn open_cascade(&mut self, finding_id: FindingId, promoted_from: Option<FindingId>) -> Transition {
        let cascade_id = Uuid::new_v4();
        self.state = EscalationState::Escalated {
            finding_id,
            cascade_id,
        };
        info!(subject = %self.subject_id, cascade = %cascade_id, "Escalated");
        Transition::CascadeStarted {
            finding_id,
            cascade_id,
            promoted_from,
        }
    }

    /// Monitoring timer for `finding_id` fired
    ///
    /// Stale timers (the incident has moved on) are ignored.
    pub fn on_monitor_expired(&mut self, finding_id: FindingId, auto_escalate: bool) -> Option<Transition> {
        match self.state {
            EscalationState::Monitoring { finding_id: current, .. } if current == finding_id => {
                if auto_escalate {
                    Some(self.open_cascade(finding_id, Some(finding_id)))
                } else {
                    info!(subject = %self.subject_id, finding = %finding_id, "Monitoring lapsed");
                    self.state = EscalationState::Normal;
                    self.incident.clear();
                    Some(Transition::Lapsed { finding_id })
                }
            }
            _ => None,
        }
    }

    /// Resolve the active incident
    ///
    /// `finding_id` may be the opener or any finding merged into it.
    pub fn resolve(&mut self, finding_id: FindingId, now: DateTime<Utc>) -> Result<Resolution, EscalationError> {
        let (primary, cascade_id, was_monitoring) = match self.state {
            EscalationState::Monitoring { finding_id, .. } => (finding_id, None, true),
            EscalationState::Escalated {
                finding_id,
                cascade_id,
            } => (finding_id, Some(cascade_id), false),
            _ => return Err(EscalationError::NoActiveIncident(self.subject_id.clone())),
        };

        if !self.incident.contains(&finding_id) {
            return Err(EscalationError::FindingMismatch {
                expected: primary,
                got: finding_id,
            });
        }

        self.state = EscalationState::Resolved {
            finding_id: primary,
            resolved_at: now,
        };
        self.incident.clear();
        info!(subject = %self.subject_id, finding = %primary, "Incident resolved");

        Ok(Resolution {
            finding_id: primary,
            cascade_id,
            resolved_at: now,
            was_monitoring,
        })
    }

    /// Move `Resolved` to `Normal` once the cool-down has elapsed
    pub fn settle(&mut self, now: DateTime<Utc>, cooldown: Duration) -> bool {
        match self.state {
            EscalationState::Resolved { resolved_at, .. } if now - resolved_at >= cooldown => {
                self.state = EscalationState::Normal;
                debug!(subject = %self.subject_id, "Settled to normal");
                true
            }
            _ => false,
        }
    }
}
