//! Per-subject escalation state

use anomaly_detector::FindingId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a notification cascade
pub type CascadeId = Uuid;

/// Incident lifecycle stage of a subject
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum EscalationState {
    #[default]
    Normal,
    Monitoring {
        finding_id: FindingId,
        since: DateTime<Utc>,
    },
    Escalated {
        finding_id: FindingId,
        cascade_id: CascadeId,
    },
    Resolved {
        finding_id: FindingId,
        resolved_at: DateTime<Utc>,
    },
}

impl EscalationState {
    /// `Monitoring` or `Escalated`
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            EscalationState::Monitoring { .. } | EscalationState::Escalated { .. }
        )
    }

    /// Finding that opened the current or last incident
    pub fn finding_id(&self) -> Option<FindingId> {
        match self {
            EscalationState::Normal => None,
            EscalationState::Monitoring { finding_id, .. }
            | EscalationState::Escalated { finding_id, .. }
            | EscalationState::Resolved { finding_id, .. } => Some(*finding_id),
        }
    }

    pub fn cascade_id(&self) -> Option<CascadeId> {
        match self {
            EscalationState::Escalated { cascade_id, .. } => Some(*cascade_id),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            EscalationState::Normal => "normal",
            EscalationState::Monitoring { .. } => "monitoring",
            EscalationState::Escalated { .. } => "escalated",
            EscalationState::Resolved { .. } => "resolved",
        }
    }
}
