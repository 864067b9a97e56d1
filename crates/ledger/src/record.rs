//! Ledger record types

use anomaly_detector::{AnomalyFinding, FindingId};
use chrono::{DateTime, Utc};
use contacts::{Channel, ContactId};
use escalation::CascadeId;
use serde::{Deserialize, Serialize};
use std::fmt;
use telemetry::SubjectId;

/// Outcome of one channel attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Failed,
    TimedOut,
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::Success => "success",
            AttemptOutcome::Failed => "failed",
            AttemptOutcome::TimedOut => "timed_out",
        }
    }
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One channel attempt for one contact; immutable once recorded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    pub cascade_id: CascadeId,
    pub subject_id: SubjectId,
    pub contact_id: ContactId,
    pub contact_name: String,
    pub channel: Channel,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub outcome: AttemptOutcome,
    /// Adapter error text for failed attempts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Aggregate status of a cascade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CascadeStatus {
    Running,
    /// Every contact terminal and at least one reached
    Completed,
    /// Every contact terminal and nobody reached; needs manual follow-up
    CompletedWithFailures,
    /// Cancelled before every contact reached a terminal state
    Abandoned,
}

impl CascadeStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CascadeStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CascadeStatus::Running => "running",
            CascadeStatus::Completed => "completed",
            CascadeStatus::CompletedWithFailures => "completed_with_failures",
            CascadeStatus::Abandoned => "abandoned",
        }
    }
}

impl fmt::Display for CascadeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the ledger can hold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum LedgerRecord {
    Finding(AnomalyFinding),
    /// Finding merged into an already active incident
    RelatedFinding {
        primary: FindingId,
        cascade_id: Option<CascadeId>,
        finding: AnomalyFinding,
    },
    CascadeOpened {
        cascade_id: CascadeId,
        finding_id: FindingId,
        subject_id: SubjectId,
        contact_count: usize,
        started_at: DateTime<Utc>,
    },
    Attempt(DeliveryAttempt),
    CascadeClosed {
        cascade_id: CascadeId,
        finding_id: FindingId,
        subject_id: SubjectId,
        status: CascadeStatus,
        contacts_reached: usize,
        contact_count: usize,
        closed_at: DateTime<Utc>,
    },
    Resolution {
        subject_id: SubjectId,
        finding_id: FindingId,
        cascade_id: Option<CascadeId>,
        resolved_at: DateTime<Utc>,
    },
}

impl LedgerRecord {
    pub fn subject_id(&self) -> &SubjectId {
        match self {
            LedgerRecord::Finding(f) => &f.subject_id,
            LedgerRecord::RelatedFinding { finding, .. } => &finding.subject_id,
            LedgerRecord::Attempt(a) => &a.subject_id,
            LedgerRecord::CascadeOpened { subject_id, .. }
            | LedgerRecord::CascadeClosed { subject_id, .. }
            | LedgerRecord::Resolution { subject_id, .. } => subject_id,
        }
    }

    pub fn cascade_id(&self) -> Option<CascadeId> {
        match self {
            LedgerRecord::Finding(_) => None,
            LedgerRecord::RelatedFinding { cascade_id, .. } | LedgerRecord::Resolution { cascade_id, .. } => *cascade_id,
            LedgerRecord::Attempt(a) => Some(a.cascade_id),
            LedgerRecord::CascadeOpened { cascade_id, .. } | LedgerRecord::CascadeClosed { cascade_id, .. } => {
                Some(*cascade_id)
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            LedgerRecord::Finding(_) => "finding",
            LedgerRecord::RelatedFinding { .. } => "related_finding",
            LedgerRecord::CascadeOpened { .. } => "cascade_opened",
            LedgerRecord::Attempt(_) => "attempt",
            LedgerRecord::CascadeClosed { .. } => "cascade_closed",
            LedgerRecord::Resolution { .. } => "resolution",
        }
    }
}

/// A stored record with its position in the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Strictly increasing, assigned at append time
    pub sequence: u64,
    /// Never goes backwards across entries
    pub recorded_at: DateTime<Utc>,
    pub record: LedgerRecord,
}

/// Read-only filter over the ledger; all fields are optional
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerQuery {
    pub subject_id: Option<SubjectId>,
    pub cascade_id: Option<CascadeId>,
    /// Inclusive lower bound on `recorded_at`
    pub since: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `recorded_at`
    pub until: Option<DateTime<Utc>>,
}

impl LedgerQuery {
    pub fn subject(subject_id: SubjectId) -> Self {
        Self {
            subject_id: Some(subject_id),
            ..Default::default()
        }
    }

    pub fn cascade(cascade_id: CascadeId) -> Self {
        Self {
            cascade_id: Some(cascade_id),
            ..Default::default()
        }
    }

    pub fn between(since: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        Self {
            since: Some(since),
            until: Some(until),
            ..Default::default()
        }
    }

    pub fn matches(&self, entry: &LedgerEntry) -> bool {
        if let Some(subject) = &self.subject_id {
            if entry.record.subject_id() != subject {
                return false;
            }
        }
        if let Some(cascade) = self.cascade_id {
            if entry.record.cascade_id() != Some(cascade) {
                return false;
            }
        }
        if let Some(since) = self.since {
            if entry.recorded_at < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if entry.recorded_at >= until {
                return false;
            }
        }
        true
    }
}
