//! Operator alert-of-alerts log
//!
//! Conditions a human has to follow up on: nobody could be reached, a
//! subject has no contacts, or the ledger lost a write.

use chrono::{DateTime, Utc};
use escalation::CascadeId;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use telemetry::SubjectId;
use tracing::error;
use uuid::Uuid;

/// Kind of operator-visible condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorAlertKind {
    /// Cascade could not start: no contacts registered
    NoContacts,
    /// A ledger record was lost after all retries
    LedgerFailure,
    /// Cascade finished without reaching anyone
    NobodyReached,
    /// Cascade could not be started or crashed
    DispatchFailure,
}

impl OperatorAlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperatorAlertKind::NoContacts => "no_contacts",
            OperatorAlertKind::LedgerFailure => "ledger_failure",
            OperatorAlertKind::NobodyReached => "nobody_reached",
            OperatorAlertKind::DispatchFailure => "dispatch_failure",
        }
    }
}

/// One entry in the operator log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorAlert {
    pub id: Uuid,
    pub kind: OperatorAlertKind,
    pub subject_id: SubjectId,
    pub cascade_id: Option<CascadeId>,
    pub message: String,
    pub raised_at: DateTime<Utc>,
}

/// Bounded, shared operator log
#[derive(Debug, Clone)]
pub struct OperatorLog {
    entries: Arc<Mutex<VecDeque<OperatorAlert>>>,
    max_entries: usize,
}

impl Default for OperatorLog {
    fn default() -> Self {
        Self::new(1_000)
    }
}

impl OperatorLog {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(VecDeque::new())),
            max_entries: max_entries.max(1),
        }
    }

    /// Append an alert; the oldest entry is dropped when full
    pub fn raise(
        &self,
        kind: OperatorAlertKind,
        subject_id: SubjectId,
        cascade_id: Option<CascadeId>,
        message: impl Into<String>,
    ) -> OperatorAlert {
        let alert = OperatorAlert {
            id: Uuid::new_v4(),
            kind,
            subject_id,
            cascade_id,
            message: message.into(),
            raised_at: Utc::now(),
        };

        error!(
            kind = kind.as_str(),
            subject = %alert.subject_id,
            cascade = ?alert.cascade_id,
            "Operator alert: {}",
            alert.message
        );
        metrics::counter!("safetrail_operator_alerts_total", "kind" => kind.as_str()).increment(1);

        let mut entries = match self.entries.lock() {
            Ok(e) => e,
            Err(poisoned) => poisoned.into_inner(),
        };
        while entries.len() >= self.max_entries {
            entries.pop_front();
        }
        entries.push_back(alert.clone());
        alert
    }

    /// Alerts oldest first
    pub fn list(&self) -> Vec<OperatorAlert> {
        self.entries
            .lock()
            .map(|e| e.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
