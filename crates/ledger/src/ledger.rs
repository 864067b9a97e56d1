//! Alert Ledger
//!
//! System of record for findings, cascades and delivery attempts. Every
//! write goes through a bounded exponential backoff before a failure is
//! surfaced as a consistency error.

use anomaly_detector::{AnomalyFinding, FindingId};
use chrono::{DateTime, Utc};
use escalation::CascadeId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use telemetry::SubjectId;
use tracing::{debug, error, warn};

use crate::record::{CascadeStatus, DeliveryAttempt, LedgerEntry, LedgerQuery, LedgerRecord};
use crate::store::{InMemoryStore, LedgerStore};
use crate::LedgerError;

/// Write retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total write attempts including the first
    pub max_attempts: u32,
    /// Delay before the first retry (milliseconds)
    pub initial_backoff_ms: u64,
    /// Upper bound on any single delay (milliseconds)
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 50,
            max_backoff_ms: 2_000,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `retry` (1-based)
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u64.checked_shl(retry.saturating_sub(1)).unwrap_or(u64::MAX);
        let ms = self.initial_backoff_ms.saturating_mul(factor).min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

/// Append-only ledger over a pluggable store
#[derive(Clone)]
pub struct AlertLedger {
    store: Arc<dyn LedgerStore>,
    retry: RetryConfig,
}

impl AlertLedger {
    /// Create a ledger over the given store
    pub fn new(store: Arc<dyn LedgerStore>, retry: RetryConfig) -> Self {
        Self { store, retry }
    }

    /// Ledger backed by process memory
    pub fn in_memory(retry: RetryConfig) -> Self {
        Self::new(Arc::new(InMemoryStore::new()), retry)
    }

    /// Append with bounded exponential backoff
    pub async fn append_with_retry(&self, record: LedgerRecord) -> Result<LedgerEntry, LedgerError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.store.append(record.clone()).await {
                Ok(entry) => {
                    debug!(sequence = entry.sequence, kind = entry.record.kind(), "Ledger entry recorded");
                    return Ok(entry);
                }
                Err(e) if attempt < max_attempts => {
                    let delay = self.retry.backoff(attempt);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Ledger write failed, retrying"
                    );
                    metrics::counter!("safetrail_ledger_retries_total").increment(1);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(attempts = attempt, error = %e, kind = record.kind(), "Ledger write failed permanently");
                    return Err(LedgerError::Consistency {
                        attempts: attempt,
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    /// Record a finding that opened or was evaluated for an incident
    pub async fn record_finding(&self, finding: &AnomalyFinding) -> Result<LedgerEntry, LedgerError> {
        self.append_with_retry(LedgerRecord::Finding(finding.clone())).await
    }

    /// Record a finding merged into an active incident
    pub async fn record_related_finding(
        &self,
        primary: FindingId,
        cascade_id: Option<CascadeId>,
        finding: &AnomalyFinding,
    ) -> Result<LedgerEntry, LedgerError> {
        self.append_with_retry(LedgerRecord::RelatedFinding {
            primary,
            cascade_id,
            finding: finding.clone(),
        })
        .await
    }

    pub async fn record_cascade_opened(
        &self,
        cascade_id: CascadeId,
        finding_id: FindingId,
        subject_id: SubjectId,
        contact_count: usize,
    ) -> Result<LedgerEntry, LedgerError> {
        self.append_with_retry(LedgerRecord::CascadeOpened {
            cascade_id,
            finding_id,
            subject_id,
            contact_count,
            started_at: Utc::now(),
        })
        .await
    }

    pub async fn record_attempt(&self, attempt: &DeliveryAttempt) -> Result<LedgerEntry, LedgerError> {
        self.append_with_retry(LedgerRecord::Attempt(attempt.clone())).await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn record_cascade_closed(
        &self,
        cascade_id: CascadeId,
        finding_id: FindingId,
        subject_id: SubjectId,
        status: CascadeStatus,
        contacts_reached: usize,
        contact_count: usize,
    ) -> Result<LedgerEntry, LedgerError> {
        self.append_with_retry(LedgerRecord::CascadeClosed {
            cascade_id,
            finding_id,
            subject_id,
            status,
            contacts_reached,
            contact_count,
            closed_at: Utc::now(),
        })
        .await
    }

    pub async fn record_resolution(
        &self,
        subject_id: SubjectId,
        finding_id: FindingId,
        cascade_id: Option<CascadeId>,
        resolved_at: DateTime<Utc>,
    ) -> Result<LedgerEntry, LedgerError> {
        self.append_with_retry(LedgerRecord::Resolution {
            subject_id,
            finding_id,
            cascade_id,
            resolved_at,
        })
        .await
    }

    /// Read-only query, ordered by creation
    pub async fn query(&self, query: &LedgerQuery) -> Result<Vec<LedgerEntry>, LedgerError> {
        self.store.query(query).await
    }

    /// Attempts recorded for a cascade, in order
    pub async fn cascade_attempts(&self, cascade_id: CascadeId) -> Result<Vec<DeliveryAttempt>, LedgerError> {
        let entries = self.store.query(&LedgerQuery::cascade(cascade_id)).await?;
        Ok(entries
            .into_iter()
            .filter_map(|e| match e.record {
                LedgerRecord::Attempt(a) => Some(a),
                _ => None,
            })
            .collect())
    }

    /// Final status of a cascade, if it has closed
    pub async fn cascade_status(&self, cascade_id: CascadeId) -> Result<Option<CascadeStatus>, LedgerError> {
        let entries = self.store.query(&LedgerQuery::cascade(cascade_id)).await?;
        Ok(entries.iter().rev().find_map(|e| match e.record {
            LedgerRecord::CascadeClosed { status, .. } => Some(status),
            _ => None,
        }))
    }

    pub async fn len(&self) -> Result<usize, LedgerError> {
        self.store.len().await
    }
}
