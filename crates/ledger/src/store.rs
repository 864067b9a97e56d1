//! Ledger storage
//!
//! The ledger is written through a pluggable store. Only an in-memory store
//! ships here; database-backed stores implement the same trait.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Mutex;
use tracing::info;

use crate::record::{LedgerEntry, LedgerQuery, LedgerRecord};
use crate::LedgerError;

/// Append-only record store
///
/// Implementations assign sequence numbers and timestamps under their own
/// append lock so concurrent writers never lose or reorder entries.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Append one record and return it as stored
    async fn append(&self, record: LedgerRecord) -> Result<LedgerEntry, LedgerError>;

    /// Entries matching the query, in sequence order
    async fn query(&self, query: &LedgerQuery) -> Result<Vec<LedgerEntry>, LedgerError>;

    /// Number of stored entries
    async fn len(&self) -> Result<usize, LedgerError>;
}

/// Ledger store kept in process memory
pub struct InMemoryStore {
    entries: Mutex<Vec<LedgerEntry>>,
}

impl InMemoryStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        info!("Creating in-memory ledger store");
        Self {
            entries: Mutex::new(Vec::with_capacity(1024)),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerStore for InMemoryStore {
    async fn append(&self, record: LedgerRecord) -> Result<LedgerEntry, LedgerError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| LedgerError::Unavailable(format!("Lock error: {}", e)))?;

        let (sequence, recorded_at) = match entries.last() {
            Some(last) => (last.sequence + 1, Utc::now().max(last.recorded_at)),
            None => (1, Utc::now()),
        };

        let entry = LedgerEntry {
            sequence,
            recorded_at,
            record,
        };
        entries.push(entry.clone());
        Ok(entry)
    }

    async fn query(&self, query: &LedgerQuery) -> Result<Vec<LedgerEntry>, LedgerError> {
        let entries = self
            .entries
            .lock()
            .map_err(|e| LedgerError::Unavailable(format!("Lock error: {}", e)))?;
        Ok(entries.iter().filter(|e| query.matches(e)).cloned().collect())
    }

    async fn len(&self) -> Result<usize, LedgerError> {
        let entries = self
            .entries
            .lock()
            .map_err(|e| LedgerError::Unavailable(format!("Lock error: {}", e)))?;
        Ok(entries.len())
    }
}
