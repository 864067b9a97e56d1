//! Alert Ledger
//!
//! Append-only, queryable record of every finding, cascade and delivery
//! attempt. No update or delete path exists.

mod ledger;
mod record;
mod store;

pub use ledger::{AlertLedger, RetryConfig};
pub use record::{AttemptOutcome, CascadeStatus, DeliveryAttempt, LedgerEntry, LedgerQuery, LedgerRecord};
pub use store::{InMemoryStore, LedgerStore};

use thiserror::Error;

/// Ledger errors
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Store could not take the write right now
    #[error("Ledger store unavailable: {0}")]
    Unavailable(String),

    /// Write failed after every retry; the record is lost
    #[error("Ledger write failed after {attempts} attempts: {reason}")]
    Consistency { attempts: u32, reason: String },
}
