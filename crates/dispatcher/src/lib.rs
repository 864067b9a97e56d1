//! Alert Dispatcher
//!
//! Executes notification cascades across contacts and channels:
//! - Contacts in ascending priority rank, bounded parallelism
//! - Per-contact channel fallback (push, then SMS, then voice...)
//! - Per-attempt timeouts; slow channels never stall the cascade
//! - Cellular channels first when the subject's device is offline
//! - Every attempt recorded in the ledger as it completes

pub mod adapter;
pub mod dispatcher;
pub mod message;
#[cfg(any(test, feature = "testing"))]
pub mod mock;
pub mod plan;

pub use adapter::{AdapterError, ChannelAdapter, ChannelRouter, LoggingAdapter};
pub use dispatcher::{
    AlertDispatcher, CascadeCanceller, CascadeHandle, CascadeRequest, CascadeResult, DispatchConfig,
};
pub use message::{AlertMessage, SubjectContext};
pub use plan::{ContactPlan, ContactState};

use ledger::LedgerError;
use telemetry::SubjectId;
use thiserror::Error;

/// Dispatch errors
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("No contacts in snapshot for subject {0}")]
    NoContacts(SubjectId),

    #[error("Ledger write failed: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Cascade task failed: {0}")]
    Task(String),
}
