//! Contact Registry
//!
//! Ordered emergency contacts per subject, each with channel capabilities
//! and a priority rank.

mod contact;
mod registry;

pub use contact::{Channel, Contact, ContactId};
pub use registry::{ContactRegistry, ContactSnapshot};

use telemetry::SubjectId;
use thiserror::Error;

/// Registry errors
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("No contacts configured for subject {0}")]
    NoContacts(SubjectId),

    #[error("Invalid contact '{contact}': {reason}")]
    InvalidContact { contact: String, reason: String },

    #[error("Contact not found: {0}")]
    ContactNotFound(ContactId),

    #[error("Registry state poisoned: {0}")]
    StatePoisoned(String),
}
