//! Per-contact fallback plan
//!
//! `Pending -> Attempting(channel) -> Notified | NextChannel | Exhausted`.
//! Channels are tried strictly in order; the first success ends the plan.

use contacts::{Channel, Contact};
use ledger::AttemptOutcome;

/// Where a contact is in its channel fallback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactState {
    Pending,
    Attempting(Channel),
    /// Last attempt failed and another channel remains
    NextChannel,
    Notified(Channel),
    Exhausted,
}

impl ContactState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ContactState::Notified(_) | ContactState::Exhausted)
    }
}

/// Fallback state machine for one contact
#[derive(Debug, Clone)]
pub struct ContactPlan {
    contact: Contact,
    channels: Vec<Channel>,
    next: usize,
    state: ContactState,
}

impl ContactPlan {
    /// Build a plan; with `prefer_cellular` SMS-class channels are stably
    /// moved ahead of data-dependent ones
    pub fn new(contact: Contact, prefer_cellular: bool) -> Self {
        let mut channels = contact.channels.clone();
        if prefer_cellular {
            channels.sort_by_key(|c| c.is_data_dependent());
        }
        Self {
            contact,
            channels,
            next: 0,
            state: ContactState::Pending,
        }
    }

    pub fn contact(&self) -> &Contact {
        &self.contact
    }

    /// Effective channel order
    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn state(&self) -> ContactState {
        self.state
    }

    /// Start the next attempt, if any channel is left
    pub fn begin_next(&mut self) -> Option<Channel> {
        match self.state {
            ContactState::Pending | ContactState::NextChannel => match self.channels.get(self.next) {
                Some(&channel) => {
                    self.next += 1;
                    self.state = ContactState::Attempting(channel);
                    Some(channel)
                }
                None => {
                    self.state = ContactState::Exhausted;
                    None
                }
            },
            _ => None,
        }
    }

    /// Record the outcome of the attempt in progress
    pub fn complete(&mut self, outcome: AttemptOutcome) -> ContactState {
        if let ContactState::Attempting(channel) = self.state {
            self.state = match outcome {
                AttemptOutcome::Success => ContactState::Notified(channel),
                _ if self.next < self.channels.len() => ContactState::NextChannel,
                _ => ContactState::Exhausted,
            };
        }
        self.state
    }
}
