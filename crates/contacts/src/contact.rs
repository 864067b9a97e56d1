//! Contact and channel types

use serde::{Deserialize, Serialize};
use std::fmt;
use telemetry::SubjectId;
use uuid::Uuid;

/// Identifier of a contact
pub type ContactId = Uuid;

/// Notification medium
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Push,
    Sms,
    WhatsApp,
    Voice,
}

impl Channel {
    /// Needs mobile data or Wi-Fi on the receiving side
    pub fn is_data_dependent(&self) -> bool {
        matches!(self, Channel::Push | Channel::WhatsApp)
    }

    /// Carried over the cellular network (SMS-class)
    pub fn is_cellular(&self) -> bool {
        !self.is_data_dependent()
    }

    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Push => "push",
            Channel::Sms => "sms",
            Channel::WhatsApp => "whatsapp",
            Channel::Voice => "voice",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notification target for a subject
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    #[serde(default = "Uuid::new_v4")]
    pub id: ContactId,
    pub subject_id: SubjectId,
    pub name: String,
    /// Phone number or handle understood by the channel adapters
    pub address: String,
    /// Channels in the order they should be tried
    pub channels: Vec<Channel>,
    /// Lower is contacted first
    pub priority_rank: u32,
}

impl Contact {
    /// Create a contact with a fresh id
    pub fn new(
        subject_id: SubjectId,
        name: impl Into<String>,
        address: impl Into<String>,
        channels: Vec<Channel>,
        priority_rank: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            subject_id,
            name: name.into(),
            address: address.into(),
            channels,
            priority_rank,
        }
    }

    /// Check the channel list is non-empty and free of duplicates
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("name is empty".to_string());
        }
        if self.channels.is_empty() {
            return Err("no channels declared".to_string());
        }
        for (i, channel) in self.channels.iter().enumerate() {
            if self.channels[..i].contains(channel) {
                return Err(format!("channel {} listed twice", channel));
            }
        }
        Ok(())
    }
}
