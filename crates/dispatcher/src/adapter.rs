//! Channel adapters
//!
//! Providers (push service, SMS gateway, voice) plug in behind
//! `ChannelAdapter`. The dispatcher bounds every call with its own timeout,
//! so an adapter only has to report success or failure.

use async_trait::async_trait;
use contacts::{Channel, Contact};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::message::AlertMessage;

/// Channel adapter failure
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AdapterError {
    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("Rejected by provider: {0}")]
    Rejected(String),

    #[error("No adapter for channel {0}")]
    Unsupported(Channel),
}

/// Delivers a message to a contact over one channel
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    async fn send(&self, contact: &Contact, channel: Channel, message: &AlertMessage) -> Result<(), AdapterError>;
}

/// Adapter that only logs; used when no provider is configured
#[derive(Debug, Default, Clone)]
pub struct LoggingAdapter;

#[async_trait]
impl ChannelAdapter for LoggingAdapter {
    async fn send(&self, contact: &Contact, channel: Channel, message: &AlertMessage) -> Result<(), AdapterError> {
        info!(
            contact = %contact.name,
            address = %contact.address,
            %channel,
            headline = %message.headline,
            "Alert delivered (log only)"
        );
        Ok(())
    }
}

/// Routes each channel to its own adapter
#[derive(Default, Clone)]
pub struct ChannelRouter {
    routes: HashMap<Channel, Arc<dyn ChannelAdapter>>,
}

impl ChannelRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the adapter serving `channel`
    pub fn route(mut self, channel: Channel, adapter: Arc<dyn ChannelAdapter>) -> Self {
        self.routes.insert(channel, adapter);
        self
    }

    pub fn supports(&self, channel: Channel) -> bool {
        self.routes.contains_key(&channel)
    }
}

#[async_trait]
impl ChannelAdapter for ChannelRouter {
    async fn send(&self, contact: &Contact, channel: Channel, message: &AlertMessage) -> Result<(), AdapterError> {
        match self.routes.get(&channel) {
            Some(adapter) => adapter.send(contact, channel, message).await,
            None => Err(AdapterError::Unsupported(channel)),
        }
    }
}
