//! Scripted channel adapter for tests

use async_trait::async_trait;
use contacts::{Channel, Contact};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::adapter::{AdapterError, ChannelAdapter};
use crate::message::AlertMessage;

/// How a scripted send behaves
#[derive(Debug, Clone, PartialEq)]
pub enum Behaviour {
    Succeed,
    Fail,
    /// Never answers; only the dispatcher timeout ends it
    Hang,
    /// Answer successfully after a delay
    Delay(Duration),
    /// Panic inside the send
    Panic,
}

/// Adapter whose answers are scripted per (contact name, channel)
#[derive(Debug)]
pub struct ScriptedAdapter {
    script: HashMap<(String, Channel), Behaviour>,
    default: Behaviour,
    calls: Mutex<Vec<(String, Channel)>>,
}

impl Default for ScriptedAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedAdapter {
    /// Every unscripted send succeeds
    pub fn new() -> Self {
        Self {
            script: HashMap::new(),
            default: Behaviour::Succeed,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Behaviour for unscripted sends
    pub fn otherwise(mut self, behaviour: Behaviour) -> Self {
        self.default = behaviour;
        self
    }

    pub fn on(mut self, contact: &str, channel: Channel, behaviour: Behaviour) -> Self {
        self.script.insert((contact.to_string(), channel), behaviour);
        self
    }

    /// Sends started so far, in order
    pub fn calls(&self) -> Vec<(String, Channel)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ChannelAdapter for ScriptedAdapter {
    async fn send(&self, contact: &Contact, channel: Channel, _message: &AlertMessage) -> Result<(), AdapterError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((contact.name.clone(), channel));
        }

        let behaviour = self
            .script
            .get(&(contact.name.clone(), channel))
            .unwrap_or(&self.default)
            .clone();

        match behaviour {
            Behaviour::Succeed => Ok(()),
            Behaviour::Fail => Err(AdapterError::Unavailable(format!("{} gateway down", channel))),
            Behaviour::Hang => {
                std::future::pending::<()>().await;
                Ok(())
            }
            Behaviour::Delay(delay) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
            Behaviour::Panic => panic!("{} adapter crashed", channel),
        }
    }
}
