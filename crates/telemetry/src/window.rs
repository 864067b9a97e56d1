//! Bounded Sample Window
//!
//! Per-subject rolling history. Samples are kept strictly increasing in time;
//! eviction by age and count happens on insert. The newest accepted sample
//! and fix are remembered separately, so clearing or evicting never lowers
//! the ordering bar.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::trace;

use crate::error::ValidationError;
use crate::sample::{DeviceSample, Location};

/// Window configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Time horizon kept behind the newest sample
    pub window_minutes: i64,
    /// Hard cap on retained samples
    pub max_samples: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            window_minutes: 60,
            max_samples: 720,
        }
    }
}

/// Time-monotonic rolling window of samples
#[derive(Debug, Clone)]
pub struct SampleWindow {
    data: VecDeque<DeviceSample>,
    horizon: Duration,
    capacity: usize,
    /// Newest sample ever accepted; survives eviction and `clear_before`
    last_seen: Option<DeviceSample>,
    /// Newest fix ever accepted
    last_fix: Option<Location>,
}

impl SampleWindow {
    /// Create a new window
    pub fn new(config: &WindowConfig) -> Self {
        let capacity = config.max_samples.max(1);
        Self {
            data: VecDeque::with_capacity(capacity.min(64)),
            horizon: Duration::minutes(config.window_minutes.max(1)),
            capacity,
            last_seen: None,
            last_fix: None,
        }
    }

    /// Insert a sample behind the current newest one
    ///
    /// A sample not strictly newer than every sample accepted so far is
    /// rejected and the window is left as it was.
    pub fn push(&mut self, sample: DeviceSample) -> Result<(), ValidationError> {
        if let Some(newest) = &self.last_seen {
            if sample.timestamp <= newest.timestamp {
                return Err(ValidationError::OutOfOrder {
                    timestamp: sample.timestamp,
                    newest: newest.timestamp,
                });
            }
        }

        let cutoff = sample.timestamp - self.horizon;
        if sample.location.is_some() {
            self.last_fix = sample.location;
        }
        self.last_seen = Some(sample.clone());
        self.data.push_back(sample);

        while self.data.len() > self.capacity {
            self.data.pop_front();
        }
        while self
            .data
            .front()
            .map(|s| s.timestamp < cutoff)
            .unwrap_or(false)
        {
            self.data.pop_front();
        }

        trace!(len = self.data.len(), "Sample window updated");
        Ok(())
    }

    /// Newest sample
    pub fn latest(&self) -> Option<&DeviceSample> {
        self.data.back()
    }

    /// Newest sample ever accepted, even if cleared from the window
    pub fn last_seen(&self) -> Option<&DeviceSample> {
        self.last_seen.as_ref()
    }

    /// Newest fix ever accepted, even if cleared from the window
    pub fn last_fix(&self) -> Option<Location> {
        self.last_fix
    }

    /// Sample immediately before the newest one
    pub fn previous(&self) -> Option<&DeviceSample> {
        self.data.len().checked_sub(2).and_then(|i| self.data.get(i))
    }

    /// Newest sample carrying a location fix
    pub fn latest_located(&self) -> Option<(&DeviceSample, &Location)> {
        self.located().next_back()
    }

    /// Iterate oldest to newest
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &DeviceSample> {
        self.data.iter()
    }

    /// Iterate samples that carry a fix, oldest to newest
    pub fn located(&self) -> impl DoubleEndedIterator<Item = (&DeviceSample, &Location)> {
        self.data
            .iter()
            .filter_map(|s| s.location.as_ref().map(|loc| (s, loc)))
    }

    /// Drop samples strictly older than `instant`
    pub fn clear_before(&mut self, instant: DateTime<Utc>) -> usize {
        let before = self.data.len();
        self.data.retain(|s| s.timestamp >= instant);
        before - self.data.len()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
