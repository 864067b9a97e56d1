//! Monitor configuration

use anomaly_detector::DetectorConfig;
use dispatcher::DispatchConfig;
use escalation::PolicyConfig;
use ledger::RetryConfig;
use serde::{Deserialize, Serialize};

/// Silence sweeper configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Interval between silence sweeps (seconds)
    pub sweep_interval_secs: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 60,
        }
    }
}

/// Configuration of the whole safety core
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub detector: DetectorConfig,
    pub policy: PolicyConfig,
    pub dispatch: DispatchConfig,
    pub retry: RetryConfig,
    pub sweep: SweepConfig,
}

impl MonitorConfig {
    /// Tighter detection thresholds and a shorter observation window
    pub fn strict() -> Self {
        Self {
            detector: DetectorConfig::strict(),
            policy: PolicyConfig {
                monitor_window_secs: 300,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Looser detection thresholds for remote itineraries
    pub fn lenient() -> Self {
        Self {
            detector: DetectorConfig::lenient(),
            policy: PolicyConfig {
                monitor_window_secs: 1_200,
                ..Default::default()
            },
            ..Default::default()
        }
    }
}
