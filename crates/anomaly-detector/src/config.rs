//! Detector configuration

use serde::{Deserialize, Serialize};
use telemetry::{ValidationConfig, WindowConfig};

/// Detector configuration
///
/// All thresholds are policy parameters; the defaults are tuned for
/// tourists travelling by road between overnight stops.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Rolling window bounds
    pub window: WindowConfig,

    /// Sample range checks
    pub validation: ValidationConfig,

    /// Silence after an online sample that counts as a dropout (minutes)
    pub dropout_gap_minutes: i64,

    /// Lateral distance from the declared route (meters)
    pub route_deviation_m: f64,

    /// Stationary time outside accommodation before alerting (minutes)
    pub inactivity_minutes: i64,

    /// Movement below this radius counts as stationary (meters)
    pub movement_epsilon_m: f64,

    /// Implausibly high ground speed (km/h)
    pub max_speed_kmh: f64,

    /// Below this speed the subject is considered stopped (km/h)
    pub min_moving_speed_kmh: f64,

    /// Segment speed that indicates vehicle travel (km/h)
    pub vehicle_speed_kmh: f64,

    /// Segments shorter than this are too noisy for speed inference (seconds)
    pub min_speed_interval_secs: i64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            window: WindowConfig::default(),
            validation: ValidationConfig::default(),
            dropout_gap_minutes: 15,
            route_deviation_m: 2_000.0,
            inactivity_minutes: 45,
            movement_epsilon_m: 50.0,
            max_speed_kmh: 160.0,
            min_moving_speed_kmh: 2.0,
            vehicle_speed_kmh: 25.0,
            min_speed_interval_secs: 10,
        }
    }
}

impl DetectorConfig {
    /// Create strict config (lower thresholds)
    pub fn strict() -> Self {
        Self {
            dropout_gap_minutes: 10,
            route_deviation_m: 1_000.0,
            inactivity_minutes: 30,
            max_speed_kmh: 130.0,
            ..Default::default()
        }
    }

    /// Create lenient config (higher thresholds)
    pub fn lenient() -> Self {
        Self {
            dropout_gap_minutes: 30,
            route_deviation_m: 5_000.0,
            inactivity_minutes: 90,
            movement_epsilon_m: 100.0,
            max_speed_kmh: 200.0,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        let strict = DetectorConfig::strict();
        let lenient = DetectorConfig::lenient();
        let default = DetectorConfig::default();
        assert!(strict.dropout_gap_minutes < default.dropout_gap_minutes);
        assert!(lenient.route_deviation_m > default.route_deviation_m);
        assert_eq!(strict.window.window_minutes, 60);
    }
}
