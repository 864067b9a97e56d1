//! Sample Validator for Range Checking

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::sample::{DeviceSample, Location};

/// Validation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Latitude valid range (degrees)
    pub lat_range: (f64, f64),
    /// Longitude valid range (degrees)
    pub lng_range: (f64, f64),
    /// Largest accuracy radius accepted for a fix (meters)
    pub max_accuracy_m: f64,
    /// Tolerated device clock skew into the future (seconds)
    pub max_clock_skew_secs: i64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            lat_range: (-90.0, 90.0),
            lng_range: (-180.0, 180.0),
            max_accuracy_m: 5_000.0,
            max_clock_skew_secs: 120,
        }
    }
}

/// Data validator for device samples
#[derive(Debug, Clone, Default)]
pub struct SampleValidator {
    config: ValidationConfig,
}

impl SampleValidator {
    /// Create a new validator with given config
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    /// Validate a single value against a range
    pub fn validate_range(
        &self,
        field: &'static str,
        value: f64,
        range: (f64, f64),
    ) -> Result<(), ValidationError> {
        if !value.is_finite() || value < range.0 || value > range.1 {
            Err(ValidationError::OutOfRange {
                field,
                value,
                min: range.0,
                max: range.1,
            })
        } else {
            Ok(())
        }
    }

    /// Validate a location fix
    pub fn validate_location(&self, location: &Location) -> Result<(), ValidationError> {
        self.validate_range("lat", location.lat, self.config.lat_range)?;
        self.validate_range("lng", location.lng, self.config.lng_range)?;
        self.validate_range("accuracy_m", location.accuracy_m, (0.0, self.config.max_accuracy_m))
    }

    /// Validate a full sample against the evaluation clock
    ///
    /// Ordering against previously accepted samples is checked by the window,
    /// not here.
    pub fn validate(&self, sample: &DeviceSample, now: DateTime<Utc>) -> Result<(), ValidationError> {
        if sample.subject_id.as_str().trim().is_empty() {
            return Err(ValidationError::MissingField("subject_id"));
        }

        self.validate_range("battery_level", f64::from(sample.battery_level), (0.0, 100.0))?;

        let skew = sample.timestamp - now;
        if skew > Duration::seconds(self.config.max_clock_skew_secs) {
            return Err(ValidationError::FutureTimestamp {
                timestamp: sample.timestamp,
                skew_secs: skew.num_seconds(),
            });
        }

        match &sample.location {
            Some(location) => self.validate_location(location),
            None if sample.is_online() => Err(ValidationError::MissingField("location")),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::{Connectivity, SubjectId};

    fn sample(location: Option<Location>, connectivity: Connectivity) -> DeviceSample {
        DeviceSample {
            subject_id: SubjectId::from("TS-001"),
            timestamp: Utc::now(),
            location,
            connectivity,
            battery_level: 80,
        }
    }

    #[test]
    fn test_valid_sample() {
        let validator = SampleValidator::default();
        let s = sample(Some(Location::new(26.14, 91.73, 10.0)), Connectivity::Online);
        assert!(validator.validate(&s, Utc::now()).is_ok());
    }

    #[test]
    fn test_invalid_coordinates() {
        let validator = SampleValidator::default();
        let s = sample(Some(Location::new(95.0, 91.73, 10.0)), Connectivity::Online);
        assert!(matches!(
            validator.validate(&s, Utc::now()),
            Err(ValidationError::OutOfRange { field: "lat", .. })
        ));

        let s = sample(Some(Location::new(26.0, f64::NAN, 10.0)), Connectivity::Online);
        assert!(validator.validate(&s, Utc::now()).is_err());
    }

    #[test]
    fn test_online_sample_requires_location() {
        let validator = SampleValidator::default();
        let s = sample(None, Connectivity::Online);
        assert_eq!(
            validator.validate(&s, Utc::now()),
            Err(ValidationError::MissingField("location"))
        );

        let heartbeat = sample(None, Connectivity::Offline);
        assert!(validator.validate(&heartbeat, Utc::now()).is_ok());
    }

    #[test]
    fn test_battery_and_subject() {
        let validator = SampleValidator::default();
        let mut s = sample(None, Connectivity::Limited);
        s.battery_level = 101;
        assert!(validator.validate(&s, Utc::now()).is_err());

        let mut s = sample(None, Connectivity::Limited);
        s.subject_id = SubjectId::from("  ");
        assert_eq!(
            validator.validate(&s, Utc::now()),
            Err(ValidationError::MissingField("subject_id"))
        );
    }

    #[test]
    fn test_future_timestamp_rejected() {
        let validator = SampleValidator::default();
        let mut s = sample(None, Connectivity::Offline);
        s.timestamp = Utc::now() + Duration::minutes(30);
        assert!(matches!(
            validator.validate(&s, Utc::now()),
            Err(ValidationError::FutureTimestamp { .. })
        ));
    }
}
