//! Device Sample Types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::geo::GeoPoint;

/// Stable identifier of a tracked subject
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(pub String);

impl SubjectId {
    /// Create a subject id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw id
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubjectId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for SubjectId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Network connectivity reported by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Connectivity {
    #[default]
    Online,
    Limited,
    Offline,
}

impl Connectivity {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Connectivity::Online => "online",
            Connectivity::Limited => "limited",
            Connectivity::Offline => "offline",
        }
    }
}

/// Location fix with its horizontal accuracy
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lng: f64,
    /// Horizontal accuracy radius in meters
    pub accuracy_m: f64,
}

impl Location {
    pub fn new(lat: f64, lng: f64, accuracy_m: f64) -> Self {
        Self { lat, lng, accuracy_m }
    }

    /// Position without the accuracy radius
    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lng)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.5}, {:.5} (±{:.0} m)", self.lat, self.lng, self.accuracy_m)
    }
}

/// Immutable telemetry record produced by a telemetry source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSample {
    pub subject_id: SubjectId,
    pub timestamp: DateTime<Utc>,
    /// Absent for heartbeat-only samples sent without a fix
    pub location: Option<Location>,
    #[serde(default)]
    pub connectivity: Connectivity,
    /// Battery charge in percent
    pub battery_level: u8,
}

impl DeviceSample {
    /// Whether the device reported itself as fully online
    pub fn is_online(&self) -> bool {
        self.connectivity == Connectivity::Online
    }
}
