//! Subject travel profile

use serde::{Deserialize, Serialize};
use telemetry::{GeoPoint, Zone};

/// Declared itinerary for a subject
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubjectProfile {
    /// Planned route as a polyline; empty disables route checks
    pub route: Vec<GeoPoint>,
    /// Hotels, campsites and other places where long stays are expected
    pub accommodation_zones: Vec<Zone>,
}

impl SubjectProfile {
    pub fn new(route: Vec<GeoPoint>, accommodation_zones: Vec<Zone>) -> Self {
        Self {
            route,
            accommodation_zones,
        }
    }

    /// Whether the point lies inside any accommodation zone
    pub fn in_accommodation(&self, point: &GeoPoint) -> bool {
        self.accommodation_zones.iter().any(|z| z.contains(point))
    }
}
