//! Geodesy helpers
//!
//! Distances are computed on a spherical Earth. Segment distances use a local
//! equirectangular projection centered on the query point, which is accurate to
//! well under a percent for the corridor widths used by the detection rules.

use serde::{Deserialize, Serialize};

/// Mean Earth radius in meters
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Position in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Great-circle distance in meters
    pub fn distance_m(&self, other: &GeoPoint) -> f64 {
        haversine_m(self, other)
    }
}

/// Named polygon (restricted area, hotel, campsite)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub name: String,
    /// Vertices in order; the ring is closed implicitly
    pub polygon: Vec<GeoPoint>,
}

impl Zone {
    pub fn new(name: impl Into<String>, polygon: Vec<GeoPoint>) -> Self {
        Self {
            name: name.into(),
            polygon,
        }
    }

    /// Point-in-polygon test (ray casting)
    pub fn contains(&self, point: &GeoPoint) -> bool {
        polygon_contains(&self.polygon, point)
    }

    /// Distance from the point to the nearest polygon edge in meters
    pub fn distance_to_boundary_m(&self, point: &GeoPoint) -> Option<f64> {
        if self.polygon.is_empty() {
            return None;
        }
        let mut ring = self.polygon.clone();
        ring.push(self.polygon[0]);
        distance_to_polyline_m(&ring, point)
    }
}

/// Haversine great-circle distance in meters
pub fn haversine_m(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlat = (b.lat - a.lat).to_radians();
    let dlng = (b.lng - a.lng).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

/// Project `p` onto a plane centered at `origin` (meters east, meters north)
fn project(origin: &GeoPoint, p: &GeoPoint) -> (f64, f64) {
    let x = (p.lng - origin.lng).to_radians() * origin.lat.to_radians().cos() * EARTH_RADIUS_M;
    let y = (p.lat - origin.lat).to_radians() * EARTH_RADIUS_M;
    (x, y)
}

/// Distance from `point` to the segment `a`-`b` in meters
pub fn distance_to_segment_m(point: &GeoPoint, a: &GeoPoint, b: &GeoPoint) -> f64 {
    let (ax, ay) = project(point, a);
    let (bx, by) = project(point, b);
    let (dx, dy) = (bx - ax, by - ay);
    let len_sq = dx * dx + dy * dy;

    let t = if len_sq > 0.0 {
        (-(ax * dx + ay * dy) / len_sq).clamp(0.0, 1.0)
    } else {
        0.0
    };

    let (cx, cy) = (ax + t * dx, ay + t * dy);
    (cx * cx + cy * cy).sqrt()
}

/// Shortest distance from `point` to a polyline in meters
///
/// Returns `None` for an empty polyline. A single vertex degenerates to a
/// point distance.
pub fn distance_to_polyline_m(polyline: &[GeoPoint], point: &GeoPoint) -> Option<f64> {
    match polyline {
        [] => None,
        [only] => Some(haversine_m(only, point)),
        _ => polyline
            .windows(2)
            .map(|seg| distance_to_segment_m(point, &seg[0], &seg[1]))
            .min_by(|a, b| a.total_cmp(b)),
    }
}

/// Ray-casting membership test; longitude is the x axis
pub fn polygon_contains(polygon: &[GeoPoint], point: &GeoPoint) -> bool {
    if polygon.len() < 3 {
        return false;
    }

    let mut inside = false;
    let mut j = polygon.len() - 1;
    for i in 0..polygon.len() {
        let (pi, pj) = (&polygon[i], &polygon[j]);
        if (pi.lat > point.lat) != (pj.lat > point.lat) {
            let cross_lng = (pj.lng - pi.lng) * (point.lat - pi.lat) / (pj.lat - pi.lat) + pi.lng;
            if point.lng < cross_lng {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}
