//! Subject Telemetry
//!
//! Shared telemetry types consumed by the safety core:
//! - Device samples (location fix, connectivity, battery)
//! - Sample validation and range checking
//! - Geodesy helpers (distances, route corridors, zone membership)
//! - Bounded, time-monotonic sample windows

mod error;
pub mod geo;
mod sample;
mod validator;
mod window;

pub use error::ValidationError;
pub use geo::{GeoPoint, Zone};
pub use sample::{Connectivity, DeviceSample, Location, SubjectId};
pub use validator::{SampleValidator, ValidationConfig};
pub use window::{SampleWindow, WindowConfig};
