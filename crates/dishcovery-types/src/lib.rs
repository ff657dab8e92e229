//! Shared value types for the Dishcovery voice relay.
//!
//! This crate provides the wire-level types exchanged between the client,
//! the relay, and the upstream speech service: immutable audio chunks,
//! structured control messages, the geographic bias carried by every call,
//! and the turn types of the text chat collaborator.
//!
//! Nothing here performs I/O. The server and upstream crates depend on
//! `dishcovery-types` for these definitions so the two sides of the relay
//! agree on a single vocabulary.

pub mod audio;
pub mod chat;
pub mod control;

pub use audio::{AudioChunk, AudioFormat};
pub use chat::{ChatReply, ChatRequest, ChatRole, ChatTurn};
pub use control::ControlMessage;

use serde::{Deserialize, Serialize};

/// A latitude/longitude pair used to bias place results toward the caller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Latitude in decimal degrees.
    pub latitude: f64,
    /// Longitude in decimal degrees.
    pub longitude: f64,
}

impl GeoPoint {
    /// Fallback coordinate used when a call does not supply one
    /// (University of Arizona campus).
    pub const CAMPUS: GeoPoint = GeoPoint {
        latitude: 32.2319,
        longitude: -110.9501,
    };

    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Builds a point from optional components, filling each missing one
    /// from `fallback`.
    pub fn or_fallback(latitude: Option<f64>, longitude: Option<f64>, fallback: GeoPoint) -> Self {
        Self {
            latitude: latitude.unwrap_or(fallback.latitude),
            longitude: longitude.unwrap_or(fallback.longitude),
        }
    }

    /// Finite and within -90..=90 latitude, -180..=180 longitude.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

impl Default for GeoPoint {
    fn default() -> Self {
        Self::CAMPUS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geo_point_defaults_to_campus() {
        let point = GeoPoint::default();
        assert_eq!(point.latitude, 32.2319);
        assert_eq!(point.longitude, -110.9501);
    }

    #[test]
    fn geo_point_fills_missing_components() {
        let point = GeoPoint::or_fallback(Some(40.0), None, GeoPoint::CAMPUS);
        assert_eq!(point, GeoPoint::new(40.0, -110.9501));

        let point = GeoPoint::or_fallback(None, None, GeoPoint::new(1.0, 2.0));
        assert_eq!(point, GeoPoint::new(1.0, 2.0));
    }

    #[test]
    fn geo_point_validity() {
        assert!(GeoPoint::CAMPUS.is_valid());
        assert!(GeoPoint::new(-90.0, 180.0).is_valid());
        assert!(!GeoPoint::new(f64::NAN, 0.0).is_valid());
        assert!(!GeoPoint::new(0.0, f64::INFINITY).is_valid());
        assert!(!GeoPoint::new(91.0, 0.0).is_valid());
        assert!(!GeoPoint::new(0.0, -180.5).is_valid());
    }
}
