//! Geographic primitives: coordinates, haversine distance and H3 geocells.
//!
//! Positions are plain WGS84 degrees. Every driver position is bucketed into an
//! H3 cell at the index resolution (default 9, ~0.17km edge), which is the
//! spatial key used to bound radius searches.

use h3o::{CellIndex, LatLng, Resolution};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Mean Earth radius in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeoError {
    #[error("latitude {0} outside [-90, 90]")]
    LatitudeOutOfRange(f64),
    #[error("longitude {0} outside [-180, 180]")]
    LongitudeOutOfRange(f64),
    #[error("coordinate is not a finite number")]
    NonFinite,
    #[error("unsupported H3 resolution {0}")]
    InvalidResolution(u8),
    #[error("search radius {0} must be a finite non-negative number of km")]
    InvalidRadius(f64),
}

/// A point on the map in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinates {
    /// Builds a validated coordinate pair. NaN and infinities are rejected by
    /// the range checks.
    pub fn new(lat: f64, lon: f64) -> Result<Self, GeoError> {
        if !(-90.0..=90.0).contains(&lat) {
            return Err(GeoError::LatitudeOutOfRange(lat));
        }
        if !(-180.0..=180.0).contains(&lon) {
            return Err(GeoError::LongitudeOutOfRange(lon));
        }
        Ok(Self { lat, lon })
    }

    /// Re-checks bounds on a value that may have been deserialized directly.
    pub fn validate(self) -> Result<Self, GeoError> {
        Self::new(self.lat, self.lon)
    }

    pub fn distance_km(&self, other: &Coordinates) -> f64 {
        haversine_km(*self, *other)
    }

    /// The H3 cell containing this point at `resolution`.
    pub fn cell(&self, resolution: Resolution) -> Result<CellIndex, GeoError> {
        LatLng::new(self.lat, self.lon)
            .map(|latlng| latlng.to_cell(resolution))
            .map_err(|_| GeoError::NonFinite)
    }
}

impl From<LatLng> for Coordinates {
    fn from(value: LatLng) -> Self {
        Self {
            lat: value.lat(),
            lon: value.lng(),
        }
    }
}

/// Great-circle distance between two points in kilometres.
pub fn haversine_km(a: Coordinates, b: Coordinates) -> f64 {
    let (lat1, lon1) = (a.lat.to_radians(), a.lon.to_radians());
    let (lat2, lon2) = (b.lat.to_radians(), b.lon.to_radians());
    let sin_dlat = ((lat2 - lat1) * 0.5).sin();
    let sin_dlon = ((lon2 - lon1) * 0.5).sin();
    let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlon * sin_dlon;
    // Rounding can push h a hair past 1 for antipodal points.
    let h = h.clamp(0.0, 1.0);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_KM * c
}

pub fn resolution_from_u8(value: u8) -> Result<Resolution, GeoError> {
    Resolution::try_from(value).map_err(|_| GeoError::InvalidResolution(value))
}

/// Center of an H3 cell.
pub fn cell_center(cell: CellIndex) -> Coordinates {
    LatLng::from(cell).into()
}

/// Largest distance from the cell center to any of its boundary vertices.
///
/// Every point inside the cell lies within this distance of the center, which
/// is what makes ring pruning in the radius search safe.
pub fn cell_circumradius_km(cell: CellIndex) -> f64 {
    let center = cell_center(cell);
    cell.boundary()
        .iter()
        .map(|vertex| haversine_km(center, Coordinates::from(*vertex)))
        .fold(0.0, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sf() -> Coordinates {
        Coordinates::new(37.7749, -122.4194).expect("valid")
    }

    #[test]
    fn haversine_is_symmetric_and_zero_on_self() {
        let a = sf();
        let b = Coordinates::new(40.7128, -74.0060).expect("valid");
        assert_eq!(haversine_km(a, b), haversine_km(b, a));
        assert_eq!(haversine_km(a, a), 0.0);
    }

    #[test]
    fn haversine_matches_known_distance() {
        // San Francisco to New York is roughly 4130km.
        let ny = Coordinates::new(40.7128, -74.0060).expect("valid");
        let distance = haversine_km(sf(), ny);
        assert!((distance - 4129.0).abs() < 10.0, "got {distance}");
    }

    #[test]
    fn haversine_handles_antipodes() {
        let a = Coordinates::new(0.0, 0.0).expect("valid");
        let b = Coordinates::new(0.0, 180.0).expect("valid");
        let half_circumference = std::f64::consts::PI * EARTH_RADIUS_KM;
        assert!((haversine_km(a, b) - half_circumference).abs() < 1e-6);
    }

    #[test]
    fn rejects_out_of_range_coordinates() {
        assert_eq!(
            Coordinates::new(91.0, 0.0),
            Err(GeoError::LatitudeOutOfRange(91.0))
        );
        assert_eq!(
            Coordinates::new(0.0, -180.5),
            Err(GeoError::LongitudeOutOfRange(-180.5))
        );
        assert!(Coordinates::new(f64::NAN, 0.0).is_err());
        assert!(Coordinates::new(90.0, 180.0).is_ok());
    }

    #[test]
    fn circumradius_covers_cell_boundary() {
        let cell = sf().cell(Resolution::Nine).expect("cell");
        let radius = cell_circumradius_km(cell);
        // Resolution 9 edges average ~0.17km.
        assert!(radius > 0.1 && radius < 0.3, "got {radius}");
        assert!(haversine_km(cell_center(cell), sf()) <= radius);
    }
}
