//! Test helpers for common fixtures.
//!
//! Shared by the unit tests, the integration tests under `tests/` and the
//! benches, so every test reuses the same geography.

use crate::geo::Coordinates;
use crate::index::DriverUpdate;
use crate::rides::RideIntake;
use crate::types::{DriverId, RequestId, RiderId, VehicleClass};

/// Downtown San Francisco.
pub fn sf_origin() -> Coordinates {
    Coordinates::new(37.7749, -122.4194).expect("valid origin")
}

/// A point `north_km` north and `east_km` east of `origin` (flat-earth
/// approximation, fine for a few kilometres).
pub fn offset_km(origin: Coordinates, north_km: f64, east_km: f64) -> Coordinates {
    let lat = origin.lat + north_km / 111.32;
    let lon = origin.lon + east_km / (111.32 * origin.lat.to_radians().cos());
    Coordinates::new(lat, lon).expect("offset stays in range")
}

/// An online, available STANDARD driver with no rating reported.
pub fn driver_update(id: u64, position: Coordinates, timestamp_ms: u64) -> DriverUpdate {
    DriverUpdate {
        driver_id: DriverId(id),
        position,
        online: true,
        available: true,
        vehicle_class: VehicleClass::standard(),
        timestamp_ms,
        rating: None,
        heading: None,
        speed: None,
    }
}

/// A STANDARD ride intake with pickup at `pickup` and a dropoff 2km north.
pub fn ride_intake(id: u64, pickup: Coordinates) -> RideIntake {
    let dropoff = offset_km(pickup, 2.0, 0.0);
    RideIntake {
        request_id: RequestId(id),
        rider_id: RiderId(id + 10_000),
        pickup_lat: pickup.lat,
        pickup_lon: pickup.lon,
        dropoff_lat: dropoff.lat,
        dropoff_lon: dropoff.lon,
        vehicle_class: VehicleClass::standard(),
    }
}
