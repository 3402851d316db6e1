use h3o::CellIndex;
use serde::{Deserialize, Serialize};

use crate::geo::Coordinates;
use crate::types::{DriverId, VehicleClass};

/// Serde helper: serialize a `CellIndex` as its raw `u64`.
mod cell_serde {
    use h3o::CellIndex;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(cell: &CellIndex, ser: S) -> Result<S::Ok, S::Error> {
        u64::from(*cell).serialize(ser)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<CellIndex, D::Error> {
        let raw = u64::deserialize(de)?;
        CellIndex::try_from(raw).map_err(serde::de::Error::custom)
    }
}

/// A validated position/status report for one driver, ready for the index.
#[derive(Debug, Clone, PartialEq)]
pub struct DriverUpdate {
    pub driver_id: DriverId,
    pub position: Coordinates,
    pub online: bool,
    pub available: bool,
    pub vehicle_class: VehicleClass,
    pub timestamp_ms: u64,
    /// `None` keeps the stored rating.
    pub rating: Option<f64>,
    pub heading: Option<f64>,
    pub speed: Option<f64>,
}

/// The live record of one driver. Owned by [`super::GeoIndex`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverState {
    pub driver_id: DriverId,
    pub position: Coordinates,
    #[serde(with = "cell_serde")]
    pub cell: CellIndex,
    pub online: bool,
    pub available: bool,
    pub vehicle_class: VehicleClass,
    pub rating: f64,
    pub heading: Option<f64>,
    pub speed: Option<f64>,
    pub last_update_ms: u64,
    /// Held by a pending assignment. Owned by the index: location pings do
    /// not clear it, only `release` or the driver reporting offline/busy.
    #[serde(default)]
    pub claimed: bool,
}

impl DriverState {
    pub(crate) fn from_update(update: DriverUpdate, cell: CellIndex, default_rating: f64) -> Self {
        Self {
            driver_id: update.driver_id,
            position: update.position,
            cell,
            online: update.online,
            available: update.available,
            vehicle_class: update.vehicle_class,
            rating: update.rating.unwrap_or(default_rating),
            heading: update.heading,
            speed: update.speed,
            last_update_ms: update.timestamp_ms,
            claimed: false,
        }
    }

    pub(crate) fn apply(&mut self, update: DriverUpdate, cell: CellIndex) {
        if !update.online || !update.available {
            self.claimed = false;
        }
        self.position = update.position;
        self.cell = cell;
        self.online = update.online;
        self.available = update.available;
        self.vehicle_class = update.vehicle_class;
        if let Some(rating) = update.rating {
            self.rating = rating;
        }
        if update.heading.is_some() {
            self.heading = update.heading;
        }
        if update.speed.is_some() {
            self.speed = update.speed;
        }
        self.last_update_ms = update.timestamp_ms;
    }

    /// Online, available and unclaimed: the only drivers kept in the cell
    /// buckets.
    pub fn is_dispatchable(&self) -> bool {
        self.online && self.available && !self.claimed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    /// The stored record is at least as new; nothing changed.
    Superseded,
}

/// A radius query hit with its exact distance from the query center.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NearbyDriver {
    pub state: DriverState,
    pub distance_km: f64,
}
