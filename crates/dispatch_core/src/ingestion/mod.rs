//! Location ingestion: sharded consumers feeding the geo index.

mod pipeline;
mod source;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geo::{Coordinates, GeoError};
use crate::index::DriverUpdate;
use crate::types::{DriverId, VehicleClass, VehicleClassSet};

pub use pipeline::{IngestOutcome, IngestionPipeline};
pub use source::{
    shard_for, ChannelSource, ChannelStream, LocationPublisher, LocationSource, LocationStream,
    StreamError,
};

/// A driver position report as carried on the location stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationUpdate {
    pub driver_id: DriverId,
    pub lat: f64,
    pub lon: f64,
    pub online: bool,
    pub available: bool,
    pub vehicle_class: VehicleClass,
    pub timestamp_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error(transparent)]
    Geo(#[from] GeoError),
    #[error("rating {0} outside [0, 5]")]
    RatingOutOfRange(f64),
    #[error("{0} must be a finite number")]
    NonFinite(&'static str),
    #[error("unknown vehicle class {0}")]
    UnknownVehicleClass(VehicleClass),
    #[error("timestamp {timestamp_ms} is ahead of the clock ({now_ms})")]
    FromTheFuture { timestamp_ms: u64, now_ms: u64 },
}

impl LocationUpdate {
    pub fn validate(self, classes: &VehicleClassSet) -> Result<DriverUpdate, ValidationError> {
        let position = Coordinates::new(self.lat, self.lon)?;
        if let Some(rating) = self.rating {
            if !(0.0..=5.0).contains(&rating) {
                return Err(ValidationError::RatingOutOfRange(rating));
            }
        }
        if self.heading.is_some_and(|heading| !heading.is_finite()) {
            return Err(ValidationError::NonFinite("heading"));
        }
        if self.speed.is_some_and(|speed| !speed.is_finite()) {
            return Err(ValidationError::NonFinite("speed"));
        }
        if !classes.contains(&self.vehicle_class) {
            return Err(ValidationError::UnknownVehicleClass(self.vehicle_class));
        }
        Ok(DriverUpdate {
            driver_id: self.driver_id,
            position,
            online: self.online,
            available: self.available,
            vehicle_class: self.vehicle_class,
            timestamp_ms: self.timestamp_ms,
            rating: self.rating,
            heading: self.heading,
            speed: self.speed,
        })
    }
}
