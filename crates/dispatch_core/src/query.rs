//! Synchronous read API for the client-facing boundary.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::clock::Clock;
use crate::eta::{local_hour, EtaError, EtaModel};
use crate::geo::{haversine_km, Coordinates, GeoError};
use crate::index::{GeoIndex, NearbyDriver};
use crate::matching::{DispatchEngine, MatchCandidate};
use crate::rides::RideRequest;
use crate::types::VehicleClass;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum QueryError {
    #[error(transparent)]
    Geo(#[from] GeoError),
    #[error(transparent)]
    Eta(#[from] EtaError),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EtaQuote {
    pub minutes: f64,
    pub distance_km: f64,
    pub confidence: f64,
}

pub struct QueryApi {
    index: Arc<GeoIndex>,
    engine: Arc<DispatchEngine>,
    eta: Arc<dyn EtaModel>,
    clock: Arc<dyn Clock>,
}

impl QueryApi {
    pub fn new(
        index: Arc<GeoIndex>,
        engine: Arc<DispatchEngine>,
        eta: Arc<dyn EtaModel>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            index,
            engine,
            eta,
            clock,
        }
    }

    /// Available drivers around a point, nearest first. The radius defaults
    /// to the matching radius.
    pub fn nearby_drivers(
        &self,
        lat: f64,
        lon: f64,
        radius_km: Option<f64>,
        vehicle_class: Option<&VehicleClass>,
    ) -> Result<Vec<NearbyDriver>, QueryError> {
        let center = Coordinates::new(lat, lon)?;
        let radius_km = radius_km.unwrap_or(self.engine.config().default_radius_km);
        Ok(self.index.query_radius(center, radius_km, vehicle_class)?)
    }

    /// Ranked candidates for a request at the default radius.
    pub fn match_request(&self, request: &RideRequest) -> Result<Vec<MatchCandidate>, QueryError> {
        let radius_km = self.engine.config().default_radius_km;
        Ok(self.engine.match_request(request, radius_km)?)
    }

    pub fn estimate_eta(
        &self,
        driver: Coordinates,
        pickup: Coordinates,
        vehicle_class: &VehicleClass,
    ) -> Result<EtaQuote, QueryError> {
        let distance_km = haversine_km(driver.validate()?, pickup.validate()?);
        let hour = local_hour(self.clock.now_ms(), self.eta.utc_offset_minutes());
        let estimate = self.eta.estimate(distance_km, vehicle_class, hour)?;
        Ok(EtaQuote {
            minutes: estimate.minutes,
            distance_km,
            confidence: estimate.confidence,
        })
    }
}
