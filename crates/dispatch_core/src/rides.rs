//! Ride requests and their lifecycle up to dispatch.
//!
//! A request starts `Pending` and ends in exactly one of `Matched`, `Expired`
//! or `Cancelled`. All status changes go through [`RideStatus::transition`],
//! applied under the request's map entry so concurrent writers (the
//! dispatcher, the rematch pass and a rider cancelling) cannot both win.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geo::{Coordinates, GeoError};
use crate::types::{DriverId, RequestId, RiderId, VehicleClass, VehicleClassSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RideStatus {
    Pending,
    Matched,
    Expired,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("ride status cannot move from {from:?} to {to:?}")]
    Invalid { from: RideStatus, to: RideStatus },
    #[error("unknown ride request {0}")]
    UnknownRequest(RequestId),
}

impl RideStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn transition(self, to: RideStatus) -> Result<RideStatus, TransitionError> {
        match (self, to) {
            (Self::Pending, Self::Matched | Self::Expired | Self::Cancelled) => Ok(to),
            (from, to) => Err(TransitionError::Invalid { from, to }),
        }
    }
}

/// Inbound ride request as received from the client boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideIntake {
    pub request_id: RequestId,
    pub rider_id: RiderId,
    pub pickup_lat: f64,
    pub pickup_lon: f64,
    pub dropoff_lat: f64,
    pub dropoff_lon: f64,
    pub vehicle_class: VehicleClass,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum IntakeError {
    #[error("invalid pickup: {0}")]
    InvalidPickup(GeoError),
    #[error("invalid dropoff: {0}")]
    InvalidDropoff(GeoError),
    #[error("unknown vehicle class {0}")]
    UnknownVehicleClass(VehicleClass),
    #[error("ride request {0} already exists")]
    Duplicate(RequestId),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideRequest {
    pub request_id: RequestId,
    pub rider_id: RiderId,
    pub pickup: Coordinates,
    pub dropoff: Coordinates,
    pub vehicle_class: VehicleClass,
    pub status: RideStatus,
    pub created_at_ms: u64,
    /// Match attempts made so far; drives the widening search radius.
    pub attempts: u32,
    pub last_attempt_ms: Option<u64>,
    pub matched_driver: Option<DriverId>,
}

impl RideRequest {
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.created_at_ms)
    }

    /// Time since the last match attempt, or since creation if none was made.
    pub fn idle_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.last_attempt_ms.unwrap_or(self.created_at_ms))
    }
}

/// Registry of ride requests keyed by id.
#[derive(Debug)]
pub struct RideBook {
    classes: VehicleClassSet,
    requests: DashMap<RequestId, RideRequest>,
}

impl RideBook {
    pub fn new(classes: VehicleClassSet) -> Self {
        Self {
            classes,
            requests: DashMap::new(),
        }
    }

    pub fn submit(&self, intake: RideIntake, now_ms: u64) -> Result<RideRequest, IntakeError> {
        let pickup = Coordinates::new(intake.pickup_lat, intake.pickup_lon)
            .map_err(IntakeError::InvalidPickup)?;
        let dropoff = Coordinates::new(intake.dropoff_lat, intake.dropoff_lon)
            .map_err(IntakeError::InvalidDropoff)?;
        if !self.classes.contains(&intake.vehicle_class) {
            return Err(IntakeError::UnknownVehicleClass(intake.vehicle_class));
        }

        match self.requests.entry(intake.request_id) {
            Entry::Occupied(_) => Err(IntakeError::Duplicate(intake.request_id)),
            Entry::Vacant(entry) => {
                let request = RideRequest {
                    request_id: intake.request_id,
                    rider_id: intake.rider_id,
                    pickup,
                    dropoff,
                    vehicle_class: intake.vehicle_class,
                    status: RideStatus::Pending,
                    created_at_ms: now_ms,
                    attempts: 0,
                    last_attempt_ms: None,
                    matched_driver: None,
                };
                entry.insert(request.clone());
                Ok(request)
            }
        }
    }

    pub fn get(&self, request_id: RequestId) -> Option<RideRequest> {
        self.requests.get(&request_id).map(|entry| entry.clone())
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Snapshot of pending requests, oldest first.
    pub fn pending(&self) -> Vec<RideRequest> {
        let mut pending: Vec<RideRequest> = self
            .requests
            .iter()
            .filter(|entry| entry.status == RideStatus::Pending)
            .map(|entry| entry.clone())
            .collect();
        pending.sort_by_key(|request| (request.created_at_ms, request.request_id));
        pending
    }

    pub fn transition(
        &self,
        request_id: RequestId,
        to: RideStatus,
    ) -> Result<RideRequest, TransitionError> {
        self.update(request_id, |request| {
            request.status = request.status.transition(to)?;
            Ok(())
        })
    }

    /// Rider-initiated cancellation.
    pub fn cancel(&self, request_id: RequestId) -> Result<RideRequest, TransitionError> {
        self.transition(request_id, RideStatus::Cancelled)
    }

    /// Commits a claimed driver to a still-pending request.
    pub fn commit_match(
        &self,
        request_id: RequestId,
        driver_id: DriverId,
    ) -> Result<RideRequest, TransitionError> {
        self.update(request_id, |request| {
            request.status = request.status.transition(RideStatus::Matched)?;
            request.matched_driver = Some(driver_id);
            Ok(())
        })
    }

    /// Counts a match attempt against a pending request. Returns the updated
    /// request, or `None` if it is unknown or no longer pending.
    pub fn record_attempt(&self, request_id: RequestId, now_ms: u64) -> Option<RideRequest> {
        let mut entry = self.requests.get_mut(&request_id)?;
        if entry.status != RideStatus::Pending {
            return None;
        }
        entry.attempts = entry.attempts.saturating_add(1);
        entry.last_attempt_ms = Some(now_ms);
        Some(entry.clone())
    }

    fn update(
        &self,
        request_id: RequestId,
        apply: impl FnOnce(&mut RideRequest) -> Result<(), TransitionError>,
    ) -> Result<RideRequest, TransitionError> {
        let mut entry = self
            .requests
            .get_mut(&request_id)
            .ok_or(TransitionError::UnknownRequest(request_id))?;
        let mut updated = entry.clone();
        apply(&mut updated)?;
        *entry = updated.clone();
        Ok(updated)
    }
}
