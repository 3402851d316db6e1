//! Turns ranked candidates into an assignment.
//!
//! The engine only reads the index, so two requests may rank the same
//! driver first. The dispatcher settles that by claiming the driver in the
//! index before committing the ride; the loser moves on to its next
//! candidate.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::config::RematchConfig;
use crate::events::{DispatchEvent, EventPublisher, MatchEvent};
use crate::geo::GeoError;
use crate::index::GeoIndex;
use crate::matching::DispatchEngine;
use crate::persistence::{PersistCommand, PersistHandle};
use crate::rides::{IntakeError, RideBook, RideIntake, RideRequest, RideStatus, TransitionError};
use crate::telemetry::{bump, DispatchTelemetry};
use crate::types::RequestId;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DispatchError {
    #[error("unknown ride request {0}")]
    UnknownRequest(RequestId),
    #[error(transparent)]
    Geo(#[from] GeoError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum AssignOutcome {
    Matched(MatchEvent),
    /// Nobody could be claimed; the request stays pending.
    NoCandidates,
    /// The request was already matched, expired or cancelled.
    NotPending(RideStatus),
}

pub struct Dispatcher {
    engine: Arc<DispatchEngine>,
    index: Arc<GeoIndex>,
    rides: Arc<RideBook>,
    publisher: Arc<dyn EventPublisher>,
    persistence: PersistHandle,
    clock: Arc<dyn Clock>,
    telemetry: Arc<DispatchTelemetry>,
    rematch: RematchConfig,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        engine: Arc<DispatchEngine>,
        index: Arc<GeoIndex>,
        rides: Arc<RideBook>,
        publisher: Arc<dyn EventPublisher>,
        persistence: PersistHandle,
        clock: Arc<dyn Clock>,
        telemetry: Arc<DispatchTelemetry>,
        rematch: RematchConfig,
    ) -> Self {
        Self {
            engine,
            index,
            rides,
            publisher,
            persistence,
            clock,
            telemetry,
            rematch,
        }
    }

    pub fn rides(&self) -> &Arc<RideBook> {
        &self.rides
    }

    pub fn rematch_config(&self) -> &RematchConfig {
        &self.rematch
    }

    pub fn publisher(&self) -> &Arc<dyn EventPublisher> {
        &self.publisher
    }

    pub fn telemetry(&self) -> &Arc<DispatchTelemetry> {
        &self.telemetry
    }

    /// Registers a new request and makes the first match attempt at the
    /// initial radius.
    pub fn submit(&self, intake: RideIntake) -> Result<(RideRequest, AssignOutcome), IntakeError> {
        let request = self
            .rides
            .submit(intake, self.clock.now_ms())
            .inspect_err(|_| bump(&self.telemetry.requests_rejected))?;
        info!(
            request_id = %request.request_id,
            vehicle_class = %request.vehicle_class,
            "ride request accepted"
        );
        self.persist_ride(&request);

        let outcome = match self.attempt(request.request_id) {
            Ok(outcome) => outcome,
            // Coordinates were validated at intake.
            Err(_) => AssignOutcome::NoCandidates,
        };
        let current = self.rides.get(request.request_id).unwrap_or(request);
        Ok((current, outcome))
    }

    /// Counts an attempt and tries to assign at the radius for that attempt.
    pub fn attempt(&self, request_id: RequestId) -> Result<AssignOutcome, DispatchError> {
        let Some(request) = self.rides.get(request_id) else {
            return Err(DispatchError::UnknownRequest(request_id));
        };
        let radius_km = self.rematch.radius_for_attempt(request.attempts);
        if self
            .rides
            .record_attempt(request_id, self.clock.now_ms())
            .is_none()
        {
            return Ok(AssignOutcome::NotPending(request.status));
        }
        self.try_assign(request_id, radius_km)
    }

    /// Claims the best available candidate within `radius_km` and commits the
    /// match. A claim on a request that stopped being pending is released.
    pub fn try_assign(
        &self,
        request_id: RequestId,
        radius_km: f64,
    ) -> Result<AssignOutcome, DispatchError> {
        let request = self
            .rides
            .get(request_id)
            .ok_or(DispatchError::UnknownRequest(request_id))?;
        if request.status != RideStatus::Pending {
            return Ok(AssignOutcome::NotPending(request.status));
        }

        bump(&self.telemetry.match_attempts);
        let candidates = self.engine.match_request(&request, radius_km)?;
        for candidate in candidates {
            if !self.index.claim(candidate.driver_id) {
                debug!(driver_id = %candidate.driver_id, %request_id, "candidate taken, trying next");
                continue;
            }
            match self.rides.commit_match(request_id, candidate.driver_id) {
                Ok(matched) => {
                    let event = MatchEvent {
                        request_id,
                        driver_id: candidate.driver_id,
                        distance_km: candidate.distance_km,
                        eta_minutes: candidate.eta_minutes,
                        eta_confidence: candidate.eta_confidence,
                        composite_score: candidate.composite_score,
                    };
                    bump(&self.telemetry.requests_matched);
                    info!(
                        %request_id,
                        driver_id = %candidate.driver_id,
                        distance_km = candidate.distance_km,
                        radius_km,
                        "ride request matched"
                    );
                    self.persist_ride(&matched);
                    if let Some(driver) = self.index.get(candidate.driver_id) {
                        self.persistence.submit(PersistCommand::Driver(driver));
                    }
                    self.publisher.publish(DispatchEvent::Matched(event.clone()));
                    return Ok(AssignOutcome::Matched(event));
                }
                Err(_) => {
                    self.index.release(candidate.driver_id);
                    bump(&self.telemetry.match_results_discarded);
                    let status = self
                        .rides
                        .get(request_id)
                        .map(|current| current.status)
                        .unwrap_or(request.status);
                    debug!(%request_id, ?status, "request left pending mid-match, result discarded");
                    return Ok(AssignOutcome::NotPending(status));
                }
            }
        }
        debug!(%request_id, radius_km, "no driver available");
        Ok(AssignOutcome::NoCandidates)
    }

    pub fn cancel(&self, request_id: RequestId) -> Result<RideRequest, TransitionError> {
        let cancelled = self.rides.cancel(request_id)?;
        info!(%request_id, "ride request cancelled");
        self.persist_ride(&cancelled);
        Ok(cancelled)
    }

    pub(crate) fn persist_ride(&self, request: &RideRequest) {
        self.persistence.submit(PersistCommand::Ride(request.clone()));
    }
}
