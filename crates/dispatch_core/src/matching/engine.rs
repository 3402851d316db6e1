use std::sync::Arc;

use tracing::{debug, warn};

use super::policy::score_candidate;
use super::types::{rank_candidates, MatchCandidate};
use crate::clock::Clock;
use crate::config::MatchingConfig;
use crate::eta::{local_hour, EtaModel};
use crate::geo::{Coordinates, GeoError};
use crate::index::GeoIndex;
use crate::rides::RideRequest;
use crate::types::VehicleClass;

/// Read-only matcher: radius query, ETA, composite score, rank.
pub struct DispatchEngine {
    index: Arc<GeoIndex>,
    eta: Arc<dyn EtaModel>,
    clock: Arc<dyn Clock>,
    config: MatchingConfig,
}

impl DispatchEngine {
    pub fn new(
        index: Arc<GeoIndex>,
        eta: Arc<dyn EtaModel>,
        clock: Arc<dyn Clock>,
        config: MatchingConfig,
    ) -> Self {
        Self {
            index,
            eta,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &MatchingConfig {
        &self.config
    }

    pub fn match_request(
        &self,
        request: &RideRequest,
        radius_km: f64,
    ) -> Result<Vec<MatchCandidate>, GeoError> {
        self.match_at(request.pickup, &request.vehicle_class, radius_km)
    }

    /// Ranked candidates of `vehicle_class` around `pickup`, best first.
    pub fn match_at(
        &self,
        pickup: Coordinates,
        vehicle_class: &VehicleClass,
        radius_km: f64,
    ) -> Result<Vec<MatchCandidate>, GeoError> {
        if !self.eta.knows_class(vehicle_class) {
            warn!(%vehicle_class, "no ETA model for vehicle class, skipping match");
            return Ok(Vec::new());
        }
        let nearby = self.index.query_radius(pickup, radius_km, Some(vehicle_class))?;
        let hour = local_hour(self.clock.now_ms(), self.eta.utc_offset_minutes());

        let mut candidates: Vec<MatchCandidate> = nearby
            .into_iter()
            .filter_map(|hit| {
                let eta = match self.eta.estimate(hit.distance_km, &hit.state.vehicle_class, hour) {
                    Ok(eta) => eta,
                    Err(error) => {
                        warn!(driver_id = %hit.state.driver_id, %error, "skipping candidate");
                        return None;
                    }
                };
                let components = score_candidate(hit.distance_km, radius_km, hit.state.rating);
                Some(MatchCandidate {
                    driver_id: hit.state.driver_id,
                    distance_km: hit.distance_km,
                    eta_minutes: eta.minutes,
                    eta_confidence: eta.confidence,
                    rating_score: hit.state.rating,
                    composite_score: components.composite(&self.config.weights),
                })
            })
            .collect();

        rank_candidates(&mut candidates, self.config.max_candidates);
        debug!(
            candidates = candidates.len(),
            radius_km,
            %vehicle_class,
            "ranked match candidates"
        );
        Ok(candidates)
    }
}
