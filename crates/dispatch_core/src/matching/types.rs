use std::cmp::Ordering;

use serde::Serialize;

use crate::types::DriverId;

/// A scored driver for one ride request. Ephemeral: produced per query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchCandidate {
    pub driver_id: DriverId,
    pub distance_km: f64,
    pub eta_minutes: f64,
    pub eta_confidence: f64,
    /// Stored driver rating on the 0-5 scale.
    pub rating_score: f64,
    pub composite_score: f64,
}

fn rank_order(a: &MatchCandidate, b: &MatchCandidate) -> Ordering {
    b.composite_score
        .total_cmp(&a.composite_score)
        .then_with(|| a.distance_km.total_cmp(&b.distance_km))
        .then_with(|| a.driver_id.cmp(&b.driver_id))
}

/// Best first: composite score descending, then distance ascending, then
/// driver id ascending. Keeps at most `limit` candidates.
pub fn rank_candidates(candidates: &mut Vec<MatchCandidate>, limit: usize) {
    candidates.sort_by(rank_order);
    candidates.truncate(limit);
}
