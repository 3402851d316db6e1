use crate::config::ScoringWeights;

/// Bonus term for a driver that is online and available at query time.
/// Every candidate the index returns qualifies.
pub const AVAILABILITY_BONUS: f64 = 1.0;

pub const MAX_RATING: f64 = 5.0;

/// Normalised score terms, each within [0, 1].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreComponents {
    pub proximity: f64,
    pub rating: f64,
    pub availability: f64,
}

impl ScoreComponents {
    pub fn composite(&self, weights: &ScoringWeights) -> f64 {
        weights.distance * self.proximity
            + weights.rating * self.rating
            + weights.availability * self.availability
    }
}

pub fn score_candidate(distance_km: f64, radius_km: f64, rating: f64) -> ScoreComponents {
    let proximity = if radius_km > 0.0 {
        1.0 - distance_km / radius_km
    } else {
        // Zero radius only ever returns drivers at the pickup point.
        1.0
    };
    ScoreComponents {
        proximity: proximity.clamp(0.0, 1.0),
        rating: (rating / MAX_RATING).clamp(0.0, 1.0),
        availability: AVAILABILITY_BONUS,
    }
}
