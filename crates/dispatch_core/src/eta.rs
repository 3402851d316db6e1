//! Pickup ETA estimation.
//!
//! A deterministic formula: a fixed pickup overhead plus distance at a flat
//! pace, scaled by a peak-hour factor and a vehicle-class factor. Confidence
//! decays linearly with distance down to a floor.
//!
//! [`EtaModel`] is the seam for swapping in a learned model.

use chrono::{DateTime, FixedOffset, Timelike};
use serde::Serialize;
use thiserror::Error;

use crate::config::EtaConfig;
use crate::types::VehicleClass;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EtaError {
    #[error("unknown vehicle class {0}")]
    UnknownVehicleClass(VehicleClass),
    #[error("distance {0} km must be finite and non-negative")]
    InvalidDistance(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EtaEstimate {
    pub minutes: f64,
    /// Always within [0, 1].
    pub confidence: f64,
}

pub trait EtaModel: Send + Sync {
    fn estimate(
        &self,
        distance_km: f64,
        vehicle_class: &VehicleClass,
        local_hour: u32,
    ) -> Result<EtaEstimate, EtaError>;

    fn knows_class(&self, vehicle_class: &VehicleClass) -> bool;

    /// Offset from UTC used to compute the local hour for peak windows.
    fn utc_offset_minutes(&self) -> i32 {
        0
    }
}

#[derive(Debug, Clone)]
pub struct EtaEstimator {
    config: EtaConfig,
}

impl EtaEstimator {
    pub fn new(config: EtaConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EtaConfig {
        &self.config
    }

    pub fn peak_multiplier(&self, local_hour: u32) -> f64 {
        if self
            .config
            .peak_windows
            .iter()
            .any(|window| window.contains(local_hour))
        {
            self.config.peak_multiplier
        } else {
            1.0
        }
    }

    pub fn class_multiplier(&self, vehicle_class: &VehicleClass) -> Option<f64> {
        self.config
            .vehicle_multipliers
            .get(vehicle_class.as_str())
            .copied()
    }
}

impl Default for EtaEstimator {
    fn default() -> Self {
        Self::new(EtaConfig::default())
    }
}

impl EtaModel for EtaEstimator {
    fn estimate(
        &self,
        distance_km: f64,
        vehicle_class: &VehicleClass,
        local_hour: u32,
    ) -> Result<EtaEstimate, EtaError> {
        if !distance_km.is_finite() || distance_km < 0.0 {
            return Err(EtaError::InvalidDistance(distance_km));
        }
        let class_multiplier = self
            .class_multiplier(vehicle_class)
            .ok_or_else(|| EtaError::UnknownVehicleClass(vehicle_class.clone()))?;

        let base = self.config.pickup_overhead_minutes + distance_km * self.config.minutes_per_km;
        let minutes = base * self.peak_multiplier(local_hour) * class_multiplier;

        let confidence = (self.config.confidence_baseline
            - self.config.confidence_penalty_per_km * distance_km)
            .clamp(self.config.confidence_floor, 1.0);

        Ok(EtaEstimate {
            minutes,
            confidence,
        })
    }

    fn knows_class(&self, vehicle_class: &VehicleClass) -> bool {
        self.class_multiplier(vehicle_class).is_some()
    }

    fn utc_offset_minutes(&self) -> i32 {
        self.config.utc_offset_minutes
    }
}

/// Hour of day (0-23) at `now_ms` shifted by `utc_offset_minutes`.
pub fn local_hour(now_ms: u64, utc_offset_minutes: i32) -> u32 {
    let Some(utc) = DateTime::from_timestamp_millis(i64::try_from(now_ms).unwrap_or(i64::MAX))
    else {
        return 0;
    };
    match FixedOffset::east_opt(utc_offset_minutes.saturating_mul(60)) {
        Some(offset) => utc.with_timezone(&offset).hour(),
        None => utc.hour(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OFF_PEAK: u32 = 12;
    const RUSH: u32 = 8;

    #[test]
    fn premium_is_faster_than_pool() {
        let eta = EtaEstimator::default();
        for distance in [0.0, 0.5, 3.0, 12.0] {
            for hour in [OFF_PEAK, RUSH] {
                let premium = eta
                    .estimate(distance, &VehicleClass::premium(), hour)
                    .expect("eta");
                let pool = eta.estimate(distance, &VehicleClass::pool(), hour).expect("eta");
                assert!(premium.minutes < pool.minutes, "{distance}km @ {hour}h");
                assert!(premium.minutes > 0.0);
            }
        }
    }

    #[test]
    fn peak_hours_are_slower() {
        let eta = EtaEstimator::default();
        let class = VehicleClass::standard();
        let calm = eta.estimate(3.0, &class, OFF_PEAK).expect("eta");
        let rush = eta.estimate(3.0, &class, RUSH).expect("eta");
        assert!((calm.minutes - 6.5).abs() < 1e-9);
        assert!((rush.minutes - 6.5 * 1.3).abs() < 1e-9);
        for hour in [7, 9, 17, 19] {
            assert_eq!(eta.peak_multiplier(hour), 1.3, "hour {hour}");
        }
        for hour in [6, 10, 16, 20] {
            assert_eq!(eta.peak_multiplier(hour), 1.0, "hour {hour}");
        }
    }

    #[test]
    fn confidence_stays_in_unit_range() {
        let eta = EtaEstimator::default();
        let near = eta.estimate(0.0, &VehicleClass::standard(), 0).expect("eta");
        assert!((near.confidence - 0.85).abs() < 1e-9);
        let far = eta.estimate(500.0, &VehicleClass::standard(), 0).expect("eta");
        assert_eq!(far.confidence, 0.3);
    }

    #[test]
    fn rejects_bad_inputs() {
        let eta = EtaEstimator::default();
        assert_eq!(
            eta.estimate(1.0, &VehicleClass::new("hovercraft"), 0),
            Err(EtaError::UnknownVehicleClass(VehicleClass::new("HOVERCRAFT")))
        );
        assert!(matches!(
            eta.estimate(-1.0, &VehicleClass::standard(), 0),
            Err(EtaError::InvalidDistance(_))
        ));
        assert!(eta.estimate(f64::NAN, &VehicleClass::standard(), 0).is_err());
    }

    #[test]
    fn local_hour_applies_offset() {
        // 2024-01-01T08:30:00Z
        let now_ms = 1_704_097_800_000;
        assert_eq!(local_hour(now_ms, 0), 8);
        assert_eq!(local_hour(now_ms, -8 * 60), 0);
        assert_eq!(local_hour(now_ms, 90), 10);
    }
}
