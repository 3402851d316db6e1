//! Configuration tree for the dispatch core.
//!
//! Every knob has a default so an empty JSON object is a valid configuration.
//! Policy values (scoring weights, radius schedule, ETA tables) live here
//! rather than in code so operators can tune them without a rebuild.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clock::ONE_SEC_MS;
use crate::geo::{resolution_from_u8, GeoError};
use crate::types::{VehicleClass, VehicleClassSet};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config value: {0}")]
    Invalid(String),
    #[error(transparent)]
    Geo(#[from] GeoError),
}

impl ConfigError {
    fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub index: IndexConfig,
    pub ingestion: IngestionConfig,
    pub eta: EtaConfig,
    pub matching: MatchingConfig,
    pub rematch: RematchConfig,
}

impl DispatchConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.index.validate()?;
        self.ingestion.validate()?;
        self.eta.validate()?;
        self.matching.validate()?;
        self.rematch.validate()
    }
}

/// Geo index settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// H3 resolution of the driver buckets (0-15).
    pub resolution: u8,
    /// Drivers silent for longer than this are evicted.
    pub stale_after_secs: u64,
    pub sweep_interval_secs: u64,
    /// Ring count above which a radius query scans the available partition
    /// instead of expanding further.
    pub max_search_rings: u32,
    /// Rating assumed for drivers that have never reported one.
    pub default_rating: f64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            resolution: 9,
            stale_after_secs: 30,
            sweep_interval_secs: 5,
            max_search_rings: 64,
            default_rating: 4.5,
        }
    }
}

impl IndexConfig {
    pub fn stale_after_ms(&self) -> u64 {
        self.stale_after_secs * ONE_SEC_MS
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        resolution_from_u8(self.resolution)?;
        if self.stale_after_secs == 0 || self.sweep_interval_secs == 0 {
            return Err(ConfigError::invalid(
                "index.stale_after_secs and index.sweep_interval_secs must be positive",
            ));
        }
        if !(0.0..=5.0).contains(&self.default_rating) {
            return Err(ConfigError::invalid("index.default_rating must be within [0, 5]"));
        }
        Ok(())
    }
}

/// Bounded retry with exponential backoff for cache/store writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Per-attempt timeout.
    pub timeout_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 2_000,
            timeout_ms: 500,
        }
    }
}

impl RetryConfig {
    /// Backoff before retry number `attempt` (1-based), doubling each time.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        let millis = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(millis)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestionConfig {
    /// Number of parallel consumers; drivers are partitioned across them.
    pub shards: usize,
    pub channel_capacity: usize,
    /// Queue depth of pending write-through jobs before persistence is deferred.
    pub write_through_capacity: usize,
    pub cache_ttl_secs: u64,
    pub reconnect_backoff_ms: u64,
    /// Updates stamped further than this ahead of the clock are rejected.
    pub max_clock_skew_ms: u64,
    pub retry: RetryConfig,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            shards: 4,
            channel_capacity: 1_024,
            write_through_capacity: 4_096,
            cache_ttl_secs: 300,
            reconnect_backoff_ms: 500,
            max_clock_skew_ms: 30_000,
            retry: RetryConfig::default(),
        }
    }
}

impl IngestionConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.shards == 0 || self.channel_capacity == 0 || self.write_through_capacity == 0 {
            return Err(ConfigError::invalid(
                "ingestion shards and channel capacities must be positive",
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::invalid("ingestion.retry.max_attempts must be positive"));
        }
        Ok(())
    }
}

/// Inclusive range of local hours, e.g. 7..=9.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourWindow {
    pub start: u32,
    pub end: u32,
}

impl HourWindow {
    pub fn contains(&self, hour: u32) -> bool {
        if self.start <= self.end {
            (self.start..=self.end).contains(&hour)
        } else {
            // Wraps midnight, e.g. 22..=2.
            hour >= self.start || hour <= self.end
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EtaConfig {
    pub minutes_per_km: f64,
    /// Fixed time to get moving and stop at the pickup point.
    pub pickup_overhead_minutes: f64,
    pub peak_multiplier: f64,
    pub peak_windows: Vec<HourWindow>,
    /// Known vehicle classes and their travel-time multipliers.
    pub vehicle_multipliers: BTreeMap<String, f64>,
    pub confidence_baseline: f64,
    pub confidence_penalty_per_km: f64,
    pub confidence_floor: f64,
    /// Offset applied to UTC when deciding whether "now" is a peak hour.
    pub utc_offset_minutes: i32,
}

impl Default for EtaConfig {
    fn default() -> Self {
        Self {
            minutes_per_km: 2.0,
            pickup_overhead_minutes: 0.5,
            peak_multiplier: 1.3,
            peak_windows: vec![
                HourWindow { start: 7, end: 9 },
                HourWindow { start: 17, end: 19 },
            ],
            vehicle_multipliers: BTreeMap::from([
                (VehicleClass::PREMIUM.to_string(), 0.9),
                (VehicleClass::STANDARD.to_string(), 1.0),
                (VehicleClass::POOL.to_string(), 1.2),
            ]),
            confidence_baseline: 0.85,
            confidence_penalty_per_km: 0.02,
            confidence_floor: 0.3,
            utc_offset_minutes: 0,
        }
    }
}

impl EtaConfig {
    /// Classes with a travel-time multiplier; everything else is rejected at
    /// intake and ingestion.
    pub fn known_classes(&self) -> VehicleClassSet {
        self.vehicle_multipliers.keys().collect()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.minutes_per_km > 0.0) || self.pickup_overhead_minutes < 0.0 {
            return Err(ConfigError::invalid(
                "eta.minutes_per_km must be positive and pickup overhead non-negative",
            ));
        }
        if !(self.peak_multiplier > 0.0) {
            return Err(ConfigError::invalid("eta.peak_multiplier must be positive"));
        }
        if self.vehicle_multipliers.is_empty() {
            return Err(ConfigError::invalid("eta.vehicle_multipliers must list at least one class"));
        }
        if let Some((class, _)) = self
            .vehicle_multipliers
            .iter()
            .find(|(_, multiplier)| !(**multiplier > 0.0))
        {
            return Err(ConfigError::invalid(format!(
                "eta.vehicle_multipliers[{class}] must be positive"
            )));
        }
        if self
            .peak_windows
            .iter()
            .any(|window| window.start > 23 || window.end > 23)
        {
            return Err(ConfigError::invalid("eta.peak_windows hours must be within 0..=23"));
        }
        let unit = 0.0..=1.0;
        if !unit.contains(&self.confidence_baseline)
            || !unit.contains(&self.confidence_floor)
            || self.confidence_penalty_per_km < 0.0
        {
            return Err(ConfigError::invalid(
                "eta confidence baseline/floor must be within [0, 1] and penalty non-negative",
            ));
        }
        Ok(())
    }
}

/// Weights of the composite match score. They are not required to sum to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub distance: f64,
    pub rating: f64,
    pub availability: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            distance: 0.6,
            rating: 0.3,
            availability: 0.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    pub weights: ScoringWeights,
    pub default_radius_km: f64,
    pub max_candidates: usize,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            weights: ScoringWeights::default(),
            default_radius_km: 5.0,
            max_candidates: 10,
        }
    }
}

impl MatchingConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let ScoringWeights {
            distance,
            rating,
            availability,
        } = self.weights;
        if [distance, rating, availability]
            .iter()
            .any(|weight| !(*weight >= 0.0) || !weight.is_finite())
        {
            return Err(ConfigError::invalid("matching.weights must be finite and non-negative"));
        }
        if !(self.default_radius_km > 0.0) || self.max_candidates == 0 {
            return Err(ConfigError::invalid(
                "matching.default_radius_km and matching.max_candidates must be positive",
            ));
        }
        Ok(())
    }
}

/// Rematch schedule: attempt `n` searches `initial + n * step`, capped at `max`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RematchConfig {
    pub interval_secs: u64,
    /// Minimum time between match attempts for the same request.
    pub retry_after_secs: u64,
    pub initial_radius_km: f64,
    pub radius_step_km: f64,
    pub max_radius_km: f64,
    /// Requests still pending after this long are expired.
    pub max_age_secs: u64,
}

impl Default for RematchConfig {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            retry_after_secs: 10,
            initial_radius_km: 5.0,
            radius_step_km: 2.0,
            max_radius_km: 15.0,
            max_age_secs: 120,
        }
    }
}

impl RematchConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn retry_after_ms(&self) -> u64 {
        self.retry_after_secs * ONE_SEC_MS
    }

    pub fn max_age_ms(&self) -> u64 {
        self.max_age_secs * ONE_SEC_MS
    }

    /// Search radius for the given (0-based) attempt number.
    pub fn radius_for_attempt(&self, attempt: u32) -> f64 {
        (self.initial_radius_km + f64::from(attempt) * self.radius_step_km).min(self.max_radius_km)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_secs == 0 || self.max_age_secs == 0 {
            return Err(ConfigError::invalid(
                "rematch.interval_secs and rematch.max_age_secs must be positive",
            ));
        }
        if !(self.initial_radius_km > 0.0)
            || self.radius_step_km < 0.0
            || self.max_radius_km < self.initial_radius_km
        {
            return Err(ConfigError::invalid(
                "rematch radii must satisfy 0 < initial <= max and step >= 0",
            ));
        }
        Ok(())
    }
}
