//! Contracts for the fast location cache and the durable store, plus the
//! write-through task that keeps them in step with the index.
//!
//! Neither backend is on the hot path: the index is authoritative for live
//! state and persistence failures never reach ingestion or matching.

mod memory;
mod write_through;

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

use crate::index::DriverState;
use crate::rides::RideRequest;
use crate::types::DriverId;

pub use memory::{MemoryCache, MemoryStore};
pub use write_through::{read_through, with_retry, PersistCommand, PersistHandle, WriteThrough};

const DRIVER_LOCATION_PREFIX: &str = "driver:location:";

/// Cache key holding the JSON-serialised [`DriverState`] of a driver.
pub fn driver_cache_key(driver_id: DriverId) -> String {
    format!("{DRIVER_LOCATION_PREFIX}{driver_id}")
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("failed to encode or decode record: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Key-value cache with per-entry expiry.
pub trait LocationCache: Send + Sync + 'static {
    fn put(
        &self,
        key: String,
        value: String,
        ttl: Duration,
    ) -> impl Future<Output = Result<(), PersistenceError>> + Send;

    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>, PersistenceError>> + Send;
}

/// Durable record of driver positions and ride requests.
pub trait DriverStore: Send + Sync + 'static {
    fn upsert_driver(
        &self,
        state: DriverState,
    ) -> impl Future<Output = Result<(), PersistenceError>> + Send;

    fn load_driver(
        &self,
        driver_id: DriverId,
    ) -> impl Future<Output = Result<Option<DriverState>, PersistenceError>> + Send;

    fn upsert_ride(
        &self,
        ride: RideRequest,
    ) -> impl Future<Output = Result<(), PersistenceError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_format() {
        assert_eq!(driver_cache_key(DriverId(42)), "driver:location:42");
    }
}
