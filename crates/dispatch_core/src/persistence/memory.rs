//! In-process backends for tests and single-node runs.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::Duration;

use dashmap::DashMap;
use lru::LruCache;
use tokio::time::Instant;

use super::{DriverStore, LocationCache, PersistenceError};
use crate::index::DriverState;
use crate::rides::RideRequest;
use crate::types::{DriverId, RequestId};

/// LRU cache with per-entry TTL, evaluated lazily on read.
pub struct MemoryCache {
    entries: Mutex<LruCache<String, (String, Instant)>>,
}

impl MemoryCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            )),
        }
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, LruCache<String, (String, Instant)>>, PersistenceError>
    {
        self.entries
            .lock()
            .map_err(|_| PersistenceError::Unavailable("cache lock poisoned".to_string()))
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|cache| cache.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LocationCache for MemoryCache {
    async fn put(&self, key: String, value: String, ttl: Duration) -> Result<(), PersistenceError> {
        let expires_at = Instant::now() + ttl;
        self.lock()?.put(key, (value, expires_at));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        let mut cache = self.lock()?;
        match cache.get(key) {
            Some((value, expires_at)) if *expires_at > Instant::now() => Ok(Some(value.clone())),
            Some(_) => {
                cache.pop(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    drivers: DashMap<DriverId, DriverState>,
    rides: DashMap<RequestId, RideRequest>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn driver(&self, driver_id: DriverId) -> Option<DriverState> {
        self.drivers.get(&driver_id).map(|entry| entry.clone())
    }

    pub fn ride(&self, request_id: RequestId) -> Option<RideRequest> {
        self.rides.get(&request_id).map(|entry| entry.clone())
    }

    pub fn driver_count(&self) -> usize {
        self.drivers.len()
    }
}

impl DriverStore for MemoryStore {
    async fn upsert_driver(&self, state: DriverState) -> Result<(), PersistenceError> {
        self.drivers.insert(state.driver_id, state);
        Ok(())
    }

    async fn load_driver(&self, driver_id: DriverId) -> Result<Option<DriverState>, PersistenceError> {
        Ok(self.driver(driver_id))
    }

    async fn upsert_ride(&self, ride: RideRequest) -> Result<(), PersistenceError> {
        self.rides.insert(ride.request_id, ride);
        Ok(())
    }
}
