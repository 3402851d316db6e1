use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use dispatch_core::index::DriverState;
use dispatch_core::persistence::{DriverStore, MemoryStore, PersistenceError};
use dispatch_core::rides::RideRequest;
use dispatch_core::types::DriverId;

/// Store that fails (or hangs) for the first `failures` calls, then delegates
/// to a [`MemoryStore`].
pub struct FlakyStore {
    pub inner: MemoryStore,
    failures: AtomicU32,
    hang: bool,
    pub calls: AtomicU32,
}

impl FlakyStore {
    pub fn failing(failures: u32) -> Self {
        Self {
            inner: MemoryStore::new(),
            failures: AtomicU32::new(failures),
            hang: false,
            calls: AtomicU32::new(0),
        }
    }

    pub fn hanging(failures: u32) -> Self {
        Self {
            hang: true,
            ..Self::failing(failures)
        }
    }

    async fn gate(&self) -> Result<(), PersistenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if !failing {
            return Ok(());
        }
        if self.hang {
            tokio::time::sleep(Duration::from_secs(3_600)).await;
        }
        Err(PersistenceError::Unavailable("store offline".to_string()))
    }
}

impl DriverStore for FlakyStore {
    async fn upsert_driver(&self, state: DriverState) -> Result<(), PersistenceError> {
        self.gate().await?;
        self.inner.upsert_driver(state).await
    }

    async fn load_driver(&self, driver_id: DriverId) -> Result<Option<DriverState>, PersistenceError> {
        self.gate().await?;
        self.inner.load_driver(driver_id).await
    }

    async fn upsert_ride(&self, ride: RideRequest) -> Result<(), PersistenceError> {
        self.gate().await?;
        self.inner.upsert_ride(ride).await
    }
}
