use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{driver_cache_key, DriverStore, LocationCache, PersistenceError};
use crate::config::RetryConfig;
use crate::index::DriverState;
use crate::rides::RideRequest;
use crate::telemetry::{bump, DispatchTelemetry};
use crate::types::DriverId;

/// A record queued for persistence.
#[derive(Debug, Clone)]
pub enum PersistCommand {
    Driver(DriverState),
    Ride(RideRequest),
}

/// Producer side of the write-through queue. Never blocks: a full queue means
/// the record is only in the index until its next update.
#[derive(Clone)]
pub struct PersistHandle {
    tx: mpsc::Sender<PersistCommand>,
    telemetry: Arc<DispatchTelemetry>,
}

impl PersistHandle {
    pub fn channel(
        capacity: usize,
        telemetry: Arc<DispatchTelemetry>,
    ) -> (Self, mpsc::Receiver<PersistCommand>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx, telemetry }, rx)
    }

    /// A handle whose records go nowhere, for components run without
    /// persistence.
    pub fn detached(telemetry: Arc<DispatchTelemetry>) -> Self {
        Self::channel(1, telemetry).0
    }

    /// Queues `command`, returning false if it was not accepted.
    pub fn submit(&self, command: PersistCommand) -> bool {
        match self.tx.try_send(command) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(command)) => {
                bump(&self.telemetry.persistence_deferred);
                warn!(record = %command.describe(), "write-through queue full, persistence deferred");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

impl PersistCommand {
    fn describe(&self) -> String {
        match self {
            Self::Driver(state) => format!("driver {}", state.driver_id),
            Self::Ride(ride) => format!("ride {}", ride.request_id),
        }
    }
}

/// Runs `op` with a per-attempt timeout, retrying with exponential backoff
/// until it succeeds or `retry.max_attempts` is exhausted.
pub async fn with_retry<T, F, Fut>(
    retry: &RetryConfig,
    operation: &'static str,
    mut op: F,
) -> Result<T, PersistenceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PersistenceError>>,
{
    let attempts = retry.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        let error = match tokio::time::timeout(retry.timeout(), op()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(error)) => error,
            Err(_) => PersistenceError::Timeout(retry.timeout()),
        };
        attempt += 1;
        if attempt >= attempts {
            return Err(error);
        }
        let backoff = retry.backoff_for(attempt);
        debug!(operation, attempt, ?backoff, %error, "retrying persistence call");
        tokio::time::sleep(backoff).await;
    }
}

/// Consumer side: drains the queue into the cache and the durable store.
pub struct WriteThrough<C, S> {
    cache: Arc<C>,
    store: Arc<S>,
    retry: RetryConfig,
    cache_ttl: Duration,
    telemetry: Arc<DispatchTelemetry>,
}

impl<C: LocationCache, S: DriverStore> WriteThrough<C, S> {
    pub fn new(
        cache: Arc<C>,
        store: Arc<S>,
        retry: RetryConfig,
        cache_ttl: Duration,
        telemetry: Arc<DispatchTelemetry>,
    ) -> Self {
        Self {
            cache,
            store,
            retry,
            cache_ttl,
            telemetry,
        }
    }

    /// Persists one record; failures are counted and logged, never returned.
    pub async fn persist(&self, command: PersistCommand) {
        let result = match command {
            PersistCommand::Driver(state) => self.persist_driver(state).await,
            PersistCommand::Ride(ride) => {
                let store = &*self.store;
                let request_id = ride.request_id;
                with_retry(&self.retry, "store.upsert_ride", move || {
                    store.upsert_ride(ride.clone())
                })
                .await
                .map_err(|error| (format!("ride {request_id}"), error))
            }
        };
        match result {
            Ok(()) => bump(&self.telemetry.write_through_ok),
            Err((record, error)) => {
                bump(&self.telemetry.write_through_failed);
                warn!(%record, %error, "giving up on write-through");
            }
        }
    }

    async fn persist_driver(&self, state: DriverState) -> Result<(), (String, PersistenceError)> {
        let driver_id = state.driver_id;
        let record = || format!("driver {driver_id}");
        let value = serde_json::to_string(&state)
            .map_err(|error| (record(), PersistenceError::from(error)))?;
        let key = driver_cache_key(driver_id);

        let cache = &*self.cache;
        let ttl = self.cache_ttl;
        let cached = with_retry(&self.retry, "cache.put", move || {
            cache.put(key.clone(), value.clone(), ttl)
        })
        .await;

        let store = &*self.store;
        let stored = with_retry(&self.retry, "store.upsert_driver", move || {
            store.upsert_driver(state.clone())
        })
        .await;

        cached.and(stored).map_err(|error| (record(), error))
    }

    pub async fn run(self, mut rx: mpsc::Receiver<PersistCommand>, shutdown: CancellationToken) {
        info!(ttl_secs = self.cache_ttl.as_secs(), "write-through task starting");
        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    // Flush what is already queued.
                    while let Ok(command) = rx.try_recv() {
                        self.persist(command).await;
                    }
                    info!("write-through task shutting down");
                    break;
                }

                command = rx.recv() => {
                    match command {
                        Some(command) => self.persist(command).await,
                        None => break,
                    }
                }
            }
        }
    }
}

/// Looks a driver up in the cache, falling back to the durable store and
/// repopulating the cache on a store hit.
pub async fn read_through<C: LocationCache, S: DriverStore>(
    cache: &C,
    store: &S,
    driver_id: DriverId,
    ttl: Duration,
) -> Result<Option<DriverState>, PersistenceError> {
    let key = driver_cache_key(driver_id);
    match cache.get(&key).await {
        Ok(Some(raw)) => return Ok(Some(serde_json::from_str(&raw)?)),
        Ok(None) => {}
        Err(error) => debug!(%driver_id, %error, "cache read failed, falling back to store"),
    }

    let Some(state) = store.load_driver(driver_id).await? else {
        return Ok(None);
    };
    let value = serde_json::to_string(&state)?;
    if let Err(error) = cache.put(key, value, ttl).await {
        debug!(%driver_id, %error, "failed to repopulate cache");
    }
    Ok(Some(state))
}
