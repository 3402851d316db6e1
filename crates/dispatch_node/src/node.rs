//! Construction of the running core: every component is built once here and
//! handed its dependencies explicitly.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use dispatch_core::clock::Clock;
use dispatch_core::config::DispatchConfig;
use dispatch_core::dispatcher::Dispatcher;
use dispatch_core::eta::{EtaEstimator, EtaModel};
use dispatch_core::events::{ChannelPublisher, DispatchEvent};
use dispatch_core::index::{DriverState, GeoIndex, StalenessSweeper};
use dispatch_core::ingestion::{ChannelSource, IngestionPipeline, LocationPublisher};
use dispatch_core::matching::DispatchEngine;
use dispatch_core::persistence::{
    read_through, MemoryCache, MemoryStore, PersistHandle, PersistenceError, WriteThrough,
};
use dispatch_core::query::QueryApi;
use dispatch_core::rematch::RematchScheduler;
use dispatch_core::rides::RideBook;
use dispatch_core::telemetry::DispatchTelemetry;
use dispatch_core::types::DriverId;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct Node {
    pub index: Arc<GeoIndex>,
    pub dispatcher: Arc<Dispatcher>,
    pub query: QueryApi,
    pub telemetry: Arc<DispatchTelemetry>,
    pub locations: LocationPublisher,
    cache: Arc<MemoryCache>,
    store: Arc<MemoryStore>,
    cache_ttl: Duration,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl Node {
    /// Wires the core and spawns its background tasks. All tasks stop when
    /// `shutdown` is cancelled.
    pub fn start(
        config: &DispatchConfig,
        clock: Arc<dyn Clock>,
        cache_capacity: usize,
        shutdown: &CancellationToken,
    ) -> anyhow::Result<(Self, mpsc::UnboundedReceiver<DispatchEvent>)> {
        config.validate().context("invalid configuration")?;

        let telemetry = Arc::new(DispatchTelemetry::default());
        let index = Arc::new(GeoIndex::new(&config.index).context("building geo index")?);
        let eta: Arc<dyn EtaModel> = Arc::new(EtaEstimator::new(config.eta.clone()));
        let engine = Arc::new(DispatchEngine::new(
            Arc::clone(&index),
            Arc::clone(&eta),
            Arc::clone(&clock),
            config.matching.clone(),
        ));

        let (persistence, persisted) = PersistHandle::channel(
            config.ingestion.write_through_capacity,
            Arc::clone(&telemetry),
        );
        let (publisher, events) = ChannelPublisher::new();
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&engine),
            Arc::clone(&index),
            Arc::new(RideBook::new(config.eta.known_classes())),
            Arc::new(publisher),
            persistence.clone(),
            Arc::clone(&clock),
            Arc::clone(&telemetry),
            config.rematch.clone(),
        ));
        let query = QueryApi::new(Arc::clone(&index), engine, eta, Arc::clone(&clock));

        let mut tasks = Vec::new();

        let cache = Arc::new(MemoryCache::new(cache_capacity));
        let store = Arc::new(MemoryStore::new());
        let writer = WriteThrough::new(
            Arc::clone(&cache),
            Arc::clone(&store),
            config.ingestion.retry.clone(),
            config.ingestion.cache_ttl(),
            Arc::clone(&telemetry),
        );
        tasks.push(("write-through", tokio::spawn(writer.run(persisted, shutdown.clone()))));

        let (source, locations) =
            ChannelSource::new(config.ingestion.shards, config.ingestion.channel_capacity);
        let pipeline = IngestionPipeline::new(
            Arc::new(source),
            Arc::clone(&index),
            Arc::clone(&clock),
            config.eta.known_classes(),
            persistence,
            Arc::clone(&telemetry),
            config.ingestion.clone(),
        );
        for handle in pipeline.spawn(shutdown.clone()) {
            tasks.push(("ingestion-shard", handle));
        }

        let sweeper = StalenessSweeper::new(
            Arc::clone(&index),
            Arc::clone(&clock),
            Arc::clone(&telemetry),
            config.index.sweep_interval(),
        );
        tasks.push(("staleness-sweeper", tokio::spawn(sweeper.run(shutdown.clone()))));

        let scheduler = RematchScheduler::new(Arc::clone(&dispatcher), clock);
        tasks.push(("rematch", tokio::spawn(scheduler.run(shutdown.clone()))));

        info!(
            shards = config.ingestion.shards,
            resolution = config.index.resolution,
            tasks = tasks.len(),
            "dispatch node started"
        );
        Ok((
            Self {
                index,
                dispatcher,
                query,
                telemetry,
                locations,
                cache,
                store,
                cache_ttl: config.ingestion.cache_ttl(),
                tasks,
            },
            events,
        ))
    }

    /// Last persisted location of a driver: cache first, then the durable
    /// store.
    pub async fn driver_location(
        &self,
        driver_id: DriverId,
    ) -> Result<Option<DriverState>, PersistenceError> {
        read_through(&*self.cache, &*self.store, driver_id, self.cache_ttl).await
    }

    /// Waits for every background task after shutdown has been signalled.
    pub async fn join(self) {
        for (name, handle) in self.tasks {
            if let Err(error) = handle.await {
                warn!(task = name, %error, "background task ended abnormally");
            }
        }
        info!(telemetry = ?self.telemetry.snapshot(), "dispatch node stopped");
    }
}
