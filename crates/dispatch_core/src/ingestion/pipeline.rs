use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::source::{LocationSource, LocationStream};
use super::{LocationUpdate, ValidationError};
use crate::clock::Clock;
use crate::config::IngestionConfig;
use crate::index::{GeoIndex, UpsertOutcome};
use crate::persistence::{PersistCommand, PersistHandle};
use crate::telemetry::{bump, DispatchTelemetry};
use crate::types::VehicleClassSet;

#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Applied(UpsertOutcome),
    Superseded,
    /// Older than the staleness window; it would be evicted on arrival.
    Expired,
    Rejected(ValidationError),
}

/// Consumes every partition of a [`LocationSource`] into the index.
pub struct IngestionPipeline<S> {
    source: Arc<S>,
    index: Arc<GeoIndex>,
    clock: Arc<dyn Clock>,
    classes: VehicleClassSet,
    persistence: PersistHandle,
    telemetry: Arc<DispatchTelemetry>,
    config: IngestionConfig,
}

impl<S: LocationSource> IngestionPipeline<S> {
    pub fn new(
        source: Arc<S>,
        index: Arc<GeoIndex>,
        clock: Arc<dyn Clock>,
        classes: VehicleClassSet,
        persistence: PersistHandle,
        telemetry: Arc<DispatchTelemetry>,
        config: IngestionConfig,
    ) -> Self {
        Self {
            source,
            index,
            clock,
            classes,
            persistence,
            telemetry,
            config,
        }
    }

    /// Validates and applies one update. Never fails: every outcome is
    /// counted and bad input is logged and dropped.
    pub fn process(&self, update: LocationUpdate) -> IngestOutcome {
        let driver_id = update.driver_id;
        let update = match update.validate(&self.classes) {
            Ok(update) => update,
            Err(error) => {
                bump(&self.telemetry.updates_rejected);
                warn!(%driver_id, %error, "dropping invalid location update");
                return IngestOutcome::Rejected(error);
            }
        };

        let now_ms = self.clock.now_ms();
        if update.timestamp_ms > now_ms.saturating_add(self.config.max_clock_skew_ms) {
            let error = ValidationError::FromTheFuture {
                timestamp_ms: update.timestamp_ms,
                now_ms,
            };
            bump(&self.telemetry.updates_rejected);
            warn!(%driver_id, %error, "dropping location update stamped in the future");
            return IngestOutcome::Rejected(error);
        }

        let cutoff = now_ms.saturating_sub(self.index.stale_after_ms());
        if update.timestamp_ms < cutoff {
            bump(&self.telemetry.updates_expired);
            debug!(%driver_id, timestamp_ms = update.timestamp_ms, "dropping expired location update");
            return IngestOutcome::Expired;
        }

        match self.index.upsert(update) {
            Ok(UpsertOutcome::Superseded) => {
                bump(&self.telemetry.updates_superseded);
                debug!(%driver_id, "out-of-order location update superseded");
                IngestOutcome::Superseded
            }
            Ok(outcome) => {
                bump(&self.telemetry.updates_applied);
                if let Some(state) = self.index.get(driver_id) {
                    self.persistence.submit(PersistCommand::Driver(state));
                }
                IngestOutcome::Applied(outcome)
            }
            Err(error) => {
                let error = ValidationError::from(error);
                bump(&self.telemetry.updates_rejected);
                warn!(%driver_id, %error, "dropping unindexable location update");
                IngestOutcome::Rejected(error)
            }
        }
    }

    /// Spawns one worker per shard. Shards beyond the source's partition
    /// count would have nothing to read, so the smaller of the two is used.
    pub fn spawn(self, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        let shards = self.config.shards.min(self.source.partitions()).max(1);
        let pipeline = Arc::new(self);
        info!(shards, "location ingestion starting");
        (0..shards)
            .map(|shard| {
                let pipeline = Arc::clone(&pipeline);
                let shutdown = shutdown.clone();
                tokio::spawn(async move { pipeline.run_shard(shard, shutdown).await })
            })
            .collect()
    }

    async fn run_shard(&self, shard: usize, shutdown: CancellationToken) {
        let backoff = self.config.reconnect_backoff();
        loop {
            let connected = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                connected = self.source.connect(shard) => connected,
            };

            match connected {
                Ok(mut stream) => {
                    debug!(shard, "location stream connected");
                    loop {
                        let next = tokio::select! {
                            biased;
                            _ = shutdown.cancelled() => {
                                info!(shard, "location shard shutting down");
                                return;
                            }
                            next = stream.next() => next,
                        };
                        match next {
                            Some(Ok(update)) => {
                                self.process(update);
                            }
                            Some(Err(error)) => {
                                warn!(shard, %error, "location stream failed, reconnecting");
                                break;
                            }
                            None => {
                                info!(shard, "location stream closed");
                                return;
                            }
                        }
                    }
                }
                Err(error) => warn!(shard, %error, "failed to connect location stream"),
            }

            bump(&self.telemetry.stream_reconnects);
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(backoff) => {}
            }
        }
        info!(shard, "location shard shutting down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{EtaConfig, IndexConfig};
    use crate::ingestion::ChannelSource;
    use crate::types::{DriverId, VehicleClass};

    fn update(driver: u64, lat: f64, timestamp_ms: u64) -> LocationUpdate {
        LocationUpdate {
            driver_id: DriverId(driver),
            lat,
            lon: -122.4194,
            online: true,
            available: true,
            vehicle_class: VehicleClass::standard(),
            timestamp_ms,
            rating: None,
            heading: None,
            speed: None,
        }
    }

    fn pipeline(
        clock: Arc<ManualClock>,
    ) -> (Arc<GeoIndex>, Arc<DispatchTelemetry>, IngestionPipeline<ChannelSource>) {
        let index = Arc::new(GeoIndex::new(&IndexConfig::default()).expect("index"));
        let telemetry = Arc::new(DispatchTelemetry::default());
        let (source, _publisher) = ChannelSource::new(4, 16);
        let pipeline = IngestionPipeline::new(
            Arc::new(source),
            Arc::clone(&index),
            clock,
            EtaConfig::default().known_classes(),
            PersistHandle::detached(Arc::clone(&telemetry)),
            Arc::clone(&telemetry),
            IngestionConfig::default(),
        );
        (index, telemetry, pipeline)
    }

    #[test]
    fn process_counts_every_outcome() {
        let clock = Arc::new(ManualClock::new(100_000));
        let (index, telemetry, pipeline) = pipeline(clock);

        assert_eq!(
            pipeline.process(update(1, 37.7749, 99_000)),
            IngestOutcome::Applied(UpsertOutcome::Inserted)
        );
        assert_eq!(
            pipeline.process(update(1, 37.7800, 98_000)),
            IngestOutcome::Superseded
        );
        assert!(matches!(
            pipeline.process(update(2, 123.0, 99_000)),
            IngestOutcome::Rejected(_)
        ));
        assert_eq!(pipeline.process(update(3, 37.7749, 10_000)), IngestOutcome::Expired);

        let snapshot = telemetry.snapshot();
        assert_eq!(snapshot.updates_applied, 1);
        assert_eq!(snapshot.updates_superseded, 1);
        assert_eq!(snapshot.updates_rejected, 1);
        assert_eq!(snapshot.updates_expired, 1);
        assert_eq!(index.len(), 1);
        assert_eq!(index.get(DriverId(1)).map(|s| s.position.lat), Some(37.7749));
    }

    #[test]
    fn future_timestamps_cannot_pin_a_driver() {
        let clock = Arc::new(ManualClock::new(100_000));
        let (index, telemetry, pipeline) = pipeline(Arc::clone(&clock));

        assert!(matches!(
            pipeline.process(update(1, 37.7749, u64::MAX)),
            IngestOutcome::Rejected(ValidationError::FromTheFuture { .. })
        ));
        assert!(index.is_empty());
        assert_eq!(telemetry.snapshot().updates_rejected, 1);

        // Small drift within the allowed skew is still applied.
        let skew = IngestionConfig::default().max_clock_skew_ms;
        assert_eq!(
            pipeline.process(update(1, 37.7749, 100_000 + skew)),
            IngestOutcome::Applied(UpsertOutcome::Inserted)
        );
        let mut offline = update(1, 37.7749, 100_000 + skew + 1);
        offline.online = false;
        clock.advance_ms(skew);
        assert_eq!(
            pipeline.process(offline),
            IngestOutcome::Applied(UpsertOutcome::Updated)
        );
        assert!(index.query_radius(
            crate::geo::Coordinates::new(37.7749, -122.4194).expect("valid"),
            1.0,
            None
        )
        .expect("query")
        .is_empty());
    }
}
