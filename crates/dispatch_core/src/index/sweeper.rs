//! Periodic eviction of drivers that stopped reporting.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::telemetry::{add, DispatchTelemetry};

use super::GeoIndex;

pub struct StalenessSweeper {
    index: Arc<GeoIndex>,
    clock: Arc<dyn Clock>,
    telemetry: Arc<DispatchTelemetry>,
    interval: Duration,
}

impl StalenessSweeper {
    pub fn new(
        index: Arc<GeoIndex>,
        clock: Arc<dyn Clock>,
        telemetry: Arc<DispatchTelemetry>,
        interval: Duration,
    ) -> Self {
        Self {
            index,
            clock,
            telemetry,
            interval,
        }
    }

    /// Runs one eviction pass and returns the number of drivers removed.
    pub fn sweep_once(&self) -> usize {
        let evicted = self.index.evict_stale(self.clock.now_ms());
        if !evicted.is_empty() {
            add(&self.telemetry.drivers_evicted, evicted.len() as u64);
            debug!(count = evicted.len(), "evicted stale drivers");
        }
        evicted.len()
    }

    pub async fn run(self, shutdown: CancellationToken) {
        info!(interval_secs = self.interval.as_secs(), "staleness sweeper starting");

        let mut interval = tokio::time::interval(self.interval);
        // First tick completes immediately.
        interval.tick().await;

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("staleness sweeper shutting down");
                    break;
                }

                _ = interval.tick() => {
                    self.sweep_once();
                }
            }
        }
    }
}
