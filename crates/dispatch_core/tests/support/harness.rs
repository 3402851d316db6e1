use std::sync::Arc;

use dispatch_core::clock::{Clock, ManualClock};
use dispatch_core::config::DispatchConfig;
use dispatch_core::dispatcher::Dispatcher;
use dispatch_core::eta::{EtaEstimator, EtaModel};
use dispatch_core::events::{ChannelPublisher, DispatchEvent};
use dispatch_core::index::GeoIndex;
use dispatch_core::matching::DispatchEngine;
use dispatch_core::persistence::{PersistCommand, PersistHandle};
use dispatch_core::query::QueryApi;
use dispatch_core::rematch::RematchScheduler;
use dispatch_core::rides::RideBook;
use dispatch_core::telemetry::DispatchTelemetry;
use tokio::sync::mpsc;

/// 2024-01-01T12:00:00Z: off peak, so ETAs carry no rush-hour factor.
pub const NOON_UTC_MS: u64 = 1_704_110_400_000;

/// Fully wired core with a manual clock and in-process sinks.
pub struct Harness {
    pub config: DispatchConfig,
    pub clock: Arc<ManualClock>,
    pub index: Arc<GeoIndex>,
    pub telemetry: Arc<DispatchTelemetry>,
    pub engine: Arc<DispatchEngine>,
    pub dispatcher: Arc<Dispatcher>,
    pub query: QueryApi,
    pub events: mpsc::UnboundedReceiver<DispatchEvent>,
    pub persisted: mpsc::Receiver<PersistCommand>,
    pub persistence: PersistHandle,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(DispatchConfig::default())
    }

    pub fn with_config(config: DispatchConfig) -> Self {
        let clock = Arc::new(ManualClock::new(NOON_UTC_MS));
        let dyn_clock: Arc<dyn Clock> = clock.clone();
        let index = Arc::new(GeoIndex::new(&config.index).expect("index"));
        let telemetry = Arc::new(DispatchTelemetry::default());
        let eta: Arc<dyn EtaModel> = Arc::new(EtaEstimator::new(config.eta.clone()));
        let engine = Arc::new(DispatchEngine::new(
            Arc::clone(&index),
            Arc::clone(&eta),
            Arc::clone(&dyn_clock),
            config.matching.clone(),
        ));
        let (publisher, events) = ChannelPublisher::new();
        let (persistence, persisted) = PersistHandle::channel(1_024, Arc::clone(&telemetry));
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&engine),
            Arc::clone(&index),
            Arc::new(RideBook::new(config.eta.known_classes())),
            Arc::new(publisher),
            persistence.clone(),
            Arc::clone(&dyn_clock),
            Arc::clone(&telemetry),
            config.rematch.clone(),
        ));
        let query = QueryApi::new(Arc::clone(&index), Arc::clone(&engine), eta, dyn_clock);
        Self {
            config,
            clock,
            index,
            telemetry,
            engine,
            dispatcher,
            query,
            events,
            persisted,
            persistence,
        }
    }

    pub fn scheduler(&self) -> RematchScheduler {
        RematchScheduler::new(Arc::clone(&self.dispatcher), self.clock.clone())
    }

    pub fn now(&self) -> u64 {
        self.clock.now_ms()
    }

    pub fn drain_events(&mut self) -> Vec<DispatchEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}
