//! Counters for every apply/drop/evict/match path in the core.
//!
//! Counters are plain atomics shared through an `Arc`; reporting takes a
//! [`TelemetrySnapshot`].

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct DispatchTelemetry {
    pub updates_applied: AtomicU64,
    pub updates_superseded: AtomicU64,
    pub updates_rejected: AtomicU64,
    pub updates_expired: AtomicU64,
    pub drivers_evicted: AtomicU64,
    pub write_through_ok: AtomicU64,
    pub write_through_failed: AtomicU64,
    pub persistence_deferred: AtomicU64,
    pub stream_reconnects: AtomicU64,
    pub requests_rejected: AtomicU64,
    pub match_attempts: AtomicU64,
    pub requests_matched: AtomicU64,
    pub requests_expired: AtomicU64,
    pub match_results_discarded: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TelemetrySnapshot {
    pub updates_applied: u64,
    pub updates_superseded: u64,
    pub updates_rejected: u64,
    pub updates_expired: u64,
    pub drivers_evicted: u64,
    pub write_through_ok: u64,
    pub write_through_failed: u64,
    pub persistence_deferred: u64,
    pub stream_reconnects: u64,
    pub requests_rejected: u64,
    pub match_attempts: u64,
    pub requests_matched: u64,
    pub requests_expired: u64,
    pub match_results_discarded: u64,
}

pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn add(counter: &AtomicU64, amount: u64) {
    counter.fetch_add(amount, Ordering::Relaxed);
}

impl DispatchTelemetry {
    pub fn snapshot(&self) -> TelemetrySnapshot {
        let read = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        TelemetrySnapshot {
            updates_applied: read(&self.updates_applied),
            updates_superseded: read(&self.updates_superseded),
            updates_rejected: read(&self.updates_rejected),
            updates_expired: read(&self.updates_expired),
            drivers_evicted: read(&self.drivers_evicted),
            write_through_ok: read(&self.write_through_ok),
            write_through_failed: read(&self.write_through_failed),
            persistence_deferred: read(&self.persistence_deferred),
            stream_reconnects: read(&self.stream_reconnects),
            requests_rejected: read(&self.requests_rejected),
            match_attempts: read(&self.match_attempts),
            requests_matched: read(&self.requests_matched),
            requests_expired: read(&self.requests_expired),
            match_results_discarded: read(&self.match_results_discarded),
        }
    }
}
