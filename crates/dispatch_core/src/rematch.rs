//! Periodic re-evaluation of pending ride requests.
//!
//! Each pass walks the pending requests oldest first. Requests past the
//! maximum age are expired; requests idle for at least the retry interval get
//! another attempt with a wider radius. Passes never overlap.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::dispatcher::{AssignOutcome, Dispatcher};
use crate::events::{DispatchEvent, ExpiryNotice};
use crate::rides::RideStatus;
use crate::telemetry::bump;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub examined: usize,
    pub attempted: usize,
    pub matched: usize,
    pub expired: usize,
}

pub struct RematchScheduler {
    dispatcher: Arc<Dispatcher>,
    clock: Arc<dyn Clock>,
    running: AtomicBool,
}

/// Clears the running flag when a pass ends, even on panic.
struct PassGuard<'a>(&'a AtomicBool);

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl RematchScheduler {
    pub fn new(dispatcher: Arc<Dispatcher>, clock: Arc<dyn Clock>) -> Self {
        Self {
            dispatcher,
            clock,
            running: AtomicBool::new(false),
        }
    }

    /// Runs one pass at the current clock time. Returns `None` if another
    /// pass is still in progress.
    pub fn run_pass(&self) -> Option<PassReport> {
        if self
            .running
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            debug!("rematch pass already running, skipping");
            return None;
        }
        let _guard = PassGuard(&self.running);
        Some(self.pass(self.clock.now_ms()))
    }

    fn pass(&self, now_ms: u64) -> PassReport {
        let config = self.dispatcher.rematch_config();
        let max_age_ms = config.max_age_ms();
        let retry_after_ms = config.retry_after_ms();
        let rides = self.dispatcher.rides();
        let mut report = PassReport::default();

        for request in rides.pending() {
            report.examined += 1;
            let request_id = request.request_id;

            if request.age_ms(now_ms) >= max_age_ms {
                match rides.transition(request_id, RideStatus::Expired) {
                    Ok(expired) => {
                        report.expired += 1;
                        bump(&self.dispatcher.telemetry().requests_expired);
                        info!(%request_id, attempts = expired.attempts, "ride request expired");
                        self.dispatcher.persist_ride(&expired);
                        self.dispatcher
                            .publisher()
                            .publish(DispatchEvent::Expired(ExpiryNotice { request_id }));
                    }
                    Err(error) => debug!(%request_id, %error, "request settled before expiry"),
                }
                continue;
            }

            if request.idle_ms(now_ms) < retry_after_ms {
                continue;
            }
            report.attempted += 1;
            match self.dispatcher.attempt(request_id) {
                Ok(AssignOutcome::Matched(_)) => report.matched += 1,
                Ok(_) => {}
                Err(error) => warn!(%request_id, %error, "rematch attempt failed"),
            }
        }
        report
    }

    pub async fn run(self, shutdown: CancellationToken) {
        let interval_duration = self.dispatcher.rematch_config().interval();
        info!(
            interval_secs = interval_duration.as_secs(),
            "rematch scheduler starting"
        );

        let mut interval = tokio::time::interval(interval_duration);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick completes immediately.
        interval.tick().await;

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("rematch scheduler shutting down");
                    break;
                }

                _ = interval.tick() => {
                    if let Some(report) = self.run_pass() {
                        if report.examined > 0 {
                            debug!(?report, "rematch pass complete");
                        }
                    }
                }
            }
        }
    }
}
