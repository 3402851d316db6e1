//! Outbound dispatch notifications.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;

use crate::types::{DriverId, RequestId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchEvent {
    pub request_id: RequestId,
    pub driver_id: DriverId,
    pub distance_km: f64,
    pub eta_minutes: f64,
    pub eta_confidence: f64,
    pub composite_score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpiryNotice {
    pub request_id: RequestId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DispatchEvent {
    Matched(MatchEvent),
    Expired(ExpiryNotice),
}

impl DispatchEvent {
    pub fn request_id(&self) -> RequestId {
        match self {
            Self::Matched(event) => event.request_id,
            Self::Expired(notice) => notice.request_id,
        }
    }
}

/// Sink for dispatch events (pub/sub topic, websocket fan-out, ...).
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: DispatchEvent);
}

/// Publishes into an unbounded in-process channel.
#[derive(Debug, Clone)]
pub struct ChannelPublisher {
    tx: mpsc::UnboundedSender<DispatchEvent>,
}

impl ChannelPublisher {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DispatchEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventPublisher for ChannelPublisher {
    fn publish(&self, event: DispatchEvent) {
        if let Err(error) = self.tx.send(event) {
            warn!(request_id = %error.0.request_id(), "event receiver dropped, discarding event");
        }
    }
}
