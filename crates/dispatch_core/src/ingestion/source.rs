//! Transport contracts for the location stream, and an in-process
//! implementation backed by tokio channels.

use std::future::Future;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard};

use super::LocationUpdate;
use crate::types::DriverId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("no partition {0} on this source")]
    UnknownPartition(usize),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("malformed event: {0}")]
    Malformed(String),
}

/// One partition's worth of location events.
pub trait LocationStream: Send {
    /// Next event. `None` means the partition was closed for good; an error
    /// means the connection is broken and must be re-established.
    fn next(&mut self) -> impl Future<Output = Option<Result<LocationUpdate, StreamError>>> + Send;
}

/// A partitioned location feed that shard workers (re)connect to.
pub trait LocationSource: Send + Sync + 'static {
    type Stream: LocationStream + 'static;

    fn partitions(&self) -> usize;

    fn connect(
        &self,
        partition: usize,
    ) -> impl Future<Output = Result<Self::Stream, StreamError>> + Send;
}

/// Partition for a driver. Every update of one driver lands on the same
/// partition, which keeps per-driver order.
pub fn shard_for(driver_id: DriverId, partitions: usize) -> usize {
    (driver_id.0 % partitions.max(1) as u64) as usize
}

type Event = Result<LocationUpdate, StreamError>;

/// In-process source. Each partition is a bounded channel; a stream holds the
/// partition's receiver exclusively until it is dropped, so a reconnect picks
/// up exactly where the broken stream left off.
pub struct ChannelSource {
    partitions: Vec<Arc<Mutex<mpsc::Receiver<Event>>>>,
}

pub struct ChannelStream {
    rx: OwnedMutexGuard<mpsc::Receiver<Event>>,
}

/// Producer side of a [`ChannelSource`].
#[derive(Clone)]
pub struct LocationPublisher {
    partitions: Vec<mpsc::Sender<Event>>,
}

impl ChannelSource {
    pub fn new(partitions: usize, capacity: usize) -> (Self, LocationPublisher) {
        let (senders, receivers): (Vec<_>, Vec<_>) = (0..partitions.max(1))
            .map(|_| mpsc::channel(capacity.max(1)))
            .unzip();
        let source = Self {
            partitions: receivers
                .into_iter()
                .map(|rx| Arc::new(Mutex::new(rx)))
                .collect(),
        };
        (source, LocationPublisher { partitions: senders })
    }
}

impl LocationSource for ChannelSource {
    type Stream = ChannelStream;

    fn partitions(&self) -> usize {
        self.partitions.len()
    }

    async fn connect(&self, partition: usize) -> Result<ChannelStream, StreamError> {
        let receiver = self
            .partitions
            .get(partition)
            .ok_or(StreamError::UnknownPartition(partition))?;
        Ok(ChannelStream {
            rx: Arc::clone(receiver).lock_owned().await,
        })
    }
}

impl LocationStream for ChannelStream {
    async fn next(&mut self) -> Option<Result<LocationUpdate, StreamError>> {
        self.rx.recv().await
    }
}

impl LocationPublisher {
    pub fn partitions(&self) -> usize {
        self.partitions.len()
    }

    /// Routes `update` to its driver's partition, waiting for room.
    pub async fn publish(&self, update: LocationUpdate) -> Result<(), StreamError> {
        let partition = shard_for(update.driver_id, self.partitions.len());
        self.send(partition, Ok(update)).await
    }

    /// Breaks the connection of `partition` as a failing transport would.
    pub async fn inject_fault(&self, partition: usize, reason: &str) -> Result<(), StreamError> {
        self.send(partition, Err(StreamError::Transport(reason.to_string())))
            .await
    }

    async fn send(&self, partition: usize, event: Event) -> Result<(), StreamError> {
        let sender = self
            .partitions
            .get(partition)
            .ok_or(StreamError::UnknownPartition(partition))?;
        sender
            .send(event)
            .await
            .map_err(|_| StreamError::Transport(format!("partition {partition} closed")))
    }
}
