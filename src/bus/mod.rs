//! In-process invalidation event bus.
//!
//! A topic is split into partitions, each a broadcast channel. Publishing
//! routes an event to `hash(target) % partitions`, so all events for one
//! target share a partition and keep their publish order. Every
//! subscription is its own delivery group: it sees every event published
//! after it subscribed, with one consumer task per partition.

mod error;
mod event;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use metrics::counter;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::util::hash::fnv1a;

pub use error::{BusError, HandlerError};
pub use event::{EventType, InvalidationEvent, Priority};

const SOURCE: &str = "bus";

pub(crate) const METRIC_BUS_LAGGED_TOTAL: &str = "edge_bus_lagged_total";

const DEFAULT_TOPIC: &str = "cache.invalidation";
const DEFAULT_PARTITIONS: usize = 8;
const DEFAULT_CAPACITY: usize = 1024;

pub const HEADER_EVENT_TYPE: &str = "event-type";
pub const HEADER_PRIORITY: &str = "priority";

#[derive(Debug, Clone)]
pub struct BusConfig {
    pub topic: String,
    pub partitions: usize,
    /// Messages buffered per partition before a slow subscriber starts losing them.
    pub capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            topic: DEFAULT_TOPIC.to_string(),
            partitions: DEFAULT_PARTITIONS,
            capacity: DEFAULT_CAPACITY,
        }
    }
}

impl From<&crate::config::EventBusSettings> for BusConfig {
    fn from(settings: &crate::config::EventBusSettings) -> Self {
        Self {
            topic: settings.topic.clone(),
            partitions: settings.partitions.get(),
            capacity: settings.capacity.get(),
        }
    }
}

/// A published record as carried by a partition.
#[derive(Debug, Clone)]
pub struct Message {
    pub key: String,
    pub payload: Bytes,
    pub headers: BTreeMap<&'static str, String>,
}

impl Message {
    /// Header value, or `-` when the publisher did not set it.
    pub fn header(&self, name: &str) -> &str {
        self.headers.get(name).map_or("-", String::as_str)
    }
}

/// Where a publish landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub partition: usize,
    /// Subscriptions that will see the message; zero is not an error.
    pub receivers: usize,
}

#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    async fn handle(&self, event: InvalidationEvent) -> Result<(), HandlerError>;
}

#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

struct Inner {
    topic: String,
    partitions: Vec<broadcast::Sender<Message>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(&BusConfig::default())
    }
}

impl EventBus {
    pub fn new(config: &BusConfig) -> Self {
        let partitions = (0..config.partitions.max(1))
            .map(|_| broadcast::channel(config.capacity.max(1)).0)
            .collect();
        Self {
            inner: Arc::new(Inner {
                topic: config.topic.clone(),
                partitions,
            }),
        }
    }

    pub fn topic(&self) -> &str {
        &self.inner.topic
    }

    pub fn partition_count(&self) -> usize {
        self.inner.partitions.len()
    }

    /// Partition an event for `target` is routed to.
    pub fn partition_for(&self, target: &str) -> usize {
        let count = self.partition_count() as u64;
        (fnv1a(target.as_bytes()) % count) as usize
    }

    pub fn publish(&self, event: &InvalidationEvent) -> Result<Delivery, BusError> {
        let payload = serde_json::to_vec(event).map_err(|source| BusError::Encode {
            target: event.target.clone(),
            source,
        })?;

        let headers = BTreeMap::from([
            (HEADER_EVENT_TYPE, event.kind.as_str().to_string()),
            (HEADER_PRIORITY, event.priority.as_str().to_string()),
        ]);
        let delivery = self.publish_raw(&event.target, Bytes::from(payload), headers);

        info!(
            target_module = SOURCE,
            topic = %self.inner.topic,
            event_type = %event.kind,
            target = %event.target,
            partition = delivery.partition,
            receivers = delivery.receivers,
            "Published invalidation event"
        );
        Ok(delivery)
    }

    /// Publish an already encoded record keyed by `key`.
    pub(crate) fn publish_raw(
        &self,
        key: &str,
        payload: Bytes,
        headers: BTreeMap<&'static str, String>,
    ) -> Delivery {
        let partition = self.partition_for(key);
        let message = Message {
            key: key.to_string(),
            payload,
            headers,
        };
        // A send error only means nobody is subscribed yet.
        let receivers = self.inner.partitions[partition].send(message).unwrap_or(0);
        Delivery {
            partition,
            receivers,
        }
    }

    /// Start a delivery group. Only events published from now on are seen.
    pub fn subscribe<H: EventHandler>(
        &self,
        group: impl Into<String>,
        handler: Arc<H>,
    ) -> Subscription {
        let group: Arc<str> = Arc::from(group.into());
        let (stop_tx, stop_rx) = watch::channel(false);

        let tasks = self
            .inner
            .partitions
            .iter()
            .enumerate()
            .map(|(partition, sender)| {
                let receiver = sender.subscribe();
                tokio::spawn(consume_partition(
                    Arc::clone(&group),
                    partition,
                    receiver,
                    Arc::clone(&handler),
                    stop_rx.clone(),
                ))
            })
            .collect();

        info!(
            target_module = SOURCE,
            topic = %self.inner.topic,
            group = %group,
            partitions = self.partition_count(),
            "Subscribed to invalidation topic"
        );

        Subscription {
            group,
            stop: stop_tx,
            tasks,
        }
    }
}

/// Handle to a running delivery group.
pub struct Subscription {
    group: Arc<str>,
    stop: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Subscription {
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Stop consuming. A message being handled finishes first; buffered
    /// messages are dropped.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        for task in self.tasks {
            if let Err(err) = task.await {
                warn!(
                    target_module = SOURCE,
                    group = %self.group,
                    error = %err,
                    "Partition consumer ended abnormally"
                );
            }
        }
        info!(target_module = SOURCE, group = %self.group, "Subscription stopped");
    }
}

async fn consume_partition<H: EventHandler>(
    group: Arc<str>,
    partition: usize,
    mut receiver: broadcast::Receiver<Message>,
    handler: Arc<H>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        let message = tokio::select! {
            biased;
            _ = stop.changed() => break,
            received = receiver.recv() => received,
        };

        match message {
            Ok(message) => deliver(&group, partition, message, handler.as_ref()).await,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                counter!(METRIC_BUS_LAGGED_TOTAL).increment(skipped);
                warn!(
                    target_module = SOURCE,
                    group = %group,
                    partition,
                    skipped,
                    "Subscriber lagged; messages lost"
                );
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    debug!(target_module = SOURCE, group = %group, partition, "Partition consumer stopped");
}

async fn deliver<H: EventHandler>(group: &str, partition: usize, message: Message, handler: &H) {
    let event: InvalidationEvent = match serde_json::from_slice(&message.payload) {
        Ok(event) => event,
        Err(err) => {
            error!(
                target_module = SOURCE,
                group,
                partition,
                key = %message.key,
                error = %err,
                "Failed to decode invalidation event"
            );
            return;
        }
    };

    debug!(
        target_module = SOURCE,
        group,
        partition,
        event_type = message.header(HEADER_EVENT_TYPE),
        priority = message.header(HEADER_PRIORITY),
        target = %event.target,
        version = event.version,
        "Received invalidation event"
    );

    let target = event.target.clone();
    if let Err(err) = handler.handle(event).await {
        error!(
            target_module = SOURCE,
            group,
            partition,
            target = %target,
            error = %err,
            "Failed to handle invalidation event"
        );
    }
}
