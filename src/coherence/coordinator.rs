//! Applies invalidation events to a region's cache.
//!
//! Each event passes `received -> delayed -> applied`. On receipt it is
//! routed to a delay lane chosen by `hash(target)`, stamped with the instant
//! it becomes due. A lane sleeps until its head event is due and applies it,
//! so events for one target apply in arrival order while a wait in one lane
//! never holds up another.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use super::strategy::Strategy;
use crate::bus::{
    EventBus, EventHandler, EventType, HandlerError, InvalidationEvent, Subscription,
};
use crate::cache::{CacheError, CacheStore};
use crate::collector::MetricsCollector;
use crate::util::hash::fnv1a;
use crate::util::lock::mutex_lock;

const SOURCE: &str = "coherence::coordinator";

const DEFAULT_LANES: usize = 8;

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub region: String,
    pub strategy: Strategy,
    /// Simulated distance between the publisher and this region.
    pub propagation_delay: Duration,
    pub lanes: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            region: "us-east".to_string(),
            strategy: Strategy::default(),
            propagation_delay: Duration::ZERO,
            lanes: DEFAULT_LANES,
        }
    }
}

/// What applying one event did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Deleted,
    MarkedStale,
    /// Tag and pattern events are accepted but change nothing.
    Ignored,
}

struct Pending {
    event: InvalidationEvent,
    due: Instant,
}

struct Core {
    region: String,
    strategy: Strategy,
    delay: Duration,
    store: CacheStore,
    metrics: Arc<MetricsCollector>,
}

impl Core {
    async fn apply(&self, event: &InvalidationEvent) -> Result<Applied, CacheError> {
        if event.kind != EventType::Key {
            debug!(
                target_module = SOURCE,
                region = %self.region,
                event_type = %event.kind,
                target = %event.target,
                "Non-key invalidation accepted without effect"
            );
            return Ok(Applied::Ignored);
        }

        let applied = match self.strategy {
            Strategy::Eager => {
                self.store.del(&event.target).await?;
                Applied::Deleted
            }
            Strategy::Lazy => {
                self.store.mark_stale(&event.target).await?;
                Applied::MarkedStale
            }
        };
        self.metrics.record_invalidation(self.strategy);

        info!(
            target_module = SOURCE,
            region = %self.region,
            strategy = %self.strategy,
            target = %event.target,
            version = ?event.version,
            "Invalidation applied"
        );
        Ok(applied)
    }

    async fn apply_logged(&self, event: &InvalidationEvent) {
        if let Err(err) = self.apply(event).await {
            error!(
                target_module = SOURCE,
                region = %self.region,
                strategy = %self.strategy,
                target = %event.target,
                error = %err,
                "Failed to apply invalidation; event dropped"
            );
        }
    }
}

pub struct InvalidationCoordinator {
    core: Arc<Core>,
    lanes: Mutex<Option<Vec<mpsc::UnboundedSender<Pending>>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl InvalidationCoordinator {
    /// Spawn the delay lanes. Must be called inside a tokio runtime.
    pub fn start(
        config: CoordinatorConfig,
        store: CacheStore,
        metrics: Arc<MetricsCollector>,
    ) -> Arc<Self> {
        let core = Arc::new(Core {
            region: config.region,
            strategy: config.strategy,
            delay: config.propagation_delay,
            store,
            metrics,
        });

        let (senders, workers): (Vec<_>, Vec<_>) = (0..config.lanes.max(1))
            .map(|_| {
                let (sender, receiver) = mpsc::unbounded_channel();
                (sender, tokio::spawn(run_lane(Arc::clone(&core), receiver)))
            })
            .unzip();

        info!(
            target_module = SOURCE,
            region = %core.region,
            strategy = %core.strategy,
            propagation_delay_ms = core.delay.as_millis() as u64,
            "Invalidation coordinator started"
        );

        Arc::new(Self {
            core,
            lanes: Mutex::new(Some(senders)),
            workers: Mutex::new(workers),
        })
    }

    pub fn strategy(&self) -> Strategy {
        self.core.strategy
    }

    pub fn propagation_delay(&self) -> Duration {
        self.core.delay
    }

    /// Subscribe this coordinator to the bus as the region's delivery group.
    pub fn attach(self: &Arc<Self>, bus: &EventBus) -> Subscription {
        bus.subscribe(
            format!("cache-invalidation-{}", self.core.region),
            Arc::clone(self),
        )
    }

    /// Route an event to its delay lane. Returns immediately.
    pub fn submit(&self, event: InvalidationEvent) -> Result<(), HandlerError> {
        let due = Instant::now() + self.core.delay;
        let lanes = mutex_lock(&self.lanes, SOURCE, "submit");
        let Some(lanes) = lanes.as_ref() else {
            return Err(HandlerError::rejected("coordinator stopped"));
        };

        let lane = lane_for(&event.target, lanes.len());
        debug!(
            target_module = SOURCE,
            region = %self.core.region,
            target = %event.target,
            lane,
            "Invalidation queued for propagation"
        );
        lanes[lane]
            .send(Pending { event, due })
            .map_err(|_| HandlerError::rejected("delay lane closed"))
    }

    /// Run one event through delay and application inline.
    #[instrument(skip(self, event), fields(region = %self.core.region, key = %event.target))]
    pub async fn process(&self, event: &InvalidationEvent) -> Result<Applied, CacheError> {
        if !self.core.delay.is_zero() {
            tokio::time::sleep(self.core.delay).await;
        }
        self.core.apply(event).await
    }

    /// Stop accepting events, then wait for queued ones to be applied.
    pub async fn shutdown(&self) {
        drop(mutex_lock(&self.lanes, SOURCE, "shutdown").take());
        let workers = std::mem::take(&mut *mutex_lock(&self.workers, SOURCE, "shutdown"));
        for worker in workers {
            if let Err(err) = worker.await {
                warn!(
                    target_module = SOURCE,
                    region = %self.core.region,
                    error = %err,
                    "Delay lane ended abnormally"
                );
            }
        }
        info!(
            target_module = SOURCE,
            region = %self.core.region,
            "Invalidation coordinator stopped"
        );
    }
}

#[async_trait]
impl EventHandler for InvalidationCoordinator {
    async fn handle(&self, event: InvalidationEvent) -> Result<(), HandlerError> {
        self.submit(event)
    }
}

async fn run_lane(core: Arc<Core>, mut receiver: mpsc::UnboundedReceiver<Pending>) {
    while let Some(Pending { event, due }) = receiver.recv().await {
        tokio::time::sleep_until(due).await;
        core.apply_logged(&event).await;
    }
}

fn lane_for(target: &str, lanes: usize) -> usize {
    (fnv1a(target.as_bytes()) % lanes as u64) as usize
}
