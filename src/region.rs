//! One edge region: the state it owns and its lifecycle.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::info;

use crate::application::RequestHandler;
use crate::bus::{EventBus, Subscription};
use crate::cache::CacheStore;
use crate::coherence::{
    CoordinatorConfig, InvalidationCoordinator, RefreshConfig, RefreshPool, Strategy,
};
use crate::collector::MetricsCollector;
use crate::origin::OriginGateway;
use crate::util::lock::mutex_lock;

const SOURCE: &str = "region";

/// Propagation delays for the known regions, in milliseconds.
pub const DEFAULT_PROPAGATION_DELAYS: [(&str, u64); 3] =
    [("us-east", 100), ("eu-west", 300), ("ap-southeast", 600)];

/// Default simulated propagation delay for `region`; zero when unknown.
pub fn default_propagation_delay(region: &str) -> Duration {
    DEFAULT_PROPAGATION_DELAYS
        .iter()
        .find(|(name, _)| *name == region)
        .map(|(_, millis)| Duration::from_millis(*millis))
        .unwrap_or(Duration::ZERO)
}

#[derive(Debug, Clone)]
pub struct RegionConfig {
    pub name: String,
    pub strategy: Strategy,
    pub propagation_delay: Duration,
    pub default_ttl: Duration,
    pub refresh_concurrency: usize,
    /// Period of the metrics summary log; `None` disables it.
    pub summary_interval: Option<Duration>,
}

impl RegionConfig {
    /// Defaults for `name`, with its table propagation delay.
    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            propagation_delay: default_propagation_delay(&name),
            name,
            strategy: Strategy::default(),
            default_ttl: Duration::from_secs(3600),
            refresh_concurrency: 8,
            summary_interval: None,
        }
    }

    pub fn from_settings(settings: &crate::config::Settings) -> Self {
        Self {
            name: settings.region.name.clone(),
            strategy: settings.region.strategy,
            propagation_delay: settings.region.propagation_delay,
            default_ttl: settings.cache.default_ttl,
            refresh_concurrency: settings.refresh.concurrency.get(),
            summary_interval: Some(settings.metrics.summary_interval),
        }
    }
}

/// Everything one region owns, created at startup and torn down on shutdown.
pub struct Region {
    name: String,
    store: CacheStore,
    metrics: Arc<MetricsCollector>,
    coordinator: Arc<InvalidationCoordinator>,
    refresh: Arc<RefreshPool>,
    handler: Arc<RequestHandler>,
    subscription: Mutex<Option<Subscription>>,
    summary: Mutex<Option<JoinHandle<()>>>,
}

impl Region {
    /// Wire the region and subscribe it to `bus`. Must be called inside a
    /// tokio runtime.
    pub fn start(
        config: RegionConfig,
        store: CacheStore,
        origin: Arc<dyn OriginGateway>,
        bus: &EventBus,
    ) -> Self {
        let metrics = Arc::new(MetricsCollector::new());

        let refresh = Arc::new(RefreshPool::start(
            RefreshConfig {
                region: config.name.clone(),
                ttl: config.default_ttl,
                concurrency: config.refresh_concurrency,
            },
            store.clone(),
            Arc::clone(&origin),
        ));

        let coordinator = InvalidationCoordinator::start(
            CoordinatorConfig {
                region: config.name.clone(),
                strategy: config.strategy,
                propagation_delay: config.propagation_delay,
                ..Default::default()
            },
            store.clone(),
            Arc::clone(&metrics),
        );

        let handler = Arc::new(RequestHandler::new(
            config.name.clone(),
            config.default_ttl,
            store.clone(),
            origin,
            Arc::clone(&metrics),
            Arc::clone(&refresh),
        ));

        let subscription = coordinator.attach(bus);
        let summary = config
            .summary_interval
            .filter(|interval| !interval.is_zero())
            .map(|interval| spawn_summary(config.name.clone(), Arc::clone(&metrics), interval));

        info!(
            target_module = SOURCE,
            region = %config.name,
            strategy = %config.strategy,
            propagation_delay_ms = config.propagation_delay.as_millis() as u64,
            cache_backend = store.backend_kind(),
            "Region started"
        );

        Self {
            name: config.name,
            store,
            metrics,
            coordinator,
            refresh,
            handler,
            subscription: Mutex::new(Some(subscription)),
            summary: Mutex::new(summary),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    pub fn coordinator(&self) -> &Arc<InvalidationCoordinator> {
        &self.coordinator
    }

    pub fn handler(&self) -> &Arc<RequestHandler> {
        &self.handler
    }

    pub fn refresh_pool(&self) -> &Arc<RefreshPool> {
        &self.refresh
    }

    /// Stop consuming events, apply what was already received, finish
    /// running refreshes, then log a final summary.
    pub async fn shutdown(&self) {
        let subscription = mutex_lock(&self.subscription, SOURCE, "shutdown").take();
        if let Some(subscription) = subscription {
            subscription.shutdown().await;
        }
        self.coordinator.shutdown().await;
        self.refresh.shutdown().await;

        let summary = mutex_lock(&self.summary, SOURCE, "shutdown").take();
        if let Some(summary) = summary {
            summary.abort();
        }
        self.metrics.log_summary(&self.name);
        info!(target_module = SOURCE, region = %self.name, "Region stopped");
    }
}

fn spawn_summary(
    region: String,
    metrics: Arc<MetricsCollector>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            metrics.log_summary(&region);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_regions_have_table_delays() {
        assert_eq!(default_propagation_delay("us-east"), Duration::from_millis(100));
        assert_eq!(default_propagation_delay("eu-west"), Duration::from_millis(300));
        assert_eq!(
            default_propagation_delay("ap-southeast"),
            Duration::from_millis(600)
        );
        assert_eq!(default_propagation_delay("sa-east"), Duration::ZERO);
    }

    #[test]
    fn named_config_picks_up_table_delay() {
        let config = RegionConfig::named("eu-west");
        assert_eq!(config.propagation_delay, Duration::from_millis(300));
        assert_eq!(config.strategy, Strategy::Lazy);
        assert!(config.summary_interval.is_none());
    }
}
