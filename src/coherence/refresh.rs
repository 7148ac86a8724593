//! Background refresh of stale entries.
//!
//! Jobs go through an explicit channel to a dispatcher that spawns each
//! refresh under a semaphore. There is no de-duplication: two submissions
//! for one key fetch twice.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use metrics::counter;
use thiserror::Error;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::cache::{CacheEntry, CacheError, CacheMetadata, CacheStore};
use crate::origin::{OriginError, OriginGateway};
use crate::util::lock::mutex_lock;

const SOURCE: &str = "coherence::refresh";

pub(crate) const METRIC_REFRESH_TOTAL: &str = "edge_refresh_total";
pub(crate) const METRIC_REFRESH_FAILURE_TOTAL: &str = "edge_refresh_failure_total";

const DEFAULT_CONCURRENCY: usize = 8;
const DEFAULT_TTL_SECS: u64 = 3600;

#[derive(Debug, Clone)]
pub struct RefreshConfig {
    pub region: String,
    /// Lifetime given to refreshed entries.
    pub ttl: Duration,
    /// Refreshes allowed to run at once.
    pub concurrency: usize,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            region: "us-east".to_string(),
            ttl: Duration::from_secs(DEFAULT_TTL_SECS),
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

/// Refetch `content_id` from the origin and rewrite `key`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshJob {
    pub key: String,
    pub content_id: String,
}

#[derive(Debug, Error)]
enum RefreshError {
    #[error(transparent)]
    Origin(#[from] OriginError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("failed to encode refreshed content: {0}")]
    Encode(#[from] serde_json::Error),
}

struct Worker {
    region: String,
    ttl: Duration,
    store: CacheStore,
    origin: Arc<dyn OriginGateway>,
}

impl Worker {
    async fn run(&self, job: RefreshJob) {
        match self.refresh(&job).await {
            Ok(version) => {
                counter!(METRIC_REFRESH_TOTAL, "outcome" => "ok").increment(1);
                info!(
                    target_module = SOURCE,
                    region = %self.region,
                    key = %job.key,
                    version,
                    "Background refresh complete"
                );
            }
            Err(err) => report_failure(&self.region, &job, &err),
        }
    }

    async fn refresh(&self, job: &RefreshJob) -> Result<i64, RefreshError> {
        let content = self.origin.get_content(&job.content_id).await?;
        let version = content.version;
        let entry = CacheEntry::new(
            serde_json::to_value(&content)?,
            CacheMetadata::fresh(version, self.ttl),
        );
        self.store
            .set_with_metadata(&job.key, &entry, self.ttl)
            .await?;
        self.store.clear_stale(&job.key).await;
        Ok(version)
    }
}

/// Failure sink for refreshes; nothing else observes them.
fn report_failure(region: &str, job: &RefreshJob, err: &RefreshError) {
    counter!(METRIC_REFRESH_TOTAL, "outcome" => "error").increment(1);
    counter!(METRIC_REFRESH_FAILURE_TOTAL).increment(1);
    error!(
        target: "edge::refresh",
        region,
        key = %job.key,
        content_id = %job.content_id,
        error = %err,
        "Background refresh failed"
    );
}

pub struct RefreshPool {
    sender: Mutex<Option<mpsc::UnboundedSender<RefreshJob>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    region: String,
}

impl RefreshPool {
    /// Spawn the dispatcher. Must be called inside a tokio runtime.
    pub fn start(
        config: RefreshConfig,
        store: CacheStore,
        origin: Arc<dyn OriginGateway>,
    ) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let permits = Arc::new(Semaphore::new(config.concurrency.max(1)));
        let worker = Arc::new(Worker {
            region: config.region.clone(),
            ttl: config.ttl,
            store,
            origin,
        });

        let dispatcher = tokio::spawn(dispatch(receiver, permits, worker));
        Self {
            sender: Mutex::new(Some(sender)),
            dispatcher: Mutex::new(Some(dispatcher)),
            region: config.region,
        }
    }

    /// Queue a refresh. Returns false once the pool has shut down.
    pub fn submit(&self, job: RefreshJob) -> bool {
        let guard = mutex_lock(&self.sender, SOURCE, "submit");
        let Some(sender) = guard.as_ref() else {
            warn!(
                target_module = SOURCE,
                region = %self.region,
                key = %job.key,
                "Refresh pool stopped; refresh dropped"
            );
            return false;
        };

        debug!(target_module = SOURCE, region = %self.region, key = %job.key, "Refresh queued");
        sender.send(job).is_ok()
    }

    /// Stop accepting jobs and wait for queued and running refreshes.
    pub async fn shutdown(&self) {
        drop(mutex_lock(&self.sender, SOURCE, "shutdown").take());
        let dispatcher = mutex_lock(&self.dispatcher, SOURCE, "shutdown").take();
        if let Some(dispatcher) = dispatcher
            && let Err(err) = dispatcher.await
        {
            warn!(
                target_module = SOURCE,
                region = %self.region,
                error = %err,
                "Refresh dispatcher ended abnormally"
            );
        }
    }
}

async fn dispatch(
    mut receiver: mpsc::UnboundedReceiver<RefreshJob>,
    permits: Arc<Semaphore>,
    worker: Arc<Worker>,
) {
    let mut running = JoinSet::new();

    while let Some(job) = receiver.recv().await {
        while running.try_join_next().is_some() {}

        let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
            break;
        };
        let worker = Arc::clone(&worker);
        running.spawn(async move {
            worker.run(job).await;
            drop(permit);
        });
    }

    while running.join_next().await.is_some() {}
    debug!(target_module = SOURCE, region = %worker.region, "Refresh dispatcher drained");
}
