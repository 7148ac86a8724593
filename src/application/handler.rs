//! Read path: serve content from cache when possible, otherwise fetch through.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;
use tracing::{debug, info, instrument, warn};

use super::error::ServeError;
use crate::cache::{CacheEntry, CacheMetadata, CacheStore, content_key};
use crate::coherence::{RefreshJob, RefreshPool};
use crate::collector::MetricsCollector;
use crate::origin::{Content, OriginGateway};
use crate::util::time::from_millis;

const SOURCE: &str = "application::handler";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServeSource {
    Cache,
    Origin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Freshness {
    Fresh,
    Stale,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Served {
    pub data: Value,
    pub source: ServeSource,
    pub status: Freshness,
    /// When the served value was cached; absent for origin responses.
    pub cached_at: Option<OffsetDateTime>,
    pub version: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Health {
    pub cache: bool,
    pub origin: bool,
}

pub struct RequestHandler {
    region: String,
    ttl: Duration,
    store: CacheStore,
    origin: Arc<dyn OriginGateway>,
    metrics: Arc<MetricsCollector>,
    refresh: Arc<RefreshPool>,
}

impl RequestHandler {
    pub fn new(
        region: impl Into<String>,
        ttl: Duration,
        store: CacheStore,
        origin: Arc<dyn OriginGateway>,
        metrics: Arc<MetricsCollector>,
        refresh: Arc<RefreshPool>,
    ) -> Self {
        Self {
            region: region.into(),
            ttl,
            store,
            origin,
            metrics,
            refresh,
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    #[instrument(skip(self), fields(region = %self.region))]
    pub async fn get_content(&self, id: &str) -> Result<Served, ServeError> {
        let started = Instant::now();
        let key = content_key(id);

        let (entry, stale) = tokio::join!(
            self.store.get_with_metadata(&key),
            self.store.is_stale(&key)
        );

        match entry {
            Some(entry) if stale || entry.metadata.stale => {
                self.metrics.record_hit(elapsed_ms(started), true);
                info!(target_module = SOURCE, region = %self.region, key = %key, "Cache hit (stale)");
                self.refresh.submit(RefreshJob {
                    key,
                    content_id: id.to_string(),
                });
                Ok(cached(entry, Freshness::Stale))
            }
            Some(entry) => {
                self.metrics.record_hit(elapsed_ms(started), false);
                info!(target_module = SOURCE, region = %self.region, key = %key, "Cache hit");
                Ok(cached(entry, Freshness::Fresh))
            }
            None => {
                info!(target_module = SOURCE, region = %self.region, key = %key, "Cache miss");
                let served = self.fetch_through(id, &key).await?;
                self.metrics.record_miss(elapsed_ms(started));
                Ok(served)
            }
        }
    }

    async fn fetch_through(&self, id: &str, key: &str) -> Result<Served, ServeError> {
        let content = self.origin.get_content(id).await?;
        let version = content.version;
        let data = serde_json::to_value(&content)
            .map_err(|err| ServeError::failure(format!("failed to encode content: {err}")))?;

        let entry = CacheEntry::new(data, CacheMetadata::fresh(version, self.ttl));
        self.store
            .set_with_metadata(key, &entry, self.ttl)
            .await
            .map_err(|err| ServeError::failure(err.to_string()))?;
        debug!(target_module = SOURCE, region = %self.region, key, version, "Cached from origin");

        Ok(Served {
            data: entry.value,
            source: ServeSource::Origin,
            status: Freshness::Fresh,
            cached_at: None,
            version,
        })
    }

    /// Every content item, straight from the origin. Never cached.
    pub async fn list_content(&self) -> Result<Vec<Content>, ServeError> {
        Ok(self.origin.get_all_content().await?)
    }

    pub async fn health(&self) -> Health {
        let (cache, origin) = tokio::join!(self.store.ping(), self.origin.health_check());
        if !origin {
            warn!(target_module = SOURCE, region = %self.region, "Origin not responding");
        }
        Health { cache, origin }
    }
}

fn cached(entry: CacheEntry, status: Freshness) -> Served {
    Served {
        data: entry.value,
        source: ServeSource::Cache,
        status,
        cached_at: from_millis(entry.metadata.cached_at),
        version: entry.metadata.version,
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use bytes::Bytes;
    use serde_json::json;

    use super::*;
    use crate::cache::{BackendError, CacheBackend, MemoryBackend, ScanPage};
    use crate::coherence::RefreshConfig;
    use crate::origin::OriginError;

    #[derive(Default)]
    struct FakeOrigin {
        fetches: AtomicUsize,
        version: AtomicI64,
    }

    #[async_trait]
    impl OriginGateway for FakeOrigin {
        async fn get_content(&self, id: &str) -> Result<Content, OriginError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            match id {
                "missing" => Err(OriginError::NotFound),
                "down" => Err(OriginError::Timeout),
                _ => Ok(Content {
                    id: id.parse().unwrap_or_default(),
                    slug: format!("item-{id}"),
                    title: "Item".to_string(),
                    body: "Body".to_string(),
                    metadata: json!({}),
                    version: self.version.load(Ordering::SeqCst),
                    created_at: "2024-01-01T00:00:00Z".to_string(),
                    updated_at: "2024-01-01T00:00:00Z".to_string(),
                }),
            }
        }

        async fn get_all_content(&self) -> Result<Vec<Content>, OriginError> {
            Err(OriginError::Network("connection refused".to_string()))
        }

        async fn health_check(&self) -> bool {
            false
        }
    }

    /// Memory backend whose reads or writes can be switched to fail.
    #[derive(Default)]
    struct FlakyBackend {
        inner: MemoryBackend,
        reads_fail: bool,
        writes_fail: bool,
    }

    impl FlakyBackend {
        fn read(&self) -> Result<(), BackendError> {
            if self.reads_fail {
                return Err(BackendError::unavailable("read timed out"));
            }
            Ok(())
        }

        fn write(&self) -> Result<(), BackendError> {
            if self.writes_fail {
                return Err(BackendError::unavailable("connection refused"));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl CacheBackend for FlakyBackend {
        async fn get(&self, key: &str) -> Result<Option<Bytes>, BackendError> {
            self.read()?;
            self.inner.get(key).await
        }
        async fn set_ex(
            &self,
            key: &str,
            value: Bytes,
            ttl: Duration,
        ) -> Result<(), BackendError> {
            self.write()?;
            self.inner.set_ex(key, value, ttl).await
        }
        async fn del(&self, key: &str) -> Result<bool, BackendError> {
            self.write()?;
            self.inner.del(key).await
        }
        async fn exists(&self, key: &str) -> Result<bool, BackendError> {
            self.read()?;
            self.inner.exists(key).await
        }
        async fn sadd(&self, key: &str, member: &str) -> Result<(), BackendError> {
            self.write()?;
            self.inner.sadd(key, member).await
        }
        async fn smembers(&self, key: &str) -> Result<Vec<String>, BackendError> {
            self.read()?;
            self.inner.smembers(key).await
        }
        async fn scan(
            &self,
            cursor: u64,
            pattern: &str,
            count: usize,
        ) -> Result<ScanPage, BackendError> {
            self.read()?;
            self.inner.scan(cursor, pattern, count).await
        }
        async fn ping(&self) -> Result<(), BackendError> {
            self.read()
        }
        fn kind(&self) -> &'static str {
            "flaky"
        }
    }

    struct Fixture {
        handler: RequestHandler,
        store: CacheStore,
        origin: Arc<FakeOrigin>,
        metrics: Arc<MetricsCollector>,
        refresh: Arc<RefreshPool>,
    }

    fn fixture() -> Fixture {
        fixture_over(CacheStore::in_memory())
    }

    fn fixture_over(store: CacheStore) -> Fixture {
        let origin = Arc::new(FakeOrigin::default());
        origin.version.store(1, Ordering::SeqCst);
        let metrics = Arc::new(MetricsCollector::new());
        let refresh = Arc::new(RefreshPool::start(
            RefreshConfig::default(),
            store.clone(),
            origin.clone(),
        ));
        let handler = RequestHandler::new(
            "us-east",
            Duration::from_secs(3600),
            store.clone(),
            origin.clone(),
            Arc::clone(&metrics),
            Arc::clone(&refresh),
        );
        Fixture {
            handler,
            store,
            origin,
            metrics,
            refresh,
        }
    }

    #[tokio::test]
    async fn miss_fetches_through_then_hits() {
        let fx = fixture();

        let first = fx.handler.get_content("1").await.expect("served");
        assert_eq!(first.source, ServeSource::Origin);
        assert_eq!(first.status, Freshness::Fresh);
        assert!(first.cached_at.is_none());
        assert_eq!(first.data["slug"], "item-1");

        let second = fx.handler.get_content("1").await.expect("served");
        assert_eq!(second.source, ServeSource::Cache);
        assert_eq!(second.status, Freshness::Fresh);
        assert!(second.cached_at.is_some());
        assert_eq!(second.data, first.data);

        assert_eq!(fx.origin.fetches.load(Ordering::SeqCst), 1);
        let snapshot = fx.metrics.snapshot();
        assert_eq!((snapshot.cache_hits, snapshot.cache_misses), (1, 1));

        let meta: CacheMetadata = fx.store.get("meta:content:1").await.expect("metadata");
        assert_eq!(meta.version, 1);
        assert_eq!(meta.expires_at - meta.cached_at, 3_600_000);
    }

    #[tokio::test]
    async fn stale_hit_serves_old_value_and_refreshes() {
        let fx = fixture();
        fx.handler.get_content("1").await.expect("prime");
        fx.store.mark_stale("content:1").await.expect("mark");
        fx.origin.version.store(2, Ordering::SeqCst);

        let served = fx.handler.get_content("1").await.expect("served");
        assert_eq!(served.source, ServeSource::Cache);
        assert_eq!(served.status, Freshness::Stale);
        assert_eq!(served.version, 1);

        fx.refresh.shutdown().await;
        assert_eq!(fx.origin.fetches.load(Ordering::SeqCst), 2);
        assert!(!fx.store.is_stale("content:1").await);

        let entry = fx.store.get_with_metadata("content:1").await.expect("entry");
        assert_eq!(entry.metadata.version, 2);
        assert_eq!(fx.metrics.snapshot().stale_hits, 1);
    }

    #[tokio::test]
    async fn origin_errors_map_to_serve_errors() {
        let fx = fixture();
        assert!(matches!(
            fx.handler.get_content("missing").await,
            Err(ServeError::NotFound)
        ));
        assert!(matches!(
            fx.handler.get_content("down").await,
            Err(ServeError::Failure(message)) if message == "origin request timed out"
        ));
        assert!(matches!(
            fx.handler.list_content().await,
            Err(ServeError::Failure(_))
        ));
        assert_eq!(fx.metrics.snapshot().total_requests, 0);
        assert!(fx.store.get_with_metadata("content:missing").await.is_none());
    }

    #[tokio::test]
    async fn unreadable_cache_falls_back_to_origin() {
        let backend = Arc::new(FlakyBackend {
            reads_fail: true,
            ..Default::default()
        });
        let fx = fixture_over(CacheStore::new(backend.clone()));

        for _ in 0..2 {
            let served = fx.handler.get_content("1").await.expect("served");
            assert_eq!(served.source, ServeSource::Origin);
            assert_eq!(served.status, Freshness::Fresh);
            assert_eq!(served.data["slug"], "item-1");
        }

        assert_eq!(fx.origin.fetches.load(Ordering::SeqCst), 2);
        assert_eq!(fx.metrics.snapshot().cache_misses, 2);
        assert!(backend.inner.exists("content:1").await.expect("exists"));
        assert!(backend.inner.exists("meta:content:1").await.expect("exists"));
    }

    #[tokio::test]
    async fn unwritable_cache_fails_the_miss() {
        let backend = Arc::new(FlakyBackend {
            writes_fail: true,
            ..Default::default()
        });
        let fx = fixture_over(CacheStore::new(backend.clone()));

        let err = fx.handler.get_content("1").await.expect_err("write failure");
        assert!(matches!(
            &err,
            ServeError::Failure(message)
                if message == "cache write failed for `content:1`: \
                               cache backend unavailable: connection refused"
        ));
        assert_eq!(fx.origin.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(fx.metrics.snapshot().total_requests, 0);
        assert!(backend.inner.is_empty());
    }

    #[tokio::test]
    async fn health_reports_each_dependency() {
        let fx = fixture();
        assert_eq!(
            fx.handler.health().await,
            Health {
                cache: true,
                origin: false
            }
        );
    }
}
