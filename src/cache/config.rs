//! Cache configuration and backend selection.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use super::backend::CacheBackend;
use super::error::BackendError;
use super::memory::MemoryBackend;
use super::store::CacheStore;

const SOURCE: &str = "cache::config";

const DEFAULT_TTL_SECS: u64 = 3600;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Lifetime given to entries written on fetch-through or refresh.
    pub default_ttl: Duration,
    /// `memory://` (or unset) for the in-process backend, `redis://` for Redis.
    pub store_url: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(DEFAULT_TTL_SECS),
            store_url: None,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            default_ttl: settings.default_ttl,
            store_url: settings.store_url.clone(),
        }
    }
}

impl CacheConfig {
    /// Open the backend named by `store_url` and wrap it in a store.
    pub async fn open_store(&self) -> Result<CacheStore, BackendError> {
        let backend = self.open_backend().await?;
        info!(
            target_module = SOURCE,
            backend = backend.kind(),
            default_ttl_secs = self.default_ttl.as_secs(),
            "Cache store opened"
        );
        Ok(CacheStore::new(backend))
    }

    async fn open_backend(&self) -> Result<Arc<dyn CacheBackend>, BackendError> {
        let Some(url) = self.store_url.as_deref() else {
            return Ok(Arc::new(MemoryBackend::new()));
        };

        let scheme = url.split_once("://").map(|(scheme, _)| scheme);
        match scheme {
            Some("memory") => Ok(Arc::new(MemoryBackend::new())),
            Some("redis" | "rediss") => open_redis(url).await,
            _ => Err(BackendError::InvalidUrl {
                url: url.to_string(),
                reason: "expected a memory:// or redis:// url".to_string(),
            }),
        }
    }
}

#[cfg(feature = "redis")]
async fn open_redis(url: &str) -> Result<Arc<dyn CacheBackend>, BackendError> {
    let backend = super::redis::RedisBackend::connect(url).await?;
    Ok(Arc::new(backend))
}

#[cfg(not(feature = "redis"))]
async fn open_redis(url: &str) -> Result<Arc<dyn CacheBackend>, BackendError> {
    Err(BackendError::InvalidUrl {
        url: url.to_string(),
        reason: "built without the `redis` feature".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert_eq!(config.default_ttl, Duration::from_secs(3600));
        assert!(config.store_url.is_none());
    }

    #[tokio::test]
    async fn unset_and_memory_urls_open_in_process_store() {
        let store = CacheConfig::default().open_store().await.expect("open");
        assert_eq!(store.backend_kind(), "memory");

        let config = CacheConfig {
            store_url: Some("memory://".to_string()),
            ..Default::default()
        };
        let store = config.open_store().await.expect("open");
        assert_eq!(store.backend_kind(), "memory");
    }

    #[tokio::test]
    async fn unknown_scheme_is_rejected() {
        let config = CacheConfig {
            store_url: Some("memcached://localhost".to_string()),
            ..Default::default()
        };
        let err = config.open_store().await.err().expect("invalid url");
        assert!(matches!(err, BackendError::InvalidUrl { .. }));
    }
}
