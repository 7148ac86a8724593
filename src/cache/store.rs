//! Cache store: values with TTL, companion metadata, stale markers and tag sets.
//!
//! Reads fail open (any backend or decode problem is a miss); writes fail
//! closed and surface [`CacheError`] to the caller.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::Stream;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::backend::CacheBackend;
use super::entry::{CacheEntry, CacheMetadata};
use super::error::CacheError;
use super::keys::{meta_key, stale_key, tag_key};
use super::memory::MemoryBackend;

const SOURCE: &str = "cache::store";

/// Lifetime of a stale marker, independent of the value it marks.
pub const STALE_MARKER_TTL: Duration = Duration::from_secs(3600);

/// Lifetime assumed for metadata synthesized when only the value survived.
const SYNTHESIZED_METADATA_TTL: Duration = Duration::from_secs(3600);

const SCAN_BATCH: usize = 100;

#[derive(Clone)]
pub struct CacheStore {
    backend: Arc<dyn CacheBackend>,
}

impl CacheStore {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self { backend }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    pub fn backend_kind(&self) -> &'static str {
        self.backend.kind()
    }

    /// Look up and decode a value. Never fails: problems read as a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.backend.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(err) => {
                warn!(
                    target_module = SOURCE,
                    key,
                    error = %err,
                    "Cache read failed; treating as miss"
                );
                return None;
            }
        };

        match serde_json::from_slice(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(
                    target_module = SOURCE,
                    key,
                    error = %err,
                    "Cached value could not be decoded; treating as miss"
                );
                None
            }
        }
    }

    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let encoded = serde_json::to_vec(value).map_err(|source| CacheError::Encode {
            key: key.to_string(),
            source,
        })?;
        self.backend
            .set_ex(key, Bytes::from(encoded), ttl)
            .await
            .map_err(|err| CacheError::write(key, err))
    }

    pub async fn del(&self, key: &str) -> Result<(), CacheError> {
        let removed = self
            .backend
            .del(key)
            .await
            .map_err(|err| CacheError::write(key, err))?;
        debug!(target_module = SOURCE, key, removed, "Cache key deleted");
        Ok(())
    }

    pub async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        self.backend
            .exists(key)
            .await
            .map_err(|err| CacheError::read(key, err))
    }

    /// Value plus metadata. Missing metadata next to a live value is
    /// synthesized rather than reported.
    pub async fn get_with_metadata(&self, key: &str) -> Option<CacheEntry> {
        let value: serde_json::Value = self.get(key).await?;
        let metadata = match self.get::<CacheMetadata>(&meta_key(key)).await {
            Some(metadata) => metadata,
            None => {
                debug!(
                    target_module = SOURCE,
                    key, "Metadata missing for cached value; synthesizing defaults"
                );
                CacheMetadata::fresh(1, SYNTHESIZED_METADATA_TTL)
            }
        };
        Some(CacheEntry::new(value, metadata))
    }

    /// Write the value, then its metadata, with the same TTL, and index the
    /// key under each of its tags.
    ///
    /// The two writes are not atomic; a failure between them leaves a value
    /// without metadata, which reads synthesize over. Tag sets are never
    /// pruned when members expire.
    pub async fn set_with_metadata(
        &self,
        key: &str,
        entry: &CacheEntry,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        self.set(key, &entry.value, ttl).await?;
        self.set(&meta_key(key), &entry.metadata, ttl).await?;

        for tag in &entry.metadata.tags {
            let tag_key = tag_key(tag);
            self.backend
                .sadd(&tag_key, key)
                .await
                .map_err(|err| CacheError::write(&tag_key, err))?;
        }
        Ok(())
    }

    /// Flag a key as stale for [`STALE_MARKER_TTL`], whether or not a value
    /// is currently cached under it.
    pub async fn mark_stale(&self, key: &str) -> Result<(), CacheError> {
        self.set(&stale_key(key), &true, STALE_MARKER_TTL).await
    }

    pub async fn is_stale(&self, key: &str) -> bool {
        match self.backend.exists(&stale_key(key)).await {
            Ok(stale) => stale,
            Err(err) => {
                warn!(
                    target_module = SOURCE,
                    key,
                    error = %err,
                    "Stale check failed; treating as fresh"
                );
                false
            }
        }
    }

    pub async fn clear_stale(&self, key: &str) {
        if let Err(err) = self.backend.del(&stale_key(key)).await {
            warn!(
                target_module = SOURCE,
                key,
                error = %err,
                "Failed to clear stale marker"
            );
        }
    }

    /// Lazily scan keys matching a glob pattern.
    ///
    /// Each call starts a new scan; keys written or removed while the stream
    /// is being consumed may or may not appear.
    pub fn keys(&self, pattern: &str) -> impl Stream<Item = String> + Send + 'static {
        let backend = Arc::clone(&self.backend);
        let pattern = pattern.to_string();

        async_stream::stream! {
            let mut cursor = 0u64;
            loop {
                match backend.scan(cursor, &pattern, SCAN_BATCH).await {
                    Ok(page) => {
                        for key in page.keys {
                            yield key;
                        }
                        if page.cursor == 0 {
                            break;
                        }
                        cursor = page.cursor;
                    }
                    Err(err) => {
                        warn!(
                            target_module = SOURCE,
                            pattern = %pattern,
                            error = %err,
                            "Key scan aborted"
                        );
                        break;
                    }
                }
            }
        }
    }

    pub async fn tag_members(&self, tag: &str) -> BTreeSet<String> {
        match self.backend.smembers(&tag_key(tag)).await {
            Ok(members) => members.into_iter().collect(),
            Err(err) => {
                warn!(
                    target_module = SOURCE,
                    tag,
                    error = %err,
                    "Tag membership lookup failed"
                );
                BTreeSet::new()
            }
        }
    }

    /// True when the backend answers.
    pub async fn ping(&self) -> bool {
        self.backend.ping().await.is_ok()
    }
}
