use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::util::time::unix_millis;

/// Metadata stored next to a cached value, readable without loading the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheMetadata {
    pub version: i64,
    /// Epoch milliseconds when the value was cached.
    pub cached_at: i64,
    /// Epoch milliseconds when the value is due to expire.
    pub expires_at: i64,
    pub stale: bool,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
}

impl CacheMetadata {
    /// Fresh metadata for a value cached now with the given lifetime.
    pub fn fresh(version: i64, ttl: Duration) -> Self {
        let cached_at = unix_millis();
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        Self {
            version,
            cached_at,
            expires_at: cached_at.saturating_add(ttl_ms),
            stale: false,
            tags: BTreeSet::new(),
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

/// A cached payload together with its metadata.
///
/// The payload is opaque to the cache layer; only the origin boundary gives
/// it a shape.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub value: Value,
    pub metadata: CacheMetadata,
}

impl CacheEntry {
    pub fn new(value: Value, metadata: CacheMetadata) -> Self {
        Self { value, metadata }
    }
}
