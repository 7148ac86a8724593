//! Storage seam beneath [`CacheStore`](super::CacheStore).
//!
//! Backends speak raw bytes with per-key TTLs plus unordered string sets, the
//! subset of a Redis-like server the cache layer needs. Single-key operations
//! are expected to be atomic; nothing spans keys.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use super::error::BackendError;

/// One page of an incremental key scan.
///
/// A returned `cursor` of `0` means the scan is complete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPage {
    pub cursor: u64,
    pub keys: Vec<String>,
}

#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, BackendError>;

    async fn set_ex(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), BackendError>;

    /// Returns true when a key was removed.
    async fn del(&self, key: &str) -> Result<bool, BackendError>;

    async fn exists(&self, key: &str) -> Result<bool, BackendError>;

    async fn sadd(&self, key: &str, member: &str) -> Result<(), BackendError>;

    async fn smembers(&self, key: &str) -> Result<Vec<String>, BackendError>;

    /// Fetch the next page of keys matching a glob `pattern`, starting at `cursor`.
    async fn scan(&self, cursor: u64, pattern: &str, count: usize)
    -> Result<ScanPage, BackendError>;

    async fn ping(&self) -> Result<(), BackendError>;

    /// Short label for logs and the health probe.
    fn kind(&self) -> &'static str;
}
