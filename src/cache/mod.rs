//! Edge cache storage.
//!
//! A [`CacheStore`] keeps serialized payloads with a TTL next to their
//! metadata, stale markers and tag sets, over a pluggable [`CacheBackend`]:
//!
//! - [`MemoryBackend`]: in-process, the default;
//! - `RedisBackend`: behind the `redis` feature, selected with a `redis://`
//!   store url.

mod backend;
mod config;
mod entry;
mod error;
mod keys;
mod memory;
#[cfg(feature = "redis")]
mod redis;
mod store;

pub use backend::{CacheBackend, ScanPage};
pub use self::config::CacheConfig;
pub use entry::{CacheEntry, CacheMetadata};
pub use error::{BackendError, CacheError};
pub use keys::{content_key, glob_match, meta_key, stale_key, tag_key};
pub use memory::MemoryBackend;
#[cfg(feature = "redis")]
pub use self::redis::RedisBackend;
pub use store::{CacheStore, STALE_MARKER_TTL};
