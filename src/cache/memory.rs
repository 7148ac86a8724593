//! In-process cache backend.
//!
//! Keys live in an ordered map so that scans walk a stable order. An expired
//! slot reads as absent straight away; writes sweep every expired slot out of
//! the map at most once per [`SWEEP_INTERVAL`]. Deadlines use the tokio clock,
//! which lets tests pause and advance time.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, RwLock, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::time::Instant;
use tracing::debug;

use super::backend::{CacheBackend, ScanPage};
use super::error::BackendError;
use super::keys::glob_match;
use crate::util::lock::{mutex_lock, rw_read, rw_write};

const SOURCE: &str = "cache::memory";

/// Minimum spacing between two sweeps of expired slots.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
enum Value {
    Bytes(Bytes),
    Set(BTreeSet<String>),
}

#[derive(Debug, Clone)]
struct Slot {
    value: Value,
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|deadline| deadline > now)
    }
}

pub struct MemoryBackend {
    slots: RwLock<BTreeMap<String, Slot>>,
    next_sweep: Mutex<Instant>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self {
            slots: RwLock::new(BTreeMap::new()),
            next_sweep: Mutex::new(Instant::now()),
        }
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys, counting sets.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        rw_read(&self.slots, SOURCE, "len")
            .values()
            .filter(|slot| slot.is_live(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn live_slot(&self, key: &str) -> Option<Slot> {
        let now = Instant::now();
        rw_read(&self.slots, SOURCE, "live_slot")
            .get(key)
            .filter(|slot| slot.is_live(now))
            .cloned()
    }

    /// Write access to the map, dropping expired slots first when a sweep is due.
    fn slots_for_write(
        &self,
        op: &'static str,
    ) -> RwLockWriteGuard<'_, BTreeMap<String, Slot>> {
        let now = Instant::now();
        let mut slots = rw_write(&self.slots, SOURCE, op);

        let mut next_sweep = mutex_lock(&self.next_sweep, SOURCE, op);
        if now >= *next_sweep {
            let before = slots.len();
            slots.retain(|_, slot| slot.is_live(now));
            *next_sweep = now + SWEEP_INTERVAL;

            let swept = before - slots.len();
            if swept > 0 {
                debug!(
                    target_module = SOURCE,
                    op,
                    swept,
                    remaining = slots.len(),
                    "Swept expired slots"
                );
            }
        }
        slots
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, BackendError> {
        match self.live_slot(key) {
            None => Ok(None),
            Some(Slot {
                value: Value::Bytes(bytes),
                ..
            }) => Ok(Some(bytes)),
            Some(_) => Err(BackendError::WrongType {
                key: key.to_string(),
            }),
        }
    }

    async fn set_ex(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), BackendError> {
        if ttl.is_zero() {
            return Err(BackendError::InvalidTtl {
                key: key.to_string(),
            });
        }
        let slot = Slot {
            value: Value::Bytes(value),
            expires_at: Some(Instant::now() + ttl),
        };
        self.slots_for_write("set_ex").insert(key.to_string(), slot);
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<bool, BackendError> {
        let now = Instant::now();
        let removed = self.slots_for_write("del").remove(key);
        Ok(removed.is_some_and(|slot| slot.is_live(now)))
    }

    async fn exists(&self, key: &str) -> Result<bool, BackendError> {
        Ok(self.live_slot(key).is_some())
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), BackendError> {
        let now = Instant::now();
        let mut slots = self.slots_for_write("sadd");
        let slot = slots
            .entry(key.to_string())
            .and_modify(|slot| {
                if !slot.is_live(now) {
                    *slot = Slot {
                        value: Value::Set(BTreeSet::new()),
                        expires_at: None,
                    };
                }
            })
            .or_insert_with(|| Slot {
                value: Value::Set(BTreeSet::new()),
                expires_at: None,
            });

        match &mut slot.value {
            Value::Set(members) => {
                members.insert(member.to_string());
                Ok(())
            }
            Value::Bytes(_) => Err(BackendError::WrongType {
                key: key.to_string(),
            }),
        }
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, BackendError> {
        match self.live_slot(key) {
            None => Ok(Vec::new()),
            Some(Slot {
                value: Value::Set(members),
                ..
            }) => Ok(members.into_iter().collect()),
            Some(_) => Err(BackendError::WrongType {
                key: key.to_string(),
            }),
        }
    }

    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> Result<ScanPage, BackendError> {
        let now = Instant::now();
        let slots = rw_read(&self.slots, SOURCE, "scan");
        let start = usize::try_from(cursor).unwrap_or(usize::MAX);
        let count = count.max(1);

        // The cursor is a position in key order; like SCAN it tolerates
        // concurrent writes at the cost of possibly repeating or skipping keys.
        let keys: Vec<String> = slots
            .iter()
            .skip(start)
            .take(count)
            .filter(|(key, slot)| slot.is_live(now) && glob_match(pattern, key))
            .map(|(key, _)| key.clone())
            .collect();

        let next = start.saturating_add(count);
        let cursor = if next >= slots.len() { 0 } else { next as u64 };
        Ok(ScanPage { cursor, keys })
    }

    async fn ping(&self) -> Result<(), BackendError> {
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}
