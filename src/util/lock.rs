//! Lock helpers that survive poisoning.
//!
//! A panic while a region's shared state is locked must not take the node
//! down with it. The guard is taken back and the warning names what may now
//! be inconsistent for the owning module.

use std::sync::{LockResult, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::warn;

pub(crate) fn rw_read<'a, T>(
    lock: &'a RwLock<T>,
    owner: &'static str,
    op: &'static str,
) -> RwLockReadGuard<'a, T> {
    recover(lock.read(), owner, op, "rwlock.read")
}

pub(crate) fn rw_write<'a, T>(
    lock: &'a RwLock<T>,
    owner: &'static str,
    op: &'static str,
) -> RwLockWriteGuard<'a, T> {
    recover(lock.write(), owner, op, "rwlock.write")
}

pub(crate) fn mutex_lock<'a, T>(
    lock: &'a Mutex<T>,
    owner: &'static str,
    op: &'static str,
) -> MutexGuard<'a, T> {
    recover(lock.lock(), owner, op, "mutex.lock")
}

fn recover<G>(
    result: LockResult<G>,
    owner: &'static str,
    op: &'static str,
    lock_kind: &'static str,
) -> G {
    result.unwrap_or_else(|poisoned| {
        warn!(
            op,
            target_module = owner,
            lock_kind,
            result = "poisoned_recovered",
            hint = poison_hint(owner),
            "Recovered from poisoned lock"
        );
        poisoned.into_inner()
    })
}

fn poison_hint(owner: &str) -> &'static str {
    match owner.split("::").next().unwrap_or(owner) {
        "cache" => "cached slots may reflect a half-applied write or sweep",
        "collector" => "hit, miss and latency figures may disagree until the next reset",
        "coherence" => "a delay lane or refresh handle may be gone; new work may be dropped",
        "region" => "a subscription or summary task handle may already be taken",
        _ => "guarded state may be stale after a panic in another task",
    }
}
