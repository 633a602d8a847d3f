use std::fmt;
use std::time::{Duration, Instant};

use moka::ops::compute::{CompResult, Op};
use moka::sync::Cache;
use moka::Expiry;
use tracing::debug;

/// A held claim on a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub key: String,
    pub owner: String,
    pub ttl: Duration,
    pub acquired_at: Instant,
}

struct LeaseExpiry;

impl Expiry<String, Lease> for LeaseExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &Lease,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Lease,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Explicit (key, TTL, owner) store for "currently processing" markers.
///
/// # Eviction
///
/// - A lease disappears when its owner calls [`LeaseStore::release`] or drops
///   the [`LeaseGuard`].
/// - A lease whose owner never releases it (crashed task, aborted future)
///   expires after its own TTL; reads never extend it.
/// - The store is bounded by `max_capacity`. Under capacity pressure moka may
///   evict live leases early, which only re-admits a duplicate trigger; size
///   the store well above the number of concurrently syncing accounts.
#[derive(Clone)]
pub struct LeaseStore {
    leases: Cache<String, Lease>,
}

impl fmt::Debug for LeaseStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeaseStore").field("entries", &self.leases.entry_count()).finish()
    }
}

impl LeaseStore {
    pub fn new(max_capacity: u64) -> Self {
        let leases = Cache::builder().max_capacity(max_capacity).expire_after(LeaseExpiry).build();
        Self { leases }
    }

    /// Attempts to claim `key` for `owner`.
    ///
    /// Returns `true` when the lease was inserted, or when `owner` already
    /// holds it. Insertion is atomic: two concurrent callers never both
    /// observe a fresh insert.
    pub fn try_acquire(&self, key: &str, owner: &str, ttl: Duration) -> bool {
        let entry = self.leases.entry(key.to_string()).or_insert_with(|| Lease {
            key: key.to_string(),
            owner: owner.to_string(),
            ttl,
            acquired_at: Instant::now(),
        });

        if entry.is_fresh() {
            debug!(key, owner, ?ttl, "lease acquired");
            return true;
        }
        let held_by = &entry.value().owner;
        if held_by == owner {
            return true;
        }
        debug!(key, owner, held_by = %held_by, "lease busy");
        false
    }

    /// Like [`try_acquire`](Self::try_acquire) but returns a guard that
    /// releases the lease when dropped.
    pub fn acquire_guard(&self, key: &str, owner: &str, ttl: Duration) -> Option<LeaseGuard> {
        self.try_acquire(key, owner, ttl).then(|| LeaseGuard {
            store: self.clone(),
            key: key.to_string(),
            owner: owner.to_string(),
        })
    }

    /// Removes the lease only if `owner` holds it. Returns whether a lease
    /// was removed.
    pub fn release(&self, key: &str, owner: &str) -> bool {
        let outcome = self.leases.entry(key.to_string()).and_compute_with(|existing| {
            match existing {
                Some(entry) if entry.value().owner == owner => Op::Remove,
                _ => Op::Nop,
            }
        });
        let removed = matches!(outcome, CompResult::Removed(_));
        if removed {
            debug!(key, owner, "lease released");
        }
        removed
    }

    /// Current holder of `key`, if the lease has not expired.
    pub fn holder(&self, key: &str) -> Option<Lease> {
        self.leases.get(key)
    }
}

/// Releases its lease on drop.
#[derive(Debug)]
pub struct LeaseGuard {
    store: LeaseStore,
    key: String,
    owner: String,
}

impl LeaseGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        self.store.release(&self.key, &self.owner);
    }
}
