//! Per-process cache of family revocation status.
//!
//! Entries live for a fraction of the access token lifetime, so a
//! revocation made by another process becomes visible to validation within
//! that window. `Revoked` is terminal and may be served until evicted.

use crate::metrics;
use crate::refresh::FamilyStatus;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct CachedStatus {
    status: FamilyStatus,
    device_id: String,
    cached_at: Instant,
}

/// Bounded LRU of `family_id -> status`.
pub struct StatusCache {
    entries: Mutex<LruCache<String, CachedStatus>>,
    ttl: Duration,
}

impl StatusCache {
    /// Create a cache holding up to `capacity` families for `ttl` each.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    /// Cached status if still fresh.
    pub fn get_fresh(&self, family_id: &str) -> Option<FamilyStatus> {
        let mut entries = self.entries.lock();
        let cached = entries
            .get(family_id)
            .map(|e| (e.status, e.cached_at.elapsed() < self.ttl));
        let fresh = match cached {
            Some((FamilyStatus::Revoked, _)) => Some(FamilyStatus::Revoked),
            Some((status, true)) => Some(status),
            Some((_, false)) => {
                entries.pop(family_id);
                None
            }
            None => None,
        };
        metrics::record_status_cache(fresh.is_some());
        fresh
    }

    /// Record a status read from the store.
    pub fn insert(&self, family_id: &str, device_id: &str, status: FamilyStatus) {
        let mut entries = self.entries.lock();
        // Never downgrade a known revocation.
        if entries
            .peek(family_id)
            .is_some_and(|e| e.status == FamilyStatus::Revoked)
        {
            return;
        }
        entries.put(
            family_id.to_string(),
            CachedStatus {
                status,
                device_id: device_id.to_string(),
                cached_at: Instant::now(),
            },
        );
    }

    /// Mark a family revoked in this process.
    pub fn mark_revoked(&self, family_id: &str, device_id: &str) {
        self.entries.lock().put(
            family_id.to_string(),
            CachedStatus {
                status: FamilyStatus::Revoked,
                device_id: device_id.to_string(),
                cached_at: Instant::now(),
            },
        );
    }

    /// Drop a single entry.
    pub fn invalidate(&self, family_id: &str) {
        self.entries.lock().pop(family_id);
    }

    /// Drop every entry bound to `device_id`. Returns how many were removed.
    pub fn invalidate_device(&self, device_id: &str) -> usize {
        let mut entries = self.entries.lock();
        let stale: Vec<String> = entries
            .iter()
            .filter(|(_, e)| e.device_id == device_id)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &stale {
            entries.pop(key);
        }
        stale.len()
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
