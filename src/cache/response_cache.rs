//! Summary response cache, used at two tiers.
//!
//! The client tier lives in the caller's process with a short TTL and saves
//! re-fetches; the service tier lives in the server with a longer TTL and
//! saves upstream LLM calls across callers. Both are keyed by
//! [`Fingerprint`] and hold the full successful [`Summary`].

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use super::{Fingerprint, TtlStore};
use crate::clock::{self, Clock};
use crate::providers::Summary;

/// Which side of the network a cache instance serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheTier {
    Client,
    Service,
}

impl fmt::Display for CacheTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheTier::Client => f.write_str("client"),
            CacheTier::Service => f.write_str("service"),
        }
    }
}

/// Summary cache for one tier, with hit/miss counters.
pub struct ResponseCache {
    tier: CacheTier,
    store: TtlStore<Fingerprint, Arc<Summary>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    /// Create a cache for `tier` with the given TTL and capacity.
    ///
    /// `max_entries` is clamped to a minimum of 1.
    pub fn new(tier: CacheTier, ttl: Duration, max_entries: usize) -> Self {
        Self::with_clock(tier, ttl, max_entries, clock::system())
    }

    pub fn with_clock(
        tier: CacheTier,
        ttl: Duration,
        max_entries: usize,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            tier,
            store: TtlStore::with_clock(ttl, max_entries, clock),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn tier(&self) -> CacheTier {
        self.tier
    }

    /// Look up a cached summary. Returns `None` if absent or expired.
    pub fn get(&self, key: &Fingerprint) -> Option<Arc<Summary>> {
        match self.store.get(key) {
            Some(summary) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(tier = %self.tier, key = %key.short(), "Response cache hit");
                Some(summary)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a successful summary.
    pub fn put(&self, key: Fingerprint, summary: Arc<Summary>) {
        debug!(tier = %self.tier, key = %key.short(), "Caching summary");
        self.store.set(key, summary);
    }

    /// Remove all entries. Counters are kept.
    pub fn clear(&self) {
        self.store.clear();
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            tier: self.tier,
            total_entries: self.store.len(),
            capacity: self.store.capacity(),
            ttl_secs: self.store.ttl().as_secs(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseCache")
            .field("tier", &self.tier)
            .field("store", &self.store)
            .finish()
    }
}

/// Point-in-time statistics for one cache tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub tier: CacheTier,
    /// Stored entries, including expired ones not yet collected.
    pub total_entries: usize,
    pub capacity: usize,
    pub ttl_secs: u64,
    pub hits: u64,
    pub misses: u64,
}
