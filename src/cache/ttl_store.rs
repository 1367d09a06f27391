//! Bounded key/value store with a fixed time-to-live.
//!
//! Expired entries are never returned and are deleted lazily, when a read or
//! write touches their key. When an insertion pushes the store past its
//! capacity, the least-recently-*inserted* entry is evicted. Reads do not
//! reorder entries, and overwriting a key keeps its original eviction slot.
//!
//! Insertion order is kept in a queue of `(seq, key)` pairs. Each map entry
//! remembers the `seq` it was first inserted with, so queue items left behind
//! by removed keys are recognised as stale and skipped.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::trace;

use crate::clock::{self, Clock};

/// A stored value with its write timestamp.
#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    stored_at: Instant,
    seq: u64,
}

#[derive(Debug)]
struct Inner<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    order: VecDeque<(u64, K)>,
    next_seq: u64,
}

/// Thread-safe TTL store with FIFO capacity eviction.
pub struct TtlStore<K, V> {
    inner: Mutex<Inner<K, V>>,
    ttl: Duration,
    capacity: usize,
    clock: Arc<dyn Clock>,
}

impl<K, V> std::fmt::Debug for TtlStore<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlStore")
            .field("ttl", &self.ttl)
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl<K, V> TtlStore<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create a store backed by the system clock.
    ///
    /// `capacity` is clamped to a minimum of 1.
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self::with_clock(ttl, capacity, clock::system())
    }

    pub fn with_clock(ttl: Duration, capacity: usize, clock: Arc<dyn Clock>) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::with_capacity(capacity.min(1024)),
                order: VecDeque::new(),
                next_seq: 0,
            }),
            ttl,
            capacity,
            clock,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Return the value for `key` if it is present and younger than the TTL.
    ///
    /// An expired entry is removed as a side effect.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.now();
        let mut inner = self.lock();
        let expired = inner
            .entries
            .get(key)
            .map(|e| self.is_expired(e.stored_at, now))?;
        if expired {
            trace!("TTL store entry expired, removing");
            inner.entries.remove(key);
            None
        } else {
            inner.entries.get(key).map(|e| e.value.clone())
        }
    }

    /// Time left before the live entry for `key` expires.
    ///
    /// Behaves like [`get`](Self::get) with respect to expired entries.
    pub fn remaining_ttl(&self, key: &K) -> Option<Duration> {
        let now = self.clock.now();
        let mut inner = self.lock();
        let age = now.saturating_duration_since(inner.entries.get(key)?.stored_at);
        if age >= self.ttl {
            inner.entries.remove(key);
            None
        } else {
            Some(self.ttl - age)
        }
    }

    /// Like [`get`](Self::get), but also returns the time left before the
    /// entry expires. Both are read under one lock at one instant.
    pub fn get_with_remaining(&self, key: &K) -> Option<(V, Duration)> {
        let now = self.clock.now();
        let mut inner = self.lock();
        let age = now.saturating_duration_since(inner.entries.get(key)?.stored_at);
        if age >= self.ttl {
            inner.entries.remove(key);
            None
        } else {
            let remaining = self.ttl - age;
            inner.entries.get(key).map(|e| (e.value.clone(), remaining))
        }
    }

    /// Insert or overwrite `key` with `stored_at = now`.
    pub fn set(&self, key: K, value: V) {
        let now = self.clock.now();
        let mut inner = self.lock();
        self.write_locked(&mut inner, key, value, now);
    }

    /// Store `value` only if `key` has no live entry.
    ///
    /// Returns the remaining TTL of the existing entry when refused. The
    /// check and the write happen under one lock.
    pub fn insert_if_absent(&self, key: K, value: V) -> Result<(), Duration> {
        let now = self.clock.now();
        let mut inner = self.lock();
        if let Some(entry) = inner.entries.get(&key) {
            let age = now.saturating_duration_since(entry.stored_at);
            if age < self.ttl {
                return Err(self.ttl - age);
            }
        }
        self.write_locked(&mut inner, key, value, now);
        Ok(())
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.lock().entries.remove(key).map(|e| e.value)
    }

    /// Remove every entry.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.order.clear();
    }

    /// Number of stored entries, including expired ones not yet collected.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    // -- private helpers ---------------------------------------------------

    fn lock(&self) -> MutexGuard<'_, Inner<K, V>> {
        self.inner.lock().expect("ttl store lock poisoned")
    }

    fn is_expired(&self, stored_at: Instant, now: Instant) -> bool {
        now.saturating_duration_since(stored_at) >= self.ttl
    }

    fn write_locked(&self, inner: &mut Inner<K, V>, key: K, value: V, now: Instant) {
        let seq = inner.next_seq;
        match inner.entries.entry(key) {
            Entry::Occupied(mut slot) => {
                // Overwrite in place: same eviction slot, fresh timestamp.
                let entry = slot.get_mut();
                entry.value = value;
                entry.stored_at = now;
                return;
            }
            Entry::Vacant(slot) => {
                inner.order.push_back((seq, slot.key().clone()));
                slot.insert(CacheEntry {
                    value,
                    stored_at: now,
                    seq,
                });
            }
        }
        inner.next_seq += 1;

        if inner.entries.len() > self.capacity {
            Self::evict_oldest(inner);
        }
        if inner.order.len() > self.capacity.saturating_mul(2) {
            Self::compact(inner);
        }
    }

    fn evict_oldest(inner: &mut Inner<K, V>) {
        while let Some((seq, key)) = inner.order.pop_front() {
            let live = inner.entries.get(&key).is_some_and(|e| e.seq == seq);
            if live {
                trace!(seq, "Evicting oldest TTL store entry");
                inner.entries.remove(&key);
                return;
            }
        }
    }

    /// Drop queue items whose key was removed or re-inserted since.
    fn compact(inner: &mut Inner<K, V>) {
        let Inner { entries, order, .. } = inner;
        order.retain(|(seq, key)| entries.get(key).is_some_and(|e| e.seq == *seq));
    }
}
