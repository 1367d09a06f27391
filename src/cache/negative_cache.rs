//! Memoized upstream failures.
//!
//! Holds the classification of permanent failures for a cooldown period so
//! an identical request short-circuits without paying for another upstream
//! call. Transient failures are never recorded here.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::{Fingerprint, TtlStore};
use crate::clock::{self, Clock};
use crate::error::{DigestError, UpstreamFailure};

/// Negative result cache keyed by request fingerprint.
#[derive(Debug)]
pub struct NegativeCache {
    store: TtlStore<Fingerprint, UpstreamFailure>,
}

impl NegativeCache {
    pub fn new(cooldown: Duration, max_entries: usize) -> Self {
        Self::with_clock(cooldown, max_entries, clock::system())
    }

    pub fn with_clock(cooldown: Duration, max_entries: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            store: TtlStore::with_clock(cooldown, max_entries, clock),
        }
    }

    /// Return the memoized failure for `key` as the error to hand back,
    /// with the remaining cooldown as its retry hint.
    pub fn check(&self, key: &Fingerprint) -> Option<DigestError> {
        let (failure, remaining) = self.store.get_with_remaining(key)?;
        debug!(key = %key.short(), kind = %failure.kind, "Negative cache hit");
        Some(DigestError::Permanent {
            failure,
            retry_after: Some(remaining),
        })
    }

    /// Record `error` if it is a permanent failure. Returns whether it was stored.
    pub fn record(&self, key: Fingerprint, error: &DigestError) -> bool {
        match error.negative_cacheable() {
            Some(failure) => {
                warn!(
                    key = %key.short(),
                    kind = %failure.kind,
                    cooldown_secs = self.store.ttl().as_secs(),
                    "Memoizing permanent upstream failure"
                );
                self.store.set(key, failure.clone());
                true
            }
            None => false,
        }
    }

    pub fn clear(&self) {
        self.store.clear();
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}
