//! Per-client request throttle.
//!
//! Each client key may start one request per `min_interval`. The window is
//! anchored to the first allowed request: rejected attempts inside the
//! window do not extend it. Client records live in a [`TtlStore`] whose TTL
//! is the interval, so stale clients age out and memory stays bounded.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::cache::TtlStore;
use crate::clock::{self, Clock};

/// Outcome of a throttle check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleDecision {
    Allowed,
    /// Inside the cooldown window; `retry_after` is the time left in it.
    Denied { retry_after: Duration },
}

impl ThrottleDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, ThrottleDecision::Allowed)
    }
}

/// Minimum-interval throttle keyed by client identity (usually an IP).
#[derive(Debug)]
pub struct Throttle {
    /// `None` when the interval is zero and throttling is disabled.
    store: Option<TtlStore<String, ()>>,
}

impl Throttle {
    pub fn new(min_interval: Duration, max_clients: usize) -> Self {
        Self::with_clock(min_interval, max_clients, clock::system())
    }

    pub fn with_clock(min_interval: Duration, max_clients: usize, clock: Arc<dyn Clock>) -> Self {
        let store = (!min_interval.is_zero())
            .then(|| TtlStore::with_clock(min_interval, max_clients, clock));
        Self { store }
    }

    /// Check `client_key` and, if allowed, start a new cooldown window.
    pub fn check(&self, client_key: &str) -> ThrottleDecision {
        let Some(store) = &self.store else {
            return ThrottleDecision::Allowed;
        };
        match store.insert_if_absent(client_key.to_string(), ()) {
            Ok(()) => ThrottleDecision::Allowed,
            Err(retry_after) => {
                debug!(
                    client = %client_key,
                    retry_after_ms = retry_after.as_millis() as u64,
                    "Request throttled"
                );
                ThrottleDecision::Denied { retry_after }
            }
        }
    }

    pub fn allow(&self, client_key: &str) -> bool {
        self.check(client_key).is_allowed()
    }

    pub fn min_interval(&self) -> Duration {
        self.store.as_ref().map(|s| s.ttl()).unwrap_or_default()
    }

    /// Number of tracked client records.
    pub fn tracked_clients(&self) -> usize {
        self.store.as_ref().map(|s| s.len()).unwrap_or(0)
    }
}
