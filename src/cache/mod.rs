//! In-memory caches: the TTL store primitive and the tiers built on it.

pub mod fingerprint;
pub mod negative_cache;
pub mod response_cache;
pub mod ttl_store;

pub use fingerprint::Fingerprint;
pub use negative_cache::NegativeCache;
pub use response_cache::{CacheStats, CacheTier, ResponseCache};
pub use ttl_store::TtlStore;
