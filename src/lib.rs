//! newsdigest: caching and throttling layer for LLM news digests.
//!
//! A digest request travels through two response-cache tiers, a per-client
//! throttle, a negative result cache and a retrying executor before it
//! reaches the upstream summarizer. See [`service::SummaryService`] for the
//! service-side pipeline and [`client::SummaryClient`] for the caller side.

pub mod api;
pub mod cache;
pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod feeds;
pub mod logging;
pub mod providers;
pub mod service;
pub mod throttle;

#[cfg(test)]
mod testing;

pub use cache::{Fingerprint, NegativeCache, ResponseCache, TtlStore};
pub use client::{HttpTransport, LocalTransport, SummaryClient, SummaryTransport};
pub use config::Config;
pub use error::{DigestError, ErrorBody, ErrorKind, FailureKind, Result};
pub use providers::{Summarizer, Summary, SummaryRequest};
pub use service::SummaryService;
pub use throttle::{Throttle, ThrottleDecision};
