//! Service-side summary pipeline.
//!
//! [`SummaryService::get_summary`] runs one request through the layers in
//! order:
//!
//! 1. service-tier response cache (a hit skips everything else)
//! 2. per-client throttle
//! 3. negative result cache
//! 4. retrying executor (the only step that calls upstream)
//!
//! Success populates the service tier; a permanent failure populates the
//! negative cache. Transient failures, throttling and cancellation leave
//! every cache untouched. All stores are owned here for the life of the
//! process.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{CacheStats, CacheTier, Fingerprint, NegativeCache, ResponseCache};
use crate::clock::{self, Clock};
use crate::config::Config;
use crate::error::{DigestError, Result};
use crate::providers::{RetryPolicy, RetryingExecutor, Summarizer, Summary, SummaryRequest};
use crate::throttle::{Throttle, ThrottleDecision};

/// Lock-free counters for the pipeline.
#[derive(Debug, Default)]
pub struct ServiceStats {
    pub requests: AtomicU64,
    pub throttled: AtomicU64,
    pub negative_hits: AtomicU64,
    pub upstream_calls: AtomicU64,
    pub upstream_attempts: AtomicU64,
    pub upstream_timeouts: AtomicU64,
    pub upstream_failures: AtomicU64,
    pub input_tokens: AtomicU64,
    pub output_tokens: AtomicU64,
}

impl ServiceStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            throttled: self.throttled.load(Ordering::Relaxed),
            negative_hits: self.negative_hits.load(Ordering::Relaxed),
            upstream_calls: self.upstream_calls.load(Ordering::Relaxed),
            upstream_attempts: self.upstream_attempts.load(Ordering::Relaxed),
            upstream_timeouts: self.upstream_timeouts.load(Ordering::Relaxed),
            upstream_failures: self.upstream_failures.load(Ordering::Relaxed),
            input_tokens: self.input_tokens.load(Ordering::Relaxed),
            output_tokens: self.output_tokens.load(Ordering::Relaxed),
        }
    }
}

/// Serializable copy of [`ServiceStats`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub requests: u64,
    pub throttled: u64,
    pub negative_hits: u64,
    pub upstream_calls: u64,
    pub upstream_attempts: u64,
    pub upstream_timeouts: u64,
    pub upstream_failures: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Full status report for `/api/stats`.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceReport {
    pub cache: CacheStats,
    pub negative_entries: usize,
    pub throttled_clients: usize,
    pub counters: StatsSnapshot,
}

/// Process-level summary handler.
pub struct SummaryService {
    cache: ResponseCache,
    negative: NegativeCache,
    throttle: Throttle,
    executor: RetryingExecutor,
    stats: ServiceStats,
}

impl std::fmt::Debug for SummaryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SummaryService")
            .field("cache", &self.cache)
            .field("executor", &self.executor)
            .finish()
    }
}

impl SummaryService {
    pub fn new(config: &Config, upstream: Arc<dyn Summarizer>) -> Self {
        Self::with_clock(config, upstream, clock::system())
    }

    pub fn with_clock(config: &Config, upstream: Arc<dyn Summarizer>, clock: Arc<dyn Clock>) -> Self {
        let cache_cfg = &config.cache;
        Self {
            cache: ResponseCache::with_clock(
                CacheTier::Service,
                cache_cfg.service_ttl(),
                cache_cfg.service_max_entries,
                clock.clone(),
            ),
            negative: NegativeCache::with_clock(
                cache_cfg.negative_ttl(),
                cache_cfg.negative_max_entries,
                clock.clone(),
            ),
            throttle: Throttle::with_clock(
                config.throttle.min_interval(),
                config.throttle.max_clients,
                clock,
            ),
            executor: RetryingExecutor::new(upstream, RetryPolicy::from_config(&config.upstream)),
            stats: ServiceStats::default(),
        }
    }

    /// Serve a summary for `client_key`.
    pub async fn get_summary(
        &self,
        client_key: &str,
        request: &SummaryRequest,
        cancel: &CancellationToken,
    ) -> Result<Arc<Summary>> {
        ServiceStats::bump(&self.stats.requests);
        let key = Fingerprint::of(request)?;

        if let Some(summary) = self.cache.get(&key) {
            return Ok(summary);
        }

        if let ThrottleDecision::Denied { retry_after } = self.throttle.check(client_key) {
            ServiceStats::bump(&self.stats.throttled);
            return Err(DigestError::Throttled { retry_after });
        }

        if let Some(err) = self.negative.check(&key) {
            ServiceStats::bump(&self.stats.negative_hits);
            return Err(err);
        }

        ServiceStats::bump(&self.stats.upstream_calls);
        let (result, trace) = self
            .executor
            .execute_traced(&request.normalized(), cancel)
            .await;
        self.stats
            .upstream_attempts
            .fetch_add(u64::from(trace.attempts()), Ordering::Relaxed);
        self.stats
            .upstream_timeouts
            .fetch_add(u64::from(trace.timeouts()), Ordering::Relaxed);

        match result {
            Ok(summary) => {
                if let Some(usage) = summary.usage {
                    self.stats
                        .input_tokens
                        .fetch_add(u64::from(usage.prompt_tokens), Ordering::Relaxed);
                    self.stats
                        .output_tokens
                        .fetch_add(u64::from(usage.completion_tokens), Ordering::Relaxed);
                }
                let summary = Arc::new(summary);
                self.cache.put(key.clone(), summary.clone());
                info!(
                    key = %key.short(),
                    client = %client_key,
                    attempts = trace.attempts(),
                    "Summary generated"
                );
                Ok(summary)
            }
            Err(DigestError::Cancelled) => {
                debug!(key = %key.short(), "Summary request cancelled");
                Err(DigestError::Cancelled)
            }
            Err(err) => {
                ServiceStats::bump(&self.stats.upstream_failures);
                if !self.negative.record(key.clone(), &err) {
                    warn!(key = %key.short(), error = %err, "Summary failed");
                }
                Err(err)
            }
        }
    }

    pub fn report(&self) -> ServiceReport {
        ServiceReport {
            cache: self.cache.stats(),
            negative_entries: self.negative.len(),
            throttled_clients: self.throttle.tracked_clients(),
            counters: self.stats.snapshot(),
        }
    }

    pub fn stats(&self) -> &ServiceStats {
        &self.stats
    }

    /// Drop every cached success and failure.
    pub fn clear_caches(&self) {
        self.cache.clear();
        self.negative.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::FailureKind;
    use crate::testing::{ScriptedSummarizer, Step};
    use std::time::Duration;

    fn config() -> Config {
        let mut cfg = Config::default();
        cfg.cache.service_ttl_secs = 1800;
        cfg.cache.negative_ttl_secs = 600;
        cfg.throttle.min_interval_ms = 5000;
        cfg.upstream.max_retries = 2;
        cfg.upstream.timeout_secs = 5;
        cfg
    }

    fn service(
        cfg: &Config,
        steps: impl IntoIterator<Item = Step>,
    ) -> (SummaryService, Arc<ScriptedSummarizer>, ManualClock) {
        let fake = Arc::new(ScriptedSummarizer::new(steps));
        let clock = ManualClock::new();
        let svc = SummaryService::with_clock(cfg, fake.clone(), Arc::new(clock.clone()));
        (svc, fake, clock)
    }

    fn request() -> SummaryRequest {
        SummaryRequest::new(["https://a/rss"]).with_category("tech")
    }

    #[tokio::test]
    async fn test_success_populates_service_cache() {
        let (svc, fake, _clock) = service(&config(), [Step::Ok("digest")]);
        let cancel = CancellationToken::new();
        let first = svc.get_summary("1.1.1.1", &request(), &cancel).await.unwrap();
        assert_eq!(first.text, "digest");
        // Different client, same request: served from cache without throttling.
        let second = svc.get_summary("2.2.2.2", &request(), &cancel).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(fake.calls(), 1);
        assert_eq!(svc.report().cache.hits, 1);
    }

    #[tokio::test]
    async fn test_cache_hit_bypasses_throttle() {
        let (svc, fake, _clock) = service(&config(), [Step::Ok("digest")]);
        let cancel = CancellationToken::new();
        svc.get_summary("c", &request(), &cancel).await.unwrap();
        assert!(svc.get_summary("c", &request(), &cancel).await.is_ok());
        assert_eq!(fake.calls(), 1);
    }

    #[tokio::test]
    async fn test_throttle_rejects_second_miss() {
        let (svc, fake, clock) = service(&config(), [Step::Ok("digest")]);
        let cancel = CancellationToken::new();
        svc.get_summary("c", &request(), &cancel).await.unwrap();
        clock.advance(Duration::from_millis(3000));
        let other = SummaryRequest::new(["https://b/rss"]);
        let err = svc.get_summary("c", &other, &cancel).await.unwrap_err();
        assert!(
            matches!(err, DigestError::Throttled { retry_after } if retry_after == Duration::from_millis(2000))
        );
        assert!(err.negative_cacheable().is_none());
        clock.advance(Duration::from_millis(2001));
        assert!(svc.get_summary("c", &other, &cancel).await.is_ok());
        assert_eq!(fake.calls(), 2);
        assert_eq!(svc.report().counters.throttled, 1);
    }

    #[tokio::test]
    async fn test_permanent_failure_short_circuits() {
        let mut cfg = config();
        cfg.throttle.min_interval_ms = 0;
        let (svc, fake, clock) = service(
            &cfg,
            [Step::Permanent(FailureKind::QuotaExhausted), Step::Ok("never")],
        );
        let cancel = CancellationToken::new();
        let first = svc.get_summary("c", &request(), &cancel).await.unwrap_err();
        clock.advance(Duration::from_secs(60));
        let second = svc.get_summary("c", &request(), &cancel).await.unwrap_err();

        assert_eq!(fake.calls(), 1, "upstream must not be called again");
        assert_eq!(first.negative_cacheable(), second.negative_cacheable());
        assert_eq!(second.retry_after(), Some(Duration::from_secs(540)));
        assert_eq!(svc.report().counters.negative_hits, 1);
    }

    #[tokio::test]
    async fn test_negative_cache_expires() {
        let mut cfg = config();
        cfg.throttle.min_interval_ms = 0;
        let (svc, fake, clock) = service(
            &cfg,
            [Step::Permanent(FailureKind::InvalidRequest), Step::Ok("recovered")],
        );
        let cancel = CancellationToken::new();
        assert!(svc.get_summary("c", &request(), &cancel).await.is_err());
        clock.advance(Duration::from_secs(600));
        let ok = svc.get_summary("c", &request(), &cancel).await.unwrap();
        assert_eq!(ok.text, "recovered");
        assert_eq!(fake.calls(), 2);
    }

    #[tokio::test]
    async fn test_transient_failure_never_negatively_cached() {
        let mut cfg = config();
        cfg.throttle.min_interval_ms = 0;
        cfg.upstream.max_retries = 1;
        let (svc, fake, _clock) = service(
            &cfg,
            [Step::Transient, Step::Transient, Step::Ok("second try")],
        );
        let cancel = CancellationToken::new();
        let err = svc.get_summary("c", &request(), &cancel).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(svc.report().negative_entries, 0);
        // The next request goes upstream again.
        let ok = svc.get_summary("c", &request(), &cancel).await.unwrap();
        assert_eq!(ok.text, "second try");
        assert_eq!(fake.calls(), 3);
    }

    #[tokio::test]
    async fn test_success_after_retries_is_cached() {
        let (svc, fake, _clock) = service(
            &config(),
            [Step::Transient, Step::Transient, Step::Ok("eventually")],
        );
        let cancel = CancellationToken::new();
        let ok = svc.get_summary("c", &request(), &cancel).await.unwrap();
        assert_eq!(ok.text, "eventually");
        let report = svc.report();
        assert_eq!(report.negative_entries, 0);
        assert_eq!(report.cache.total_entries, 1);
        assert_eq!(report.counters.upstream_attempts, 3);
        // Cached success is served without another call.
        svc.get_summary("d", &request(), &cancel).await.unwrap();
        assert_eq!(fake.calls(), 3);
    }

    #[tokio::test]
    async fn test_cancelled_request_leaves_caches_clean() {
        let (svc, _fake, _clock) = service(&config(), [Step::Hang]);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let err = svc.get_summary("c", &request(), &cancel).await.unwrap_err();
        assert!(matches!(err, DigestError::Cancelled));
        let report = svc.report();
        assert_eq!(report.cache.total_entries, 0);
        assert_eq!(report.negative_entries, 0);
    }

    #[tokio::test]
    async fn test_equivalent_requests_share_cache() {
        let (svc, fake, _clock) = service(&config(), [Step::Ok("digest")]);
        let cancel = CancellationToken::new();
        let a = SummaryRequest::new(["https://b/rss", "https://a/rss"]).with_category("Tech");
        let b = SummaryRequest::new(["https://a/rss", "https://b/rss"]).with_category("tech");
        svc.get_summary("x", &a, &cancel).await.unwrap();
        svc.get_summary("y", &b, &cancel).await.unwrap();
        assert_eq!(fake.calls(), 1);
    }

    #[tokio::test]
    async fn test_clear_caches() {
        let (svc, fake, clock) = service(&config(), [Step::Ok("digest")]);
        let cancel = CancellationToken::new();
        svc.get_summary("c", &request(), &cancel).await.unwrap();
        svc.clear_caches();
        clock.advance(Duration::from_secs(5));
        svc.get_summary("c", &request(), &cancel).await.unwrap();
        assert_eq!(fake.calls(), 2);
    }
}
