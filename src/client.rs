//! Caller-side summary client.
//!
//! [`SummaryClient`] owns the client-tier response cache and consults it
//! before reaching the service through a [`SummaryTransport`]. A local hit
//! never touches the service, so it never counts against the throttle.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cache::{CacheStats, CacheTier, Fingerprint, ResponseCache};
use crate::clock::{self, Clock};
use crate::config::CacheConfig;
use crate::error::{DigestError, ErrorBody, Result};
use crate::providers::{classify_reqwest, Summary, SummaryRequest};
use crate::service::SummaryService;

/// How a client reaches the summary service.
#[async_trait]
pub trait SummaryTransport: Send + Sync {
    async fn fetch(&self, request: &SummaryRequest, cancel: &CancellationToken)
        -> Result<Summary>;
}

/// Talks to a running `newsdigest serve` over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    endpoint: String,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DigestError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: format!("{}/api/summary", base_url.trim_end_matches('/')),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn post(&self, request: &SummaryRequest) -> Result<Summary> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| classify_reqwest("summary service request failed", &e))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| classify_reqwest("reading summary response failed", &e))?;

        if status.is_success() {
            return Ok(serde_json::from_slice(&bytes)?);
        }
        match serde_json::from_slice::<ErrorBody>(&bytes) {
            Ok(body) => Err(DigestError::from_body(body)),
            Err(_) => Err(DigestError::Transient(format!(
                "summary service returned HTTP {}",
                status.as_u16()
            ))),
        }
    }
}

#[async_trait]
impl SummaryTransport for HttpTransport {
    async fn fetch(
        &self,
        request: &SummaryRequest,
        cancel: &CancellationToken,
    ) -> Result<Summary> {
        tokio::select! {
            _ = cancel.cancelled() => Err(DigestError::Cancelled),
            result = self.post(request) => result,
        }
    }
}

/// Calls an in-process [`SummaryService`] under a fixed client key.
#[derive(Debug, Clone)]
pub struct LocalTransport {
    service: Arc<SummaryService>,
    client_key: String,
}

impl LocalTransport {
    pub fn new(service: Arc<SummaryService>, client_key: impl Into<String>) -> Self {
        Self {
            service,
            client_key: client_key.into(),
        }
    }
}

#[async_trait]
impl SummaryTransport for LocalTransport {
    async fn fetch(
        &self,
        request: &SummaryRequest,
        cancel: &CancellationToken,
    ) -> Result<Summary> {
        let summary = self
            .service
            .get_summary(&self.client_key, request, cancel)
            .await?;
        Ok(Summary::clone(&summary))
    }
}

/// Client with its own short-lived response cache.
pub struct SummaryClient<T> {
    cache: ResponseCache,
    transport: T,
}

impl<T: SummaryTransport> SummaryClient<T> {
    pub fn new(transport: T, config: &CacheConfig) -> Self {
        Self::with_clock(transport, config, clock::system())
    }

    pub fn with_clock(transport: T, config: &CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            cache: ResponseCache::with_clock(
                CacheTier::Client,
                config.client_ttl(),
                config.client_max_entries,
                clock,
            ),
            transport,
        }
    }

    /// Return a summary from the local cache or the service.
    ///
    /// Only successes are cached locally; errors pass through unchanged.
    pub async fn get_summary(
        &self,
        request: &SummaryRequest,
        cancel: &CancellationToken,
    ) -> Result<Arc<Summary>> {
        let key = Fingerprint::of(request)?;
        if let Some(summary) = self.cache.get(&key) {
            debug!(key = %key.short(), "Client cache hit");
            return Ok(summary);
        }

        let summary = Arc::new(self.transport.fetch(request, cancel).await?);
        self.cache.put(key, summary.clone());
        Ok(summary)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::Config;
    use crate::error::FailureKind;
    use crate::testing::{ScriptedSummarizer, Step};
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Transport that counts calls and answers from a fixed result.
    struct CountingTransport {
        calls: AtomicU32,
        fail: Option<FailureKind>,
    }

    impl CountingTransport {
        fn ok() -> Self {
            Self {
                calls: AtomicU32::new(0),
                fail: None,
            }
        }
    }

    #[async_trait]
    impl SummaryTransport for CountingTransport {
        async fn fetch(
            &self,
            _request: &SummaryRequest,
            _cancel: &CancellationToken,
        ) -> Result<Summary> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            match self.fail {
                Some(kind) => Err(DigestError::permanent(kind, "nope")),
                None => Ok(Summary::new(format!("digest #{n}"), "test-model")),
            }
        }
    }

    fn cache_config() -> CacheConfig {
        CacheConfig {
            client_ttl_secs: 300,
            ..CacheConfig::default()
        }
    }

    #[tokio::test]
    async fn test_client_cache_hit_skips_transport() {
        let clock = ManualClock::new();
        let client =
            SummaryClient::with_clock(CountingTransport::ok(), &cache_config(), Arc::new(clock.clone()));
        let req = SummaryRequest::new(["https://a/rss"]);
        let cancel = CancellationToken::new();

        let first = client.get_summary(&req, &cancel).await.unwrap();
        clock.advance(Duration::from_secs(299));
        let second = client.get_summary(&req, &cancel).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(client.transport().calls.load(Ordering::SeqCst), 1);

        clock.advance(Duration::from_secs(1));
        let third = client.get_summary(&req, &cancel).await.unwrap();
        assert_eq!(third.text, "digest #2");
    }

    #[tokio::test]
    async fn test_client_does_not_cache_errors() {
        let transport = CountingTransport {
            calls: AtomicU32::new(0),
            fail: Some(FailureKind::Unauthorized),
        };
        let client = SummaryClient::new(transport, &cache_config());
        let req = SummaryRequest::new(["https://a/rss"]);
        let cancel = CancellationToken::new();
        assert!(client.get_summary(&req, &cancel).await.is_err());
        assert!(client.get_summary(&req, &cancel).await.is_err());
        assert_eq!(client.transport().calls.load(Ordering::SeqCst), 2);
        assert_eq!(client.cache_stats().total_entries, 0);
    }

    #[tokio::test]
    async fn test_zero_client_ttl_always_forwards() {
        let config = CacheConfig {
            client_ttl_secs: 0,
            ..CacheConfig::default()
        };
        let client = SummaryClient::new(CountingTransport::ok(), &config);
        let req = SummaryRequest::new(["https://a/rss"]);
        let cancel = CancellationToken::new();
        client.get_summary(&req, &cancel).await.unwrap();
        client.get_summary(&req, &cancel).await.unwrap();
        assert_eq!(client.transport().calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_local_transport_end_to_end() {
        let mut config = Config::default();
        config.throttle.min_interval_ms = 5000;
        let fake = Arc::new(ScriptedSummarizer::new([Step::Ok("local digest")]));
        let service = Arc::new(SummaryService::new(&config, fake.clone()));
        let client = SummaryClient::new(LocalTransport::new(service.clone(), "cli"), &config.cache);
        let cancel = CancellationToken::new();
        let req = SummaryRequest::new(["https://a/rss"]);

        let summary = client.get_summary(&req, &cancel).await.unwrap();
        assert_eq!(summary.text, "local digest");
        // Served by the client tier; the throttle never sees this request.
        client.get_summary(&req, &cancel).await.unwrap();
        assert_eq!(fake.calls(), 1);
        assert_eq!(service.report().counters.requests, 1);

        // A different request from the same key is throttled by the service.
        let other = SummaryRequest::new(["https://b/rss"]);
        let err = client.get_summary(&other, &cancel).await.unwrap_err();
        assert!(matches!(err, DigestError::Throttled { .. }));
    }

    #[test]
    fn test_http_endpoint_trims_slash() {
        let t = HttpTransport::new("http://localhost:8787/", Duration::from_secs(5)).unwrap();
        assert_eq!(t.endpoint(), "http://localhost:8787/api/summary");
    }
}
