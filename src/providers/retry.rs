//! Retrying request executor.
//!
//! Each call walks an explicit state machine:
//!
//! ```text
//! NotStarted -> InFlight -> Succeeded
//!                        -> FailedTransient -> (retry) InFlight ...
//!                        -> FailedPermanent
//! ```
//!
//! An attempt that outlives the per-attempt timeout is dropped and its
//! cancellation token fired, then counted as `FailedTransient`. Permanent
//! failures end the call at once. The executor never touches the caches;
//! the caller decides what to memoize from the returned error.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Summarizer, Summary, SummaryRequest};
use crate::config::UpstreamConfig;
use crate::error::{DigestError, Result};

/// Timeout and retry budget for one upstream call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Limit for each individual attempt.
    pub timeout: Duration,
    /// Extra attempts after the first one.
    pub max_retries: u32,
    /// Delay before the first retry; doubles per retry. Zero retries at once.
    pub backoff: Duration,
    /// Upper bound for the backoff delay.
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(timeout: Duration, max_retries: u32) -> Self {
        Self {
            timeout,
            max_retries,
            backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    pub fn from_config(config: &UpstreamConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_secs),
            max_retries: config.max_retries,
            backoff: Duration::from_millis(config.retry_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn backoff_for(&self, retry: u32) -> Duration {
        if self.backoff.is_zero() || retry == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32 << (retry - 1).min(16);
        self.backoff.saturating_mul(factor).min(self.max_backoff.max(self.backoff))
    }
}

/// States of one executor call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    NotStarted,
    /// Attempt number, starting at 1.
    InFlight(u32),
    Succeeded,
    FailedTransient,
    FailedPermanent,
    /// The caller cancelled before a terminal state was reached.
    Cancelled,
}

/// Recorded state transitions for one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionTrace {
    states: Vec<CallState>,
    timeouts: u32,
}

impl ExecutionTrace {
    fn new() -> Self {
        Self {
            states: vec![CallState::NotStarted],
            timeouts: 0,
        }
    }

    fn push(&mut self, state: CallState) {
        self.states.push(state);
    }

    pub fn states(&self) -> &[CallState] {
        &self.states
    }

    /// Number of upstream attempts started.
    pub fn attempts(&self) -> u32 {
        self.states
            .iter()
            .filter(|s| matches!(s, CallState::InFlight(_)))
            .count() as u32
    }

    /// Number of attempts abandoned because they hit the timeout.
    pub fn timeouts(&self) -> u32 {
        self.timeouts
    }

    pub fn final_state(&self) -> CallState {
        self.states.last().copied().unwrap_or(CallState::NotStarted)
    }
}

/// Executes upstream calls under a [`RetryPolicy`].
pub struct RetryingExecutor {
    upstream: Arc<dyn Summarizer>,
    policy: RetryPolicy,
}

impl std::fmt::Debug for RetryingExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryingExecutor")
            .field("upstream", &self.upstream.name())
            .field("policy", &self.policy)
            .finish()
    }
}

impl RetryingExecutor {
    pub fn new(upstream: Arc<dyn Summarizer>, policy: RetryPolicy) -> Self {
        Self { upstream, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn execute(
        &self,
        request: &SummaryRequest,
        cancel: &CancellationToken,
    ) -> Result<Summary> {
        self.execute_traced(request, cancel).await.0
    }

    /// Run the call and return its result with the state transitions taken.
    pub async fn execute_traced(
        &self,
        request: &SummaryRequest,
        cancel: &CancellationToken,
    ) -> (Result<Summary>, ExecutionTrace) {
        let mut trace = ExecutionTrace::new();
        let mut last_error = DigestError::Transient("no attempt made".to_string());

        for retry in 0..=self.policy.max_retries {
            if retry > 0 {
                let delay = self.policy.backoff_for(retry);
                if !delay.is_zero() {
                    debug!(retry, delay_ms = delay.as_millis() as u64, "Backing off");
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            trace.push(CallState::Cancelled);
                            return (Err(DigestError::Cancelled), trace);
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
            if cancel.is_cancelled() {
                trace.push(CallState::Cancelled);
                return (Err(DigestError::Cancelled), trace);
            }

            let attempt = retry + 1;
            trace.push(CallState::InFlight(attempt));
            let attempt_token = cancel.child_token();
            let call = self.upstream.summarize(request, attempt_token.clone());

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    attempt_token.cancel();
                    trace.push(CallState::Cancelled);
                    return (Err(DigestError::Cancelled), trace);
                }
                outcome = tokio::time::timeout(self.policy.timeout, call) => outcome,
            };

            match outcome {
                Ok(Ok(summary)) => {
                    trace.push(CallState::Succeeded);
                    if attempt > 1 {
                        info!(
                            provider = %self.upstream.name(),
                            attempt,
                            "Upstream call succeeded after retry"
                        );
                    }
                    return (Ok(summary), trace);
                }
                Ok(Err(DigestError::Cancelled)) => {
                    trace.push(CallState::Cancelled);
                    return (Err(DigestError::Cancelled), trace);
                }
                Ok(Err(err)) if err.is_transient() => {
                    warn!(
                        provider = %self.upstream.name(),
                        attempt,
                        error = %err,
                        "Transient upstream failure"
                    );
                    trace.push(CallState::FailedTransient);
                    last_error = err;
                }
                Ok(Err(err)) => {
                    warn!(
                        provider = %self.upstream.name(),
                        attempt,
                        error = %err,
                        "Permanent upstream failure"
                    );
                    trace.push(CallState::FailedPermanent);
                    return (Err(err), trace);
                }
                Err(_elapsed) => {
                    // Dropping the future abandons the attempt; the token
                    // stops anything it spawned.
                    attempt_token.cancel();
                    trace.timeouts += 1;
                    warn!(
                        provider = %self.upstream.name(),
                        attempt,
                        timeout_ms = self.policy.timeout.as_millis() as u64,
                        "Upstream attempt timed out"
                    );
                    trace.push(CallState::FailedTransient);
                    last_error = DigestError::Transient(format!(
                        "upstream timed out after {}ms",
                        self.policy.timeout.as_millis()
                    ));
                }
            }
        }

        (Err(last_error), trace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use crate::testing::{ScriptedSummarizer, Step};

    fn request() -> SummaryRequest {
        SummaryRequest::new(["https://a/rss"])
    }

    fn executor(fake: &Arc<ScriptedSummarizer>, timeout_ms: u64, retries: u32) -> RetryingExecutor {
        RetryingExecutor::new(
            fake.clone(),
            RetryPolicy::new(Duration::from_millis(timeout_ms), retries),
        )
    }

    #[tokio::test]
    async fn test_success_first_attempt() {
        let fake = Arc::new(ScriptedSummarizer::new([Step::Ok("digest")]));
        let (result, trace) = executor(&fake, 1000, 2)
            .execute_traced(&request(), &CancellationToken::new())
            .await;
        assert_eq!(result.unwrap().text, "digest");
        assert_eq!(
            trace.states(),
            &[CallState::NotStarted, CallState::InFlight(1), CallState::Succeeded]
        );
        assert_eq!(fake.calls(), 1);
    }

    #[tokio::test]
    async fn test_transient_then_success() {
        let fake = Arc::new(ScriptedSummarizer::new([
            Step::Transient,
            Step::Transient,
            Step::Ok("late"),
        ]));
        let (result, trace) = executor(&fake, 1000, 2)
            .execute_traced(&request(), &CancellationToken::new())
            .await;
        assert_eq!(result.unwrap().text, "late");
        assert_eq!(trace.attempts(), 3);
        assert_eq!(trace.final_state(), CallState::Succeeded);
        assert_eq!(fake.calls(), 3);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let fake = Arc::new(ScriptedSummarizer::new([
            Step::Transient,
            Step::Transient,
            Step::Transient,
            Step::Ok("never"),
        ]));
        let (result, trace) = executor(&fake, 1000, 2)
            .execute_traced(&request(), &CancellationToken::new())
            .await;
        assert!(result.unwrap_err().is_transient());
        assert_eq!(trace.attempts(), 3);
        assert_eq!(trace.final_state(), CallState::FailedTransient);
        assert_eq!(fake.calls(), 3);
    }

    #[tokio::test]
    async fn test_permanent_not_retried() {
        let fake = Arc::new(ScriptedSummarizer::new([
            Step::Permanent(FailureKind::Unauthorized),
            Step::Ok("never"),
        ]));
        let (result, trace) = executor(&fake, 1000, 3)
            .execute_traced(&request(), &CancellationToken::new())
            .await;
        let err = result.unwrap_err();
        assert_eq!(
            err.negative_cacheable().map(|f| f.kind),
            Some(FailureKind::Unauthorized)
        );
        assert_eq!(trace.final_state(), CallState::FailedPermanent);
        assert_eq!(fake.calls(), 1);
    }

    #[tokio::test]
    async fn test_timeout_abandons_attempt_and_retries() {
        let fake = Arc::new(ScriptedSummarizer::new([Step::Hang, Step::Ok("second")]));
        let (result, trace) = executor(&fake, 50, 1)
            .execute_traced(&request(), &CancellationToken::new())
            .await;
        assert_eq!(result.unwrap().text, "second");
        assert_eq!(trace.timeouts(), 1);
        assert_eq!(
            trace.states(),
            &[
                CallState::NotStarted,
                CallState::InFlight(1),
                CallState::FailedTransient,
                CallState::InFlight(2),
                CallState::Succeeded,
            ]
        );
        let tokens = fake.tokens();
        assert!(tokens[0].is_cancelled(), "timed-out attempt must be cancelled");
        assert!(!tokens[1].is_cancelled());
    }

    #[tokio::test]
    async fn test_timeout_exhausts_to_transient() {
        let fake = Arc::new(ScriptedSummarizer::new([Step::Hang, Step::Hang]));
        let err = executor(&fake, 20, 1)
            .execute(&request(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_outer_cancel_aborts() {
        let fake = Arc::new(ScriptedSummarizer::new([Step::Hang]));
        let exec = executor(&fake, 10_000, 3);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let (result, trace) = exec.execute_traced(&request(), &cancel).await;
        assert!(matches!(result, Err(DigestError::Cancelled)));
        assert_eq!(trace.final_state(), CallState::Cancelled);
        assert!(fake.tokens()[0].is_cancelled());
        assert_eq!(fake.calls(), 1);
    }

    #[tokio::test]
    async fn test_already_cancelled_makes_no_call() {
        let fake = Arc::new(ScriptedSummarizer::new([Step::Ok("x")]));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = executor(&fake, 1000, 0).execute(&request(), &cancel).await;
        assert!(matches!(result, Err(DigestError::Cancelled)));
        assert_eq!(fake.calls(), 0);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            timeout: Duration::from_secs(1),
            max_retries: 5,
            backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
        };
        assert_eq!(policy.backoff_for(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(350));
        assert_eq!(policy.backoff_for(10), Duration::from_millis(350));
    }

    #[test]
    fn test_zero_backoff_is_immediate() {
        let policy = RetryPolicy::new(Duration::from_secs(1), 3);
        assert_eq!(policy.backoff_for(1), Duration::ZERO);
        assert_eq!(policy.backoff_for(3), Duration::ZERO);
    }
}
