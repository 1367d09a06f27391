//! Test doubles shared by unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{DigestError, FailureKind, Result};
use crate::providers::{Summarizer, Summary, SummaryRequest};

/// One scripted upstream behaviour.
#[derive(Debug, Clone)]
pub enum Step {
    Ok(&'static str),
    Transient,
    Permanent(FailureKind),
    /// Never completes on its own.
    Hang,
}

/// Summarizer that replays a fixed script, repeating its last step.
pub struct ScriptedSummarizer {
    script: Mutex<VecDeque<Step>>,
    calls: AtomicU32,
    tokens: Mutex<Vec<CancellationToken>>,
}

impl ScriptedSummarizer {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            script: Mutex::new(steps.into_iter().collect()),
            calls: AtomicU32::new(0),
            tokens: Mutex::new(Vec::new()),
        }
    }

    /// Summarizer that always succeeds with `text`.
    pub fn always(text: &'static str) -> Self {
        Self::new([Step::Ok(text)])
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Cancellation tokens handed to each call, in order.
    pub fn tokens(&self) -> Vec<CancellationToken> {
        self.tokens.lock().unwrap().clone()
    }
}

#[async_trait]
impl Summarizer for ScriptedSummarizer {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn summarize(
        &self,
        _request: &SummaryRequest,
        cancel: CancellationToken,
    ) -> Result<Summary> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.tokens.lock().unwrap().push(cancel);
        let step = {
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                script.pop_front()
            } else {
                script.front().cloned()
            }
        };
        match step.unwrap_or(Step::Ok("ok")) {
            Step::Ok(text) => Ok(Summary::new(text, "scripted-model")),
            Step::Transient => Err(DigestError::Transient("connection reset".into())),
            Step::Permanent(kind) => Err(DigestError::permanent(kind, format!("{kind} failure"))),
            Step::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(DigestError::Transient("hung call finished".into()))
            }
        }
    }
}
