//! Gemini-backed summarizer.
//!
//! Fetches the requested feeds, builds a digest prompt from their headlines
//! and asks Gemini `generateContent` to condense them.
//!
//! Auth priority: config key → GEMINI_API_KEY → GOOGLE_API_KEY → GEMINI_ACCESS_TOKEN (bearer).
//!
//! Thinking models return parts tagged `thought: true`; those are dropped and
//! only the final text is kept.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{classify_reqwest, classify_status, SourceItem, Summarizer, Summary, SummaryRequest, Usage};
use crate::config::UpstreamConfig;
use crate::error::{DigestError, FailureKind, Result};
use crate::feeds::{FeedFetcher, FeedItem};

/// Gemini v1beta REST API base.
const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Hard cap on headlines sent in one prompt.
const MAX_PROMPT_ITEMS: usize = 60;

// ── Auth ─────────────────────────────────────────────────────────────────────

/// Authentication method for the Gemini REST API.
pub enum GeminiAuth {
    /// Standard API key, sent as `?key=` query parameter.
    ApiKey(String),
    /// OAuth bearer token, sent as `Authorization: Bearer` header.
    BearerToken(String),
}

impl std::fmt::Debug for GeminiAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ApiKey(_) => f.write_str("GeminiAuth::ApiKey([REDACTED])"),
            Self::BearerToken(_) => f.write_str("GeminiAuth::BearerToken([REDACTED])"),
        }
    }
}

impl GeminiAuth {
    /// Resolve credentials in priority order: explicit key, env key, bearer token.
    pub fn resolve(
        explicit_key: Option<&str>,
        env_key: Option<&str>,
        access_token: Option<&str>,
    ) -> Option<Self> {
        if let Some(k) = explicit_key.filter(|k| !k.is_empty()) {
            return Some(Self::ApiKey(k.to_string()));
        }
        if let Some(k) = env_key.filter(|k| !k.is_empty()) {
            return Some(Self::ApiKey(k.to_string()));
        }
        access_token
            .filter(|t| !t.is_empty())
            .map(|t| Self::BearerToken(t.to_string()))
    }

    fn from_env(explicit_key: Option<&str>) -> Option<Self> {
        let env_key = std::env::var("GEMINI_API_KEY")
            .or_else(|_| std::env::var("GOOGLE_API_KEY"))
            .ok();
        let token = std::env::var("GEMINI_ACCESS_TOKEN").ok();
        Self::resolve(explicit_key, env_key.as_deref(), token.as_deref())
    }
}

// ── Summarizer ───────────────────────────────────────────────────────────────

/// Summarizer that speaks the Gemini REST API directly.
pub struct GeminiSummarizer {
    auth: GeminiAuth,
    model: String,
    client: Client,
    feeds: FeedFetcher,
    max_items_per_feed: u32,
}

impl std::fmt::Debug for GeminiSummarizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiSummarizer")
            .field("auth", &self.auth)
            .field("model", &self.model)
            .finish()
    }
}

impl GeminiSummarizer {
    /// Build from config, resolving credentials from the environment when the
    /// config has none.
    pub fn from_config(config: &UpstreamConfig) -> Result<Self> {
        let auth = GeminiAuth::from_env(config.api_key.as_deref()).ok_or_else(|| {
            DigestError::Config(
                "no Gemini credentials: set upstream.api_key or GEMINI_API_KEY".to_string(),
            )
        })?;
        Self::new(auth, config)
    }

    pub fn new(auth: GeminiAuth, config: &UpstreamConfig) -> Result<Self> {
        // The executor owns the per-attempt timeout; this one only stops
        // leaked connections.
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.saturating_mul(2)))
            .build()
            .map_err(|e| DigestError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            auth,
            model: config.model.clone(),
            client,
            feeds: FeedFetcher::new(Duration::from_secs(config.feed_timeout_secs))?,
            max_items_per_feed: config.max_items_per_feed,
        })
    }

    /// Build the digest prompt from fetched items.
    pub fn build_prompt(request: &SummaryRequest, items: &[FeedItem]) -> String {
        let mut prompt = String::from(
            "Summarize the following news headlines into a short digest. \
             Group related stories and keep each point to one or two sentences.\n",
        );
        if let Some(category) = &request.category {
            prompt.push_str(&format!("Focus on the category: {category}.\n"));
        }
        prompt.push_str(&format!("Write the digest in language: {}.\n", request.locale));
        if let Some(style) = &request.style {
            prompt.push_str(&format!("Style: {style}.\n"));
        }
        for (key, value) in &request.options {
            prompt.push_str(&format!("Option {key}: {value}\n"));
        }
        prompt.push_str("\nHeadlines:\n");
        for (i, item) in items.iter().take(MAX_PROMPT_ITEMS).enumerate() {
            prompt.push_str(&format!("{}. {}", i + 1, item.title));
            if let Some(desc) = &item.description {
                prompt.push_str(&format!(" - {desc}"));
            }
            prompt.push('\n');
        }
        prompt
    }

    /// Build a `generateContent` request body.
    pub fn build_request_body(prompt: &str) -> Value {
        json!({
            "contents": [{
                "role": "user",
                "parts": [{ "text": prompt }]
            }],
            "systemInstruction": {
                "parts": [{ "text": "You are a concise, neutral news editor." }]
            },
            "generationConfig": {
                "temperature": 0.3,
                "maxOutputTokens": 1024
            }
        })
    }

    /// Extract final answer text from a Gemini API response, skipping
    /// `"thought": true` parts. Falls back to thought text if nothing else
    /// is present.
    pub fn extract_text(response: &Value) -> Option<String> {
        let parts = response["candidates"][0]["content"]["parts"].as_array()?;

        let final_parts: Vec<&str> = parts
            .iter()
            .filter(|p| !p["thought"].as_bool().unwrap_or(false))
            .filter_map(|p| p["text"].as_str())
            .collect();
        if !final_parts.is_empty() {
            return Some(final_parts.join(""));
        }

        let thought_parts: Vec<&str> = parts.iter().filter_map(|p| p["text"].as_str()).collect();
        if !thought_parts.is_empty() {
            Some(thought_parts.join(""))
        } else {
            None
        }
    }

    fn extract_usage(response: &Value) -> Option<Usage> {
        let meta = response.get("usageMetadata")?;
        let prompt = meta["promptTokenCount"].as_u64()? as u32;
        let completion = meta["candidatesTokenCount"].as_u64()? as u32;
        Some(Usage::new(prompt, completion))
    }

    /// Map a Gemini error body to a user-safe classified error.
    fn classify_error(status: u16, body: &str) -> DigestError {
        let api_status = serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|v| v["error"]["status"].as_str().map(str::to_string));
        let message = match status {
            400 => "The summary request was rejected as invalid.",
            401 | 403 => "The summary service is not authorized to call the language model.",
            429 => "The language model quota is exhausted. Please try again later.",
            _ => "The language model rejected the request.",
        };
        debug!(status, api_status = ?api_status, "Gemini error response");
        classify_status(status, message)
    }

    fn api_url(&self) -> String {
        format!("{}/models/{}:generateContent", GEMINI_API_BASE, self.model)
    }

    fn apply_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth {
            GeminiAuth::ApiKey(key) => request.query(&[("key", key.as_str())]),
            GeminiAuth::BearerToken(token) => {
                request.header("Authorization", format!("Bearer {}", token))
            }
        }
    }

    async fn generate(&self, prompt: &str) -> Result<(String, Option<Usage>)> {
        let request = self
            .client
            .post(self.api_url())
            .header("Content-Type", "application/json")
            .json(&Self::build_request_body(prompt));
        let response = self
            .apply_auth(request)
            .send()
            .await
            .map_err(|e| classify_reqwest("Gemini request failed", &e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_error(status.as_u16(), &body));
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| classify_reqwest("failed to read Gemini response", &e))?;
        let text = Self::extract_text(&json).filter(|t| !t.trim().is_empty()).ok_or_else(|| {
            DigestError::permanent(
                FailureKind::Rejected,
                "The language model returned an empty digest.",
            )
        })?;
        Ok((text, Self::extract_usage(&json)))
    }
}

#[async_trait]
impl Summarizer for GeminiSummarizer {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn summarize(
        &self,
        request: &SummaryRequest,
        cancel: CancellationToken,
    ) -> Result<Summary> {
        if request.feeds.is_empty() {
            return Err(DigestError::permanent(
                FailureKind::InvalidRequest,
                "At least one feed is required.",
            ));
        }
        let limit = request.max_items.unwrap_or(self.max_items_per_feed).max(1) as usize;
        let items = self.feeds.fetch_all(&request.feeds, limit, &cancel).await?;
        if items.is_empty() {
            return Err(DigestError::permanent(
                FailureKind::InvalidRequest,
                "The selected feeds contain no items.",
            ));
        }

        let prompt = Self::build_prompt(request, &items);
        debug!(model = %self.model, items = items.len(), "Gemini digest request");

        let (text, usage) = tokio::select! {
            _ = cancel.cancelled() => return Err(DigestError::Cancelled),
            generated = self.generate(&prompt) => generated?,
        };

        let sources = items
            .into_iter()
            .map(|i| SourceItem {
                title: i.title,
                link: i.link,
            })
            .collect();
        let mut summary = Summary::new(text, &self.model).with_sources(sources);
        if let Some(u) = usage {
            summary = summary.with_usage(u);
        }
        Ok(summary)
    }
}
