//! Request and response types shared by the summarizer, caches and API.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default output language when the caller does not pick one.
pub const DEFAULT_LOCALE: &str = "en";

/// A digest request as sent by the UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRequest {
    /// Feed URLs to summarize.
    pub feeds: Vec<String>,
    /// Optional topic filter, e.g. `"technology"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Output language tag.
    #[serde(default = "default_locale")]
    pub locale: String,
    /// Free-form style hint, e.g. `"bullet points"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    /// Cap on items taken from each feed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_items: Option<u32>,
    /// Any other parameter that changes model output.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, Value>,
}

fn default_locale() -> String {
    DEFAULT_LOCALE.to_string()
}

impl SummaryRequest {
    pub fn new<I, S>(feeds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            feeds: feeds.into_iter().map(Into::into).collect(),
            category: None,
            locale: default_locale(),
            style: None,
            max_items: None,
            options: BTreeMap::new(),
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = locale.into();
        self
    }

    pub fn with_style(mut self, style: impl Into<String>) -> Self {
        self.style = Some(style.into());
        self
    }

    /// Canonical form: feeds trimmed, deduplicated and sorted; category and
    /// locale lowercased; blank optional fields dropped.
    pub fn normalized(&self) -> Self {
        let mut feeds: Vec<String> = self
            .feeds
            .iter()
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty())
            .collect();
        feeds.sort();
        feeds.dedup();

        let locale = self.locale.trim().to_lowercase();
        Self {
            feeds,
            category: non_blank(self.category.as_deref()).map(|c| c.to_lowercase()),
            locale: if locale.is_empty() {
                default_locale()
            } else {
                locale
            },
            style: non_blank(self.style.as_deref()).map(str::to_string),
            max_items: self.max_items,
            options: self.options.clone(),
        }
    }
}

fn non_blank(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

/// Token usage reported by the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }
}

/// A headline that went into the digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceItem {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

/// A successful digest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    /// The digest text.
    pub text: String,
    /// Model that produced it.
    pub model: String,
    /// Headlines the digest was built from.
    #[serde(default)]
    pub sources: Vec<SourceItem>,
    pub generated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl Summary {
    pub fn new(text: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            model: model.into(),
            sources: Vec::new(),
            generated_at: Utc::now(),
            usage: None,
        }
    }

    pub fn with_sources(mut self, sources: Vec<SourceItem>) -> Self {
        self.sources = sources;
        self
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }
}
