//! Process configuration.
//!
//! Loaded once at startup from `~/.newsdigest/config.toml` (or an explicit
//! path), then overridden field by field from `NEWSDIGEST_*` environment
//! variables. Every section has defaults, so an empty or missing file is a
//! valid configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{DigestError, Result};

/// Upper bound on `upstream.max_retries`.
pub const MAX_RETRIES_LIMIT: u32 = 10;

/// Environment variable prefix for overrides.
const ENV_PREFIX: &str = "NEWSDIGEST_";

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cache: CacheConfig,
    pub throttle: ThrottleConfig,
    pub upstream: UpstreamConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

/// TTLs and capacities for the three cache stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Caller-local response cache TTL.
    pub client_ttl_secs: u64,
    /// Service-side response cache TTL.
    pub service_ttl_secs: u64,
    /// Cooldown for memoized permanent failures.
    pub negative_ttl_secs: u64,
    pub client_max_entries: usize,
    pub service_max_entries: usize,
    pub negative_max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            client_ttl_secs: 300,
            service_ttl_secs: 1800,
            negative_ttl_secs: 600,
            client_max_entries: 100,
            service_max_entries: 500,
            negative_max_entries: 500,
        }
    }
}

impl CacheConfig {
    pub fn client_ttl(&self) -> Duration {
        Duration::from_secs(self.client_ttl_secs)
    }

    pub fn service_ttl(&self) -> Duration {
        Duration::from_secs(self.service_ttl_secs)
    }

    pub fn negative_ttl(&self) -> Duration {
        Duration::from_secs(self.negative_ttl_secs)
    }
}

/// Per-client request throttle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    /// Minimum time between two requests from one client. 0 disables.
    pub min_interval_ms: u64,
    /// Maximum number of client records kept.
    pub max_clients: usize,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: 5000,
            max_clients: 10_000,
        }
    }
}

impl ThrottleConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }
}

/// Upstream LLM and feed settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Per-attempt timeout for the LLM call.
    pub timeout_secs: u64,
    /// Retries after the first attempt, for transient failures only.
    pub max_retries: u32,
    /// Initial backoff between retries. 0 retries immediately.
    pub retry_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub model: String,
    /// Gemini API key. Falls back to `GEMINI_API_KEY` / `GOOGLE_API_KEY`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Default cap on items taken from each feed.
    pub max_items_per_feed: u32,
    pub feed_timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_retries: 2,
            retry_backoff_ms: 0,
            max_backoff_ms: 2000,
            model: "gemini-2.0-flash".to_string(),
            api_key: None,
            max_items_per_feed: 10,
            feed_timeout_secs: 15,
        }
    }
}

/// HTTP service settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Use the first `X-Forwarded-For` hop as the client key.
    pub trust_forwarded_for: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8787,
            trust_forwarded_for: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON log lines.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Config {
    /// Default config file location: `~/.newsdigest/config.toml`.
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".newsdigest")
            .join("config.toml")
    }

    /// Load from `path` (or the default location), apply environment
    /// overrides and validate.
    ///
    /// A missing file yields defaults; an explicit path that does not exist
    /// is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let _ = dotenvy::dotenv();
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => {
                let p = Self::default_path();
                if p.exists() {
                    Self::from_file(&p)?
                } else {
                    debug!(path = %p.display(), "No config file, using defaults");
                    Self::default()
                }
            }
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            DigestError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| DigestError::Config(format!("invalid config: {e}")))
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| DigestError::Config(e.to_string()))
    }

    /// Apply `NEWSDIGEST_<SECTION>_<FIELD>` overrides read through `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        override_parsed(&get, "CACHE_CLIENT_TTL_SECS", &mut self.cache.client_ttl_secs)?;
        override_parsed(&get, "CACHE_SERVICE_TTL_SECS", &mut self.cache.service_ttl_secs)?;
        override_parsed(&get, "CACHE_NEGATIVE_TTL_SECS", &mut self.cache.negative_ttl_secs)?;
        override_parsed(&get, "CACHE_CLIENT_MAX_ENTRIES", &mut self.cache.client_max_entries)?;
        override_parsed(&get, "CACHE_SERVICE_MAX_ENTRIES", &mut self.cache.service_max_entries)?;
        override_parsed(&get, "CACHE_NEGATIVE_MAX_ENTRIES", &mut self.cache.negative_max_entries)?;
        override_parsed(&get, "THROTTLE_MIN_INTERVAL_MS", &mut self.throttle.min_interval_ms)?;
        override_parsed(&get, "THROTTLE_MAX_CLIENTS", &mut self.throttle.max_clients)?;
        override_parsed(&get, "UPSTREAM_TIMEOUT_SECS", &mut self.upstream.timeout_secs)?;
        override_parsed(&get, "UPSTREAM_MAX_RETRIES", &mut self.upstream.max_retries)?;
        override_parsed(&get, "UPSTREAM_RETRY_BACKOFF_MS", &mut self.upstream.retry_backoff_ms)?;
        override_parsed(&get, "UPSTREAM_MAX_BACKOFF_MS", &mut self.upstream.max_backoff_ms)?;
        override_parsed(&get, "UPSTREAM_MAX_ITEMS_PER_FEED", &mut self.upstream.max_items_per_feed)?;
        override_parsed(&get, "UPSTREAM_FEED_TIMEOUT_SECS", &mut self.upstream.feed_timeout_secs)?;
        override_parsed(&get, "SERVER_PORT", &mut self.server.port)?;
        override_parsed(&get, "SERVER_TRUST_FORWARDED_FOR", &mut self.server.trust_forwarded_for)?;
        override_parsed(&get, "LOGGING_JSON", &mut self.logging.json)?;

        if let Some(model) = get("UPSTREAM_MODEL") {
            self.upstream.model = model;
        }
        if let Some(key) = get("UPSTREAM_API_KEY").filter(|k| !k.is_empty()) {
            self.upstream.api_key = Some(key);
        }
        if let Some(bind) = get("SERVER_BIND") {
            self.server.bind = bind;
        }
        if let Some(level) = get("LOGGING_LEVEL") {
            self.logging.level = level;
        }
        Ok(())
    }

    /// Reject values that would disable the layer in surprising ways.
    pub fn validate(&self) -> Result<()> {
        if self.cache.service_ttl_secs == 0 {
            return Err(DigestError::Config(
                "cache.service_ttl_secs must be greater than 0".into(),
            ));
        }
        if self.cache.client_max_entries == 0
            || self.cache.service_max_entries == 0
            || self.cache.negative_max_entries == 0
        {
            return Err(DigestError::Config(
                "cache capacities must be greater than 0".into(),
            ));
        }
        if self.throttle.max_clients == 0 {
            return Err(DigestError::Config(
                "throttle.max_clients must be greater than 0".into(),
            ));
        }
        if self.upstream.timeout_secs == 0 {
            return Err(DigestError::Config(
                "upstream.timeout_secs must be greater than 0".into(),
            ));
        }
        if self.upstream.max_retries > MAX_RETRIES_LIMIT {
            return Err(DigestError::Config(format!(
                "upstream.max_retries must be at most {MAX_RETRIES_LIMIT}"
            )));
        }
        if self.upstream.model.trim().is_empty() {
            return Err(DigestError::Config("upstream.model must not be empty".into()));
        }
        Ok(())
    }
}

fn override_parsed<T, G>(get: &G, name: &str, slot: &mut T) -> Result<()>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    if let Some(raw) = get(name) {
        *slot = raw.trim().parse().map_err(|e| {
            DigestError::Config(format!("{ENV_PREFIX}{name}={raw:?} is invalid: {e}"))
        })?;
    }
    Ok(())
}
