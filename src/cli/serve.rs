//! `newsdigest serve`.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use newsdigest::api::{start_server, AppState};
use newsdigest::config::Config;
use newsdigest::providers::GeminiSummarizer;
use newsdigest::service::SummaryService;

pub(crate) async fn cmd_serve(
    mut config: Config,
    bind: Option<String>,
    port: Option<u16>,
) -> Result<()> {
    if let Some(bind) = bind {
        config.server.bind = bind;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    let summarizer = GeminiSummarizer::from_config(&config.upstream)
        .context("failed to configure the Gemini summarizer")?;
    info!(
        model = %config.upstream.model,
        service_ttl_secs = config.cache.service_ttl_secs,
        negative_ttl_secs = config.cache.negative_ttl_secs,
        min_interval_ms = config.throttle.min_interval_ms,
        "Starting summary service"
    );

    let service = Arc::new(SummaryService::new(&config, Arc::new(summarizer)));
    let state = AppState::new(service, &config.server);
    start_server(&config.server, state)
        .await
        .with_context(|| {
            format!(
                "summary API failed on {}:{}",
                config.server.bind, config.server.port
            )
        })
}
