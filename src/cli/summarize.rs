//! `newsdigest summarize`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use newsdigest::client::{HttpTransport, LocalTransport, SummaryClient, SummaryTransport};
use newsdigest::config::Config;
use newsdigest::error::DigestError;
use newsdigest::providers::{GeminiSummarizer, Summary, SummaryRequest};
use newsdigest::service::SummaryService;

/// Client key used for in-process requests.
const LOCAL_CLIENT_KEY: &str = "local-cli";

#[derive(clap::Args, Debug)]
pub struct SummarizeArgs {
    /// Feed URL (repeatable)
    #[arg(long = "feed", required = true)]
    pub feeds: Vec<String>,
    /// Topic filter
    #[arg(long)]
    pub category: Option<String>,
    /// Output language
    #[arg(long)]
    pub locale: Option<String>,
    /// Style hint, e.g. "bullet points"
    #[arg(long)]
    pub style: Option<String>,
    /// Base URL of a running `newsdigest serve`
    #[arg(long)]
    pub server: Option<String>,
    /// Print the summary as JSON
    #[arg(long)]
    pub json: bool,
}

impl SummarizeArgs {
    fn to_request(&self) -> SummaryRequest {
        let mut request = SummaryRequest::new(self.feeds.iter().cloned());
        if let Some(category) = &self.category {
            request = request.with_category(category.clone());
        }
        if let Some(locale) = &self.locale {
            request = request.with_locale(locale.clone());
        }
        if let Some(style) = &self.style {
            request = request.with_style(style.clone());
        }
        request
    }
}

pub(crate) async fn cmd_summarize(config: Config, args: SummarizeArgs) -> Result<()> {
    let request = args.to_request();

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let summary = match &args.server {
        Some(url) => {
            // The service enforces its own per-attempt timeout and retries.
            let budget = Duration::from_secs(
                config.upstream.timeout_secs * (u64::from(config.upstream.max_retries) + 1) + 5,
            );
            let transport = HttpTransport::new(url, budget)?;
            fetch(SummaryClient::new(transport, &config.cache), &request, &cancel).await?
        }
        None => {
            let summarizer = GeminiSummarizer::from_config(&config.upstream)
                .context("failed to configure the Gemini summarizer")?;
            let service = Arc::new(SummaryService::new(&config, Arc::new(summarizer)));
            let transport = LocalTransport::new(service, LOCAL_CLIENT_KEY);
            fetch(SummaryClient::new(transport, &config.cache), &request, &cancel).await?
        }
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(summary.as_ref())?);
    } else {
        print_summary(&summary);
    }
    Ok(())
}

async fn fetch<T: SummaryTransport>(
    client: SummaryClient<T>,
    request: &SummaryRequest,
    cancel: &CancellationToken,
) -> Result<Arc<Summary>> {
    client.get_summary(request, cancel).await.map_err(|e| match e {
        DigestError::Throttled { .. } | DigestError::Permanent { .. } => {
            anyhow::anyhow!("{}", e.user_message())
        }
        other => anyhow::Error::new(other).context("summary failed"),
    })
}

fn print_summary(summary: &Summary) {
    println!("{}", summary.text.trim());
    if !summary.sources.is_empty() {
        println!();
        println!("Sources:");
        for source in &summary.sources {
            match &source.link {
                Some(link) => println!("  - {} ({link})", source.title),
                None => println!("  - {}", source.title),
            }
        }
    }
    if let Some(usage) = summary.usage {
        println!();
        println!(
            "[{}; {} prompt + {} completion tokens]",
            summary.model, usage.prompt_tokens, usage.completion_tokens
        );
    }
}
