//! Command-line interface.

mod config;
mod serve;
mod summarize;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use newsdigest::config::Config;

#[derive(Parser, Debug)]
#[command(name = "newsdigest", version, about = "Cached LLM news digests")]
pub struct Cli {
    /// Config file (defaults to ~/.newsdigest/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the HTTP summary service
    Serve {
        /// Address to bind (overrides server.bind)
        #[arg(long)]
        bind: Option<String>,
        /// Port to listen on (overrides server.port)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Produce a single digest
    Summarize(summarize::SummarizeArgs),
    /// Print the effective configuration as TOML
    Config,
}

pub async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref()).with_context(|| match &cli.config {
        Some(p) => format!("failed to load config from {}", p.display()),
        None => "failed to load config".to_string(),
    })?;
    newsdigest::logging::init(&config.logging);

    match cli.command {
        Command::Serve { bind, port } => serve::cmd_serve(config, bind, port).await,
        Command::Summarize(args) => summarize::cmd_summarize(config, args).await,
        Command::Config => config::cmd_config(&config),
    }
}
