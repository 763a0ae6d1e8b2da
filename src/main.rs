// SPDX-License-Identifier: MIT
//! `mediq` — terminal client for the MediQueue triage service.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};

use mediq::cli::{run_queue_once, run_shell, ShellOpts};
use mediq::config::ClientConfig;

#[derive(Parser)]
#[command(
    name = "mediq",
    about = "MediQueue — walk-in triage chat and queue client",
    version
)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Patient name (optional)
    #[arg(long)]
    name: Option<String>,

    /// Patient phone number (optional)
    #[arg(long)]
    phone: Option<String>,

    /// Base URL of the triage service
    #[arg(long, env = "MEDIQ_API_URL")]
    api_url: Option<String>,

    /// Explicit push (WebSocket) endpoint; the session id is appended
    #[arg(long, env = "MEDIQ_WS_URL")]
    ws_url: Option<String>,

    /// Path to config.toml
    #[arg(long, env = "MEDIQ_CONFIG")]
    config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error)
    #[arg(long, env = "MEDIQ_LOG")]
    log: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Start a triage session and chat interactively (default).
    Chat,
    /// Print the current queue once and exit.
    Queue,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr so they never interleave with the conversation.
    let log_level = args.log.clone().unwrap_or_else(|| "warn".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(log_level))
        .with_writer(std::io::stderr)
        .compact()
        .init();

    // Priority: CLI / env var  >  config.toml  >  built-in default.
    let mut config = ClientConfig::load(args.config.as_deref());
    if let Some(url) = args.api_url {
        config.api_url = url;
    }
    if args.ws_url.is_some() {
        config.ws_url = args.ws_url;
    }
    let config = Arc::new(config);

    match args.command {
        Some(Command::Queue) => run_queue_once(config).await,
        Some(Command::Chat) | None => {
            run_shell(
                config,
                ShellOpts {
                    name: args.name,
                    phone: args.phone,
                },
            )
            .await
        }
    }
}
