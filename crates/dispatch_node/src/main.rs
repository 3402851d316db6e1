//! Dispatch node: runs the core and speaks JSON lines on stdin/stdout.
//!
//! Logs go to stderr so stdout carries only protocol messages.

mod node;
mod protocol;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use dispatch_core::clock::SystemClock;
use dispatch_core::config::DispatchConfig;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use node::Node;
use protocol::Outbound;

#[derive(Parser, Debug)]
#[command(name = "dispatch_node")]
#[command(about = "Run the ride dispatch core over a JSON-lines stdin/stdout boundary")]
struct Args {
    /// JSON configuration file; built-in defaults when omitted
    #[arg(short, long, env = "DISPATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Override the number of ingestion shards
    #[arg(long, env = "DISPATCH_SHARDS")]
    shards: Option<usize>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, env = "DISPATCH_LOG", default_value = "info")]
    log_level: String,

    /// Entry capacity of the in-memory location cache
    #[arg(long, env = "DISPATCH_CACHE_CAPACITY", default_value_t = 100_000)]
    cache_capacity: usize,
}

fn load_config(args: &Args) -> anyhow::Result<DispatchConfig> {
    let mut config = match &args.config {
        Some(path) => DispatchConfig::from_json_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => DispatchConfig::default(),
    };
    if let Some(shards) = args.shards {
        config.ingestion.shards = shards;
    }
    Ok(config)
}

async fn write_line<W: AsyncWrite + Unpin>(out: &mut W, message: &Outbound) -> anyhow::Result<()> {
    let mut line = serde_json::to_vec(message)?;
    line.push(b'\n');
    out.write_all(&line).await?;
    out.flush().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log_level)),
        )
        .init();

    let config = load_config(&args)?;
    info!(config = ?args.config, shards = config.ingestion.shards, "configuration loaded");

    let shutdown = CancellationToken::new();
    let (node, mut events) = Node::start(
        &config,
        Arc::new(SystemClock),
        args.cache_capacity,
        &shutdown,
    )?;

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if let Err(error) = tokio::signal::ctrl_c().await {
            warn!(%error, "failed to listen for ctrl-c");
            return;
        }
        info!("ctrl-c received, shutting down");
        signal_token.cancel();
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        let outbound = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => Outbound::Event { event },
                None => break,
            },
            line = lines.next_line() => match line.context("reading stdin")? {
                Some(line) => match protocol::handle_line(&node, &line).await {
                    Some(reply) => reply,
                    None => continue,
                },
                None => {
                    info!("stdin closed");
                    break;
                }
            },
        };
        write_line(&mut stdout, &outbound).await?;
    }

    shutdown.cancel();
    node.join().await;
    while let Ok(event) = events.try_recv() {
        write_line(&mut stdout, &Outbound::Event { event }).await?;
    }
    Ok(())
}
