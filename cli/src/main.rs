//! ChainWatch CLI.
//!
//! # Commands
//! ```text
//! chainwatch run     [--config configs/config.yaml] [--stop-at <height>]
//! chainwatch status  [--config configs/config.yaml]
//! chainwatch verify  [--config configs/config.yaml]
//! chainwatch info
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::{broadcast, watch};

use chainwatch_core::{verify_continuity, CheckpointStore, IndexerConfig, PipelineEvent};
use chainwatch_evm::{event_topic, IndexerBuilder, JsonRpcGateway, RpcConfig, TRANSFER_SIGNATURE};
use chainwatch_storage::Storage;

mod config;
mod logging;

use config::AppConfig;

#[derive(Parser)]
#[command(
    name = "chainwatch",
    about = "Reorg-aware ERC-20 Transfer scanner — ChainWatch CLI",
    long_about = "
ChainWatch follows an EVM chain block by block, decodes Transfer events of one
token contract and checkpoints every accepted block. Forks are unwound one block
at a time until the chain links up again.

ENVIRONMENT VARIABLES:
  RUST_LOG    Overrides the log filter from the config file
",
    version
)]
struct Cli {
    /// Path to the YAML config file
    #[arg(short, long, global = true, default_value = "configs/config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan the chain until Ctrl-C (or --stop-at)
    Run {
        /// Stop after this height has been persisted
        #[arg(long)]
        stop_at: Option<u64>,
    },

    /// Show the highest stored checkpoint
    Status,

    /// Check parent-hash continuity of every stored checkpoint
    Verify,

    /// Show build info and pipeline defaults
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { stop_at } => cmd_run(&cli.config, stop_at).await,
        Commands::Status => cmd_status(&cli.config).await,
        Commands::Verify => cmd_verify(&cli.config).await,
        Commands::Info => cmd_info(),
    }
}

fn load(path: &Path) -> Result<AppConfig> {
    let cfg = AppConfig::load(path)?;
    logging::init(&cfg.log, &cfg.app.env);
    Ok(cfg)
}

async fn cmd_run(path: &Path, stop_at: Option<u64>) -> Result<()> {
    let cfg = load(path)?;
    tracing::info!(app = %cfg.app.name, env = %cfg.app.env, "starting");

    let gateway = JsonRpcGateway::connect(RpcConfig {
        url: cfg.chain.rpc_url.clone(),
        request_timeout: cfg.chain.request_timeout(),
        expected_chain_id: cfg.chain.chain_id,
    })
    .await
    .with_context(|| format!("connecting to {}", cfg.chain.rpc_url))?;

    let storage = Storage::open(&cfg.database.url)
        .await
        .context("opening storage")?;
    tracing::info!(backend = storage.kind(), "storage ready");

    let mut builder = IndexerBuilder::from_config(cfg.indexer.clone())
        .track_transfers(&cfg.chain.contract_address);
    if let Some(height) = stop_at {
        builder = builder.stop_at(height);
    }
    let pipeline = builder.build(
        Arc::new(gateway),
        storage.checkpoints.clone(),
        storage.events.clone(),
    );

    let reporter = tokio::spawn(report_reorgs(pipeline.subscribe()));
    let dead_letters = pipeline.dead_letters();

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, draining");
            let _ = stop_tx.send(true);
        }
    });

    let outcome = pipeline.run(stop_rx).await;
    reporter.abort();

    match outcome {
        Ok(report) => {
            tracing::info!(
                next_height = report.cursor.next_height,
                durable_tail = ?report.durable_tail,
                state = %report.state,
                "stopped"
            );
            Ok(())
        }
        Err(e) => {
            for letter in dead_letters.drain() {
                tracing::error!(
                    height = letter.item.block.height,
                    events = letter.item.events.len(),
                    error = %letter.error,
                    "dead letter"
                );
            }
            Err(e).context("pipeline halted")
        }
    }
}

async fn report_reorgs(mut events: broadcast::Receiver<PipelineEvent>) {
    let mut reorgs = 0u64;
    loop {
        match events.recv().await {
            Ok(PipelineEvent::RollbackComplete {
                unwound_height,
                next_height,
            }) => {
                reorgs += 1;
                tracing::info!(reorgs, unwound_height, next_height, "fork unwound");
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "event reporter lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn cmd_status(path: &Path) -> Result<()> {
    let cfg = load(path)?;
    let storage = Storage::open(&cfg.database.url)
        .await
        .context("opening storage")?;

    match storage.checkpoints.highest().await? {
        Some(cp) => {
            println!("backend:      {}", storage.kind());
            println!("height:       {}", cp.height);
            println!("block hash:   {}", cp.block_hash);
            println!("parent hash:  {}", cp.parent_hash);
            println!("observed at:  {}", cp.observed_at.to_rfc3339());
            println!("resume from:  {}", cp.height + 1);
        }
        None => println!("no checkpoints stored ({})", storage.kind()),
    }
    Ok(())
}

async fn cmd_verify(path: &Path) -> Result<()> {
    let cfg = load(path)?;
    let storage = Storage::open(&cfg.database.url)
        .await
        .context("opening storage")?;

    let checkpoints = storage.checkpoints().await?;
    let (Some(first), Some(last)) = (checkpoints.first(), checkpoints.last()) else {
        println!("no checkpoints stored");
        return Ok(());
    };
    let span = last.height - first.height + 1;
    let gaps = span - checkpoints.len() as u64;

    match verify_continuity(&checkpoints) {
        Ok(()) => {
            println!(
                "✓ {} checkpoints [{}..={}] link up ({gaps} gaps)",
                checkpoints.len(),
                first.height,
                last.height
            );
            Ok(())
        }
        Err(brk) => Err(anyhow!(
            "continuity broken at {}: parent {} does not match stored hash {} at {}",
            brk.height,
            brk.actual_parent,
            brk.expected_parent,
            brk.height - 1
        )),
    }
}

fn cmd_info() -> Result<()> {
    let defaults = IndexerConfig::default();
    println!("ChainWatch v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Tracked event:   {TRANSFER_SIGNATURE}");
    println!("  topic0:        {}", event_topic(TRANSFER_SIGNATURE));
    println!("Storage:         memory, sqlite, postgres");
    println!();
    println!("Defaults:");
    println!("  lookback               {}", defaults.lookback);
    println!("  queue_capacity         {}", defaults.queue_capacity);
    println!("  poll_interval_ms       {}", defaults.poll_interval_ms);
    println!("  source_retry_ms        {}", defaults.source_retry_ms);
    println!(
        "  rollback_retry         {} ms x {}",
        defaults.rollback_retry_ms, defaults.max_rollback_attempts
    );
    println!(
        "  persist_retry          {} ms x {}",
        defaults.persist_retry_ms, defaults.max_persist_attempts
    );
    println!("  reorg_check            {:?}", defaults.reorg_check);
    println!("  backpressure           {:?}", defaults.backpressure);
    Ok(())
}
