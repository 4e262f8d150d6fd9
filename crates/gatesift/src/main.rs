//! gatesift CLI: run a blocklist scan against a configured gateway and
//! stream the scan events as JSON lines on stdout.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gatesift::config_file;
use gatesift::engine::HttpTransport;
use gatesift::scanner::ScanCoordinator;
use gatesift_logging::{init_logging, LogConfig};
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

/// Capacity of the scan event channel. Log events are dropped when the
/// consumer lags; everything else applies backpressure.
const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Parser)]
#[command(name = "gatesift", version, about = "Recover the keyword blocklist a gateway enforces on prompts")]
struct Cli {
    /// Mirror the log file on stderr.
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan a text and report every blocking substring with offsets.
    Scan {
        /// Path to the JSON config file.
        #[arg(short, long)]
        config: PathBuf,
        /// Input text file; reads stdin when omitted.
        #[arg(short, long)]
        input: Option<PathBuf>,
    },
    /// Validate a config file without issuing any probes.
    CheckConfig {
        /// Path to the JSON config file.
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(LogConfig {
        app_name: "gatesift",
        verbose: cli.verbose,
    })?;

    match cli.command {
        Commands::Scan { config, input } => scan(config, input).await,
        Commands::CheckConfig { config } => check_config(config),
    }
}

async fn scan(config_path: PathBuf, input: Option<PathBuf>) -> Result<()> {
    let config = config_file::load(&config_path)?;
    config
        .validate_connection()
        .context("configuration rejected")?;

    let text = match input {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read input file: {}", path.display()))?,
        None => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("failed to read stdin")?;
            buffer
        }
    };

    let transport = Arc::new(HttpTransport::new(&config).map_err(|e| anyhow::anyhow!("{e}"))?);
    let (tx, mut rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let coordinator = ScanCoordinator::new(config, transport, tx);

    // Ctrl-C requests cooperative cancellation; in-flight probes finish.
    let cancel = coordinator.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling scan");
            cancel.cancel();
        }
    });

    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => warn!(error = %e, "failed to serialize event"),
            }
        }
    });

    let summary = coordinator.scan(&text).await?;
    drop(coordinator);
    printer.await.ok();

    if summary.partial {
        anyhow::bail!(
            "scan ended early ({}): {} keyword(s) gathered, unverified",
            if summary.cancelled { "cancelled" } else { "probe failure" },
            summary.findings.len()
        );
    }
    Ok(())
}

fn check_config(config_path: PathBuf) -> Result<()> {
    let config = config_file::load(&config_path)?;
    config
        .validate_connection()
        .context("configuration rejected")?;
    println!(
        "config ok: concurrency={} chunk_size={} switch_threshold={} overlap_size={}",
        config.concurrency, config.chunk_size, config.switch_threshold, config.overlap_size
    );
    Ok(())
}
