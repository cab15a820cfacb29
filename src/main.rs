//! Crash Engine server binary
//!
//! Loads configuration, restores the wallet ledger from its journal, runs
//! the round scheduler and serves the HTTP/WebSocket API until shutdown.

use clap::Parser;
use crash_engine::{
    api::{shutdown_signal, ApiServer},
    config::{ConfigLoader, EngineConfig},
    engine::CrashEngine,
    errors::EngineResult,
    metrics::EngineMetrics,
    wallet::{read_journal, FileJournal, LedgerJournal, NullJournal, WalletLedger},
};
use std::{path::PathBuf, sync::Arc};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "crash-engine")]
#[command(about = "Multiplayer crash game server", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// API server host
    #[arg(long)]
    host: Option<String>,

    /// API server port
    #[arg(long)]
    port: Option<u16>,

    /// Wallet journal file (JSON Lines)
    #[arg(long)]
    journal: Option<String>,

    /// Print the default configuration as TOML and exit
    #[arg(long)]
    print_default_config: bool,
}

#[tokio::main]
async fn main() -> EngineResult<()> {
    let cli = Cli::parse();

    if cli.print_default_config {
        println!("{}", ConfigLoader::to_toml(&EngineConfig::default())?);
        return Ok(());
    }

    let mut loader = ConfigLoader::new();
    if let Some(ref path) = cli.config {
        loader = loader.with_path(path);
    }
    let mut config = loader.load()?;

    // CLI flags win over file and environment
    if let Some(host) = cli.host {
        config.api.host = host;
    }
    if let Some(port) = cli.port {
        config.api.port = port;
    }
    if let Some(journal) = cli.journal {
        config.wallet.journal_path = Some(journal);
    }
    config.validate()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.filter)))
        .init();

    info!("🚀 Starting Crash Engine v{}", env!("CARGO_PKG_VERSION"));

    let metrics = Arc::new(EngineMetrics::new());
    let (ledger, file_journal) = open_ledger(&config, &metrics)?;
    if config.wallet.demo_opening_balance.is_some() {
        warn!("⚠️  Demo wallets enabled: unknown players are funded automatically");
    }

    let engine = Arc::new(CrashEngine::new(config.clone(), ledger, metrics)?);
    let tasks = engine.start();

    let server = ApiServer::new(config.api.clone(), engine.clone());
    let served = server.run(shutdown_signal()).await;

    engine.stop();
    tasks.join().await;
    if let Some(journal) = file_journal {
        journal.close().await?;
        info!("📒 Wallet journal closed");
    }

    served?;
    info!("👋 Crash Engine stopped");
    Ok(())
}

/// Rebuild the ledger from the journal, or start empty without one
fn open_ledger(
    config: &EngineConfig,
    metrics: &Arc<EngineMetrics>,
) -> EngineResult<(Arc<WalletLedger>, Option<Arc<FileJournal>>)> {
    let Some(ref path) = config.wallet.journal_path else {
        warn!("⚠️  No wallet journal configured; balances will not survive a restart");
        let journal: Arc<dyn LedgerJournal> = Arc::new(NullJournal);
        return Ok((Arc::new(WalletLedger::new(journal)), None));
    };

    let records = read_journal(path)?;
    info!("📂 Replaying {} journal records from {}", records.len(), path);

    let file_journal = Arc::new(FileJournal::open(
        path,
        config.wallet.journal_retry_attempts,
        config.journal_retry_backoff(),
        Some(metrics.clone()),
    )?);
    let ledger = WalletLedger::restore(records, file_journal.clone())?;
    info!("✅ Restored {} wallets", ledger.account_count());

    Ok((Arc::new(ledger), Some(file_journal)))
}
