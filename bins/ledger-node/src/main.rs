//! UTXO ledger node binary.
//!
//! Opens the RocksDB ledger, serves the HTTP API, and shuts down cleanly on
//! Ctrl+C.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use ledger_core::service::CoinbasePolicy;
use ledger_core::store::LedgerStore;
use ledger_node_lib::{router, AppState, NodeConfig, RocksLedgerStore};
use tracing::{info, warn};

/// Coinbase policy as accepted on the command line.
#[derive(Clone, Copy, Debug, ValueEnum)]
enum PolicyArg {
    AnyHeight,
    GenesisOnly,
}

impl From<PolicyArg> for CoinbasePolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::AnyHeight => CoinbasePolicy::AnyHeight,
            PolicyArg::GenesisOnly => CoinbasePolicy::GenesisOnly,
        }
    }
}

/// UTXO ledger node with RocksDB storage and an HTTP API.
#[derive(Parser, Debug)]
#[command(name = "ledger-node", version, about)]
struct Args {
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Data directory for ledger storage
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// HTTP server bind address
    #[arg(long)]
    http_bind: Option<String>,

    /// HTTP server port
    #[arg(long)]
    http_port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log output format ("text" or "json")
    #[arg(long)]
    log_format: Option<String>,

    /// Which blocks may carry input-less transactions
    #[arg(long, value_enum)]
    coinbase_policy: Option<PolicyArg>,
}

impl Args {
    /// Apply CLI flags on top of file and environment configuration.
    fn into_config(self) -> anyhow::Result<NodeConfig> {
        let base = NodeConfig::load(self.config.as_deref()).context("failed to load configuration")?;
        Ok(NodeConfig {
            data_dir: self.data_dir.unwrap_or(base.data_dir),
            http_bind: self.http_bind.unwrap_or(base.http_bind),
            http_port: self.http_port.unwrap_or(base.http_port),
            log_level: self.log_level.unwrap_or(base.log_level),
            log_format: self.log_format.unwrap_or(base.log_format),
            coinbase_policy: self
                .coinbase_policy
                .map(CoinbasePolicy::from)
                .unwrap_or(base.coinbase_policy),
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Args::parse().into_config()?;

    init_logging(&config.log_level, &config.log_format);

    info!("UTXO ledger node v{}", env!("CARGO_PKG_VERSION"));
    info!("data_dir: {:?}", config.data_dir);
    info!("http_addr: {}", config.http_addr());
    info!("coinbase_policy: {:?}", config.coinbase_policy);

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("failed to create data_dir {}", config.data_dir.display()))?;

    let store = Arc::new(
        RocksLedgerStore::open(config.db_path())
            .with_context(|| format!("failed to open ledger at {}", config.db_path().display()))?,
    );
    match store.highest_height()? {
        Some(height) => info!(height, "ledger opened"),
        None => info!("ledger opened empty"),
    }

    let app = router(AppState::new(Arc::clone(&store), config.coinbase_policy));

    let listener = tokio::net::TcpListener::bind(config.http_addr())
        .await
        .with_context(|| format!("failed to bind to {}", config.http_addr()))?;
    info!("listening on http://{}", config.http_addr());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    if let Err(e) = store.flush() {
        warn!("failed to flush ledger on shutdown: {e}");
    }
    info!("ledger node shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C. If the handler cannot be installed the server runs
/// until killed.
async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received Ctrl+C, shutting down..."),
        Err(e) => {
            warn!("failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    }
}

/// Initialize tracing subscriber with the given log level and output format.
///
/// Pass `format = "json"` for structured JSON output. Any other value
/// defaults to human-readable text. `RUST_LOG` takes precedence over `level`.
fn init_logging(level: &str, format: &str) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}
