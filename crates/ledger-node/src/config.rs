//! Node configuration for the ledger service.
//!
//! [`NodeConfig`] carries the data directory, HTTP binding, logging settings
//! and the coinbase policy. Values are layered: built-in defaults, then an
//! optional TOML file, then `LEDGER_*` environment variables. Command-line
//! flags are applied on top by the binary.

use std::path::{Path, PathBuf};

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

use ledger_core::service::CoinbasePolicy;

/// Default HTTP port of the ledger API.
pub const DEFAULT_HTTP_PORT: u16 = 3000;

/// Prefix of environment variables read by [`NodeConfig::load`].
pub const ENV_PREFIX: &str = "LEDGER";

/// Configuration for a ledger node instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Root directory for all persistent data.
    pub data_dir: PathBuf,
    /// IP address for the HTTP server to bind to.
    pub http_bind: String,
    /// Port for the HTTP server.
    pub http_port: u16,
    /// Log level filter string (e.g. "info", "debug", "ledger_core=trace").
    pub log_level: String,
    /// Log output format, "text" or "json".
    pub log_format: String,
    /// Which blocks may carry coinbase transactions.
    pub coinbase_policy: CoinbasePolicy,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("utxo-ledger");

        Self {
            data_dir,
            http_bind: "127.0.0.1".to_string(),
            http_port: DEFAULT_HTTP_PORT,
            log_level: "info".to_string(),
            log_format: "text".to_string(),
            coinbase_policy: CoinbasePolicy::default(),
        }
    }
}

impl NodeConfig {
    /// Load configuration from defaults, an optional file and the environment.
    ///
    /// A missing `path` is an error; omitting `path` skips the file layer.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(path, Environment::with_prefix(ENV_PREFIX))
    }

    fn load_with_env(path: Option<&Path>, env: Environment) -> Result<Self, ConfigError> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        builder
            .add_source(env.try_parsing(true))
            .build()?
            .try_deserialize()
    }

    /// Path to the RocksDB ledger data directory.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("ledgerdata")
    }

    /// Socket address string for the HTTP server.
    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.http_bind, self.http_port)
    }
}
